use quarry_common::config::AppConfig;
use quarry_server::QuarryServer;

#[derive(clap::Parser)]
#[command(version, about = "Quarry metric federation server")]
struct Args {
    #[arg(long, env = "QUARRY_CONFIG", default_value = "config/quarry.yaml")]
    config: String,

    /// Catalog YAML; defaults to `server.catalog_path` from the config
    #[arg(long)]
    catalog: Option<String>,

    /// Export spans over OTLP when `telemetry.enabled` is set
    #[arg(long)]
    observability: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = <Args as clap::Parser>::parse();

    let app_config = AppConfig::from_file(&args.config).unwrap_or_default();
    let catalog = args
        .catalog
        .clone()
        .unwrap_or_else(|| app_config.server.catalog_path.clone());

    println!("--------------------------------------------------");
    println!("   Quarry {}", env!("CARGO_PKG_VERSION"));
    println!("   Server Addr: {}", app_config.server.listen_addr);
    println!("   Catalog:     {}", catalog);
    println!("--------------------------------------------------");

    let mut server = QuarryServer::new()
        .with_app_config(&args.config)
        .with_observability(args.observability);
    if let Some(catalog) = &args.catalog {
        server = server.with_catalog(catalog);
    }
    server.run().await
}
