//! Quarry Server: the HTTP layer over the federation engine.
//!
//! - **REST** under `/api`: SQL queries (Arrow IPC, or JSON on request), raw metric data
//!   as CSV, table listing and catalog refresh.
//! - **Logging**: stdout through `RUST_LOG`, plus one JSON line per query in
//!   `<log_dir>/queries.jsonl` when a log directory is configured.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Json, Router};
use quarry_common::config::AppConfig;
use quarry_connectors::default_registry;
use quarry_runtime::{FederationEngine, FederationEngineOptions, TableRegistry};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub mod api;

pub use api::ApiState;

pub struct QuarryServer {
    app_config_path: String,
    catalog_path: Option<String>,
    observability_enabled: bool,
}

impl Default for QuarryServer {
    fn default() -> Self {
        Self {
            app_config_path: "config/quarry.yaml".to_string(),
            catalog_path: None,
            observability_enabled: false,
        }
    }
}

impl QuarryServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app_config(mut self, app_config_path: &str) -> Self {
        self.app_config_path = app_config_path.to_string();
        self
    }

    /// Overrides `server.catalog_path` from the application config.
    pub fn with_catalog(mut self, catalog_path: &str) -> Self {
        self.catalog_path = Some(catalog_path.to_string());
        self
    }

    pub fn with_observability(mut self, enabled: bool) -> Self {
        self.observability_enabled = enabled;
        self
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let app_config = AppConfig::from_file(&self.app_config_path)?;
        init_tracing(&app_config, self.observability_enabled)?;

        let catalog_path = self
            .catalog_path
            .unwrap_or_else(|| app_config.server.catalog_path.clone());
        let registry = TableRegistry::from_file(&catalog_path)
            .with_context(|| format!("Failed to load catalog from {}", catalog_path))?;
        let loaders = default_registry(&app_config.fetch)?;

        let engine = Arc::new(FederationEngine::new(FederationEngineOptions {
            registry: Arc::new(registry),
            loaders: Arc::new(loaders),
            engine: app_config.engine.clone(),
            cache: app_config.cache.clone(),
        }));
        info!(
            tables = ?engine.registry().table_names(),
            metrics = engine.registry().metric_names().len(),
            "catalog loaded"
        );

        let app = build_router(ApiState {
            engine,
            catalog_path: Arc::new(PathBuf::from(catalog_path)),
            stream_batch_rows: app_config.engine.stream_batch_rows,
        });

        let addr: SocketAddr = app_config
            .server
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address {}", app_config.server.listen_addr))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        info!("Quarry API listening on {}", addr);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        quarry_common::telemetry::shutdown_telemetry();
        served.context("REST API server error")
    }
}

/// `/health` plus the API nested under `/api`.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api::create_api_router(state))
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn init_tracing(app_config: &AppConfig, observability_enabled: bool) -> anyhow::Result<()> {
    let otel_layer = if observability_enabled {
        quarry_common::telemetry::init_telemetry(&app_config.telemetry)?
    } else {
        Box::new(tracing_subscriber::layer::Identity::new())
    };

    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );

    let queries_layer = match &app_config.server.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, "queries.jsonl");
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(appender)
                    .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
                        metadata.target() == "queries"
                    })),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(otel_layer)
        .with(queries_layer)
        .try_init()
        .ok();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
