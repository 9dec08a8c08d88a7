use anyhow::{Context, Result};
use serde::Deserialize;
use validator::Validate;

// Default constants
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_CATALOG_PATH: &str = "config/catalog.yaml";
pub const DEFAULT_SERVICE_NAME: &str = "quarry";

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_USER_AGENT: &str = concat!("quarry/", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_STREAM_BATCH_ROWS: usize = 8192;
pub const MIN_LOAD_CONCURRENCY: usize = 4;

pub const DEFAULT_CACHE_CAPACITY: u64 = 100;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

pub const DEFAULT_TELEMETRY_ENABLED: bool = false;
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

#[derive(Debug, Deserialize, Default, Clone, Validate)]
pub struct AppConfig {
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerSettings,
    #[serde(default)]
    #[validate(nested)]
    pub fetch: FetchSettings,
    #[serde(default)]
    #[validate(nested)]
    pub engine: EngineSettings,
    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheSettings,
    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct ServerSettings {
    #[serde(default = "default_listen_addr")]
    #[validate(length(min = 1))]
    pub listen_addr: String,

    #[serde(default = "default_catalog_path")]
    #[validate(length(min = 1))]
    pub catalog_path: String,

    /// Directory for JSON query logs; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            catalog_path: default_catalog_path(),
            log_dir: None,
        }
    }
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_catalog_path() -> String {
    DEFAULT_CATALOG_PATH.to_string()
}

/// Outbound transport settings for HTTP metric sources.
#[derive(Debug, Deserialize, Clone, Validate)]
pub struct FetchSettings {
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    #[validate(range(min = 1))]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct EngineSettings {
    /// Upper bound on concurrent metric loads; derived from the core count when unset
    #[serde(default)]
    #[validate(range(min = 1))]
    pub load_concurrency: Option<usize>,

    #[serde(default = "default_stream_batch_rows")]
    #[validate(range(min = 1))]
    pub stream_batch_rows: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            load_concurrency: None,
            stream_batch_rows: default_stream_batch_rows(),
        }
    }
}

impl EngineSettings {
    /// `max(4, 2 * cores)` unless configured explicitly.
    pub fn effective_load_concurrency(&self) -> usize {
        self.load_concurrency.unwrap_or_else(|| {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            (cores * 2).max(MIN_LOAD_CONCURRENCY)
        })
    }
}

fn default_stream_batch_rows() -> usize {
    DEFAULT_STREAM_BATCH_ROWS
}

#[derive(Debug, Deserialize, Default, Clone, Validate)]
pub struct CacheSettings {
    #[serde(default)]
    #[validate(nested)]
    pub metrics: CacheTierSettings,
    #[serde(default)]
    #[validate(nested)]
    pub queries: CacheTierSettings,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct CacheTierSettings {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    #[serde(default = "default_cache_capacity")]
    #[validate(range(min = 1))]
    pub max_capacity: u64,

    #[serde(default = "default_cache_ttl_secs")]
    #[validate(range(min = 1))]
    pub ttl_secs: u64,
}

impl Default for CacheTierSettings {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_capacity() -> u64 {
    DEFAULT_CACHE_CAPACITY
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_otlp_endpoint")]
    #[validate(url)]
    pub endpoint: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            endpoint: default_otlp_endpoint(),
            service_name: default_service_name(),
        }
    }
}

fn default_telemetry_enabled() -> bool {
    DEFAULT_TELEMETRY_ENABLED
}

fn default_otlp_endpoint() -> String {
    DEFAULT_OTLP_ENDPOINT.to_string()
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

impl AppConfig {
    /// Load from an optional YAML file, then apply `QUARRY__SECTION__KEY`
    /// environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = config::Config::builder();

        let builder = if std::path::Path::new(path).exists() {
            builder.add_source(config::File::with_name(path))
        } else {
            builder
        };

        let builder = builder.add_source(
            config::Environment::with_prefix("QUARRY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().context("Failed to build configuration")?;

        let app_config: AppConfig = cfg
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {:?}", e))?;

        Ok(app_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_app_config_defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fetch.request_timeout_secs, 30);
        assert_eq!(config.fetch.connect_timeout_secs, 10);
        assert_eq!(config.cache.metrics.max_capacity, 100);
        assert_eq!(config.cache.queries.ttl_secs, 3600);
        assert_eq!(config.engine.stream_batch_rows, 8192);
    }

    #[test]
    fn test_load_concurrency_floor() {
        let engine = EngineSettings::default();
        assert!(engine.effective_load_concurrency() >= MIN_LOAD_CONCURRENCY);

        let fixed = EngineSettings {
            load_concurrency: Some(2),
            ..Default::default()
        };
        assert_eq!(fixed.effective_load_concurrency(), 2);
    }

    #[test]
    fn test_telemetry_config_validation() {
        let config = TelemetryConfig {
            endpoint: "not_a_url".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let tier = CacheTierSettings {
            max_capacity: 0,
            ..Default::default()
        };
        assert!(tier.validate().is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  catalog_path: /etc/quarry/catalog.yaml\ncache:\n  queries:\n    enabled: false\n    max_capacity: 10"
        )
        .unwrap();

        let config = AppConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.catalog_path, "/etc/quarry/catalog.yaml");
        assert!(!config.cache.queries.enabled);
        assert_eq!(config.cache.queries.max_capacity, 10);
        assert!(config.cache.metrics.enabled);
    }
}
