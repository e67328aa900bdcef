use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing::info;

const CONFIG_DIR: &str = "config";
const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub log_level: String,
    pub log_json: bool,
    pub auto_migrate: bool,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
}

/// Tunables for the warehouse session core.
#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseConfig {
    /// Sessions with no activity for this many hours are eligible for the
    /// stale-session reaper.
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: i64,
    /// Bounded retries for the pack-unit claim before surfacing Conflict.
    #[serde(default = "default_claim_retry_attempts")]
    pub claim_retry_attempts: u32,
    /// Base delay for the claim retry backoff; jitter is added per attempt.
    #[serde(default = "default_claim_retry_base_delay_ms")]
    pub claim_retry_base_delay_ms: u64,
}

fn default_stale_after_hours() -> i64 {
    48
}

fn default_claim_retry_attempts() -> u32 {
    5
}

fn default_claim_retry_base_delay_ms() -> u64 {
    20
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            stale_after_hours: default_stale_after_hours(),
            claim_retry_attempts: default_claim_retry_attempts(),
            claim_retry_base_delay_ms: default_claim_retry_base_delay_ms(),
        }
    }
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn server_addr(&self) -> Result<SocketAddr, AppConfigError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| AppConfigError::Invalid(format!("invalid host: {}", self.host)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads application configuration.
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. config/default.toml
/// 3. config/{env}.toml
/// 4. Environment variables (APP_*, `__` as section separator)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://packhouse.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("auto_migrate", true)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    if app_config.warehouse.stale_after_hours <= 0 {
        return Err(AppConfigError::Invalid(
            "warehouse.stale_after_hours must be positive".into(),
        ));
    }
    if app_config.warehouse.claim_retry_attempts == 0 {
        return Err(AppConfigError::Invalid(
            "warehouse.claim_retry_attempts must be at least 1".into(),
        ));
    }

    Ok(app_config)
}

/// Initializes the global tracing subscriber. RUST_LOG overrides the
/// configured level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("packhouse_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}
