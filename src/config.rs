use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::GovernanceError;

/// Service configuration, layered: built-in defaults, then an optional
/// `config/{run_mode}.toml` file, then `GOVERNANCE_`-prefixed environment
/// variables (`GOVERNANCE_STORAGE__BUCKET=...`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment environment label stamped into artifact paths.
    pub environment: String,
    /// Deployment region label stamped into artifact paths.
    pub region: String,
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
    pub identity: IdentitySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Application-role connection URL.
    pub url: String,
    /// Privileged URL for migrations; falls back to `url`.
    pub admin_url: Option<String>,
    /// Read-only URL for reporting; falls back to `url`.
    pub analytics_url: Option<String>,
}

impl DatabaseSettings {
    pub fn admin_url(&self) -> &str {
        self.admin_url.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// `filesystem` or `s3`.
    pub backend: String,
    /// Root directory for the filesystem backend.
    pub root: String,
    /// Endpoint URL for the s3 backend.
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Path-style addressing (MinIO and most self-hosted stores).
    pub path_style: bool,
    /// Optional key prefix prepended to every object.
    pub prefix: Option<String>,
}

/// Identity-provider parameters; opaque to the core, which only consumes
/// resolved principals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySettings {
    pub provider_url: String,
    pub audience: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, GovernanceError> {
        let run_mode =
            std::env::var("GOVERNANCE_RUN_MODE").unwrap_or_else(|_| "local".to_string());

        let raw = Config::builder()
            .set_default("environment", "local")
            .and_then(|b| b.set_default("region", "LOCAL"))
            .and_then(|b| b.set_default("server.host", "0.0.0.0"))
            .and_then(|b| b.set_default("server.port", 3000))
            .and_then(|b| b.set_default("database.url", "sqlite://governance.db"))
            .and_then(|b| b.set_default("storage.backend", "filesystem"))
            .and_then(|b| b.set_default("storage.root", "./artifacts"))
            .and_then(|b| b.set_default("storage.endpoint", ""))
            .and_then(|b| b.set_default("storage.bucket", ""))
            .and_then(|b| b.set_default("storage.region", ""))
            .and_then(|b| b.set_default("storage.access_key", ""))
            .and_then(|b| b.set_default("storage.secret_key", ""))
            .and_then(|b| b.set_default("storage.path_style", true))
            .and_then(|b| b.set_default("identity.provider_url", ""))
            .and_then(|b| b.set_default("identity.audience", ""))
            .map_err(config_error)?
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("GOVERNANCE").separator("__"))
            .build()
            .map_err(config_error)?;

        raw.try_deserialize().map_err(config_error)
    }
}

fn config_error(err: ::config::ConfigError) -> GovernanceError {
    GovernanceError::validation(format!("configuration error: {}", err))
}
