//! Engine configuration.
//!
//! Type-safe configuration loading from environment variables using the
//! `config` and `dotenvy` crates. Values are read with the `FORMWIRE_`
//! prefix and nested values use `__` as separator, e.g.
//! `FORMWIRE_POOL__IDLE_TTL_SECS=600`.

use serde::Deserialize;
use thiserror::Error;

/// Configuration loading or validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {field}: {reason}")]
    Invalid { field: String, reason: String },
}

/// Session-establishment parameters sent with every connection handshake.
///
/// The engine does not perform login; these identify the client build to the
/// server once the authentication collaborator has produced a transport.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientInfo {
    #[serde(default = "default_client_type")]
    pub client_type: String,
    #[serde(default = "default_client_version")]
    pub client_version: String,
    #[serde(default = "default_culture")]
    pub culture: String,
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            client_type: default_client_type(),
            client_version: default_client_version(),
            culture: default_culture(),
            time_zone: default_time_zone(),
        }
    }
}

fn default_client_type() -> String {
    "Web".to_string()
}
fn default_client_version() -> String {
    "1.0".to_string()
}
fn default_culture() -> String {
    "en-US".to_string()
}
fn default_time_zone() -> String {
    "UTC".to_string()
}

/// Session pool tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Idle TTL in seconds. Must sit below the remote server's own idle
    /// timeout; 15 minutes by default.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,

    /// How often the idle-cleanup task scans the pool.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_idle_ttl_secs() -> u64 {
    900
}
fn default_cleanup_interval_secs() -> u64 {
    60
}

/// Wait tuning for event-bus predicates.
#[derive(Debug, Clone, Deserialize)]
pub struct WaitConfig {
    #[serde(default = "default_wait_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_wait_timeout_ms(),
        }
    }
}

fn default_wait_timeout_ms() -> u64 {
    30_000
}

/// Root engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub client: ClientInfo,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub wait: WaitConfig,
}

impl EngineConfig {
    /// Loads configuration from the environment (and `.env` if present).
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("FORMWIRE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.idle_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "pool.idle_ttl_secs".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.pool.cleanup_interval_secs > self.pool.idle_ttl_secs {
            return Err(ConfigError::Invalid {
                field: "pool.cleanup_interval_secs".to_string(),
                reason: "must not exceed the idle TTL".to_string(),
            });
        }
        if self.wait.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "wait.default_timeout_ms".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}
