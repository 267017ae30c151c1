use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::correlation::{DEFAULT_SHARD_COUNT, DEFAULT_TTL};

/// Config file picked up from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "callback-relay.toml";
/// Prefix for environment overrides, e.g. `CALLBACK_RELAY_STORE__TTL_SECONDS`.
pub const ENV_PREFIX: &str = "CALLBACK_RELAY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Main configuration structure for the relay
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub observability: ObservabilityConfig,
    /// One correlation store and one pair of endpoints per entry
    pub integrations: Vec<IntegrationConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address for the HTTP server
    pub bind_addr: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoreConfig {
    /// How long an entry stays reachable after it was received
    pub ttl_seconds: u64,
    /// Interval of the background expiry sweep
    pub sweep_interval_seconds: u64,
    /// Number of independently locked shards per store
    pub shard_count: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Default log filter when RUST_LOG is unset
    pub log_level: String,
    /// Emit structured JSON logs instead of human-readable lines
    pub json_logs: bool,
}

/// Discriminant contract agreed between the workflow trigger and the
/// webhook sender for one integration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IntegrationConfig {
    /// Route segment: `/webhooks/{name}` and `/poll/{name}`
    pub name: String,
    /// Field carrying the progress marker
    pub discriminant_field: String,
    /// Marker values that classify a delivery as final
    pub complete_values: Vec<String>,
    /// Field carrying the optional human-readable status message
    #[serde(default = "default_message_field")]
    pub message_field: String,
    /// Field holding the final payload; the whole body is used when absent
    #[serde(default = "default_result_field")]
    pub result_field: Option<String>,
}

fn default_message_field() -> String {
    "message".to_string()
}

fn default_result_field() -> Option<String> {
    Some("result".to_string())
}

impl IntegrationConfig {
    pub fn new(name: &str, discriminant_field: &str, complete_values: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            discriminant_field: discriminant_field.to_string(),
            complete_values: complete_values.iter().map(|v| v.to_string()).collect(),
            message_field: default_message_field(),
            result_field: default_result_field(),
        }
    }
}

impl StoreConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL.as_secs(),
            sweep_interval_seconds: 60,
            shard_count: DEFAULT_SHARD_COUNT,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "0.0.0.0:8080".to_string(),
            },
            store: StoreConfig::default(),
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: true,
            },
            integrations: vec![
                IntegrationConfig::new("repurpose", "status", &["complete"]),
                IntegrationConfig::new("assistant", "status", &["complete", "completed"]),
                IntegrationConfig::new("formulas", "type", &["final"]),
            ],
        }
    }
}

impl RelayConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. callback-relay.toml in the working directory
    /// 3. An explicit config file, if given
    /// 4. Environment variables (prefixed with CALLBACK_RELAY_)
    pub fn load(explicit_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            builder = builder.add_source(File::from(Path::new(DEFAULT_CONFIG_FILE)));
        }

        if let Some(path) = explicit_file {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let relay_config: RelayConfig = builder.build()?.try_deserialize()?;
        relay_config.validate()?;

        Ok(relay_config)
    }

    /// Load .env file if it exists
    pub fn load_env_file() {
        if Path::new(".env").exists() {
            match dotenvy::dotenv() {
                Ok(_) => tracing::info!("Loaded environment variables from .env file"),
                Err(e) => tracing::warn!("Ignoring unreadable .env file: {}", e),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.ttl_seconds == 0 {
            return Err(ConfigError::Invalid("store.ttl_seconds must be > 0".into()));
        }
        if self.store.sweep_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "store.sweep_interval_seconds must be > 0".into(),
            ));
        }
        if self.store.shard_count == 0 {
            return Err(ConfigError::Invalid("store.shard_count must be > 0".into()));
        }

        let mut seen = HashSet::new();
        for integration in &self.integrations {
            let name = integration.name.as_str();
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
            {
                return Err(ConfigError::Invalid(format!(
                    "integration name '{name}' must match [a-z0-9_-]+"
                )));
            }
            if !seen.insert(name) {
                return Err(ConfigError::Invalid(format!(
                    "integration '{name}' is configured more than once"
                )));
            }
            if integration.discriminant_field.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "integration '{name}' needs a discriminant_field"
                )));
            }
        }

        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
