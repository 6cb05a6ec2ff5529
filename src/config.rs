//! Configuration file for the discovery service
//!
//! A single TOML document with a `[broker]` and a `[discovery]` table. Every field
//! has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! [broker]
//! host = "localhost"
//! port = 1883
//! keep_alive_secs = 120
//!
//! [discovery]
//! qos = 0
//! resubscribe_devices_on_reconnect = false
//! ```
//!
//! When no path is given the file lives under the user's config directory and is
//! created with defaults on first start.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const CONFIG_DIR: &str = "device-discovery";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Size of the rumqttc request channel
    pub request_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keep_alive_secs: 120,
            client_id: "device-discovery".to_string(),
            username: None,
            password: None,
            request_capacity: 100,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// QoS level (0, 1 or 2) for the discovery and per-device subscriptions
    pub qos: u8,
    /// Reissue `device/<id>/#` for every known device after each reconnect
    pub resubscribe_devices_on_reconnect: bool,
    pub telemetry_buffer: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            qos: 0,
            resubscribe_devices_on_reconnect: false,
            telemetry_buffer: 1000,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub discovery: DiscoveryConfig,
}

impl AppConfig {
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let broker = &self.broker;
        if broker.host.trim().is_empty() {
            return Err(ConfigError::Invalid("broker.host must not be empty".into()));
        }
        if broker.port == 0 {
            return Err(ConfigError::Invalid("broker.port must not be 0".into()));
        }
        if broker.keep_alive_secs == 0 {
            return Err(ConfigError::Invalid(
                "broker.keep_alive_secs must be greater than 0".into(),
            ));
        }
        if broker.username.is_some() != broker.password.is_some() {
            return Err(ConfigError::Invalid(
                "broker.username and broker.password must be set together".into(),
            ));
        }
        if broker.request_capacity == 0 {
            return Err(ConfigError::Invalid(
                "broker.request_capacity must be greater than 0".into(),
            ));
        }
        if self.discovery.qos > 2 {
            return Err(ConfigError::Invalid(format!(
                "discovery.qos must be 0, 1 or 2, got {}",
                self.discovery.qos
            )));
        }
        if self.discovery.telemetry_buffer == 0 {
            return Err(ConfigError::Invalid(
                "discovery.telemetry_buffer must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Reads and validates the file at `path`, which must exist.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("Loaded config from {}", path.display());
        Self::from_toml(&content, path)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Loads `path`, writing a default document there first if it does not exist.
    pub async fn ensure_default(path: &Path) -> Result<Self, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if !exists {
            info!("Creating default config at {}", path.display());
            AppConfig::default().save(path).await?;
        }
        Self::load(path).await
    }

    /// Resolves the configuration from an explicit path, or from the default
    /// location under the user's config directory.
    pub async fn resolve(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(&path).await,
            None => match default_config_path() {
                Some(path) => Self::ensure_default(&path).await,
                None => {
                    info!("No config directory available, using defaults");
                    Ok(AppConfig::default())
                }
            },
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}
