//! Application configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;
use tracing::warn;

use crate::errors::RecorderError;
use crate::models::Callsign;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub database: DatabaseConfig,
}

/// Connection parameters for the JS8Call TCP API
#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Operator callsign; only directed messages to this call are kept
    pub callsign: String,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub connect_timeout: Duration,
    /// Interval between station status queries
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub status_interval: Duration,
    /// Capacity of the event channels between tasks
    pub channel_capacity: usize,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// How long a write waits on a database locked by another process
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub busy_timeout: Duration,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("client.host", "127.0.0.1")?
            .set_default("client.port", 2442_i64)?
            .set_default("client.callsign", "")?
            .set_default("client.connect_timeout", 5_i64)?
            .set_default("client.status_interval", 60_i64)?
            .set_default("client.channel_capacity", 100_i64)?
            .set_default("database.path", "js8_log.db")?
            .set_default("database.busy_timeout", 5_i64)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("JS8RECORDER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.host.trim().is_empty() {
            return Err(RecorderError::ConfigurationError {
                message: "Host cannot be empty".to_string(),
            });
        }
        if self.port == 0 {
            return Err(RecorderError::ConfigurationError {
                message: "Port must be greater than zero".to_string(),
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(RecorderError::ConfigurationError {
                message: "Connect timeout must be greater than zero".to_string(),
            });
        }
        if self.status_interval.is_zero() {
            return Err(RecorderError::ConfigurationError {
                message: "Status interval must be greater than zero".to_string(),
            });
        }
        if self.channel_capacity == 0 {
            return Err(RecorderError::ConfigurationError {
                message: "Channel capacity must be greater than zero".to_string(),
            });
        }
        self.operator()?;
        Ok(())
    }

    /// Parsed operator callsign
    pub fn operator(&self) -> Result<Callsign, RecorderError> {
        Callsign::try_from(self.callsign.as_str())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host.trim(), self.port)
    }
}

impl DatabaseConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), RecorderError> {
        self.validate_path()?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                self.ensure_directory_exists(parent)?;
            }
        }
        Ok(())
    }

    fn validate_path(&self) -> Result<(), RecorderError> {
        if self.path.as_os_str().is_empty() {
            return Err(RecorderError::ConfigurationError {
                message: "Database path cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    fn ensure_directory_exists(&self, dir: &Path) -> Result<(), RecorderError> {
        if !dir.exists() {
            warn!("Database directory does not exist, attempting to create it");
            std::fs::create_dir_all(dir).map_err(|e| RecorderError::ConfigurationError {
                message: format!("Could not create database directory: {}", e),
            })?;
        }
        Ok(())
    }
}
