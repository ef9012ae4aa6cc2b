//! Errors for JS8 recorder
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Connection to {addr} failed: {origin}")]
    ConnectionError {
        addr: String,
        #[source]
        origin: std::io::Error,
    },

    #[error("Connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("Client already started")]
    ClientAlreadyStarted,

    #[error("Frame decode error")]
    FrameDecodeError(#[from] serde_json::Error),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("IO error")]
    IoError(#[from] std::io::Error),

    #[error("Task join error")]
    TaskJoinError(#[from] tokio::task::JoinError),

    #[error("Invalid callsign: {0:?}")]
    InvalidCallsign(String),

    #[error("Invalid grid locator: {0:?}")]
    InvalidGrid(String),

    #[error("Invalid stored timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("Failed to open database at {path}: {origin}")]
    DatabaseOpenError { path: PathBuf, origin: String },

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),
}
