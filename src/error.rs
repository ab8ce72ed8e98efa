//! Error types for the capture pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a capture source.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Network interface not found or unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Insufficient permissions for packet capture (try running as root)")]
    InsufficientPermissions,

    #[error("Invalid capture filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to create capture channel: {0}")]
    ChannelCreation(String),

    #[error("Transient capture error: {0}")]
    Transient(#[source] std::io::Error),

    #[error("Capture failed: {0}")]
    Fatal(String),

    #[error("Capture closed")]
    Closed,
}

impl CaptureError {
    /// Returns true if the caller may retry the failed receive.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors raised by the log sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Log path not writable: {path}: {source}")]
    PathUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Log write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Log sink closed")]
    Closed,
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Errors returned by the pipeline control surface.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline already started")]
    AlreadyStarted,

    #[error("Failed to spawn capture worker: {0}")]
    Spawn(#[source] std::io::Error),
}
