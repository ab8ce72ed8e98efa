//! Pipeline configuration.
//!
//! Values come from defaults, then an optional `key = value` file, then
//! `WIRELOG_*` environment variables. The binary applies CLI flags last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::sink::DEFAULT_BUFFER_CAPACITY;
use crate::summarizer::DEFAULT_DESCRIPTOR_CAP;

const DEFAULT_LOG_PATH: &str = "network.log";
const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
const DEFAULT_RETRY_LIMIT: u32 = 5;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 10;
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;
const DEFAULT_SNAPLEN: usize = 65535;

/// Settings for one capture pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Device to capture on
    pub interface: String,
    /// Optional capture filter expression
    pub filter: Option<String>,
    /// Destination log file
    pub log_path: PathBuf,
    /// Lines buffered in memory before a write blocks on a flush
    pub buffer_capacity: usize,
    /// Upper bound on a single blocking receive
    pub poll_interval_ms: u64,
    /// Consecutive transient capture errors tolerated
    pub retry_limit: u32,
    /// First retry delay; doubles per attempt
    pub retry_backoff_ms: u64,
    /// Periodic flush interval
    pub flush_interval_ms: u64,
    /// Maximum descriptor length in bytes
    pub descriptor_cap: usize,
    /// Maximum bytes kept per packet
    pub snaplen: usize,
    /// Put the interface into promiscuous mode
    pub promiscuous: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            filter: None,
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            descriptor_cap: DEFAULT_DESCRIPTOR_CAP,
            snaplen: DEFAULT_SNAPLEN,
            promiscuous: true,
        }
    }
}

impl PipelineConfig {
    /// Create a config for the given interface with all other values defaulted.
    pub fn for_interface(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            ..Self::default()
        }
    }

    /// Load from an optional config file, then apply environment overrides.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = path {
            if path.exists() {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                config.apply_file(&content)?;
            }
        }

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_file(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                self.set(key.trim(), value.trim())?;
            }
        }
        Ok(())
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        const KEYS: [&str; 11] = [
            "interface",
            "filter",
            "log_path",
            "buffer_capacity",
            "poll_interval_ms",
            "retry_limit",
            "retry_backoff_ms",
            "flush_interval_ms",
            "descriptor_cap",
            "snaplen",
            "promiscuous",
        ];

        for key in KEYS {
            let var = format!("WIRELOG_{}", key.to_ascii_uppercase());
            if let Some(value) = lookup(&var) {
                self.set(key, value.trim())?;
            }
        }
        Ok(())
    }

    /// Set a single option by its config-file key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "interface" => self.interface = value.to_string(),
            "filter" => {
                self.filter = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            "log_path" => self.log_path = PathBuf::from(value),
            "buffer_capacity" => self.buffer_capacity = parse_number(key, value)?,
            "poll_interval_ms" => self.poll_interval_ms = parse_number(key, value)?,
            "retry_limit" => self.retry_limit = parse_number(key, value)?,
            "retry_backoff_ms" => self.retry_backoff_ms = parse_number(key, value)?,
            "flush_interval_ms" => self.flush_interval_ms = parse_number(key, value)?,
            "descriptor_cap" => self.descriptor_cap = parse_number(key, value)?,
            "snaplen" => self.snaplen = parse_number(key, value)?,
            "promiscuous" => {
                self.promiscuous = match value {
                    "true" | "yes" | "1" => true,
                    "false" | "no" | "0" => false,
                    _ => {
                        return Err(ConfigError::Invalid(format!(
                            "promiscuous must be a boolean, got '{}'",
                            value
                        )))
                    }
                }
            }
            other => tracing::warn!("Ignoring unknown config key: {}", other),
        }
        Ok(())
    }

    /// Check that the config describes a runnable pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interface.trim().is_empty() {
            return Err(ConfigError::Invalid("interface must be set".to_string()));
        }
        if self.log_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("log_path must be set".to_string()));
        }

        let positive = [
            ("buffer_capacity", self.buffer_capacity as u64),
            ("poll_interval_ms", self.poll_interval_ms),
            ("flush_interval_ms", self.flush_interval_ms),
            ("descriptor_cap", self.descriptor_cap as u64),
            ("snaplen", self.snaplen as u64),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be greater than 0", key)));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("Invalid {}: {}", key, value)))
}
