use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::ws::ReconnectPolicy;

const ENV_PREFIX: &str = "COLABRI_SYNC_";

/// Client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Collaboration server WebSocket URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Base unit of the linear reconnect backoff, in milliseconds
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    /// Automatic reconnects attempted before giving up
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from `COLABRI_SYNC_*` environment variables or an app.env file.
    ///
    /// Does not log; the caller reports failures.
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self, ConfigError> {
        Ok(envy::prefixed(ENV_PREFIX).from_iter(vars)?)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_ms),
            max_attempts: self.reconnect_max_attempts,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
}

// Default value functions
fn default_endpoint() -> String {
    "ws://127.0.0.1:8080/ws".to_string()
}

fn default_reconnect_base_ms() -> u64 {
    1000
}

fn default_reconnect_max_attempts() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}
