//! Listener and outbound client options.

use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;

/// Options applied to every shared listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Upper bound for one consumer invocation; exceeded requests get 504.
    pub request_timeout_ms: u64,
    /// Largest accepted request body; larger requests get 413.
    pub max_body_bytes: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

impl ServerOptions {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "server.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_body_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Options for the outbound HTTP client used by producers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Idle connections kept per destination host.
    pub pool_idle_per_host: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
            pool_idle_per_host: 8,
        }
    }
}

impl ClientOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "client timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
