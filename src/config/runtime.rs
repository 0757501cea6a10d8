//! Options for a locally created I/O runtime.

use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;

/// Runtime options.
///
/// Only consulted when no runtime is injected or discovered.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Worker threads; `None` uses the tokio default (one per core).
    pub worker_threads: Option<usize>,
    pub thread_name: String,
    /// Bound on waiting for in-flight tasks when the runtime is closed.
    pub shutdown_timeout_ms: u64,
    /// Fail start when the runtime registry holds several candidates.
    pub strict_discovery: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            worker_threads: None,
            thread_name: "knative-http-io".to_string(),
            shutdown_timeout_ms: 10_000,
            strict_discovery: false,
        }
    }
}

impl RuntimeOptions {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == Some(0) {
            return Err(ConfigError::Invalid(
                "runtime.worker_threads must be greater than zero".to_string(),
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "runtime.thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
