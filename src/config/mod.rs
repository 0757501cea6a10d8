//! Application configuration.
//!
//! Aggregates the transport's option sections into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod runtime;
mod server;

pub use runtime::RuntimeOptions;
pub use server::{ClientOptions, ServerOptions};

use serde::Deserialize;

use crate::cloudevents::EventTimeZone;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "knative.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "KNATIVE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "KNATIVE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "KNATIVE_LOG";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// CloudEvents encoding options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CloudEventOptions {
    /// Zone used when formatting the event time attribute.
    pub time_zone: EventTimeZone,
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runtime: RuntimeOptions,
    pub server: ServerOptions,
    pub client: ClientOptions,
    pub cloud_event: CloudEventOptions,
    /// Path to the service catalog; falls back to `KNATIVE_ENVIRONMENT`.
    pub environment: Option<String>,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `knative.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Check option ranges; called by the transport before it starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runtime.validate()?;
        self.server.validate()?;
        self.client.validate()?;
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.request_timeout_ms, 30_000);
        assert_eq!(config.cloud_event.time_zone, EventTimeZone::Utc);
        assert!(config.environment.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
runtime:
  worker_threads: 2
  strict_discovery: true
server:
  max_body_bytes: 1024
client:
  timeout_ms: 500
cloud_event:
  time_zone: local
environment: /etc/knative/env.json
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.runtime.worker_threads, Some(2));
        assert!(config.runtime.strict_discovery);
        assert_eq!(config.runtime.thread_name, "knative-http-io");
        assert_eq!(config.server.max_body_bytes, 1024);
        assert_eq!(config.server.request_timeout_ms, 30_000);
        assert_eq!(config.client.timeout_ms, 500);
        assert_eq!(config.cloud_event.time_zone, EventTimeZone::Local);
        assert_eq!(config.environment.as_deref(), Some("/etc/knative/env.json"));
    }

    #[test]
    #[serial]
    fn test_load_file_and_env_override() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "server:\n  request_timeout_ms: 1500\n  max_body_bytes: 2048").unwrap();

        std::env::set_var("KNATIVE__SERVER__MAX_BODY_BYTES", "4096");
        let config = Config::load(file.path().to_str());
        std::env::remove_var("KNATIVE__SERVER__MAX_BODY_BYTES");

        let config = config.unwrap();
        assert_eq!(config.server.request_timeout_ms, 1500);
        assert_eq!(config.server.max_body_bytes, 4096);
    }

    #[test]
    #[serial]
    fn test_load_missing_explicit_file_fails() {
        let result = Config::load(Some("/nonexistent/knative-config.yaml"));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_validate_reports_invalid_section() {
        let mut config = Config::for_test();
        config.runtime.thread_name = " ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
