//! Service catalog.
//!
//! A `KnativeEnvironment` lists the logical endpoints an application talks to
//! or serves. It is usually injected as JSON by the platform:
//!
//! ```json
//! {
//!   "services": [
//!     {
//!       "type": "endpoint",
//!       "name": "orders",
//!       "host": "0.0.0.0",
//!       "port": 8080,
//!       "path": "/orders",
//!       "metadata": { "knative.event.type": "org.example.order" }
//!     }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::listener::{ListenerKey, Route};

/// Metadata key for the declared CloudEvents type.
pub const META_EVENT_TYPE: &str = "knative.event.type";
/// Metadata key for the declared content type.
pub const META_CONTENT_TYPE: &str = "content.type";
/// Metadata key selecting the CloudEvents version for this service.
pub const META_CLOUD_EVENT_VERSION: &str = "knative.version";
/// Metadata key restricting a consumer route to one request host.
pub const META_VIRTUAL_HOST: &str = "knative.virtual.host";

/// Environment variable holding the catalog (inline JSON or a file path).
pub const ENVIRONMENT_ENV_VAR: &str = "KNATIVE_ENVIRONMENT";

/// Errors raised while loading or querying the catalog.
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("Failed to read environment file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse environment: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Environment variable {0} not set")]
    Missing(&'static str),

    #[error("No {service_type} service named '{name}'")]
    NotFound {
        service_type: ServiceType,
        name: String,
    },
}

/// Kind of logical endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    #[default]
    Endpoint,
    Channel,
    Event,
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceType::Endpoint => "endpoint",
            ServiceType::Channel => "channel",
            ServiceType::Event => "event",
        };
        f.write_str(s)
    }
}

fn default_path() -> String {
    "/".to_string()
}

/// Immutable descriptor of a logical endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceDefinition {
    #[serde(rename = "type", default)]
    service_type: ServiceType,
    name: String,
    host: String,
    port: u16,
    #[serde(default = "default_path")]
    path: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl ServiceDefinition {
    pub fn new(
        service_type: ServiceType,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            service_type,
            name: name.into(),
            host: host.into(),
            port,
            path: default_path(),
            metadata: HashMap::new(),
        }
    }

    /// Set the path (a leading `/` is added if missing).
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Identity of the physical listener serving this definition.
    pub fn listener_key(&self) -> ListenerKey {
        ListenerKey::new(self.host.clone(), self.port)
    }

    /// Dispatcher route for a consumer bound to this definition.
    pub fn route(&self) -> Route {
        let route = Route::new(self.path.clone());
        match self.metadata_value(META_VIRTUAL_HOST) {
            Some(host) if !host.is_empty() => route.with_host(host),
            _ => route,
        }
    }

    /// Destination URL for a producer bound to this definition.
    pub fn url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.path)
    }
}

/// Catalog of service definitions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KnativeEnvironment {
    #[serde(default)]
    services: Vec<ServiceDefinition>,
}

impl KnativeEnvironment {
    pub fn new(services: Vec<ServiceDefinition>) -> Self {
        Self { services }
    }

    /// Parse a catalog from JSON text.
    pub fn from_json(json: &str) -> Result<Self, EnvironmentError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a catalog from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EnvironmentError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|source| EnvironmentError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&content)
    }

    /// Load from `KNATIVE_ENVIRONMENT`.
    ///
    /// Values starting with `{` are parsed as inline JSON, anything else is
    /// treated as a file path.
    pub fn from_env() -> Result<Self, EnvironmentError> {
        let value = std::env::var(ENVIRONMENT_ENV_VAR)
            .map_err(|_| EnvironmentError::Missing(ENVIRONMENT_ENV_VAR))?;
        if value.trim_start().starts_with('{') {
            Self::from_json(&value)
        } else {
            Self::from_file(value)
        }
    }

    pub fn services(&self) -> &[ServiceDefinition] {
        &self.services
    }

    /// Find a service by type and name.
    pub fn lookup(
        &self,
        service_type: ServiceType,
        name: &str,
    ) -> Result<&ServiceDefinition, EnvironmentError> {
        self.services
            .iter()
            .find(|s| s.service_type == service_type && s.name == name)
            .ok_or_else(|| EnvironmentError::NotFound {
                service_type,
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const CATALOG: &str = r#"{
        "services": [
            {
                "type": "endpoint",
                "name": "orders",
                "host": "0.0.0.0",
                "port": 8080,
                "path": "/orders",
                "metadata": {
                    "knative.event.type": "org.example.order",
                    "knative.virtual.host": "orders.example.com"
                }
            },
            {
                "type": "channel",
                "name": "audit",
                "host": "audit.default.svc",
                "port": 80
            }
        ]
    }"#;

    #[test]
    fn test_parse_catalog() {
        let env = KnativeEnvironment::from_json(CATALOG).unwrap();
        assert_eq!(env.services().len(), 2);

        let orders = env.lookup(ServiceType::Endpoint, "orders").unwrap();
        assert_eq!(orders.port(), 8080);
        assert_eq!(orders.path(), "/orders");
        assert_eq!(
            orders.metadata_value(META_EVENT_TYPE),
            Some("org.example.order")
        );

        let audit = env.lookup(ServiceType::Channel, "audit").unwrap();
        assert_eq!(audit.path(), "/");
        assert!(audit.metadata().is_empty());
    }

    #[test]
    fn test_lookup_wrong_type_fails() {
        let env = KnativeEnvironment::from_json(CATALOG).unwrap();
        let result = env.lookup(ServiceType::Channel, "orders");
        assert!(matches!(result, Err(EnvironmentError::NotFound { .. })));
    }

    #[test]
    fn test_malformed_catalog() {
        assert!(KnativeEnvironment::from_json("{\"services\": 3}").is_err());
    }

    #[test]
    fn test_route_and_key() {
        let env = KnativeEnvironment::from_json(CATALOG).unwrap();
        let orders = env.lookup(ServiceType::Endpoint, "orders").unwrap();

        assert_eq!(orders.listener_key(), ListenerKey::new("0.0.0.0", 8080));
        assert_eq!(
            orders.route(),
            Route::new("/orders").with_host("orders.example.com")
        );
        assert_eq!(orders.url(), "http://0.0.0.0:8080/orders");
    }

    #[test]
    fn test_with_path_adds_slash() {
        let service = ServiceDefinition::new(ServiceType::Endpoint, "x", "localhost", 1)
            .with_path("events");
        assert_eq!(service.path(), "/events");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();

        let env = KnativeEnvironment::from_file(file.path()).unwrap();
        assert_eq!(env.services().len(), 2);
    }

    #[test]
    fn test_from_file_missing_keeps_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");

        let err = KnativeEnvironment::from_file(&path).unwrap_err();

        match &err {
            EnvironmentError::FileRead { path: failed, source } => {
                assert_eq!(failed, &path);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    #[serial]
    fn test_from_env_inline() {
        std::env::set_var(ENVIRONMENT_ENV_VAR, CATALOG);
        let env = KnativeEnvironment::from_env().unwrap();
        std::env::remove_var(ENVIRONMENT_ENV_VAR);
        assert_eq!(env.services().len(), 2);
    }

    #[test]
    #[serial]
    fn test_from_env_missing() {
        std::env::remove_var(ENVIRONMENT_ENV_VAR);
        assert!(matches!(
            KnativeEnvironment::from_env(),
            Err(EnvironmentError::Missing(_))
        ));
    }
}
