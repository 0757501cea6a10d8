//! Endpoint configuration shared by producers and consumers.

use serde::Deserialize;

use crate::cloudevents::CloudEventVersion;
use crate::environment::{ServiceDefinition, META_CLOUD_EVENT_VERSION};

/// Default CloudEvents type when neither the message nor the service declares one.
pub const DEFAULT_CLOUD_EVENTS_TYPE: &str = "org.apache.camel.event";

/// How outbound events are carried over HTTP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    /// Attributes as individual headers, body as raw payload.
    #[default]
    Binary,
    /// Attributes and data in one JSON envelope.
    Structured,
}

/// Per-endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Fallback CloudEvents type.
    pub cloud_events_type: String,
    /// CloudEvents version, unless the service overrides it.
    pub cloud_event_version: CloudEventVersion,
    /// Outbound content mode.
    pub content_mode: ContentMode,
    /// Strip CloudEvents headers from consumer replies.
    pub remove_cloud_event_headers_in_reply: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            cloud_events_type: DEFAULT_CLOUD_EVENTS_TYPE.to_string(),
            cloud_event_version: CloudEventVersion::default(),
            content_mode: ContentMode::Binary,
            remove_cloud_event_headers_in_reply: false,
        }
    }
}

impl EndpointConfig {
    pub fn with_cloud_events_type(mut self, ty: impl Into<String>) -> Self {
        self.cloud_events_type = ty.into();
        self
    }

    pub fn with_version(mut self, version: CloudEventVersion) -> Self {
        self.cloud_event_version = version;
        self
    }

    pub fn with_content_mode(mut self, mode: ContentMode) -> Self {
        self.content_mode = mode;
        self
    }

    pub fn with_remove_cloud_event_headers_in_reply(mut self, remove: bool) -> Self {
        self.remove_cloud_event_headers_in_reply = remove;
        self
    }
}

/// A configured endpoint: its URI plus its configuration.
#[derive(Debug, Clone)]
pub struct KnativeEndpoint {
    uri: String,
    config: EndpointConfig,
}

impl KnativeEndpoint {
    pub fn new(uri: impl Into<String>, config: EndpointConfig) -> Self {
        Self {
            uri: uri.into(),
            config,
        }
    }

    /// Endpoint URI, used as the default CloudEvents source.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// CloudEvents version for a service: the service's `knative.version`
    /// marker when it names a known version, the endpoint default otherwise.
    pub fn version_for(&self, service: &ServiceDefinition) -> CloudEventVersion {
        match service.metadata_value(META_CLOUD_EVENT_VERSION) {
            Some(marker) => CloudEventVersion::parse(marker).unwrap_or_else(|| {
                tracing::warn!(
                    service = %service.name(),
                    marker = %marker,
                    "Unknown CloudEvents version marker, using endpoint default"
                );
                self.config.cloud_event_version
            }),
            None => self.config.cloud_event_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::ServiceType;

    #[test]
    fn test_config_defaults() {
        let config = EndpointConfig::default();
        assert_eq!(config.cloud_events_type, "org.apache.camel.event");
        assert_eq!(config.cloud_event_version, CloudEventVersion::V01);
        assert_eq!(config.content_mode, ContentMode::Binary);
        assert!(!config.remove_cloud_event_headers_in_reply);
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
cloud_events_type: org.example.default
cloud_event_version: "1.0"
content_mode: structured
"#;
        let config: EndpointConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.cloud_events_type, "org.example.default");
        assert_eq!(config.cloud_event_version, CloudEventVersion::V10);
        assert_eq!(config.content_mode, ContentMode::Structured);
    }

    #[test]
    fn test_version_for_service_override() {
        let endpoint = KnativeEndpoint::new("knative:endpoint/orders", EndpointConfig::default());
        let plain = ServiceDefinition::new(ServiceType::Endpoint, "a", "localhost", 80);
        let v03 = plain.clone().with_metadata(META_CLOUD_EVENT_VERSION, "0.3");
        let bogus = plain.clone().with_metadata(META_CLOUD_EVENT_VERSION, "9.9");

        assert_eq!(endpoint.version_for(&plain), CloudEventVersion::V01);
        assert_eq!(endpoint.version_for(&v03), CloudEventVersion::V03);
        assert_eq!(endpoint.version_for(&bogus), CloudEventVersion::V01);
    }
}
