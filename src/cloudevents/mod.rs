//! CloudEvents HTTP binding.
//!
//! Converts outbound messages into CloudEvents attributes and inbound HTTP
//! payloads back into message headers and body, for each supported version
//! of the CloudEvents specification.
//!
//! # Content modes
//!
//! ```text
//! binary:      ce-id: abc                  structured:  Content-Type: application/cloudevents+json
//!              ce-type: org.example                     {"id":"abc","type":"org.example",
//!              Content-Type: text/plain                  "contentType":"text/plain",
//!              <raw body>                                "data":"<body>"}
//! ```
//!
//! Binary-mode requests pass through decode untouched. Structured-mode
//! requests are parsed and flattened into headers: the content-type field
//! becomes `Content-Type`, `data` becomes the body, and every other field
//! becomes a prefixed header named by the version's naming rule.

mod attributes;
mod decode;
mod encode;
mod v01;
mod v02;
mod v03;
mod v1;

pub use attributes::{Base64Carrier, CloudEvent, CloudEventAttributes, HeaderNaming, StructuredLayout};
pub use encode::format_event_time;
pub use v01::CloudEventV01;
pub use v02::CloudEventV02;
pub use v03::CloudEventV03;
pub use v1::CloudEventV1;

use serde::Deserialize;

use crate::endpoint::KnativeEndpoint;
use crate::environment::ServiceDefinition;
use crate::message::Message;

/// Content type marking a structured-mode envelope.
pub const MIME_STRUCTURED_CONTENT_MODE: &str = "application/cloudevents+json";

/// Errors raised while decoding an inbound structured envelope.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed CloudEvents envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CloudEvents envelope must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Invalid base64 event data: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Errors raised while building an outbound structured envelope.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid event time '{0}'")]
    InvalidTime(String),

    #[error("Invalid CloudEvent: {0}")]
    Builder(#[from] ::cloudevents::event::EventBuilderError),
}

/// Zone used when formatting the event time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventTimeZone {
    /// Always `+00:00`.
    #[default]
    Utc,
    /// The process's configured zone.
    Local,
}

/// Supported CloudEvents versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
pub enum CloudEventVersion {
    #[default]
    #[serde(rename = "0.1")]
    V01,
    #[serde(rename = "0.2")]
    V02,
    #[serde(rename = "0.3")]
    V03,
    #[serde(rename = "1.0")]
    V10,
}

static V01: CloudEventV01 = CloudEventV01;
static V02: CloudEventV02 = CloudEventV02;
static V03: CloudEventV03 = CloudEventV03;
static V1: CloudEventV1 = CloudEventV1;

impl CloudEventVersion {
    /// Parse a version marker such as `"0.3"` or `"1.0"`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "0.1" => Some(Self::V01),
            "0.2" => Some(Self::V02),
            "0.3" => Some(Self::V03),
            "1.0" | "1" => Some(Self::V10),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.processor().cloud_event().version
    }

    /// The codec for this version.
    pub fn processor(&self) -> &'static dyn CloudEventProcessor {
        match self {
            Self::V01 => &V01,
            Self::V02 => &V02,
            Self::V03 => &V03,
            Self::V10 => &V1,
        }
    }
}

impl std::fmt::Display for CloudEventVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check whether a content type selects structured mode.
///
/// Parameters such as `charset` are ignored, as is case.
pub fn is_structured(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case(MIME_STRUCTURED_CONTENT_MODE))
        .unwrap_or(false)
}

/// Codec for one CloudEvents version.
///
/// The default methods implement the algorithm shared by all versions,
/// parameterized by the version's [`CloudEvent`] descriptor.
pub trait CloudEventProcessor: Send + Sync {
    /// Descriptor of this version's attribute names and envelope layout.
    fn cloud_event(&self) -> &'static CloudEvent;

    /// Fill in missing CloudEvents attributes on an outbound message.
    ///
    /// Values already present on the message are never overwritten. The
    /// `Host` header is always removed.
    fn encode(
        &self,
        message: &mut Message,
        endpoint: &KnativeEndpoint,
        service: &ServiceDefinition,
        zone: EventTimeZone,
    ) {
        encode::enrich(self.cloud_event(), message, endpoint, service, zone);
    }

    /// Flatten a structured-mode payload into headers and body.
    ///
    /// Non-structured (binary-mode) messages are left unchanged.
    fn decode(&self, message: &mut Message) -> Result<(), DecodeError> {
        decode::decode(self.cloud_event(), message)
    }

    /// Render an encoded message as a structured-mode JSON envelope.
    fn to_structured(&self, message: &Message) -> Result<Vec<u8>, EncodeError> {
        let fields = encode::structured_fields(self.cloud_event(), message);
        Ok(serde_json::to_vec(&serde_json::Value::Object(fields))?)
    }

    /// Whether a header belongs to this version's CloudEvents header set.
    fn is_cloud_event_header(&self, name: &str) -> bool {
        self.cloud_event().is_cloud_event_header(name)
    }
}
