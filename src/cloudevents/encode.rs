//! Producer-side attribute enrichment and structured envelope rendering.

use base64::Engine;
use ::cloudevents::event::Data;
use ::cloudevents::Event;
use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde_json::{Map, Value};

use super::attributes::{Base64Carrier, CloudEvent};
use super::{EncodeError, EventTimeZone};
use crate::endpoint::KnativeEndpoint;
use crate::environment::{ServiceDefinition, META_CONTENT_TYPE, META_EVENT_TYPE};
use crate::message::{Message, CONTENT_TYPE, HOST};

/// Format an instant as an RFC 3339 offset date-time.
///
/// The offset is always numeric (`+00:00`, never `Z`). With
/// [`EventTimeZone::Local`] the instant is converted to the zone configured
/// for the process, so producers in different zones emit different offsets
/// for the same instant.
pub fn format_event_time(instant: DateTime<Utc>, zone: EventTimeZone) -> String {
    match zone {
        EventTimeZone::Utc => instant.to_rfc3339_opts(SecondsFormat::AutoSi, false),
        EventTimeZone::Local => instant
            .with_timezone(&Local)
            .to_rfc3339_opts(SecondsFormat::AutoSi, false),
    }
}

pub(crate) fn enrich(
    ce: &CloudEvent,
    message: &mut Message,
    endpoint: &KnativeEndpoint,
    service: &ServiceDefinition,
    zone: EventTimeZone,
) {
    let event_type = service
        .metadata_value(META_EVENT_TYPE)
        .unwrap_or(endpoint.config().cloud_events_type.as_str())
        .to_string();
    let content_type = service.metadata_value(META_CONTENT_TYPE).map(str::to_string);
    let event_time = format_event_time(message.created(), zone);
    let id = message.id().to_string();

    let attrs = &ce.attributes;
    let headers = message.headers_mut();
    headers.put_if_absent(attrs.id, id);
    headers.put_if_absent(attrs.source, endpoint.uri());
    headers.put_if_absent(attrs.spec, ce.version);
    headers.put_if_absent(attrs.event_type, event_type);
    headers.put_if_absent(attrs.time, event_time);
    if let Some(content_type) = content_type {
        headers.put_if_absent(CONTENT_TYPE, content_type);
    }

    // Recomputed from the destination URL, never inherited.
    headers.remove(HOST);
}

/// Whether a content type denotes JSON data.
pub(crate) fn is_json(content_type: Option<&str>) -> bool {
    let Some(mime) = content_type.and_then(|ct| ct.split(';').next()) else {
        return false;
    };
    let mime = mime.trim().to_ascii_lowercase();
    mime == "application/json" || mime.ends_with("+json")
}

/// Envelope `data` value for a body.
///
/// A JSON body with a JSON content type is inlined only when it is a
/// non-string value whose compact rendering is the body itself, so decoding
/// restores the exact bytes. Other UTF-8 bodies become strings, anything
/// else becomes a base64 string.
pub(crate) fn data_value(content_type: Option<&str>, body: &[u8]) -> Value {
    if is_json(content_type) {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::String(_)) | Err(_) => {}
            Ok(value) => {
                if serde_json::to_vec(&value).is_ok_and(|compact| compact == body) {
                    return value;
                }
            }
        }
    }
    match std::str::from_utf8(body) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => Value::String(base64::engine::general_purpose::STANDARD.encode(body)),
    }
}

/// Build the structured envelope fields for an encoded message.
///
/// Every header carrying the version's prefix becomes a top-level field, so
/// that decoding the envelope restores the same header names.
pub(crate) fn structured_fields(ce: &CloudEvent, message: &Message) -> Map<String, Value> {
    let layout = &ce.layout;
    let mut fields = Map::new();

    for (name, value) in message.headers().iter() {
        if let Some(field) = layout.naming.field_for(name) {
            fields.insert(field, Value::String(value.to_string()));
        }
    }

    let content_type = message.content_type();
    if let Some(ct) = content_type {
        if !super::is_structured(Some(ct)) {
            fields.insert(
                layout.content_type_field.to_string(),
                Value::String(ct.to_string()),
            );
        }
    }

    let body = message.body();
    if !body.is_empty() {
        match (layout.base64, std::str::from_utf8(body)) {
            (Base64Carrier::DataBase64, Err(_)) => {
                fields.insert(
                    "data_base64".to_string(),
                    Value::String(base64::engine::general_purpose::STANDARD.encode(body)),
                );
            }
            (Base64Carrier::ContentEncoding, Err(_)) => {
                fields.insert(
                    "datacontentencoding".to_string(),
                    Value::String("base64".to_string()),
                );
                fields.insert("data".to_string(), data_value(content_type, body));
            }
            _ => {
                fields.insert("data".to_string(), data_value(content_type, body));
            }
        }
    }

    fields
}

/// Attribute values extracted from an encoded message, ready for the
/// `cloudevents-sdk` builders.
pub(crate) struct SdkParts {
    pub id: String,
    pub source: String,
    pub ty: String,
    pub time: Option<DateTime<Utc>>,
    /// Header text of the time attribute, rendered as-is into the envelope.
    pub raw_time: Option<String>,
    pub subject: Option<String>,
    pub data: Option<(String, Data)>,
    pub extensions: Vec<(String, String)>,
}

pub(crate) fn sdk_parts(ce: &CloudEvent, message: &Message) -> Result<SdkParts, EncodeError> {
    let attrs = &ce.attributes;
    let headers = message.headers();
    let text = |name: &str| headers.get(name).unwrap_or_default().to_string();

    let time = match headers.get(attrs.time) {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|_| EncodeError::InvalidTime(raw.to_string()))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    let core = attrs.all();
    let mut subject = None;
    let mut extensions = Vec::new();
    for (name, value) in headers.iter() {
        if core.iter().any(|a| a.eq_ignore_ascii_case(name)) {
            continue;
        }
        match ce.layout.naming.field_for(name).as_deref() {
            Some("subject") => subject = Some(value.to_string()),
            Some(field) => extensions.push((field.to_string(), value.to_string())),
            None => {}
        }
    }

    let body = message.body();
    let data = if body.is_empty() {
        None
    } else {
        let content_type = message.content_type().filter(|ct| !super::is_structured(Some(ct)));
        let data = match data_value(content_type, body) {
            Value::String(_) if std::str::from_utf8(body).is_err() => Data::Binary(body.to_vec()),
            Value::String(s) => Data::String(s),
            json => Data::Json(json),
        };
        let content_type = content_type.map(str::to_string).unwrap_or_else(|| {
            match &data {
                Data::Json(_) => "application/json",
                Data::String(_) => "text/plain",
                Data::Binary(_) => "application/octet-stream",
            }
            .to_string()
        });
        Some((content_type, data))
    };

    Ok(SdkParts {
        id: text(attrs.id),
        source: text(attrs.source),
        ty: text(attrs.event_type),
        time,
        raw_time: headers.get(attrs.time).map(str::to_string),
        subject,
        data,
        extensions,
    })
}

/// Serialize an SDK-built event, keeping the time attribute exactly as the
/// message carried it. The SDK renders times in UTC with a `Z` suffix.
pub(crate) fn render_sdk_event(
    event: &Event,
    raw_time: Option<String>,
) -> Result<Vec<u8>, EncodeError> {
    let mut envelope = serde_json::to_value(event)?;
    if let (Some(time), Value::Object(fields)) = (raw_time, &mut envelope) {
        fields.insert("time".to_string(), Value::String(time));
    }
    Ok(serde_json::to_vec(&envelope)?)
}
