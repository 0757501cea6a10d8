//! Consumer-side structured envelope decoding.

use base64::Engine;
use bytes::Bytes;
use serde_json::Value;

use super::attributes::{Base64Carrier, CloudEvent};
use super::{is_structured, DecodeError};
use crate::message::{Message, CONTENT_TYPE};

/// Empty in the loose sense: null, blank strings and empty collections.
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Header text for a JSON value: strings verbatim, anything else as compact JSON.
pub(crate) fn value_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub(crate) fn decode(ce: &CloudEvent, message: &mut Message) -> Result<(), DecodeError> {
    if !is_structured(message.content_type()) {
        return Ok(());
    }

    let layout = &ce.layout;
    let mut fields = {
        let body = message.body().clone();
        match serde_json::from_slice::<Value>(&body)? {
            Value::Object(fields) => fields,
            other => return Err(DecodeError::NotAnObject(json_kind(&other))),
        }
    };

    // The envelope is consumed: neither its text nor its media type survive.
    message.set_body(Bytes::new());
    match fields
        .remove(layout.content_type_field)
        .filter(|v| !is_empty(v))
    {
        Some(content_type) => message
            .headers_mut()
            .insert(CONTENT_TYPE, value_text(content_type)),
        None => {
            message.headers_mut().remove(CONTENT_TYPE);
        }
    }

    let base64_encoded = match layout.base64 {
        Base64Carrier::ContentEncoding => fields
            .remove("datacontentencoding")
            .map(|v| matches!(v, Value::String(ref s) if s.eq_ignore_ascii_case("base64")))
            .unwrap_or(false),
        _ => false,
    };

    if let Some(data) = fields.remove("data").filter(|v| !is_empty(v)) {
        let body = match (base64_encoded, data) {
            (true, Value::String(encoded)) => {
                Bytes::from(base64::engine::general_purpose::STANDARD.decode(encoded)?)
            }
            (_, data) => Bytes::from(value_text(data)),
        };
        message.set_body(body);
    }

    if layout.base64 == Base64Carrier::DataBase64 {
        if let Some(Value::String(encoded)) = fields.remove("data_base64") {
            if !encoded.is_empty() {
                let data = base64::engine::general_purpose::STANDARD.decode(encoded)?;
                message.set_body(data);
            }
        }
    }

    if layout.extensions_object {
        if let Some(Value::Object(extensions)) = fields.remove("extensions") {
            for (name, value) in extensions {
                message.headers_mut().insert(name, value_text(value));
            }
        }
    }

    for (name, value) in fields {
        message
            .headers_mut()
            .insert(layout.naming.header_for(&name), value_text(value));
    }

    Ok(())
}
