//! CloudEvents 0.3 binding.
//!
//! Structured envelopes are rendered with the SDK's 0.3 builder. Binary data
//! travels base64-encoded in `data`, flagged by `datacontentencoding`.

use ::cloudevents::{EventBuilder, EventBuilderV03};

use super::attributes::{self, CloudEvent};
use super::encode::{render_sdk_event, sdk_parts};
use super::{CloudEventProcessor, EncodeError};
use crate::message::Message;

#[derive(Debug, Clone, Copy, Default)]
pub struct CloudEventV03;

impl CloudEventProcessor for CloudEventV03 {
    fn cloud_event(&self) -> &'static CloudEvent {
        &attributes::V03
    }

    fn to_structured(&self, message: &Message) -> Result<Vec<u8>, EncodeError> {
        let parts = sdk_parts(self.cloud_event(), message)?;

        let mut builder = EventBuilderV03::new()
            .id(parts.id)
            .source(parts.source)
            .ty(parts.ty);
        if let Some(time) = parts.time {
            builder = builder.time(time);
        }
        if let Some(subject) = parts.subject {
            builder = builder.subject(subject);
        }
        if let Some((content_type, data)) = parts.data {
            builder = builder.data(content_type, data);
        }
        for (name, value) in parts.extensions {
            builder = builder.extension(&name, value);
        }

        let event = builder.build()?;
        render_sdk_event(&event, parts.raw_time)
    }
}
