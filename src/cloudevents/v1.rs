//! CloudEvents 1.0 binding.
//!
//! Structured envelopes are rendered with the SDK's 1.0 builder; non-UTF-8
//! data is carried in `data_base64` and decoded back into the body.

use ::cloudevents::{EventBuilder, EventBuilderV10};

use super::attributes::{self, CloudEvent};
use super::encode::{render_sdk_event, sdk_parts};
use super::{CloudEventProcessor, EncodeError};
use crate::message::Message;

#[derive(Debug, Clone, Copy, Default)]
pub struct CloudEventV1;

impl CloudEventProcessor for CloudEventV1 {
    fn cloud_event(&self) -> &'static CloudEvent {
        &attributes::V1
    }

    fn to_structured(&self, message: &Message) -> Result<Vec<u8>, EncodeError> {
        let parts = sdk_parts(self.cloud_event(), message)?;

        let mut builder = EventBuilderV10::new()
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
