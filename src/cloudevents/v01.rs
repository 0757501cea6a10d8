//! CloudEvents 0.1 binding.
//!
//! Binary headers use the `CE-` prefix with capitalized names
//! (`CE-EventID`, `CE-EventType`, ...). Structured envelopes carry a
//! `contentType` field and an optional `extensions` object whose entries are
//! mapped to plain, unprefixed headers.

use super::attributes::{self, CloudEvent};
use super::CloudEventProcessor;

#[derive(Debug, Clone, Copy, Default)]
pub struct CloudEventV01;

impl CloudEventProcessor for CloudEventV01 {
    fn cloud_event(&self) -> &'static CloudEvent {
        &attributes::V01
    }
}
