//! CloudEvents 0.2 binding.
//!
//! Lower-case `ce-` headers, `contenttype` in structured envelopes, and an
//! `extensions` object flattened into plain headers.

use super::attributes::{self, CloudEvent};
use super::CloudEventProcessor;

#[derive(Debug, Clone, Copy, Default)]
pub struct CloudEventV02;

impl CloudEventProcessor for CloudEventV02 {
    fn cloud_event(&self) -> &'static CloudEvent {
        &attributes::V02
    }
}
