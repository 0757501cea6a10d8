//! Outbound side: encode and POST to the destination service.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::cloudevents::{
    CloudEventProcessor, EncodeError, EventTimeZone, MIME_STRUCTURED_CONTENT_MODE,
};
use crate::endpoint::{ContentMode, KnativeEndpoint};
use crate::environment::ServiceDefinition;
use crate::message::{self, Message};

/// Producer errors.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("Failed to encode CloudEvent: {0}")]
    Encode(#[from] EncodeError),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Destination {url} responded {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Send task aborted: {0}")]
    Aborted(String),
}

/// Producer bound to one remote service definition.
pub struct KnativeHttpProducer {
    client: reqwest::Client,
    runtime: Handle,
    service: ServiceDefinition,
    endpoint: KnativeEndpoint,
    codec: &'static dyn CloudEventProcessor,
    zone: EventTimeZone,
    url: String,
}

fn header_map<'a>(headers: impl Iterator<Item = (&'a str, &'a str)>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => debug!(header = %name, "Skipping header not valid for HTTP"),
        }
    }
    map
}

impl KnativeHttpProducer {
    pub(crate) fn new(
        client: reqwest::Client,
        runtime: Handle,
        service: ServiceDefinition,
        endpoint: KnativeEndpoint,
        zone: EventTimeZone,
    ) -> Self {
        let codec = endpoint.version_for(&service).processor();
        let url = service.url();
        Self {
            client,
            runtime,
            service,
            endpoint,
            codec,
            zone,
            url,
        }
    }

    pub fn service(&self) -> &ServiceDefinition {
        &self.service
    }

    /// Destination URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Enrich `message` with CloudEvents attributes and deliver it.
    ///
    /// Returns the destination's reply. Non-2xx responses are errors.
    pub async fn send(&self, mut message: Message) -> Result<Message, ProducerError> {
        self.codec
            .encode(&mut message, &self.endpoint, &self.service, self.zone);

        let request = match self.endpoint.config().content_mode {
            ContentMode::Binary => self
                .client
                .post(&self.url)
                .headers(header_map(message.headers().iter()))
                .body(message.body().clone()),
            ContentMode::Structured => {
                let envelope = self.codec.to_structured(&message)?;
                let codec = self.codec;
                let passthrough = message.headers().iter().filter(|(name, _)| {
                    !codec.is_cloud_event_header(name)
                        && !name.eq_ignore_ascii_case(message::CONTENT_TYPE)
                });
                self.client
                    .post(&self.url)
                    .headers(header_map(passthrough))
                    .header(CONTENT_TYPE, MIME_STRUCTURED_CONTENT_MODE)
                    .body(envelope)
            }
        };

        let url = self.url.clone();
        let id = message.id().to_string();
        debug!(url = %url, id = %id, "Sending event");

        // I/O runs on the transport's runtime, whichever runtime awaits send().
        let exchange = self.runtime.spawn(async move {
            let response = request.send().await?;
            let status = response.status();
            let mut reply = Message::new();
            for (name, value) in response.headers() {
                if let Ok(value) = value.to_str() {
                    reply.headers_mut().insert(name.as_str(), value);
                }
            }
            let body = response.bytes().await?;
            if !status.is_success() {
                warn!(url = %url, status = status.as_u16(), "Destination rejected event");
                return Err(ProducerError::Status {
                    url,
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
            }
            reply.set_body(body);
            Ok::<_, ProducerError>(reply)
        });

        exchange
            .await
            .map_err(|e| ProducerError::Aborted(e.to_string()))?
    }
}
