//! Inbound side: decode, process, reply.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info};

use crate::cloudevents::CloudEventProcessor;
use crate::endpoint::KnativeEndpoint;
use crate::environment::ServiceDefinition;
use crate::listener::{DispatchError, Dispatcher, HandlerError, RequestHandler, Route};
use crate::message::Message;

/// Consumer pipeline invoked with each decoded message.
///
/// The returned message is written back as the HTTP response.
pub trait Processor: Send + Sync {
    fn process(&self, message: Message) -> BoxFuture<'static, Result<Message, HandlerError>>;
}

/// [`Processor`] backed by an async closure.
pub struct FnProcessor<F>(F);

impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Message, HandlerError>> + Send + 'static,
{
    fn process(&self, message: Message) -> BoxFuture<'static, Result<Message, HandlerError>> {
        Box::pin((self.0)(message))
    }
}

/// Build a processor from an async closure.
pub fn processor_fn<F, Fut>(f: F) -> Arc<dyn Processor>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Message, HandlerError>> + Send + 'static,
{
    Arc::new(FnProcessor(f))
}

/// Dispatcher-facing handler for one consumer.
struct ConsumerHandler {
    codec: &'static dyn CloudEventProcessor,
    processor: Arc<dyn Processor>,
    strip_reply_headers: bool,
}

impl RequestHandler for ConsumerHandler {
    fn handle(&self, request: Message) -> BoxFuture<'static, Result<Message, HandlerError>> {
        let codec = self.codec;
        let processor = Arc::clone(&self.processor);
        let strip = self.strip_reply_headers;

        Box::pin(async move {
            let mut request = request;
            codec.decode(&mut request)?;
            let mut reply = processor.process(request).await?;
            if strip {
                reply
                    .headers_mut()
                    .retain(|name, _| !codec.is_cloud_event_header(name));
            }
            Ok(reply)
        })
    }
}

/// A consumer bound to one route of a shared listener.
///
/// The route stays registered until [`KnativeHttpConsumer::stop`] or drop.
pub struct KnativeHttpConsumer {
    service: ServiceDefinition,
    route: Route,
    dispatcher: Arc<Dispatcher>,
    registered: AtomicBool,
}

impl KnativeHttpConsumer {
    pub(crate) fn register(
        dispatcher: Arc<Dispatcher>,
        service: ServiceDefinition,
        endpoint: &KnativeEndpoint,
        processor: Arc<dyn Processor>,
    ) -> Result<Self, DispatchError> {
        let version = endpoint.version_for(&service);
        let handler = ConsumerHandler {
            codec: version.processor(),
            processor,
            strip_reply_headers: endpoint.config().remove_cloud_event_headers_in_reply,
        };
        let route = service.route();
        dispatcher.register(route.clone(), Arc::new(handler))?;

        info!(
            service = %service.name(),
            key = %dispatcher.key(),
            route = %route,
            version = %version,
            "Consumer started"
        );

        Ok(Self {
            service,
            route,
            dispatcher,
            registered: AtomicBool::new(true),
        })
    }

    pub fn service(&self) -> &ServiceDefinition {
        &self.service
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Address of the shared listener this consumer is registered on.
    pub fn local_addr(&self) -> SocketAddr {
        self.dispatcher.local_addr()
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Unregister the route. Later calls are no-ops.
    pub fn stop(&self) {
        if self.registered.swap(false, Ordering::SeqCst) {
            self.dispatcher.unregister(&self.route);
            debug!(service = %self.service.name(), route = %self.route, "Consumer stopped");
        }
    }
}

impl Drop for KnativeHttpConsumer {
    fn drop(&mut self) {
        self.stop();
    }
}
