//! One physical listener and its request loop.

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex, PoisonError};

use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_LENGTH;
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use super::{DispatchError, HandlerError, ListenerKey, RequestHandler, Route, RouteTable};
use crate::config::ServerOptions;
use crate::message::Message;

/// Reply headers owned by the HTTP layer rather than the consumer.
const HOP_BY_HOP: &[&str] = &["connection", "content-length", "host", "transfer-encoding"];

/// Shared listener bound to one [`ListenerKey`].
///
/// Created by [`crate::registry::ListenerRegistry`]; the server task runs on
/// the transport's I/O runtime until [`Dispatcher::close`] or drop.
pub struct Dispatcher {
    key: ListenerKey,
    local_addr: SocketAddr,
    routes: Arc<RouteTable>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("key", &self.key)
            .field("local_addr", &self.local_addr)
            .field("routes", &self.routes.len())
            .finish()
    }
}

impl Dispatcher {
    /// [`Dispatcher::bind`] on the runtime's blocking pool, keeping name
    /// resolution and socket setup off the async workers.
    pub(crate) async fn open(
        key: ListenerKey,
        runtime: &Handle,
        options: &ServerOptions,
    ) -> Result<Self, DispatchError> {
        let handle = runtime.clone();
        let options = options.clone();
        let bind_key = key.clone();
        match runtime
            .spawn_blocking(move || Self::bind(bind_key, &handle, &options))
            .await
        {
            Ok(result) => result,
            Err(e) => Err(DispatchError::Bind {
                key,
                source: io::Error::other(e),
            }),
        }
    }

    /// Open the socket for `key` and start serving on `runtime`. Blocks
    /// while the host name is resolved.
    pub(crate) fn bind(
        key: ListenerKey,
        runtime: &Handle,
        options: &ServerOptions,
    ) -> Result<Self, DispatchError> {
        let addr = (key.host(), key.port())
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| DispatchError::Resolve(key.clone()))?;

        let bind_error = |source| DispatchError::Bind {
            key: key.clone(),
            source,
        };
        let std_listener = std::net::TcpListener::bind(addr).map_err(bind_error)?;
        std_listener.set_nonblocking(true).map_err(bind_error)?;
        let local_addr = std_listener.local_addr().map_err(bind_error)?;

        let listener = {
            let _guard = runtime.enter();
            tokio::net::TcpListener::from_std(std_listener).map_err(bind_error)?
        };

        let routes = Arc::new(RouteTable::new(key.clone()));
        let app = router(Arc::clone(&routes), options);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task_key = key.clone();
        runtime.spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(key = %task_key, error = %e, "Listener terminated");
            }
            debug!(key = %task_key, "Listener stopped");
        });

        info!(key = %key, address = %local_addr, "Listener bound");

        Ok(Self {
            key,
            local_addr,
            routes,
            shutdown: Mutex::new(Some(shutdown_tx)),
        })
    }

    pub fn key(&self) -> &ListenerKey {
        &self.key
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Add a consumer. A route already owned by another consumer is rejected.
    pub fn register(
        &self,
        route: Route,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), DispatchError> {
        let shown = route.to_string();
        self.routes.register(route, handler)?;
        debug!(key = %self.key, route = %shown, "Route registered");
        Ok(())
    }

    /// Remove a consumer. Requests already dispatched to it still complete.
    pub fn unregister(&self, route: &Route) -> bool {
        let removed = self.routes.unregister(route);
        if removed {
            debug!(key = %self.key, route = %route, "Route unregistered");
        }
        removed
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Reject further registrations and stop accepting connections.
    pub fn close(&self) {
        self.routes.close();
        let sender = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
            info!(key = %self.key, "Listener closing");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.routes.is_closed()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

struct ListenerState {
    routes: Arc<RouteTable>,
    options: ServerOptions,
}

/// Build the axum router for a route table (separated for testing).
pub(crate) fn router(routes: Arc<RouteTable>, options: &ServerOptions) -> Router {
    let state = Arc::new(ListenerState {
        routes,
        options: options.clone(),
    });
    Router::new()
        .fallback(on_request)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn request_host(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.host().map(str::to_string))
}

fn declared_length(parts: &Parts) -> Option<usize> {
    parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn to_message(parts: &Parts, body: bytes::Bytes) -> Message {
    let mut message = Message::with_body(body);
    for (name, value) in parts.headers.iter() {
        if let Ok(value) = value.to_str() {
            message.headers_mut().insert(name.as_str(), value);
        }
    }
    message
}

fn to_response(reply: Message) -> Response {
    let mut response = Response::new(Body::empty());
    for (name, value) in reply.headers().iter() {
        if HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().append(name, value);
            }
            _ => debug!(header = %name, "Skipping reply header not valid for HTTP"),
        }
    }
    *response.body_mut() = Body::from(reply.into_body());
    response
}

/// Request loop entry: every path produces exactly one response.
async fn on_request(State(state): State<Arc<ListenerState>>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let host = request_host(&parts);
    let path = parts.uri.path().to_string();

    let Some((route, handler)) = state.routes.resolve(host.as_deref(), &path) else {
        debug!(host = ?host, path = %path, "No consumer registered for request");
        return (
            StatusCode::NOT_FOUND,
            format!(
                "No consumer registered for host '{}' and path '{}'",
                host.as_deref().unwrap_or(""),
                path
            ),
        )
            .into_response();
    };

    let limit = state.options.max_body_bytes;
    if declared_length(&parts).is_some_and(|len| len > limit) {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Request body exceeds {} bytes", limit),
        )
            .into_response();
    }
    let body = match axum::body::to_bytes(body, limit).await {
        Ok(body) => body,
        Err(e) => {
            warn!(route = %route, error = %e, "Failed to read request body");
            return (
                StatusCode::BAD_REQUEST,
                format!("Failed to read request body: {}", e),
            )
                .into_response();
        }
    };

    // Run the consumer as its own task so a panic stays local to this request.
    let task = tokio::spawn(handler.handle(to_message(&parts, body)));
    let abort = task.abort_handle();

    match tokio::time::timeout(state.options.request_timeout(), task).await {
        Ok(Ok(Ok(reply))) => to_response(reply),
        Ok(Ok(Err(e))) => {
            match &e {
                HandlerError::Decode(_) => warn!(route = %route, error = %e, "Rejected request"),
                HandlerError::Processing(_) => {
                    error!(route = %route, error = %e, "Consumer failed")
                }
            }
            (e.status(), e.to_string()).into_response()
        }
        Ok(Err(join_error)) => {
            error!(route = %route, error = %join_error, "Consumer task aborted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Consumer terminated unexpectedly".to_string(),
            )
                .into_response()
        }
        Err(_) => {
            abort.abort();
            error!(route = %route, timeout = ?state.options.request_timeout(), "Consumer timed out");
            (
                StatusCode::GATEWAY_TIMEOUT,
                "Consumer did not respond in time".to_string(),
            )
                .into_response()
        }
    }
}
