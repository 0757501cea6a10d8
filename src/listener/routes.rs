//! Route table of one listener.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::{normalize_path, strip_port, DispatchError, ListenerKey, RequestHandler, Route};

/// Registered handlers keyed by route.
///
/// Written only by registration and removal, read by every request.
pub(crate) struct RouteTable {
    key: ListenerKey,
    routes: RwLock<HashMap<Route, Arc<dyn RequestHandler>>>,
    closed: AtomicBool,
}

/// Whether a route path covers a request path (segment-aware prefix).
fn path_matches(route: &str, request: &str) -> bool {
    if route == "/" || route == request {
        return true;
    }
    request.starts_with(route) && request[route.len()..].starts_with('/')
}

impl RouteTable {
    pub(crate) fn new(key: ListenerKey) -> Self {
        Self {
            key,
            routes: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn register(
        &self,
        route: Route,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), DispatchError> {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        // Checked under the write lock so registration cannot race close().
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::Closed(self.key.clone()));
        }
        if routes.contains_key(&route) {
            return Err(DispatchError::RouteConflict {
                key: self.key.clone(),
                route,
            });
        }
        routes.insert(route, handler);
        Ok(())
    }

    pub(crate) fn unregister(&self, route: &Route) -> bool {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(route)
            .is_some()
    }

    pub(crate) fn close(&self) {
        let _routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn len(&self) -> usize {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Find the handler for a request.
    ///
    /// An exact path match beats a prefix match, a longer prefix beats a
    /// shorter one, and at equal specificity a host-specific route beats a
    /// host-agnostic one.
    pub(crate) fn resolve(
        &self,
        host: Option<&str>,
        path: &str,
    ) -> Option<(Route, Arc<dyn RequestHandler>)> {
        let host = host.map(|h| strip_port(h).to_ascii_lowercase());
        let path = normalize_path(path);
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);

        routes
            .iter()
            .filter(|(route, _)| match (route.host(), host.as_deref()) {
                (None, _) => true,
                (Some(wanted), Some(actual)) => wanted == actual,
                (Some(_), None) => false,
            })
            .filter(|(route, _)| path_matches(route.path(), &path))
            .max_by_key(|(route, _)| {
                (
                    route.path() == path,
                    route.path().len(),
                    route.host().is_some(),
                )
            })
            .map(|(route, handler)| (route.clone(), Arc::clone(handler)))
    }
}
