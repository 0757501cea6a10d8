//! Listener registry: one shared [`Dispatcher`] per [`ListenerKey`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::ServerOptions;
use crate::listener::{DispatchError, Dispatcher, ListenerKey};

type Slot = Arc<OnceCell<Arc<Dispatcher>>>;

/// Concurrent get-or-create map of shared listeners.
///
/// The map lock only guards slot lookup; binding happens inside the slot's
/// `OnceCell`, so callers racing on one key wait for a single bind while
/// callers on other keys proceed.
pub struct ListenerRegistry {
    runtime: Handle,
    options: ServerOptions,
    entries: Mutex<HashMap<ListenerKey, Slot>>,
}

impl ListenerRegistry {
    pub fn new(runtime: Handle, options: ServerOptions) -> Self {
        Self {
            runtime,
            options,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &ListenerKey) -> Slot {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(key.clone()).or_default())
    }

    /// Return the dispatcher for `key`, binding its listener on first use.
    ///
    /// A failed bind is returned to the caller that attempted it and leaves
    /// the slot empty, so the next call retries.
    pub async fn get_or_create(&self, key: &ListenerKey) -> Result<Arc<Dispatcher>, DispatchError> {
        let slot = self.slot(key);
        let dispatcher = slot
            .get_or_try_init(|| async {
                debug!(key = %key, "Creating listener");
                Dispatcher::open(key.clone(), &self.runtime, &self.options)
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(dispatcher))
    }

    /// Already-bound dispatcher for `key`, if any.
    pub fn get(&self, key: &ListenerKey) -> Option<Arc<Dispatcher>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Number of bound listeners.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every listener and forget them.
    pub fn close_all(&self) {
        let drained: Vec<Slot> = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.drain().map(|(_, slot)| slot).collect()
        };
        for dispatcher in drained.iter().filter_map(|slot| slot.get()) {
            dispatcher.close();
        }
    }
}
