use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::models::Message;

type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_token: u64,
    // Tokens are handed out in increasing order, so key order is registration order.
    handlers: BTreeMap<u64, Handler>,
}

/// Ordered set of inbound message listeners.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: impl Fn(&Message) + Send + Sync + 'static) -> ListenerHandle {
        let mut registry = self.inner.lock();
        let token = registry.next_token;
        registry.next_token += 1;
        registry.handlers.insert(token, Arc::new(handler));
        debug!("Registered message listener {}", token);

        ListenerHandle {
            token,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers `message` to every listener registered when the call started.
    ///
    /// Listeners run without the registry lock held, so they may register or
    /// unregister listeners. Such changes apply from the next dispatch on.
    pub fn dispatch(&self, message: &Message) -> usize {
        let snapshot: Vec<Handler> = self.inner.lock().handlers.values().cloned().collect();
        for handler in &snapshot {
            handler(message);
        }
        snapshot.len()
    }

    pub fn clear(&self) {
        self.inner.lock().handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes exactly the listener it was returned for.
#[derive(Debug)]
pub struct ListenerHandle {
    token: u64,
    registry: Weak<Mutex<Registry>>,
}

impl ListenerHandle {
    /// Returns `false` if the listener was already gone.
    pub fn unregister(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let removed = registry.lock().handlers.remove(&self.token).is_some();
        if removed {
            debug!("Unregistered message listener {}", self.token);
        }
        removed
    }
}
