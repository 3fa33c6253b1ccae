use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

#[derive(Clone, Error, Debug)]
pub enum EventError {
    #[error("failed to subscribe events")]
    SubscriptionFailed,
}

/// A domain event broadcast over an [`EventBus`]. Implementors report a stable
/// tag used to key subscriptions, mirroring how handlers were keyed by type
/// name in the system this bus was modeled on.
pub trait Event: Clone + Send + Sync + 'static {
    fn kind(&self) -> &'static str;
}

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber<E> {
    id: u64,
    handler: Handler<E>,
}

/// Synchronous, mutex-guarded publish/subscribe bus.
///
/// `publish` invokes every matching handler on the caller's task, in
/// subscription order, while holding no lock (the handler list is cloned out
/// from under the mutex first). A handler may subscribe or unsubscribe
/// without deadlocking the bus it is being called from.
pub struct EventBus<E: Event> {
    handlers: Mutex<HashMap<&'static str, Vec<Subscriber<E>>>>,
    next_id: AtomicU64,
}

impl<E: Event> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> EventBus<E> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(
        &self,
        kind: &'static str,
        handler: impl Fn(&E) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push(Subscriber {
                id,
                handler: Arc::new(handler),
            });
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, kind: &'static str, id: SubscriptionId) {
        if let Some(subs) = self.handlers.lock().unwrap().get_mut(kind) {
            subs.retain(|sub| sub.id != id.0);
        }
    }

    pub fn publish(&self, event: E) {
        let kind = event.kind();
        let subs: Vec<Handler<E>> = {
            let handlers = self.handlers.lock().unwrap();
            match handlers.get(kind) {
                Some(subs) => subs.iter().map(|sub| sub.handler.clone()).collect(),
                None => Vec::new(),
            }
        };
        if subs.is_empty() {
            tracing::warn!(kind, "publishing event with no subscribers");
            return;
        }
        for handler in subs {
            handler(&event);
        }
    }
}
