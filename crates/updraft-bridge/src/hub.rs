//! ---
//! upd_section: "02-bridge"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Capability-restricted channel pair between controller and presenters."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::event::{Topic, UpdateEvent};

type Handler = Arc<dyn Fn(&UpdateEvent) + Send + Sync>;

/// Topic keyed handler table.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<Topic, Vec<(u64, Handler)>>>,
}

impl ListenerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, topic: Topic, handler: Handler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .entry(topic)
            .or_default()
            .push((id, handler));
        id
    }

    fn remove(&self, topic: Topic, id: u64) -> bool {
        let mut guard = self.handlers.lock();
        let Some(list) = guard.get_mut(&topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            guard.remove(&topic);
        }
        removed
    }

    /// Total number of live handlers.
    pub fn len(&self) -> usize {
        self.handlers.lock().values().map(Vec::len).sum()
    }

    /// True when no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handlers registered for one topic.
    pub fn count_for(&self, topic: Topic) -> usize {
        self.handlers.lock().get(&topic).map_or(0, Vec::len)
    }

    /// Invoke every handler of the event's topic in registration order.
    ///
    /// Handlers run outside the lock so they may subscribe or unsubscribe.
    pub fn dispatch(&self, event: &UpdateEvent) -> usize {
        let targets: Vec<Handler> = self
            .handlers
            .lock()
            .get(&event.topic())
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        trace!(seq = event.seq, topic = event.topic().as_str(), listeners = targets.len(), "dispatching event");
        for handler in &targets {
            handler(event);
        }
        targets.len()
    }
}

/// Handle to a registered handler. Dropping it removes the handler.
#[must_use = "dropping a Subscription immediately unsubscribes the handler"]
pub struct Subscription {
    registry: Weak<ListenerRegistry>,
    topic: Topic,
    id: u64,
}

impl Subscription {
    pub(crate) fn register<F>(registry: &Arc<ListenerRegistry>, topic: Topic, handler: F) -> Self
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        let id = registry.add(topic, Arc::new(handler));
        Self {
            registry: Arc::downgrade(registry),
            topic,
            id,
        }
    }

    /// Topic this subscription listens to.
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Remove the handler now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.topic, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use crate::types::Phase;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn drop_and_unsubscribe_remove_handlers() {
        let registry = Arc::new(ListenerRegistry::new());
        let first = Subscription::register(&registry, Topic::Status, |_| {});
        let second = Subscription::register(&registry, Topic::Status, |_| {});
        let third = Subscription::register(&registry, Topic::Error, |_| {});
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.count_for(Topic::Status), 2);

        first.unsubscribe();
        drop(third);
        assert_eq!(registry.len(), 1);
        drop(second);
        assert!(registry.is_empty());
    }

    #[test]
    fn dispatch_only_reaches_matching_topic() {
        let registry = Arc::new(ListenerRegistry::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _status = Subscription::register(&registry, Topic::Status, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let _error = Subscription::register(&registry, Topic::Error, |_| {
            panic!("error handler must not run");
        });

        let event = UpdateEvent::new(1, Phase::Checking, EventPayload::status("Checking for updates..."));
        assert_eq!(registry.dispatch(&event), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
