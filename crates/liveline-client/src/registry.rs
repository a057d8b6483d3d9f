use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Topic that receives every application event
pub const WILDCARD: &str = "*";

pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    topics: HashMap<String, Vec<(HandlerId, Handler)>>,
}

/// Topic → ordered handler list.
///
/// Handlers run outside the registry lock, so a handler may subscribe or
/// unsubscribe (itself included) while being invoked.
#[derive(Default)]
pub struct SubscriberRegistry {
    inner: Mutex<RegistryInner>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on<F>(&self, topic: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = HandlerId(inner.next_id);
        inner
            .topics
            .entry(topic.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove one handler; `false` if it was not registered on `topic`
    pub fn off(&self, topic: &str, id: HandlerId) -> bool {
        let mut inner = self.lock();
        let Some(handlers) = inner.topics.get_mut(topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        let removed = handlers.len() < before;
        if handlers.is_empty() {
            inner.topics.remove(topic);
        }
        removed
    }

    pub fn off_all(&self, topic: &str) -> usize {
        self.lock()
            .topics
            .remove(topic)
            .map(|handlers| handlers.len())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.lock().topics.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().topics.values().map(Vec::len).sum()
    }

    pub fn has_subscribers(&self, topic: &str) -> bool {
        self.lock().topics.contains_key(topic)
    }

    fn handlers(&self, topic: &str) -> Vec<Handler> {
        self.lock()
            .topics
            .get(topic)
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    /// Invoke every handler on `topic` in registration order; returns how
    /// many ran
    pub fn emit(&self, topic: &str, payload: &Value) -> usize {
        let handlers = self.handlers(topic);
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }
}
