use chrono::Utc;
use liveline_types::{BufferStats, Event};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub accepted: bool,
}

#[derive(Debug, Default)]
struct BufferInner {
    events: HashMap<String, Event>,
    /// Ids in insertion order, oldest at the front
    order: VecDeque<String>,
    total_accepted: u64,
    total_rejected: u64,
    total_evicted: u64,
}

impl BufferInner {
    fn remove_where(&mut self, mut doomed: impl FnMut(&Event) -> bool) -> usize {
        let before = self.events.len();
        self.events.retain(|_, event| !doomed(event));
        let events = &self.events;
        self.order.retain(|id| events.contains_key(id));
        before - self.events.len()
    }
}

/// Bounded, id-deduplicated store of received events.
///
/// The map and the order list always change together under one lock, so
/// they hold exactly the same ids.
#[derive(Debug)]
pub struct EventBuffer {
    capacity: usize,
    inner: Mutex<BufferInner>,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(BufferInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Store `event` unless it is a duplicate, malformed or already expired,
    /// then evict from the oldest end while over capacity
    pub fn ingest(&self, event: Event) -> IngestOutcome {
        let mut inner = self.lock();

        if event.id.is_empty()
            || event.event_type.is_empty()
            || inner.events.contains_key(&event.id)
            || event.is_expired(Utc::now())
        {
            inner.total_rejected += 1;
            return IngestOutcome { accepted: false };
        }

        inner.order.push_back(event.id.clone());
        inner.events.insert(event.id.clone(), event);
        inner.total_accepted += 1;

        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.events.remove(&oldest);
                inner.total_evicted += 1;
            }
        }

        IngestOutcome { accepted: true }
    }

    /// The last `n` events in insertion order, oldest first
    pub fn recent(&self, n: usize) -> Vec<Event> {
        let inner = self.lock();
        let skip = inner.order.len().saturating_sub(n);
        inner
            .order
            .iter()
            .skip(skip)
            .filter_map(|id| inner.events.get(id).cloned())
            .collect()
    }

    /// Drop events older than `max_age` or past their expiry; returns how
    /// many were removed
    pub fn sweep(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age));

        let removed = self.lock().remove_where(|event| {
            event.is_expired(now) || cutoff.map(|c| event.is_older_than(c)).unwrap_or(false)
        });
        if removed > 0 {
            tracing::debug!("Swept {} stale events from buffer", removed);
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().events.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.events.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.lock();
        let created = |id: Option<&String>| {
            id.and_then(|id| inner.events.get(id)).map(|event| event.created_at)
        };

        BufferStats {
            size: inner.order.len(),
            capacity: self.capacity,
            oldest: created(inner.order.front()),
            newest: created(inner.order.back()),
            total_accepted: inner.total_accepted,
            total_rejected: inner.total_rejected,
            total_evicted: inner.total_evicted,
        }
    }
}
