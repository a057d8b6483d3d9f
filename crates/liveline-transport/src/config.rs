// Per-channel settings shared by the push and pull transports

use serde_json::{Map, Value};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(25);
pub const DEFAULT_MAX_EVENTS_PER_POLL: usize = 100;
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1000;
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// What the client subscribes to and how the server should pace it
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub user_id: Option<String>,
    pub event_types: Vec<String>,
    pub filters: Map<String, Value>,
    /// Base polling interval advertised to the server
    pub poll_interval: Duration,
    /// How long the server may hold one poll open
    pub poll_timeout: Duration,
    pub max_events_per_poll: usize,
    pub include_metrics: bool,
    pub max_buffer_size: usize,
    /// Upper bound on the session delete issued by `close()`
    pub close_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            user_id: None,
            event_types: Vec::new(),
            filters: Map::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            max_events_per_poll: DEFAULT_MAX_EVENTS_PER_POLL,
            include_metrics: false,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl ChannelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = event_types;
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.filters.insert(key.into(), value);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn max_events_per_poll(mut self, max: usize) -> Self {
        self.max_events_per_poll = max;
        self
    }

    pub fn include_metrics(mut self, include: bool) -> Self {
        self.include_metrics = include;
        self
    }

    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}
