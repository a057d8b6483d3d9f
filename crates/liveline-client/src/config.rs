use crate::error::{ClientError, Result};
use liveline_transport::ChannelOptions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

pub const DEFAULT_RECONNECT_DELAYS_MS: [u64; 5] = [1_000, 2_000, 5_000, 10_000, 30_000];

/// Everything a `LiveClient` needs to know, loadable from TOML/env via serde.
///
/// Durations are plain millisecond/second integers so that configuration
/// files stay readable; use the accessor methods for `Duration` values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server root, e.g. "https://events.example.com/api/realtime"
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(alias = "enable_sse")]
    pub enable_push: bool,
    #[serde(alias = "enable_polling")]
    pub enable_pull: bool,
    /// Try pull when push fails
    pub auto_fallback: bool,
    /// Let a reconnect that started in pull mode try push first again
    pub retry_push_after_pull: bool,

    pub event_types: Vec<String>,
    pub filters: Map<String, Value>,

    pub poll_interval_ms: u64,
    pub poll_timeout_secs: u64,
    pub max_events_per_poll: usize,
    pub include_metrics: bool,

    pub heartbeat_interval_ms: u64,
    pub cleanup_interval_ms: u64,
    pub max_event_age_secs: u64,
    pub max_buffer_size: usize,

    /// Consecutive failures before a reconnect replaces in-place retries
    pub fallback_threshold: u32,
    pub max_retries: u32,
    pub reconnect_delays_ms: Vec<u64>,
    pub backoff_multiplier: f64,
    pub backoff_decay: f64,
    pub max_backoff_factor: f64,

    pub request_timeout_ms: u64,
    pub stream_open_timeout_ms: u64,
    pub disconnect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/realtime".to_string(),
            auth_token: None,
            user_id: None,
            enable_push: true,
            enable_pull: true,
            auto_fallback: true,
            retry_push_after_pull: false,
            event_types: Vec::new(),
            filters: Map::new(),
            poll_interval_ms: 1_000,
            poll_timeout_secs: 25,
            max_events_per_poll: 100,
            include_metrics: false,
            heartbeat_interval_ms: 30_000,
            cleanup_interval_ms: 300_000,
            max_event_age_secs: 86_400,
            max_buffer_size: 1_000,
            fallback_threshold: 3,
            max_retries: 5,
            reconnect_delays_ms: DEFAULT_RECONNECT_DELAYS_MS.to_vec(),
            backoff_multiplier: 1.5,
            backoff_decay: 0.8,
            max_backoff_factor: 60.0,
            request_timeout_ms: 30_000,
            stream_open_timeout_ms: 60_000,
            disconnect_timeout_ms: 5_000,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_push(mut self, enabled: bool) -> Self {
        self.enable_push = enabled;
        self
    }

    pub fn with_pull(mut self, enabled: bool) -> Self {
        self.enable_pull = enabled;
        self
    }

    pub fn with_auto_fallback(mut self, enabled: bool) -> Self {
        self.auto_fallback = enabled;
        self
    }

    pub fn with_retry_push_after_pull(mut self, enabled: bool) -> Self {
        self.retry_push_after_pull = enabled;
        self
    }

    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = event_types;
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.filters.insert(key.into(), value);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_include_metrics(mut self, include: bool) -> Self {
        self.include_metrics = include;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_event_age(mut self, age: Duration) -> Self {
        self.max_event_age_secs = age.as_secs();
        self
    }

    pub fn with_max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    pub fn with_fallback_threshold(mut self, threshold: u32) -> Self {
        self.fallback_threshold = threshold;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_reconnect_delays(mut self, delays: Vec<Duration>) -> Self {
        self.reconnect_delays_ms = delays.into_iter().map(|d| d.as_millis() as u64).collect();
        self
    }

    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn max_event_age(&self) -> Duration {
        Duration::from_secs(self.max_event_age_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stream_open_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_open_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            user_id: self.user_id.clone(),
            event_types: self.event_types.clone(),
            filters: self.filters.clone(),
            poll_interval: self.poll_interval(),
            poll_timeout: self.poll_timeout(),
            max_events_per_poll: self.max_events_per_poll,
            include_metrics: self.include_metrics,
            max_buffer_size: self.max_buffer_size,
            close_timeout: self.disconnect_timeout(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ClientError::InvalidConfig(msg.to_string()));

        if !self.enable_push && !self.enable_pull {
            return invalid("at least one of enable_push and enable_pull must be set");
        }
        if self.base_url.trim().is_empty() {
            return invalid("base_url must not be empty");
        }
        if self.max_buffer_size == 0 {
            return invalid("max_buffer_size must be at least 1");
        }
        if self.reconnect_delays_ms.is_empty() {
            return invalid("reconnect_delays_ms must not be empty");
        }
        if self.fallback_threshold == 0 {
            return invalid("fallback_threshold must be at least 1");
        }
        if self.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be positive");
        }
        if self.heartbeat_interval_ms == 0 || self.cleanup_interval_ms == 0 {
            return invalid("heartbeat_interval_ms and cleanup_interval_ms must be positive");
        }
        if self.backoff_multiplier < 1.0 || !(0.0..=1.0).contains(&self.backoff_decay) {
            return invalid("backoff_multiplier must be >= 1 and backoff_decay within 0..=1");
        }
        if self.max_backoff_factor < 1.0 {
            return invalid("max_backoff_factor must be >= 1");
        }
        Ok(())
    }
}
