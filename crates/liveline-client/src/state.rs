use crate::config::ClientConfig;
use liveline_transport::TransportError;
use liveline_types::{ConnectionState, ConnectionStatus, MetricsSnapshot, SessionInfo, TransportMode};
use std::time::Duration;

/// Knobs that govern error counting and reconnect pacing
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub multiplier: f64,
    pub decay: f64,
    pub max_factor: f64,
    pub fallback_threshold: u32,
    pub max_retries: u32,
    pub reconnect_delays: Vec<Duration>,
}

impl BackoffPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            multiplier: config.backoff_multiplier,
            decay: config.backoff_decay,
            max_factor: config.max_backoff_factor,
            fallback_threshold: config.fallback_threshold,
            max_retries: config.max_retries,
            reconnect_delays: config
                .reconnect_delays_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        }
    }

    fn delay_for(&self, retry_count: u32) -> Duration {
        let last = self.reconnect_delays.len().saturating_sub(1);
        self.reconnect_delays
            .get((retry_count as usize).min(last))
            .copied()
            .unwrap_or_default()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// What the caller should do after a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Keep the session and try again on the next tick
    RetryInPlace,
    /// Drop the session and start the reconnect cycle
    Reconnect,
    /// Retrying cannot help; go straight to `error`
    Fatal,
}

/// Connection status, counters and the active session.
///
/// Pure bookkeeping: no I/O and no locking. The client keeps it behind a
/// single mutex so every transition is sequenced.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    policy: BackoffPolicy,
    mode: TransportMode,
    status: ConnectionStatus,
    session: Option<SessionInfo>,
    retry_count: u32,
    consecutive_errors: u32,
    backoff_factor: f64,
}

impl ConnectionMachine {
    pub fn new(policy: BackoffPolicy, mode: TransportMode) -> Self {
        Self {
            policy,
            mode,
            status: ConnectionStatus::Disconnected,
            session: None,
            retry_count: 0,
            consecutive_errors: 0,
            backoff_factor: 1.0,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Enter `connecting`. Counters restart only when coming from an idle
    /// state; a connect issued mid-reconnect keeps the cycle's retry count.
    pub fn begin_connect(&mut self) {
        if self.status.is_idle() {
            self.retry_count = 0;
            self.consecutive_errors = 0;
            self.backoff_factor = 1.0;
        }
        self.status = ConnectionStatus::Connecting;
    }

    /// Record which transport is being attempted
    pub fn attempting(&mut self, mode: TransportMode) {
        self.mode = mode;
    }

    pub fn connected(&mut self, session: SessionInfo) {
        self.mode = session.mode;
        self.session = Some(session);
        self.status = ConnectionStatus::Connected;
        self.record_success();
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
        self.backoff_factor = (self.backoff_factor * self.policy.decay).max(1.0);
        if let Some(session) = self.session.as_mut() {
            session.touch();
        }
    }

    /// Count a retryable failure. Non-retryable errors leave the counters
    /// and backoff untouched.
    pub fn record_failure(&mut self, error: &TransportError) -> FailureAction {
        if !error.is_retryable() {
            return FailureAction::Fatal;
        }

        self.consecutive_errors += 1;
        self.backoff_factor = (self.backoff_factor * self.policy.multiplier).min(self.policy.max_factor);

        if self.consecutive_errors >= self.policy.fallback_threshold {
            FailureAction::Reconnect
        } else {
            FailureAction::RetryInPlace
        }
    }

    /// Enter `reconnecting` and hand back the session being abandoned
    pub fn begin_reconnect(&mut self) -> Option<SessionInfo> {
        self.status = ConnectionStatus::Reconnecting;
        self.session.take()
    }

    /// Claim the next reconnect slot. `None` once `max_retries` attempts
    /// have been used, at which point the machine is in `error`.
    pub fn next_reconnect_delay(&mut self) -> Option<Duration> {
        if self.retry_count >= self.policy.max_retries {
            self.status = ConnectionStatus::Error;
            return None;
        }
        let delay = self.policy.delay_for(self.retry_count);
        self.retry_count += 1;
        Some(delay)
    }

    /// Enter `error`, releasing the session if one is still held
    pub fn fail(&mut self) -> Option<SessionInfo> {
        self.status = ConnectionStatus::Error;
        self.session.take()
    }

    pub fn disconnect(&mut self) -> Option<SessionInfo> {
        self.status = ConnectionStatus::Disconnected;
        self.session.take()
    }

    pub fn touch(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.touch();
        }
    }

    pub fn snapshot(&self, metrics: MetricsSnapshot) -> ConnectionState {
        ConnectionState {
            mode: self.mode,
            status: self.status,
            session_id: self.session.as_ref().map(|s| s.session_id.clone()),
            last_activity: self.session.as_ref().map(|s| s.last_activity),
            metrics,
            retry_count: self.retry_count,
            consecutive_errors: self.consecutive_errors,
            backoff_factor: self.backoff_factor,
        }
    }
}
