use crate::buffer::EventBuffer;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::metrics::{health_snapshot, ServiceMetrics};
use crate::registry::{HandlerId, SubscriberRegistry, WILDCARD};
use crate::scheduler::{TimerHandle, TimerKind, Timers};
use crate::state::{BackoffPolicy, ConnectionMachine, FailureAction};
use futures::future::BoxFuture;
use liveline_transport::{
    ChannelOptions, ErrorKind, HeartbeatRequest, HttpLiveApi, LiveApi, PullTransport,
    PushTransport, Transport, TransportError,
};
use liveline_types::{
    ConnectionState, ConnectionStatus, Event, HealthSnapshot, MetricsSnapshot, SessionInfo,
    TransportMode,
};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::{Instant, MissedTickBehavior};

/// Reserved payload field carrying the client's state at dispatch time
pub const CONNECTION_STATE_FIELD: &str = "connection_state";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

struct Connection {
    machine: ConnectionMachine,
    transport: Option<Arc<dyn Transport>>,
}

impl Connection {
    /// Detach the active session together with the transport that owns it
    fn release(&mut self, session: Option<SessionInfo>) -> Option<(SessionInfo, Arc<dyn Transport>)> {
        let transport = self.transport.take();
        session.zip(transport)
    }
}

enum Establish {
    Connected,
    /// A disconnect overtook the attempt
    Cancelled,
    Failed(TransportError),
}

enum LoopControl {
    Continue,
    Stop,
}

struct Inner {
    config: ClientConfig,
    options: ChannelOptions,
    api: Arc<dyn LiveApi>,
    connection: Mutex<Connection>,
    metrics: ServiceMetrics,
    buffer: EventBuffer,
    registry: SubscriberRegistry,
    timers: Mutex<Timers>,
    /// Bumped on every connect and disconnect; tasks from an older epoch
    /// must not touch state
    epoch: AtomicU64,
    /// Serialises session establishment
    transition: tokio::sync::Mutex<()>,
    /// Held across ingest and dispatch so handlers see buffer order
    delivery: Mutex<()>,
    server_metrics: Mutex<Option<Value>>,
    destroyed: AtomicBool,
}

impl Inner {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn state(&self) -> ConnectionState {
        let metrics = self.metrics.snapshot();
        lock(&self.connection).machine.snapshot(metrics)
    }

    fn make_transport(&self, mode: TransportMode) -> Arc<dyn Transport> {
        match mode {
            TransportMode::Push => Arc::new(PushTransport::new(self.api.clone(), self.options.clone())),
            TransportMode::Pull => Arc::new(PullTransport::new(self.api.clone(), self.options.clone())),
        }
    }

    fn connect_chain(&self) -> Vec<TransportMode> {
        let mut chain = Vec::with_capacity(2);
        if self.config.enable_push {
            chain.push(TransportMode::Push);
        }
        if self.config.enable_pull && (chain.is_empty() || self.config.auto_fallback) {
            chain.push(TransportMode::Pull);
        }
        chain
    }

    /// A pull-mode failure stays on pull unless configured otherwise
    fn reconnect_chain(&self, from: TransportMode) -> Vec<TransportMode> {
        match from {
            TransportMode::Pull if !self.config.retry_push_after_pull => vec![TransportMode::Pull],
            _ => self.connect_chain(),
        }
    }

    fn tick_delay(&self) -> std::time::Duration {
        let factor = lock(&self.connection).machine.backoff_factor();
        self.config.poll_interval().mul_f64(factor)
    }

    fn install(&self, epoch: u64, kind: TimerKind, handle: TimerHandle) {
        let mut timers = lock(&self.timers);
        if self.is_current(epoch) {
            timers.set(kind, handle);
        }
    }

    fn publish_status(&self, status: ConnectionStatus, error: Option<&str>) {
        let state = self.state();
        let mut payload = Map::new();
        payload.insert("status".to_string(), json!(status.as_str()));
        payload.insert("mode".to_string(), json!(state.mode.as_str()));
        if let Some(error) = error {
            payload.insert("error".to_string(), json!(error));
        }
        payload.insert(
            CONNECTION_STATE_FIELD.to_string(),
            serde_json::to_value(&state).unwrap_or(Value::Null),
        );
        self.registry.emit(status.as_str(), &Value::Object(payload));
    }

    /// Ingest a batch in order, handing each newly accepted event to its
    /// subscribers before the next one is ingested
    fn deliver(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }

        let _order = lock(&self.delivery);
        let state = serde_json::to_value(self.state()).unwrap_or(Value::Null);

        for event in events {
            if !self.buffer.ingest(event.clone()).accepted {
                tracing::debug!("Skipping duplicate or stale event {}", event.id);
                continue;
            }

            let mut payload = event.payload.clone();
            payload.insert(CONNECTION_STATE_FIELD.to_string(), state.clone());
            self.registry.emit(&event.event_type, &Value::Object(payload));

            if self.registry.has_subscribers(WILDCARD) {
                if let Ok(Value::Object(mut full)) = serde_json::to_value(&event) {
                    full.insert(CONNECTION_STATE_FIELD.to_string(), state.clone());
                    self.registry.emit(WILDCARD, &Value::Object(full));
                }
            }
        }
    }

    fn record_success(&self, epoch: u64) {
        let mut conn = lock(&self.connection);
        if self.is_current(epoch) {
            conn.machine.record_success();
        }
    }

    /// Close a released session without holding up the caller
    fn close_detached(released: Option<(SessionInfo, Arc<dyn Transport>)>) {
        if let Some((session, transport)) = released {
            tokio::spawn(async move {
                transport.close(&session).await;
            });
        }
    }

    /// Enter `error` and stop the session's tasks
    fn fail(&self, epoch: u64, reason: &str) {
        let released = {
            let mut conn = lock(&self.connection);
            if !self.is_current(epoch) {
                return;
            }
            let session = conn.machine.fail();
            conn.release(session)
        };
        lock(&self.timers).cancel_session_tasks();
        Self::close_detached(released);

        tracing::error!("Live connection failed: {}", reason);
        self.publish_status(ConnectionStatus::Error, Some(reason));
    }

    fn handle_failure(self: &Arc<Self>, epoch: u64, error: &TransportError) -> LoopControl {
        let (action, mode, consecutive) = {
            let mut conn = lock(&self.connection);
            if !self.is_current(epoch) {
                return LoopControl::Stop;
            }
            let action = conn.machine.record_failure(error);
            (action, conn.machine.mode(), conn.machine.consecutive_errors())
        };

        match action {
            FailureAction::RetryInPlace => {
                tracing::warn!(
                    "{} transport error ({} in a row), retrying: {}",
                    mode,
                    consecutive,
                    error
                );
                LoopControl::Continue
            }
            FailureAction::Reconnect => {
                tracing::warn!(
                    "{} transport failed {} times in a row, reconnecting: {}",
                    mode,
                    consecutive,
                    error
                );
                self.schedule_reconnect(epoch, mode);
                LoopControl::Stop
            }
            FailureAction::Fatal => {
                self.fail(epoch, &error.to_string());
                LoopControl::Stop
            }
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, epoch: u64, from: TransportMode) {
        let released = {
            let mut conn = lock(&self.connection);
            if !self.is_current(epoch) {
                return;
            }
            let session = conn.machine.begin_reconnect();
            conn.release(session)
        };
        Self::close_detached(released);
        self.publish_status(ConnectionStatus::Reconnecting, None);

        let inner = Arc::clone(self);
        let task = TimerHandle::spawn("reconnect", inner.reconnect_loop(epoch, from));
        let mut timers = lock(&self.timers);
        if self.is_current(epoch) {
            timers.cancel(TimerKind::Heartbeat);
            timers.set(TimerKind::Reconnect, task);
        }
    }

    /// Boxed so the reconnect task can be spawned from the loops it
    /// eventually restarts
    fn reconnect_loop(self: Arc<Self>, epoch: u64, from: TransportMode) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let chain = self.reconnect_chain(from);

            loop {
                let next = {
                    let mut conn = lock(&self.connection);
                    if !self.is_current(epoch) {
                        return;
                    }
                    conn.machine
                        .next_reconnect_delay()
                        .map(|delay| (delay, conn.machine.retry_count()))
                };
                let Some((delay, attempt)) = next else {
                    let reason = format!(
                        "gave up after {} reconnect attempts",
                        self.config.max_retries
                    );
                    self.fail(epoch, &reason);
                    return;
                };

                tracing::info!(
                    "Reconnect attempt {}/{} in {:?}",
                    attempt,
                    self.config.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;

                let _transition = self.transition.lock().await;
                match self.establish(epoch, &chain).await {
                    Establish::Connected | Establish::Cancelled => return,
                    Establish::Failed(e) if !e.is_retryable() => {
                        self.fail(epoch, &e.to_string());
                        return;
                    }
                    Establish::Failed(e) => {
                        tracing::warn!("Reconnect attempt {} failed: {}", attempt, e);
                    }
                }
            }
        })
    }

    /// Walk `chain` until one transport opens. An authentication failure
    /// ends the walk, since every transport shares the credentials.
    async fn establish(self: &Arc<Self>, epoch: u64, chain: &[TransportMode]) -> Establish {
        let mut last_error = None;

        for &mode in chain {
            {
                let mut conn = lock(&self.connection);
                if !self.is_current(epoch) {
                    return Establish::Cancelled;
                }
                conn.machine.attempting(mode);
            }

            let transport = self.make_transport(mode);
            let started = Instant::now();
            let opened = transport.open().await;
            self.metrics.record(opened.is_ok(), elapsed_ms(started));

            match opened {
                Ok(session) => {
                    let accepted = {
                        let mut conn = lock(&self.connection);
                        if self.is_current(epoch) {
                            conn.machine.connected(session.clone());
                            conn.transport = Some(transport.clone());
                            true
                        } else {
                            false
                        }
                    };
                    if !accepted {
                        tracing::debug!("Discarding session {} opened during disconnect", session.session_id);
                        transport.close(&session).await;
                        return Establish::Cancelled;
                    }

                    tracing::info!("Connected via {} transport (session {})", mode, session.session_id);
                    self.start_session_tasks(epoch, transport, session);
                    self.publish_status(ConnectionStatus::Connected, None);
                    return Establish::Connected;
                }
                Err(e) => {
                    tracing::warn!("{} transport failed to open: {}", mode, e);
                    {
                        let mut conn = lock(&self.connection);
                        if self.is_current(epoch) {
                            conn.machine.record_failure(&e);
                        }
                    }
                    let stop = e.kind == ErrorKind::AuthenticationError;
                    last_error = Some(e);
                    if stop {
                        break;
                    }
                }
            }
        }

        Establish::Failed(last_error.unwrap_or_else(|| TransportError::unknown("No transport is enabled")))
    }

    fn start_session_tasks(self: &Arc<Self>, epoch: u64, transport: Arc<dyn Transport>, session: SessionInfo) {
        let (kind, task) = match transport.mode() {
            TransportMode::Push => (
                TimerKind::Stream,
                TimerHandle::spawn("stream", Arc::clone(self).stream_loop(epoch, transport, session)),
            ),
            TransportMode::Pull => (
                TimerKind::Poll,
                TimerHandle::spawn("poll", Arc::clone(self).poll_loop(epoch, transport, session)),
            ),
        };
        self.install(epoch, kind, task);
        self.install(
            epoch,
            TimerKind::Heartbeat,
            TimerHandle::spawn("heartbeat", Arc::clone(self).heartbeat_loop(epoch)),
        );
        self.install(
            epoch,
            TimerKind::Cleanup,
            TimerHandle::spawn("cleanup", Arc::clone(self).cleanup_loop(epoch)),
        );
    }

    /// One poll in flight at a time; the next starts `interval × backoff`
    /// after the previous one completes
    async fn poll_loop(self: Arc<Self>, epoch: u64, transport: Arc<dyn Transport>, session: SessionInfo) {
        loop {
            let started = Instant::now();
            let result = transport.next_batch(&session).await;
            if !self.is_current(epoch) {
                return;
            }

            match result {
                Ok(batch) => {
                    self.metrics.record(true, elapsed_ms(started));
                    if let Some(metrics) = transport.server_metrics() {
                        *lock(&self.server_metrics) = Some(metrics);
                    }
                    self.record_success(epoch);
                    self.deliver(batch.unwrap_or_default());
                }
                Err(e) => {
                    self.metrics.record(false, elapsed_ms(started));
                    if let LoopControl::Stop = self.handle_failure(epoch, &e) {
                        return;
                    }
                }
            }

            tokio::time::sleep(self.tick_delay()).await;
        }
    }

    async fn stream_loop(self: Arc<Self>, epoch: u64, transport: Arc<dyn Transport>, session: SessionInfo) {
        loop {
            let result = transport.next_batch(&session).await;
            if !self.is_current(epoch) {
                return;
            }

            match result {
                Ok(Some(events)) => {
                    self.record_success(epoch);
                    self.deliver(events);
                }
                Ok(None) => {
                    tracing::debug!("Event stream for session {} ended, reopening", session.session_id);
                    tokio::time::sleep(self.config.poll_interval()).await;
                }
                Err(e) => {
                    self.metrics.record(false, 0.0);
                    if let LoopControl::Stop = self.handle_failure(epoch, &e) {
                        return;
                    }
                    tokio::time::sleep(self.tick_delay()).await;
                }
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>, epoch: u64) {
        let period = self.config.heartbeat_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !self.is_current(epoch) {
                return;
            }
            // Advisory only: never feeds the error counters
            match self.heartbeat_once().await {
                Ok(true) => tracing::trace!("Heartbeat acknowledged"),
                Ok(false) => {}
                Err(e) => tracing::warn!("Heartbeat failed: {}", e),
            }
        }
    }

    async fn heartbeat_once(&self) -> std::result::Result<bool, TransportError> {
        let metrics = self.metrics.snapshot();
        let target = {
            let conn = lock(&self.connection);
            let session_id = conn.machine.session().map(|s| s.session_id.clone());
            session_id.map(|id| (id, conn.machine.snapshot(metrics)))
        };
        let Some((session_id, state)) = target else {
            return Ok(false);
        };

        self.api
            .heartbeat(&session_id, HeartbeatRequest::new(state))
            .await?;
        lock(&self.connection).machine.touch();
        Ok(true)
    }

    async fn cleanup_loop(self: Arc<Self>, epoch: u64) {
        let period = self.config.cleanup_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !self.is_current(epoch) {
                return;
            }
            self.buffer.sweep(self.config.max_event_age());
        }
    }
}

/// Live-updates client: keeps one logical channel to the server open over
/// push or pull, fails over between them, and fans events out to
/// subscribers exactly once per id.
///
/// Background tasks stop on `disconnect()`, `destroy()` or drop. Dropping
/// does not delete the server-side session; call `disconnect()` for that.
pub struct LiveClient {
    inner: Arc<Inner>,
}

impl LiveClient {
    /// Client backed by the reqwest HTTP implementation
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = HttpLiveApi::builder()
            .base_url(config.base_url.clone())
            .request_timeout(config.request_timeout())
            .stream_open_timeout(config.stream_open_timeout());
        if let Some(token) = &config.auth_token {
            builder = builder.auth_token(token.clone());
        }
        let api = builder
            .build()
            .map_err(|e| ClientError::InvalidConfig(format!("{:#}", e)))?;

        Self::with_api(config, Arc::new(api))
    }

    /// Client over any `LiveApi` implementation
    pub fn with_api(config: ClientConfig, api: Arc<dyn LiveApi>) -> Result<Self> {
        config.validate()?;

        let initial_mode = if config.enable_push {
            TransportMode::Push
        } else {
            TransportMode::Pull
        };

        let inner = Inner {
            options: config.channel_options(),
            api,
            connection: Mutex::new(Connection {
                machine: ConnectionMachine::new(BackoffPolicy::from_config(&config), initial_mode),
                transport: None,
            }),
            metrics: ServiceMetrics::new(),
            buffer: EventBuffer::new(config.max_buffer_size),
            registry: SubscriberRegistry::new(),
            timers: Mutex::new(Timers::default()),
            epoch: AtomicU64::new(0),
            transition: tokio::sync::Mutex::new(()),
            delivery: Mutex::new(()),
            server_metrics: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(ClientError::Destroyed);
        }
        Ok(())
    }

    /// Open the channel, trying push first when enabled.
    ///
    /// `Ok(false)` means every permitted transport failed with a retryable
    /// error and the state is `error`; non-retryable failures come back as
    /// `Err`.
    pub async fn connect(&self) -> Result<bool> {
        self.ensure_alive()?;
        let _transition = self.inner.transition.lock().await;
        self.ensure_alive()?;

        let epoch = {
            let mut conn = lock(&self.inner.connection);
            if conn.machine.status() == ConnectionStatus::Connected {
                return Ok(true);
            }
            conn.machine.begin_connect();
            self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };
        // A pending reconnect belongs to the cycle this call replaces
        lock(&self.inner.timers).cancel_all();

        tracing::info!("Connecting to {}", self.inner.config.base_url);
        self.inner.publish_status(ConnectionStatus::Connecting, None);

        let chain = self.inner.connect_chain();
        match self.inner.establish(epoch, &chain).await {
            Establish::Connected => Ok(true),
            Establish::Cancelled => Ok(false),
            Establish::Failed(e) => {
                self.inner.fail(epoch, &e.to_string());
                if e.is_retryable() {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Stop every background task, then delete the server session within
    /// the disconnect timeout. Always completes.
    pub async fn disconnect(&self) {
        let (previous, released) = {
            let mut conn = lock(&self.inner.connection);
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            let previous = conn.machine.status();
            let session = conn.machine.disconnect();
            (previous, conn.release(session))
        };
        lock(&self.inner.timers).cancel_all();

        if let Some((session, transport)) = released {
            transport.close(&session).await;
        }

        if previous != ConnectionStatus::Disconnected {
            tracing::info!("Disconnected (was {})", previous);
            self.inner.publish_status(ConnectionStatus::Disconnected, None);
        }
    }

    /// Disconnect, drop buffered events and subscribers. The client cannot
    /// be used afterwards.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disconnect().await;
        self.inner.buffer.clear();
        self.inner.registry.clear();
        tracing::info!("Live client destroyed");
    }

    /// Subscribe to an event type, a status topic, or `"*"` for every event
    pub fn on<F>(&self, topic: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.registry.on(topic, handler)
    }

    pub fn off(&self, topic: &str, id: HandlerId) -> bool {
        self.inner.registry.off(topic, id)
    }

    pub fn off_all(&self, topic: &str) -> usize {
        self.inner.registry.off_all(topic)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.subscriber_count()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner.connection).machine.status() == ConnectionStatus::Connected
    }

    /// Last `n` delivered events, oldest first
    pub fn buffered_events(&self, n: usize) -> Vec<Event> {
        self.inner.buffer.recent(n)
    }

    pub fn service_metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.inner.metrics.reset();
    }

    /// Health computed from local state
    pub fn health_snapshot(&self) -> HealthSnapshot {
        health_snapshot(&self.inner.state(), self.inner.buffer.stats())
    }

    /// Server-reported health; `None` if the request fails
    pub async fn health_check(&self) -> Option<HealthSnapshot> {
        match self.inner.api.health().await {
            Ok(health) => Some(health),
            Err(e) => {
                tracing::warn!("Health check failed: {}", e);
                None
            }
        }
    }

    /// Immediate liveness ping for the active session. `Ok(false)` when
    /// there is no session to ping.
    pub async fn send_heartbeat(&self) -> Result<bool> {
        self.ensure_alive()?;
        Ok(self.inner.heartbeat_once().await?)
    }

    /// Latest metrics the server attached to a poll response
    pub fn server_metrics(&self) -> Option<Value> {
        lock(&self.inner.server_metrics).clone()
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.timers).cancel_all();
    }
}
