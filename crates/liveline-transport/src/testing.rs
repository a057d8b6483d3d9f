//! Scripted in-memory [`LiveApi`] for exercising transports and the client
//! without a server.
//!
//! Each endpoint has a queue of scripted results and a fallback that is
//! returned once the queue is drained. Every call is recorded.

use crate::buffer_utils::EventStream;
use crate::error::{Result, TransportError};
use crate::traits::{
    CreateSessionRequest, CreateSessionResponse, HeartbeatRequest, LiveApi, PollRequest,
    PollResponse, StreamConnectRequest, StreamConnectResponse,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use liveline_types::{BufferStats, Event, HealthSnapshot};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    CreateSession,
    DeleteSession(String),
    ConnectStream,
    OpenStream(String),
    Poll(String),
    Heartbeat(String),
    Health,
}

/// How a scripted event stream behaves after its batches are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Stay open without yielding, like an idle connection
    Pending,
    /// End the body, like `[DONE]`
    Close,
}

#[derive(Debug, Clone)]
pub struct StreamScript {
    pub batches: Vec<Result<Vec<Event>>>,
    pub end: StreamEnd,
}

impl StreamScript {
    pub fn idle() -> Self {
        Self {
            batches: Vec::new(),
            end: StreamEnd::Pending,
        }
    }

    pub fn batches(batches: Vec<Vec<Event>>, end: StreamEnd) -> Self {
        Self {
            batches: batches.into_iter().map(Ok).collect(),
            end,
        }
    }
}

struct Script<T> {
    queue: VecDeque<Result<T>>,
    fallback: Result<T>,
}

impl<T: Clone> Script<T> {
    fn new(fallback: Result<T>) -> Self {
        Self {
            queue: VecDeque::new(),
            fallback,
        }
    }

    fn next(&mut self) -> Result<T> {
        self.queue.pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

struct MockState {
    create_session: Script<CreateSessionResponse>,
    connect_stream: Script<StreamConnectResponse>,
    open_stream: Script<StreamScript>,
    poll: Script<PollResponse>,
    heartbeat: Script<()>,
    health: Script<HealthSnapshot>,
    delete_session: Script<()>,
    delete_delay: Option<Duration>,
    calls: Vec<ApiCall>,
    sessions_created: u64,
}

pub struct MockLiveApi {
    state: Mutex<MockState>,
}

impl Default for MockLiveApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLiveApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                create_session: Script::new(Ok(CreateSessionResponse {
                    success: true,
                    session_id: None,
                    error: None,
                })),
                connect_stream: Script::new(Ok(StreamConnectResponse {
                    success: true,
                    ..Default::default()
                })),
                open_stream: Script::new(Ok(StreamScript::idle())),
                poll: Script::new(Ok(empty_poll())),
                heartbeat: Script::new(Ok(())),
                health: Script::new(Ok(HealthSnapshot {
                    status: "healthy".to_string(),
                    connected_consumers: 1,
                    error_sessions: 0,
                    avg_success_rate: 1.0,
                    buffer_stats: BufferStats::default(),
                    timestamp: Utc::now(),
                })),
                delete_session: Script::new(Ok(())),
                delete_delay: None,
                calls: Vec::new(),
                sessions_created: 0,
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Every stream negotiation fails with `error`
    pub fn fail_stream_connect(&self, error: TransportError) {
        self.with_state(|s| s.connect_stream.fallback = Err(error));
    }

    /// Every session creation fails with `error`
    pub fn fail_create_session(&self, error: TransportError) {
        self.with_state(|s| s.create_session.fallback = Err(error));
    }

    pub fn queue_create_session(&self, result: Result<CreateSessionResponse>) {
        self.with_state(|s| s.create_session.queue.push_back(result));
    }

    pub fn queue_stream(&self, result: Result<StreamScript>) {
        self.with_state(|s| s.open_stream.queue.push_back(result));
    }

    pub fn set_stream_fallback(&self, result: Result<StreamScript>) {
        self.with_state(|s| s.open_stream.fallback = result);
    }

    pub fn queue_poll(&self, result: Result<PollResponse>) {
        self.with_state(|s| s.poll.queue.push_back(result));
    }

    pub fn queue_poll_events(&self, events: Vec<Event>) {
        self.queue_poll(Ok(poll_with(events)));
    }

    pub fn set_poll_fallback(&self, result: Result<PollResponse>) {
        self.with_state(|s| s.poll.fallback = result);
    }

    pub fn fail_heartbeats(&self, error: TransportError) {
        self.with_state(|s| s.heartbeat.fallback = Err(error));
    }

    pub fn fail_health(&self, error: TransportError) {
        self.with_state(|s| s.health.fallback = Err(error));
    }

    pub fn fail_delete_session(&self, error: TransportError) {
        self.with_state(|s| s.delete_session.fallback = Err(error));
    }

    /// Make every session delete hang for `delay` before answering
    pub fn delay_delete_session(&self, delay: Duration) {
        self.with_state(|s| s.delete_delay = Some(delay));
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn count(&self, matches: impl Fn(&ApiCall) -> bool) -> usize {
        self.with_state(|s| s.calls.iter().filter(|c| matches(c)).count())
    }

    fn record(&self, call: ApiCall) {
        self.with_state(|s| s.calls.push(call));
    }
}

pub fn empty_poll() -> PollResponse {
    PollResponse {
        success: true,
        events: Vec::new(),
        timeout: true,
        metrics: None,
        error: None,
    }
}

pub fn poll_with(events: Vec<Event>) -> PollResponse {
    PollResponse {
        success: true,
        events: events
            .into_iter()
            .filter_map(|e| serde_json::to_value(e).ok())
            .collect(),
        timeout: false,
        metrics: None,
        error: None,
    }
}

fn scripted_stream(script: StreamScript) -> EventStream {
    let batches = futures::stream::iter(script.batches);
    match script.end {
        StreamEnd::Close => Box::pin(batches),
        StreamEnd::Pending => Box::pin(batches.chain(futures::stream::pending())),
    }
}

#[async_trait]
impl LiveApi for MockLiveApi {
    async fn create_session(&self, _request: CreateSessionRequest) -> Result<CreateSessionResponse> {
        self.record(ApiCall::CreateSession);
        self.with_state(|s| {
            s.sessions_created += 1;
            let n = s.sessions_created;
            s.create_session.next().map(|mut response| {
                if response.success && response.session_id.is_none() {
                    response.session_id = Some(format!("pull-{}", n));
                }
                response
            })
        })
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.record(ApiCall::DeleteSession(session_id.to_string()));
        let delay = self.with_state(|s| s.delete_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.with_state(|s| s.delete_session.next())
    }

    async fn connect_stream(&self, request: StreamConnectRequest) -> Result<StreamConnectResponse> {
        self.record(ApiCall::ConnectStream);
        self.with_state(|s| s.connect_stream.next()).map(|mut response| {
            if response.success && response.session_id.is_none() {
                response.session_id = Some(request.session_id);
            }
            response
        })
    }

    async fn open_stream(&self, session_id: &str, _stream_url: Option<&str>) -> Result<EventStream> {
        self.record(ApiCall::OpenStream(session_id.to_string()));
        self.with_state(|s| s.open_stream.next()).map(scripted_stream)
    }

    async fn poll(&self, request: PollRequest) -> Result<PollResponse> {
        self.record(ApiCall::Poll(request.session_id));
        self.with_state(|s| s.poll.next())
    }

    async fn heartbeat(&self, session_id: &str, _request: HeartbeatRequest) -> Result<()> {
        self.record(ApiCall::Heartbeat(session_id.to_string()));
        self.with_state(|s| s.heartbeat.next())
    }

    async fn health(&self) -> Result<HealthSnapshot> {
        self.record(ApiCall::Health);
        self.with_state(|s| s.health.next())
    }
}

/// Metrics payload in the shape servers return from `/poll`
pub fn server_metrics(active_sessions: u64) -> Value {
    serde_json::json!({ "active_sessions": active_sessions })
}
