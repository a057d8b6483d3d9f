use crate::buffer_utils::EventStream;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use liveline_types::{ConnectionState, Event, HealthSnapshot, SessionInfo, TransportMode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The server's documented endpoints.
///
/// `HttpLiveApi` is the production implementation; anything that speaks the
/// same contract (a test double, a proxy) can stand in for it.
#[async_trait]
pub trait LiveApi: Send + Sync {
    /// `POST /session`
    async fn create_session(&self, request: CreateSessionRequest) -> Result<CreateSessionResponse>;

    /// `DELETE /session/{id}`
    async fn delete_session(&self, session_id: &str) -> Result<()>;

    /// `POST /stream/connect`
    async fn connect_stream(&self, request: StreamConnectRequest) -> Result<StreamConnectResponse>;

    /// Open the long-lived `text/event-stream` response for a negotiated session
    async fn open_stream(&self, session_id: &str, stream_url: Option<&str>) -> Result<EventStream>;

    /// `POST /poll`, blocking server-side up to `request.timeout` seconds
    async fn poll(&self, request: PollRequest) -> Result<PollResponse>;

    /// `POST /session/{id}/heartbeat`
    async fn heartbeat(&self, session_id: &str, request: HeartbeatRequest) -> Result<()>;

    /// `GET /health`
    async fn health(&self) -> Result<HealthSnapshot>;
}

/// One delivery mechanism: open a session, pull batches from it, close it.
#[async_trait]
pub trait Transport: Send + Sync {
    fn mode(&self) -> TransportMode;

    async fn open(&self) -> Result<SessionInfo>;

    /// Next batch of events in server order.
    ///
    /// `Ok(None)` means the server ended the feed gracefully; the next call
    /// resumes it on the same session.
    async fn next_batch(&self, session: &SessionInfo) -> Result<Option<Vec<Event>>>;

    /// Best-effort server-side teardown; never fails
    async fn close(&self, session: &SessionInfo);

    /// Server-reported metrics from the most recent response, if any
    fn server_metrics(&self) -> Option<Value> {
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Desired polling interval in milliseconds
    pub interval: u64,
    pub event_types: Vec<String>,
    pub filters: Map<String, Value>,
    pub max_buffer_size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub success: bool,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConnectRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub session_id: String,
    pub event_types: Vec<String>,
    pub filters: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamConnectResponse {
    pub success: bool,
    /// Server may replace the proposed session id
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollRequest {
    pub session_id: String,
    /// Seconds the server may hold the request open
    pub timeout: u64,
    pub max_events: usize,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub include_metrics: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollResponse {
    pub success: bool,
    /// Raw entries; undecodable ones are dropped by the pull transport
    #[serde(default)]
    pub events: Vec<Value>,
    /// Set when the server waited the full timeout without events
    #[serde(default)]
    pub timeout: bool,
    #[serde(default)]
    pub metrics: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub timestamp: DateTime<Utc>,
    pub connection_state: ConnectionState,
}

impl HeartbeatRequest {
    pub fn new(connection_state: ConnectionState) -> Self {
        Self {
            timestamp: Utc::now(),
            connection_state,
        }
    }
}
