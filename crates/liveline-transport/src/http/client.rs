// reqwest-backed implementation of the server's documented endpoints

use crate::buffer_utils::{parse_event_stream, EventStream};
use crate::error::{Result, TransportError};
use crate::traits::{
    CreateSessionRequest, CreateSessionResponse, HeartbeatRequest, LiveApi, PollRequest,
    PollResponse, StreamConnectRequest, StreamConnectResponse,
};
use anyhow::Context;
use async_trait::async_trait;
use liveline_types::HealthSnapshot;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the live-updates server (direct reqwest, no SDK).
///
/// No client-wide timeout is set because the event stream must outlive any
/// single deadline; every control-plane call carries its own instead.
#[derive(Debug, Clone)]
pub struct HttpLiveApi {
    http_client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    stream_open_timeout: Duration,
}

impl HttpLiveApi {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        Self::builder().base_url(base_url).build()
    }

    pub fn builder() -> HttpLiveApiBuilder {
        HttpLiveApiBuilder::default()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Absolute URLs are used verbatim, server-relative ones are joined to
    /// the base, and a missing URL falls back to `/stream/{session_id}`
    fn resolve_stream_url(&self, session_id: &str, stream_url: Option<&str>) -> String {
        match stream_url {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => url.to_string(),
            Some(url) if url.starts_with('/') => self.url(url),
            Some(url) => format!("{}/{}", self.base_url, url),
            None => self.url(&format!("/stream/{}", urlencoding::encode(session_id))),
        }
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::from_status(status, body))
    }
}

#[async_trait]
impl LiveApi for HttpLiveApi {
    async fn create_session(&self, request: CreateSessionRequest) -> Result<CreateSessionResponse> {
        let response = self
            .http_client
            .post(self.url("/session"))
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await?;

        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let response = self
            .http_client
            .delete(self.url(&format!("/session/{}", urlencoding::encode(session_id))))
            .timeout(self.request_timeout)
            .send()
            .await?;

        // Already gone is as good as deleted
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("Session {} was already removed server-side", session_id);
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }

    async fn connect_stream(&self, request: StreamConnectRequest) -> Result<StreamConnectResponse> {
        let response = self
            .http_client
            .post(self.url("/stream/connect"))
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await?;

        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    async fn open_stream(&self, session_id: &str, stream_url: Option<&str>) -> Result<EventStream> {
        let url = self.resolve_stream_url(session_id, stream_url);
        tracing::debug!("Opening event stream at {}", url);

        let send = self
            .http_client
            .get(&url)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .send();

        let response = tokio::time::timeout(self.stream_open_timeout, send).await??;
        let response = Self::check(response).await?;

        Ok(parse_event_stream(response.bytes_stream()))
    }

    async fn poll(&self, request: PollRequest) -> Result<PollResponse> {
        // The server may legitimately hold the request for `timeout` seconds
        let deadline = Duration::from_secs(request.timeout) + self.request_timeout;

        let response = self
            .http_client
            .post(self.url("/poll"))
            .timeout(deadline)
            .json(&request)
            .send()
            .await?;

        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    async fn heartbeat(&self, session_id: &str, request: HeartbeatRequest) -> Result<()> {
        let response = self
            .http_client
            .post(self.url(&format!("/session/{}/heartbeat", urlencoding::encode(session_id))))
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    async fn health(&self) -> Result<HealthSnapshot> {
        let response = self
            .http_client
            .get(self.url("/health"))
            .timeout(self.request_timeout)
            .send()
            .await?;

        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }
}

#[derive(Debug, Default)]
pub struct HttpLiveApiBuilder {
    base_url: Option<String>,
    auth_token: Option<String>,
    user_agent: Option<String>,
    request_timeout: Option<Duration>,
    stream_open_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl HttpLiveApiBuilder {
    /// Server root, e.g. "https://events.example.com/api/realtime"
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sent as `Authorization: Bearer <token>` on every request
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn stream_open_timeout(mut self, timeout: Duration) -> Self {
        self.stream_open_timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> anyhow::Result<HttpLiveApi> {
        let base_url = self.base_url.context("Base URL is required")?;
        let base_url = base_url.trim_end_matches('/').to_string();
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "Base URL must start with http:// or https://, got {}",
            base_url
        );

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = self.auth_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token)).context("Invalid auth token format")?,
            );
        }

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("liveline/{}", env!("CARGO_PKG_VERSION")));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .connect_timeout(self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(HttpLiveApi {
            http_client,
            base_url,
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            stream_open_timeout: self.stream_open_timeout.unwrap_or(DEFAULT_STREAM_OPEN_TIMEOUT),
        })
    }
}
