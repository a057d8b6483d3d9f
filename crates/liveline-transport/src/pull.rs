// Long-poll transport

use crate::buffer_utils::decode_values;
use crate::config::ChannelOptions;
use crate::error::{ErrorKind, Result, TransportError};
use crate::traits::{CreateSessionRequest, LiveApi, PollRequest, Transport};
use async_trait::async_trait;
use liveline_types::{Event, SessionInfo, TransportMode};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

/// Pull transport: creates a server-side session, then each `next_batch`
/// is one long-poll request against it.
pub struct PullTransport {
    api: Arc<dyn LiveApi>,
    options: ChannelOptions,
    server_metrics: Mutex<Option<Value>>,
}

impl PullTransport {
    pub fn new(api: Arc<dyn LiveApi>, options: ChannelOptions) -> Self {
        Self {
            api,
            options,
            server_metrics: Mutex::new(None),
        }
    }

    fn poll_request(&self, session: &SessionInfo) -> PollRequest {
        PollRequest {
            session_id: session.session_id.clone(),
            timeout: self.options.poll_timeout.as_secs(),
            max_events: self.options.max_events_per_poll,
            include_metrics: self.options.include_metrics,
        }
    }
}

#[async_trait]
impl Transport for PullTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Pull
    }

    async fn open(&self) -> Result<SessionInfo> {
        let response = self
            .api
            .create_session(CreateSessionRequest {
                user_id: self.options.user_id.clone(),
                interval: self.options.poll_interval.as_millis() as u64,
                event_types: self.options.event_types.clone(),
                filters: self.options.filters.clone(),
                max_buffer_size: self.options.max_buffer_size,
            })
            .await?;

        if !response.success {
            return Err(TransportError::new(
                ErrorKind::ServerError,
                format!(
                    "Session creation rejected: {}",
                    response.error.unwrap_or_else(|| "no reason given".to_string())
                ),
            ));
        }

        let session_id = response
            .session_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TransportError::unknown("Server returned no session id"))?;

        tracing::info!("Pull transport opened session {}", session_id);
        Ok(SessionInfo::new(session_id, TransportMode::Pull))
    }

    async fn next_batch(&self, session: &SessionInfo) -> Result<Option<Vec<Event>>> {
        let response = self.api.poll(self.poll_request(session)).await?;

        if !response.success {
            return Err(TransportError::new(
                ErrorKind::ServerError,
                format!(
                    "Poll rejected: {}",
                    response.error.unwrap_or_else(|| "no reason given".to_string())
                ),
            ));
        }

        if let Some(metrics) = response.metrics {
            *self.server_metrics.lock().unwrap_or_else(PoisonError::into_inner) = Some(metrics);
        }

        let received = response.events.len();
        let events = decode_values(response.events);
        if events.len() < received {
            tracing::debug!(
                "Dropped {} undecodable entries from poll batch",
                received - events.len()
            );
        }
        if response.timeout && events.is_empty() {
            tracing::trace!("Poll for session {} timed out without events", session.session_id);
        }

        Ok(Some(events))
    }

    async fn close(&self, session: &SessionInfo) {
        let deleting = self.api.delete_session(&session.session_id);

        match tokio::time::timeout(self.options.close_timeout, deleting).await {
            Ok(Ok(())) => tracing::debug!("Pull session {} deleted", session.session_id),
            Ok(Err(e)) => tracing::warn!("Failed to delete pull session {}: {}", session.session_id, e),
            Err(_) => tracing::warn!(
                "Timed out after {:?} deleting pull session {}",
                self.options.close_timeout,
                session.session_id
            ),
        }
    }

    fn server_metrics(&self) -> Option<Value> {
        self.server_metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
