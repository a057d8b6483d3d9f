// Server-sent events transport

use crate::buffer_utils::EventStream;
use crate::config::ChannelOptions;
use crate::error::{ErrorKind, Result, TransportError};
use crate::traits::{LiveApi, StreamConnectRequest, Transport};
use async_trait::async_trait;
use futures::StreamExt;
use liveline_types::{Event, SessionInfo, TransportMode};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Push transport: negotiates a session over the control plane, then reads
/// one long-lived `text/event-stream` response.
///
/// The open stream lives inside the transport so that `next_batch` can
/// resume it on the same session after a drop. Callers stop the read loop
/// before calling `close`.
pub struct PushTransport {
    api: Arc<dyn LiveApi>,
    options: ChannelOptions,
    stream: Mutex<Option<EventStream>>,
}

impl PushTransport {
    pub fn new(api: Arc<dyn LiveApi>, options: ChannelOptions) -> Self {
        Self {
            api,
            options,
            stream: Mutex::new(None),
        }
    }

    pub async fn has_open_stream(&self) -> bool {
        self.stream.lock().await.is_some()
    }
}

#[async_trait]
impl Transport for PushTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Push
    }

    async fn open(&self) -> Result<SessionInfo> {
        let proposed = uuid::Uuid::new_v4().to_string();

        let response = self
            .api
            .connect_stream(StreamConnectRequest {
                user_id: self.options.user_id.clone(),
                session_id: proposed.clone(),
                event_types: self.options.event_types.clone(),
                filters: self.options.filters.clone(),
            })
            .await?;

        if !response.success {
            return Err(TransportError::new(
                ErrorKind::ServerError,
                format!(
                    "Stream negotiation rejected: {}",
                    response.error.unwrap_or_else(|| "no reason given".to_string())
                ),
            ));
        }

        let session_id = response.session_id.unwrap_or(proposed);
        let stream = self
            .api
            .open_stream(&session_id, response.stream_url.as_deref())
            .await?;
        *self.stream.lock().await = Some(stream);

        tracing::info!("Push transport opened session {}", session_id);

        let session = SessionInfo::new(session_id, TransportMode::Push);
        Ok(match response.stream_url {
            Some(url) => session.with_stream_url(url),
            None => session,
        })
    }

    async fn next_batch(&self, session: &SessionInfo) -> Result<Option<Vec<Event>>> {
        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            tracing::debug!("Reopening event stream for session {}", session.session_id);
            let stream = self
                .api
                .open_stream(&session.session_id, session.stream_url.as_deref())
                .await?;
            *guard = Some(stream);
        }

        let next = match guard.as_mut() {
            Some(stream) => stream.next().await,
            None => None,
        };
        match next {
            Some(Ok(events)) => Ok(Some(events)),
            Some(Err(e)) => {
                *guard = None;
                Err(e)
            }
            None => {
                *guard = None;
                Ok(None)
            }
        }
    }

    async fn close(&self, session: &SessionInfo) {
        let closing = async {
            self.stream.lock().await.take();
            self.api.delete_session(&session.session_id).await
        };

        match tokio::time::timeout(self.options.close_timeout, closing).await {
            Ok(Ok(())) => tracing::debug!("Push session {} closed", session.session_id),
            Ok(Err(e)) => tracing::warn!("Failed to delete push session {}: {}", session.session_id, e),
            Err(_) => tracing::warn!(
                "Timed out after {:?} closing push session {}",
                self.options.close_timeout,
                session.session_id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ApiCall, MockLiveApi, StreamEnd, StreamScript};

    fn event(id: &str) -> Event {
        Event::new(id, "task.updated")
    }

    #[tokio::test]
    async fn test_open_negotiates_then_streams() {
        let api = Arc::new(MockLiveApi::new());
        api.queue_stream(Ok(StreamScript::batches(
            vec![vec![event("a"), event("b")], vec![event("c")]],
            StreamEnd::Close,
        )));
        let transport = PushTransport::new(api.clone(), ChannelOptions::default());

        let session = transport.open().await.unwrap();
        assert_eq!(session.mode, TransportMode::Push);
        assert!(transport.has_open_stream().await);

        let first = transport.next_batch(&session).await.unwrap().unwrap();
        let second = transport.next_batch(&session).await.unwrap().unwrap();
        assert_eq!(
            first.iter().chain(&second).map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );

        // Body end is a graceful stop, not an error
        assert!(transport.next_batch(&session).await.unwrap().is_none());
        assert!(!transport.has_open_stream().await);
        assert_eq!(
            api.calls()[..2],
            [ApiCall::ConnectStream, ApiCall::OpenStream(session.session_id.clone())]
        );
    }

    #[tokio::test]
    async fn test_next_batch_reopens_dropped_stream() {
        let api = Arc::new(MockLiveApi::new());
        api.queue_stream(Ok(StreamScript::batches(Vec::new(), StreamEnd::Close)));
        api.queue_stream(Ok(StreamScript::batches(vec![vec![event("z")]], StreamEnd::Pending)));
        let transport = PushTransport::new(api.clone(), ChannelOptions::default());

        let session = transport.open().await.unwrap();
        assert!(transport.next_batch(&session).await.unwrap().is_none());

        let batch = transport.next_batch(&session).await.unwrap().unwrap();
        assert_eq!(batch[0].id, "z");
        assert_eq!(api.count(|c| matches!(c, ApiCall::OpenStream(_))), 2);
    }

    #[tokio::test]
    async fn test_failed_negotiation_skips_stream_open() {
        let api = Arc::new(MockLiveApi::new());
        api.queue_stream(Ok(StreamScript::idle()));
        api.fail_stream_connect(TransportError::network("connection refused"));
        let transport = PushTransport::new(api.clone(), ChannelOptions::default());

        let err = transport.open().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NetworkError);
        assert_eq!(api.count(|c| matches!(c, ApiCall::OpenStream(_))), 0);
    }

    #[tokio::test]
    async fn test_stream_error_clears_stream() {
        let api = Arc::new(MockLiveApi::new());
        api.queue_stream(Ok(StreamScript {
            batches: vec![Err(TransportError::network("reset by peer"))],
            end: StreamEnd::Pending,
        }));
        let transport = PushTransport::new(api, ChannelOptions::default());

        let session = transport.open().await.unwrap();
        assert!(transport.next_batch(&session).await.is_err());
        assert!(!transport.has_open_stream().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_bounded_by_timeout() {
        let api = Arc::new(MockLiveApi::new());
        api.delay_delete_session(std::time::Duration::from_secs(600));
        let options = ChannelOptions::default().close_timeout(std::time::Duration::from_secs(5));
        let transport = PushTransport::new(api.clone(), options);

        let session = transport.open().await.unwrap();
        let started = tokio::time::Instant::now();
        transport.close(&session).await;

        assert!(started.elapsed() < std::time::Duration::from_secs(6));
        assert!(!transport.has_open_stream().await);
        assert_eq!(api.count(|c| matches!(c, ApiCall::DeleteSession(_))), 1);
    }
}
