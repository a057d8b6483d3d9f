use crate::health::MetricsSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which delivery mechanism carries events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Server-sent events over one long-lived response
    Push,
    /// Long-poll requests against a server-held session
    Pull,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Push => "push",
            TransportMode::Pull => "pull",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
    /// Reserved for servers that report it. The client itself records
    /// timeouts as ordinary transport errors and never enters this state.
    Timeout,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Timeout => "timeout",
        }
    }

    /// States from which an explicit `connect()` starts a fresh cycle
    pub fn is_idle(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Disconnected | ConnectionStatus::Error | ConnectionStatus::Timeout
        )
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        ConnectionStatus::Disconnected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side session negotiated by a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub mode: TransportMode,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Absolute URL of the event stream (push only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
}

impl SessionInfo {
    pub fn new(session_id: impl Into<String>, mode: TransportMode) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            mode,
            created_at: now,
            last_activity: now,
            stream_url: None,
        }
    }

    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = Some(url.into());
        self
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Point-in-time snapshot of the client's connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub mode: TransportMode,
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    pub metrics: MetricsSnapshot,
    pub retry_count: u32,
    pub consecutive_errors: u32,
    pub backoff_factor: f64,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ConnectionStatus::Reconnecting).unwrap();
        assert_eq!(json, "\"reconnecting\"");

        let mode: TransportMode = serde_json::from_str("\"pull\"").unwrap();
        assert_eq!(mode, TransportMode::Pull);
    }

    #[test]
    fn test_idle_statuses() {
        assert!(ConnectionStatus::Disconnected.is_idle());
        assert!(ConnectionStatus::Error.is_idle());
        assert!(!ConnectionStatus::Connected.is_idle());
        assert!(!ConnectionStatus::Reconnecting.is_idle());
    }

    #[test]
    fn test_session_touch_moves_activity_forward() {
        let mut session = SessionInfo::new("s-1", TransportMode::Push);
        let before = session.last_activity;
        session.touch();
        assert!(session.last_activity >= before);
        assert_eq!(session.created_at, before);
    }
}
