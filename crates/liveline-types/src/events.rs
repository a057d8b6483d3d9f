use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_PRIORITY: u8 = 3;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const MIN_PRIORITY: i64 = 1;
const MAX_PRIORITY: i64 = 5;

/// Identifiers tying an event back to the objects it concerns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl Correlation {
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none()
            && self.session_id.is_none()
            && self.agent_id.is_none()
            && self.task_id.is_none()
    }
}

/// A server event as delivered by either transport.
///
/// Decoding is lenient so that older servers which omit bookkeeping fields
/// still produce usable events: only `id` and `type` are required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default, alias = "data")]
    pub payload: Map<String, Value>,

    /// 1 (lowest) to 5 (highest); out-of-range values are clamped on decode
    #[serde(default = "default_priority", deserialize_with = "clamp_priority")]
    pub priority: u8,

    #[serde(default = "Utc::now", alias = "timestamp")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Correlation::is_empty")]
    pub correlation: Correlation,

    #[serde(default = "default_delivery_attempt")]
    pub delivery_attempt: u32,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Event {
    pub fn new(id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            payload: Map::new(),
            priority: DEFAULT_PRIORITY,
            created_at: Utc::now(),
            expires_at: None,
            correlation: Correlation::default(),
            delivery_attempt: default_delivery_attempt(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(MIN_PRIORITY as u8, MAX_PRIORITY as u8);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_correlation(mut self, correlation: Correlation) -> Self {
        self.correlation = correlation;
        self
    }

    /// Decode a single event from a JSON value, returning `None` for anything
    /// that is not an object carrying an `id`.
    pub fn from_value(value: Value) -> Option<Self> {
        if !value.get("id").map(|id| id.is_string()).unwrap_or(false) {
            return None;
        }
        serde_json::from_value(value).ok()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    pub fn is_older_than(&self, cutoff: DateTime<Utc>) -> bool {
        self.created_at < cutoff
    }

    /// Copy of this event marked as one more delivery attempt
    pub fn retried(&self) -> Self {
        let mut next = self.clone();
        next.delivery_attempt = next.delivery_attempt.saturating_add(1);
        next
    }

    pub fn can_retry(&self) -> bool {
        self.delivery_attempt < self.max_attempts
    }
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

fn default_delivery_attempt() -> u32 {
    1
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn clamp_priority<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(raw
        .map(|p| p.clamp(MIN_PRIORITY, MAX_PRIORITY) as u8)
        .unwrap_or(DEFAULT_PRIORITY))
}
