use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rolling request counters for one client instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Running mean over successful requests only
    pub avg_response_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_time: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    /// Fraction of requests that succeeded, 0.0 before any request
    pub fn success_rate(&self) -> f64 {
        if self.requests_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.requests_count as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferStats {
    pub size: usize,
    pub capacity: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_accepted: u64,
    #[serde(default)]
    pub total_rejected: u64,
    #[serde(default)]
    pub total_evicted: u64,
}

/// Health report, either computed locally or returned by `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: String,
    #[serde(default, alias = "connected_agents")]
    pub connected_consumers: u64,
    #[serde(default)]
    pub error_sessions: u64,
    #[serde(default)]
    pub avg_success_rate: f64,
    #[serde(default)]
    pub buffer_stats: BufferStats,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}
