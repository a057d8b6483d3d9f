use chrono::Utc;
use liveline_types::{BufferStats, ConnectionState, ConnectionStatus, HealthSnapshot, MetricsSnapshot};
use std::sync::{Mutex, PoisonError};

/// Success rate below which a connected client reports itself degraded
pub const DEGRADED_SUCCESS_RATE: f64 = 0.9;

/// Request outcome counters for one client
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request. Only successes move the response-time average.
    pub fn record(&self, success: bool, response_time_ms: f64) {
        let mut m = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        m.requests_count += 1;

        if success {
            m.success_count += 1;
            let n = m.success_count as f64;
            m.avg_response_time_ms = (m.avg_response_time_ms * (n - 1.0) + response_time_ms) / n;
            m.last_success_time = Some(Utc::now());
        } else {
            m.error_count += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset(&self) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = MetricsSnapshot::default();
    }
}

/// Local health report for one client connection
pub fn health_snapshot(state: &ConnectionState, buffer_stats: BufferStats) -> HealthSnapshot {
    let rate = state.metrics.success_rate();
    let status = match state.status {
        ConnectionStatus::Connected
            if state.metrics.requests_count == 0 || rate >= DEGRADED_SUCCESS_RATE =>
        {
            "healthy"
        }
        ConnectionStatus::Connected | ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => {
            "degraded"
        }
        ConnectionStatus::Disconnected => "disconnected",
        ConnectionStatus::Error | ConnectionStatus::Timeout => "unhealthy",
    };

    HealthSnapshot {
        status: status.to_string(),
        connected_consumers: u64::from(state.is_connected()),
        error_sessions: u64::from(matches!(
            state.status,
            ConnectionStatus::Error | ConnectionStatus::Timeout
        )),
        avg_success_rate: rate,
        buffer_stats,
        timestamp: Utc::now(),
    }
}
