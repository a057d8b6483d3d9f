pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod scheduler;
pub mod state;

pub use buffer::{EventBuffer, IngestOutcome};
pub use client::{LiveClient, CONNECTION_STATE_FIELD};
pub use config::ClientConfig;
pub use error::ClientError;
pub use metrics::ServiceMetrics;
pub use registry::{HandlerId, SubscriberRegistry, WILDCARD};
pub use scheduler::{TimerHandle, TimerKind, Timers};
pub use state::{BackoffPolicy, ConnectionMachine, FailureAction};

// Re-export the data model so most callers need only this crate
pub use liveline_types::{
    BufferStats, ConnectionState, ConnectionStatus, Event, HealthSnapshot, MetricsSnapshot,
    SessionInfo, TransportMode,
};
