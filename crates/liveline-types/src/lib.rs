pub mod events;
pub mod health;
pub mod state;

pub use events::{Correlation, Event, DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY};
pub use health::{BufferStats, HealthSnapshot, MetricsSnapshot};
pub use state::{ConnectionState, ConnectionStatus, SessionInfo, TransportMode};
