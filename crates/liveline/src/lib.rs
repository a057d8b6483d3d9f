//! # Liveline
//!
//! Client library for real-time event delivery over an SSE stream with an
//! automatic long-poll fallback.
//!
//! ## Overview
//!
//! A [`LiveClient`] keeps one logical connection to an event server:
//!
//! - **Push** (SSE) is preferred when enabled
//! - **Pull** (long-poll) takes over when push cannot be opened
//! - Failures are counted with multiplicative backoff; a run of them tears
//!   the session down and reconnects on a fixed delay table
//! - Events are deduplicated by id in a bounded buffer before fan-out
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use liveline::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::new("https://events.example.com/api/realtime")
//!         .with_auth_token(std::env::var("LIVELINE_TOKEN")?)
//!         .with_event_types(vec!["task.updated".to_string()]);
//!
//!     let client = LiveClient::new(config)?;
//!
//!     client.on("task.updated", |payload| {
//!         println!("progress: {}", payload["progress"]);
//!     });
//!     client.on("reconnecting", |status| {
//!         println!("lost connection in {} mode", status["mode"]);
//!     });
//!
//!     if !client.connect().await? {
//!         anyhow::bail!("no transport could be opened");
//!     }
//!
//!     tokio::signal::ctrl_c().await?;
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **`liveline-types`**: events, sessions, connection state and health models
//! - **`liveline-transport`**: the HTTP API seam plus push and pull transports
//! - **`liveline-client`**: buffer, state machine, timers, metrics and the façade
//!
//! ## License
//!
//! MIT

pub mod prelude;

pub use liveline_client::{
    BackoffPolicy, ClientConfig, ClientError, ConnectionMachine, EventBuffer, FailureAction,
    HandlerId, IngestOutcome, LiveClient, ServiceMetrics, SubscriberRegistry, TimerHandle,
    TimerKind, Timers, CONNECTION_STATE_FIELD, WILDCARD,
};

pub use liveline_transport::{
    ChannelOptions, ErrorKind, HttpLiveApi, HttpLiveApiBuilder, LiveApi, PullTransport,
    PushTransport, Transport, TransportError,
};

pub use liveline_types::{
    BufferStats, ConnectionState, ConnectionStatus, Correlation, Event, HealthSnapshot,
    MetricsSnapshot, SessionInfo, TransportMode,
};

// Common dependencies, so callers can match versions without extra manifest entries
pub use anyhow;
pub use async_trait::async_trait;
pub use futures;
pub use serde;
pub use serde_json;
pub use tokio;

#[cfg(feature = "testing")]
pub use liveline_transport::testing;
