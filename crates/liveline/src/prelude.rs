//! Prelude module for convenient imports
//!
//! Import everything you need with:
//! ```rust
//! use liveline::prelude::*;
//! ```

pub use crate::{
    ClientConfig, ClientError, LiveClient, HandlerId, CONNECTION_STATE_FIELD, WILDCARD,
    LiveApi, HttpLiveApi, Transport, TransportError, ErrorKind,
    ConnectionState, ConnectionStatus, Event, HealthSnapshot, MetricsSnapshot, TransportMode,
};
