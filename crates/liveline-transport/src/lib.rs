pub mod buffer_utils;
pub mod config;
pub mod error;
pub mod http;
pub mod pull;
pub mod push;
pub mod traits;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use buffer_utils::{parse_event_stream, EventStream, SseFrame, SseFrameParser};
pub use config::ChannelOptions;
pub use error::{ErrorKind, TransportError};
pub use http::{HttpLiveApi, HttpLiveApiBuilder};
pub use pull::PullTransport;
pub use push::PushTransport;
pub use traits::{
    CreateSessionRequest, CreateSessionResponse, HeartbeatRequest, LiveApi, PollRequest,
    PollResponse, StreamConnectRequest, StreamConnectResponse, Transport,
};
