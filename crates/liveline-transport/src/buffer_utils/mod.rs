mod buffering;
mod sse_parser;

pub use buffering::{CircularLineBuffer, DEFAULT_MAX_LINE_BYTES};
pub use sse_parser::{decode_frame, decode_values, parse_event_stream, EventStream, SseFrame, SseFrameParser};
