use futures::{Stream, StreamExt};
use liveline_types::Event;
use serde_json::Value;
use std::pin::Pin;

use super::buffering::CircularLineBuffer;
use crate::error::{Result, TransportError};

/// Batches of events in server order; the stream ends on `[DONE]` or body end
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Vec<Event>>> + Send>>;

const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// Joined `data:` lines of one dispatched frame
    Data(String),
    /// The `[DONE]` sentinel
    Done,
}

/// Line-at-a-time `text/event-stream` framer.
///
/// `data:` lines accumulate until a blank line dispatches the frame.
/// Comments and the `event`/`id`/`retry` fields carry nothing this client
/// uses and are skipped.
#[derive(Debug, Default)]
pub struct SseFrameParser {
    data: Vec<String>,
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }

    /// Dispatch whatever is pending when the body ends without a blank line
    pub fn finish(&mut self) -> Option<SseFrame> {
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        if data.trim() == DONE_MARKER {
            Some(SseFrame::Done)
        } else {
            Some(SseFrame::Data(data))
        }
    }
}

/// Decode one frame into events. A frame holds an event object or an array
/// of them; anything undecodable is skipped.
pub fn decode_frame(data: &str) -> Vec<Event> {
    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("Skipping malformed stream frame: {}", e);
            return Vec::new();
        }
    };

    match value {
        Value::Array(items) => decode_values(items),
        other => decode_values(vec![other]),
    }
}

/// Decode a server-provided array of events, preserving order and dropping
/// entries that are not events
pub fn decode_values(items: Vec<Value>) -> Vec<Event> {
    items
        .into_iter()
        .filter_map(|item| {
            let event = Event::from_value(item);
            if event.is_none() {
                tracing::debug!("Dropping entry without a usable event id");
            }
            event
        })
        .collect()
}

/// Turn a chunked response body into a stream of event batches.
///
/// Undecodable frames never end the stream; only a body error, an oversized
/// line, `[DONE]`, or the end of the body does.
pub fn parse_event_stream<S, B, E>(body: S) -> EventStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<TransportError> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut byte_chunks = Box::pin(body);
        let mut buffer = CircularLineBuffer::with_capacity(8192);
        let mut parser = SseFrameParser::new();
        let mut finished = false;

        'read: while let Some(chunk_result) = byte_chunks.next().await {
            match chunk_result {
                Ok(bytes) => {
                    buffer.extend(bytes.as_ref());

                    while let Some(line_result) = buffer.next_line() {
                        match line_result {
                            Ok(line) => match parser.push_line(&line) {
                                Some(SseFrame::Done) => {
                                    tracing::debug!("Event stream signalled completion");
                                    finished = true;
                                    break 'read;
                                }
                                Some(SseFrame::Data(data)) => {
                                    let events = decode_frame(&data);
                                    if !events.is_empty() {
                                        yield Ok(events);
                                    }
                                }
                                None => {}
                            },
                            Err(e) => {
                                finished = true;
                                yield Err(e);
                                break 'read;
                            }
                        }
                    }
                }
                Err(e) => {
                    finished = true;
                    yield Err(e.into());
                    break 'read;
                }
            }
        }

        if !finished {
            if let Some(SseFrame::Data(data)) = parser.finish() {
                let events = decode_frame(&data);
                if !events.is_empty() {
                    yield Ok(events);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(body: Vec<&'static str>) -> Vec<Result<Vec<Event>>> {
        let chunks = futures::stream::iter(
            body.into_iter()
                .map(|chunk| Ok::<_, TransportError>(chunk.as_bytes())),
        );
        futures::executor::block_on(parse_event_stream(chunks).collect::<Vec<_>>())
    }

    fn ids(batches: &[Result<Vec<Event>>]) -> Vec<String> {
        batches
            .iter()
            .flat_map(|b| b.as_ref().unwrap().iter().map(|e| e.id.clone()))
            .collect()
    }

    #[test]
    fn test_parser_joins_multiline_data() {
        let mut parser = SseFrameParser::new();

        assert!(parser.push_line("data: {\"id\":").is_none());
        assert!(parser.push_line("data: \"a\"}").is_none());
        assert_eq!(
            parser.push_line(""),
            Some(SseFrame::Data("{\"id\":\n\"a\"}".to_string()))
        );
        assert!(parser.push_line("").is_none());
    }

    #[test]
    fn test_parser_ignores_comments_and_other_fields() {
        let mut parser = SseFrameParser::new();

        assert!(parser.push_line(": keep-alive").is_none());
        assert!(parser.push_line("event: update").is_none());
        assert!(parser.push_line("id: 42").is_none());
        assert!(parser.push_line("").is_none());
    }

    #[test]
    fn test_parser_done_marker() {
        let mut parser = SseFrameParser::new();
        parser.push_line("data: [DONE]");
        assert_eq!(parser.push_line(""), Some(SseFrame::Done));
    }

    #[test]
    fn test_stream_across_chunk_boundaries() {
        let batches = collect(vec![
            "data: {\"id\":\"1\",\"ty",
            "pe\":\"t\"}\n\ndata: {\"id\":\"2\",\"type\":\"t\"}\n",
            "\n",
        ]);

        assert_eq!(ids(&batches), vec!["1", "2"]);
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let batches = collect(vec![
            "data: {\"id\":\"1\",\"type\":\"t\"}\n\n",
            "data: {not json\n\n",
            "data: {\"type\":\"no-id\"}\n\n",
            "data: {\"id\":\"2\",\"type\":\"t\"}\n\n",
        ]);

        assert_eq!(ids(&batches), vec!["1", "2"]);
    }

    #[test]
    fn test_done_ends_stream() {
        let batches = collect(vec![
            "data: {\"id\":\"1\",\"type\":\"t\"}\n\n",
            "data: [DONE]\n\n",
            "data: {\"id\":\"2\",\"type\":\"t\"}\n\n",
        ]);

        assert_eq!(ids(&batches), vec!["1"]);
    }

    #[test]
    fn test_array_frame_preserves_order() {
        let batches = collect(vec![
            "data: [{\"id\":\"a\",\"type\":\"t\"},{\"id\":\"b\",\"type\":\"t\"},{\"id\":\"c\",\"type\":\"t\"}]\n\n",
        ]);

        assert_eq!(batches.len(), 1);
        assert_eq!(ids(&batches), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_trailing_frame_without_blank_line() {
        let batches = collect(vec!["data: {\"id\":\"tail\",\"type\":\"t\"}\n"]);
        assert_eq!(ids(&batches), vec!["tail"]);
    }

    #[test]
    fn test_body_error_ends_stream() {
        let chunks = futures::stream::iter(vec![
            Ok("data: {\"id\":\"1\",\"type\":\"t\"}\n\n".as_bytes()),
            Err(TransportError::network("connection reset")),
            Ok("data: {\"id\":\"2\",\"type\":\"t\"}\n\n".as_bytes()),
        ]);
        let batches = futures::executor::block_on(parse_event_stream(chunks).collect::<Vec<_>>());

        assert_eq!(batches.len(), 2);
        assert!(batches[0].is_ok());
        assert_eq!(batches[1].as_ref().unwrap_err().kind, crate::ErrorKind::NetworkError);
    }
}
