use crate::config::OutputConfig;
use chrono::{SecondsFormat, Utc};
use liveline_client::CONNECTION_STATE_FIELD;
use serde_json::{json, Value};
use std::io::Write;

/// Renders delivered payloads as one JSON object per line on stdout
pub struct LinePrinter {
    include_state: bool,
}

impl LinePrinter {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            include_state: config.include_state,
        }
    }

    pub fn render(&self, topic: &str, payload: &Value) -> String {
        let mut data = payload.clone();
        if !self.include_state {
            if let Value::Object(map) = &mut data {
                map.remove(CONNECTION_STATE_FIELD);
            }
        }

        json!({
            "received_at": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "topic": topic,
            "data": data,
        })
        .to_string()
    }

    pub fn print(&self, topic: &str, payload: &Value) {
        let line = self.render(topic, payload);
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", line) {
            tracing::debug!("Failed to write event line: {}", e);
        }
    }
}
