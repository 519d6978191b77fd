//! Event sinks — durable consumers of a session's event stream.
//!
//! The baseline transport for dashboards is line-delimited JSON: one
//! `{timestamp, session_id, event}` object per line, appended as events
//! arrive.  A sink is just another subscriber; it obeys the same bounded
//! buffer rules as any dashboard.

use std::io::Write;
use std::path::PathBuf;

use tokio::task::JoinHandle;

use fm_domain::error::{Error, Result};
use fm_domain::stream::StreamEvent;

use crate::events::EventStream;

/// Writes one JSON line per event to an append-only file.
pub struct JsonlEventSink {
    path: PathBuf,
}

impl JsonlEventSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append a single event line.
    pub fn write(&self, session_id: &str, event: &StreamEvent) -> Result<()> {
        let line = serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "session_id": session_id,
            "event": event,
        });
        let mut buf = line.to_string();
        buf.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(Error::Io)?;
        file.write_all(buf.as_bytes()).map_err(Error::Io)
    }

    /// Drain a subscription into the file until the stream closes.
    pub fn spawn_writer(self, session_id: String, mut events: EventStream) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(e) = self.write(&session_id, &event) {
                    tracing::warn!(error = %e, "event sink write failed");
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventHub;
    use fm_domain::stream::{StopReason, Usage};

    #[tokio::test]
    async fn writes_events_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let hub = EventHub::new(16);
        let rx = hub.subscribe("s1");
        let writer = JsonlEventSink::new(&path).spawn_writer("s1".into(), rx);

        hub.publish(
            "s1",
            &StreamEvent::TextDelta {
                text: "hello".into(),
            },
        );
        hub.publish(
            "s1",
            &StreamEvent::StepEnd {
                stop_reason: StopReason::EndTurn,
                usage: Usage {
                    input_tokens: 3,
                    output_tokens: 2,
                },
                error: None,
            },
        );
        hub.close("s1");
        writer.await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["session_id"], "s1");
        assert_eq!(first["event"]["type"], "text_delta");

        let last: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(last["event"]["type"], "step_end");
        assert_eq!(last["event"]["stop_reason"], "end_turn");
    }
}
