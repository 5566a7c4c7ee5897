//! Server-Sent Events decoding for the research progress stream.
//!
//! `GET /research/{id}/stream` emits events such as:
//! ```text
//! event: step
//! data: {"key":"search","status":"active","detail":"querying 3 sources"}
//!
//! event: complete
//! data: {"report":"..."}
//!
//! ```
//! The event name may also be omitted, in which case the JSON payload's
//! `type` field names it.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::protocol::{PipelineStep, StreamEvent};

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// The `event:` field; `None` means the default `message` type.
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental SSE parser.
///
/// Handles `\n` and `\r\n` line endings, comment lines, multi-line `data`
/// and blank-line dispatch. An event still being assembled when the stream
/// ends is discarded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: String,
    has_data: bool,
    last_event_id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(newline_pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=newline_pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            match String::from_utf8(line) {
                Ok(line) => {
                    if let Some(frame) = self.process_line(&line) {
                        frames.push(frame);
                    }
                }
                Err(_) => warn!("dropping SSE line that is not valid UTF-8"),
            }
        }

        frames
    }

    /// The most recent `id:` seen, for reconnecting with `Last-Event-ID`.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "id" => {
                if !value.contains('\0') {
                    self.last_event_id = Some(value.to_string());
                }
            }
            // Reconnection is replaced by polling, so the server's delay is unused.
            "retry" => {}
            _ => debug!(field, "ignoring unknown SSE field"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        Some(SseFrame {
            event: event.filter(|e| !e.is_empty() && e != "message"),
            data: std::mem::take(&mut self.data),
            id: self.last_event_id.clone(),
        })
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    step: Option<PipelineStep>,
    #[serde(default)]
    report: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Map a research SSE frame to a [`StreamEvent`].
///
/// Returns `None` for keep-alives, unknown event names and malformed
/// payloads.
pub fn research_event(frame: &SseFrame) -> Option<StreamEvent> {
    let payload: Option<serde_json::Value> = serde_json::from_str(&frame.data).ok();

    let name = match frame.event.as_deref() {
        Some(name) => name.to_string(),
        None => payload
            .as_ref()
            .and_then(|v| v.get("type"))
            .and_then(|t| t.as_str())
            .map(str::to_string)?,
    };

    match name.as_str() {
        "step" | "progress" => {
            let value = payload?;
            let step = match serde_json::from_value::<Envelope>(value.clone()) {
                Ok(Envelope { step: Some(step), .. }) => Some(step),
                _ => serde_json::from_value::<PipelineStep>(value).ok(),
            };
            if step.is_none() {
                warn!(data = %frame.data, "dropping malformed step event");
            }
            step.map(StreamEvent::Step)
        }
        "complete" | "completed" | "done" => {
            let report = match payload {
                Some(value) => serde_json::from_value::<Envelope>(value)
                    .ok()
                    .and_then(|env| env.report.or(env.result)),
                None if !frame.data.trim().is_empty() => Some(frame.data.clone()),
                None => None,
            };
            Some(StreamEvent::Complete { report })
        }
        "error" => {
            let message = match payload {
                Some(value) => serde_json::from_value::<Envelope>(value)
                    .ok()
                    .and_then(|env| env.error.or(env.message)),
                None if !frame.data.trim().is_empty() => Some(frame.data.trim().to_string()),
                None => None,
            };
            Some(StreamEvent::Error(
                message.unwrap_or_else(|| "research failed".to_string()),
            ))
        }
        other => {
            debug!(event = other, "ignoring research event");
            None
        }
    }
}
