//! Progress events and their wire framing.
//!
//! A review reports itself through an ordered stream of [`ProgressEvent`]s:
//!
//! ```text
//! review_start ─▶ chunk_progress × N ─▶ text × k ─▶ complete | error
//! ```
//!
//! The orchestrator is the only producer; it pushes events through a
//! [`ProgressEmitter`] as they happen. Consumers fold the stream (see
//! [`crate::tracker::ProgressTracker`]); there is no polling API.
//!
//! On the wire each event is one Server-Sent Events frame,
//! `event: <name>\ndata: <json>\n\n`, where the JSON payload carries the
//! event's fields without the name.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// Outcome reported for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Complete,
    Error,
}

/// A step that failed, as listed in a partial `complete` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartFailure {
    pub chunk: usize,
    pub pages: String,
    pub error: String,
}

/// One lifecycle event of a review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ProgressEvent {
    /// Emitted once, before the first step.
    #[serde(rename = "review_start")]
    Start { total_chunks: usize },

    /// Emitted once per attempted step. `chunk` is 1-indexed, `pages` is the
    /// step's true page range, e.g. `"34-68"`.
    #[serde(rename = "chunk_progress")]
    StepProgress {
        chunk: usize,
        total: usize,
        pages: String,
        status: StepOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A piece of review prose.
    #[serde(rename = "text")]
    ContentDelta { text: String },

    /// Terminal: the review produced a result. `status` is `"partial"` when
    /// some steps failed, in which case the counts and `errors` are set.
    #[serde(rename = "complete")]
    Complete {
        #[serde(default = "complete_status")]
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed_chunks: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failed_chunks: Option<usize>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        errors: Vec<PartFailure>,
    },

    /// Terminal: the review produced nothing.
    #[serde(rename = "error")]
    Error {
        #[serde(rename = "error")]
        message: String,
    },
}

fn complete_status() -> String {
    "complete".to_string()
}

impl ProgressEvent {
    pub fn complete() -> Self {
        ProgressEvent::Complete {
            status: complete_status(),
            completed_chunks: None,
            failed_chunks: None,
            errors: Vec::new(),
        }
    }

    /// Terminal event for a finished review: plain `complete` when every
    /// attempted step succeeded, `partial` with the failures otherwise.
    pub fn finished(completed_chunks: usize, errors: Vec<PartFailure>) -> Self {
        if errors.is_empty() {
            return Self::complete();
        }
        ProgressEvent::Complete {
            status: "partial".to_string(),
            completed_chunks: Some(completed_chunks),
            failed_chunks: Some(errors.len()),
            errors,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            message: message.into(),
        }
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Start { .. } => "review_start",
            ProgressEvent::StepProgress { .. } => "chunk_progress",
            ProgressEvent::ContentDelta { .. } => "text",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Complete { .. } | ProgressEvent::Error { .. }
        )
    }

    /// JSON payload of the `data:` line: the event's fields, without its name.
    pub fn payload(&self) -> String {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut obj)) => {
                obj.remove("event");
                Value::Object(obj).to_string()
            }
            _ => "{}".to_string(),
        }
    }

    /// One complete SSE frame.
    pub fn to_sse_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.name(), self.payload())
    }

    /// Decode an SSE frame's name and data.
    ///
    /// Returns `Ok(None)` for event names this protocol does not define, so
    /// consumers can skip them.
    pub fn from_sse(name: &str, data: &str) -> Result<Option<Self>, serde_json::Error> {
        if !matches!(
            name,
            "review_start" | "chunk_progress" | "text" | "complete" | "error"
        ) {
            return Ok(None);
        }
        let mut value: Value = serde_json::from_str(data)?;
        if let Value::Object(ref mut obj) = value {
            obj.insert("event".to_string(), Value::String(name.to_string()));
        }
        serde_json::from_value(value).map(Some)
    }
}

/// The single-writer side of a review's event stream.
#[derive(Debug)]
pub struct ProgressEmitter {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressEmitter {
    /// A connected emitter and the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// An emitter that discards everything.
    pub fn noop() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("Progress receiver dropped; event discarded");
            }
        }
    }
}

/// One raw SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental splitter for an SSE byte stream.
///
/// Bytes may arrive in arbitrary pieces; complete frames are returned as
/// soon as their terminating blank line has been seen.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every frame they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buf.extend(bytes.iter().copied().filter(|&b| b != b'\r'));

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let raw: Vec<u8> = self.buf.drain(..pos + 2).collect();
            if let Some(frame) = parse_frame(&String::from_utf8_lossy(&raw[..pos])) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn parse_frame(block: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseFrame {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(chunk: usize, status: StepOutcome, error: Option<&str>) -> ProgressEvent {
        ProgressEvent::StepProgress {
            chunk,
            total: 4,
            pages: "34-68".into(),
            status,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn frames_match_wire_format() {
        assert_eq!(
            ProgressEvent::Start { total_chunks: 4 }.to_sse_frame(),
            "event: review_start\ndata: {\"total_chunks\":4}\n\n"
        );
        assert_eq!(
            ProgressEvent::complete().to_sse_frame(),
            "event: complete\ndata: {\"status\":\"complete\"}\n\n"
        );
        assert_eq!(
            ProgressEvent::error("boom").to_sse_frame(),
            "event: error\ndata: {\"error\":\"boom\"}\n\n"
        );
    }

    #[test]
    fn partial_completion_lists_failed_parts() {
        assert_eq!(ProgressEvent::finished(4, Vec::new()), ProgressEvent::complete());

        let ev = ProgressEvent::finished(
            3,
            vec![PartFailure {
                chunk: 2,
                pages: "34-68".into(),
                error: "timed out".into(),
            }],
        );
        let payload: Value = serde_json::from_str(&ev.payload()).unwrap();
        assert_eq!(payload["status"], "partial");
        assert_eq!(payload["completed_chunks"], 3);
        assert_eq!(payload["failed_chunks"], 1);
        assert_eq!(payload["errors"][0]["pages"], "34-68");
        assert_eq!(payload["errors"][0]["error"], "timed out");

        assert_eq!(ProgressEvent::from_sse("complete", &ev.payload()).unwrap(), Some(ev));
    }

    #[test]
    fn chunk_progress_payload() {
        let ok: Value = serde_json::from_str(&progress(2, StepOutcome::Complete, None).payload()).unwrap();
        assert_eq!(ok["chunk"], 2);
        assert_eq!(ok["pages"], "34-68");
        assert_eq!(ok["status"], "complete");
        assert!(ok.get("error").is_none());

        let err: Value =
            serde_json::from_str(&progress(2, StepOutcome::Error, Some("timed out")).payload()).unwrap();
        assert_eq!(err["status"], "error");
        assert_eq!(err["error"], "timed out");
    }

    #[test]
    fn from_sse_reads_back_and_skips_unknown() {
        let ev = progress(3, StepOutcome::Error, Some("429"));
        let back = ProgressEvent::from_sse(ev.name(), &ev.payload()).unwrap();
        assert_eq!(back, Some(ev));

        assert_eq!(ProgressEvent::from_sse("heartbeat", "{}").unwrap(), None);
        assert!(ProgressEvent::from_sse("text", "not json").is_err());
    }

    #[test]
    fn decoder_handles_split_frames_and_crlf() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"event: text\r\ndata: {\"te").is_empty());
        let frames = d.push(b"xt\":\"hi\"}\r\n\r\n: keep-alive\n\nevent: complete\ndata: {}\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "text");
        assert_eq!(frames[0].data, "{\"text\":\"hi\"}");
        assert_eq!(frames[1].event, "complete");
    }

    #[test]
    fn decoder_joins_multiline_data() {
        let mut d = SseDecoder::new();
        let frames = d.push(b"data: line one\ndata: line two\n\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "message".into(),
                data: "line one\nline two".into()
            }]
        );
    }

    #[tokio::test]
    async fn emitter_delivers_in_order_and_noop_is_silent() {
        let (emitter, mut rx) = ProgressEmitter::channel();
        emitter.emit(ProgressEvent::Start { total_chunks: 1 });
        emitter.emit(ProgressEvent::complete());
        drop(emitter);

        assert_eq!(rx.recv().await, Some(ProgressEvent::Start { total_chunks: 1 }));
        assert_eq!(rx.recv().await, Some(ProgressEvent::complete()));
        assert_eq!(rx.recv().await, None);

        ProgressEmitter::noop().emit(ProgressEvent::complete());
    }
}
