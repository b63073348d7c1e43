//! Caller-side progress state, folded from the event stream.
//!
//! The tracker is what a UI keeps: which mode the review is in, how many
//! parts are done, which ones failed, the text received so far and whether
//! the review has ended. It is driven only by [`ProgressEvent`]s (or raw SSE
//! frames) and never asks the producer for anything.
//!
//! Streams from producers that do not announce parts (no `review_start`,
//! no `chunk_progress`) are tracked as a single-pass review; events the
//! tracker does not know are ignored.

pub use crate::progress::PartFailure;
use crate::progress::{ProgressEvent, SseFrame, StepOutcome};
use serde::Deserialize;
use tracing::debug;

/// How the review is being carried out, as far as the stream has told us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReviewMode {
    #[default]
    SinglePass,
    Chunked,
}

/// Where the review stands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TrackerStatus {
    #[default]
    Running,
    Complete,
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressTracker {
    pub mode: ReviewMode,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub failed_chunks: usize,
    /// Page range of the most recently reported part.
    pub last_pages: Option<String>,
    pub failures: Vec<PartFailure>,
    pub text: String,
    pub status: TrackerStatus,
}

#[derive(Deserialize)]
struct LegacyText {
    text: String,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the state.
    pub fn apply(&mut self, event: &ProgressEvent) {
        if self.is_finished() {
            debug!("Ignoring {} after terminal event", event.name());
            return;
        }
        match event {
            ProgressEvent::Start { total_chunks } => {
                self.total_chunks = *total_chunks;
                self.mode = if *total_chunks > 1 {
                    ReviewMode::Chunked
                } else {
                    ReviewMode::SinglePass
                };
            }
            ProgressEvent::StepProgress {
                chunk,
                total,
                pages,
                status,
                error,
            } => {
                // A producer that skipped `review_start` still tells us the plan size.
                if self.total_chunks == 0 {
                    self.total_chunks = *total;
                }
                if *total > 1 {
                    self.mode = ReviewMode::Chunked;
                }
                self.last_pages = Some(pages.clone());
                match status {
                    StepOutcome::Complete => self.completed_chunks += 1,
                    StepOutcome::Error => {
                        self.failed_chunks += 1;
                        self.failures.push(PartFailure {
                            chunk: *chunk,
                            pages: pages.clone(),
                            error: error.clone().unwrap_or_default(),
                        });
                    }
                }
            }
            ProgressEvent::ContentDelta { text } => self.text.push_str(text),
            ProgressEvent::Complete {
                completed_chunks,
                failed_chunks,
                errors,
                ..
            } => {
                // Per-part events may have been missed; keep the larger count.
                if let Some(n) = completed_chunks {
                    self.completed_chunks = self.completed_chunks.max(*n);
                }
                if let Some(n) = failed_chunks {
                    self.failed_chunks = self.failed_chunks.max(*n);
                }
                for failure in errors {
                    if !self.failures.iter().any(|f| f.chunk == failure.chunk) {
                        self.failures.push(failure.clone());
                    }
                }
                self.status = TrackerStatus::Complete;
            }
            ProgressEvent::Error { message } => {
                self.status = TrackerStatus::Failed(message.clone())
            }
        }
    }

    /// Fold one raw SSE frame. Unknown or undecodable frames are skipped.
    pub fn apply_frame(&mut self, frame: &SseFrame) {
        match ProgressEvent::from_sse(&frame.event, &frame.data) {
            Ok(Some(event)) => self.apply(&event),
            Ok(None) if frame.event == "message" => {
                // Unnamed frames carrying `{ "text": … }` are prose.
                if let Ok(legacy) = serde_json::from_str::<LegacyText>(&frame.data) {
                    self.apply(&ProgressEvent::ContentDelta { text: legacy.text });
                }
            }
            Ok(None) => debug!("Ignoring unknown event '{}'", frame.event),
            Err(e) => debug!("Ignoring undecodable '{}' frame: {}", frame.event, e),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status != TrackerStatus::Running
    }

    /// Parts attempted so far.
    pub fn processed_chunks(&self) -> usize {
        self.completed_chunks + self.failed_chunks
    }

    /// Progress in `[0, 1]`. Single-pass reviews only move at the end.
    pub fn fraction(&self) -> f64 {
        if self.is_finished() {
            return 1.0;
        }
        if self.total_chunks == 0 {
            return 0.0;
        }
        (self.processed_chunks() as f64 / self.total_chunks as f64).min(1.0)
    }

    /// Short human-readable status line.
    pub fn status_line(&self) -> String {
        match (&self.status, self.mode) {
            (TrackerStatus::Complete, _) if self.failed_chunks > 0 => format!(
                "Review complete ({} of {} parts failed)",
                self.failed_chunks, self.total_chunks
            ),
            (TrackerStatus::Complete, _) => "Review complete".to_string(),
            (TrackerStatus::Failed(msg), _) => format!("Review failed: {msg}"),
            (TrackerStatus::Running, ReviewMode::SinglePass) => "Reviewing document".to_string(),
            (TrackerStatus::Running, ReviewMode::Chunked) => match &self.last_pages {
                Some(pages) => format!(
                    "Reviewed {}/{} parts (last: pages {})",
                    self.processed_chunks(),
                    self.total_chunks,
                    pages
                ),
                None => format!("Reviewing part 1/{}", self.total_chunks),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SseDecoder;

    fn chunk_event(chunk: usize, pages: &str, ok: bool) -> ProgressEvent {
        ProgressEvent::StepProgress {
            chunk,
            total: 4,
            pages: pages.into(),
            status: if ok {
                StepOutcome::Complete
            } else {
                StepOutcome::Error
            },
            error: (!ok).then(|| "timed out".to_string()),
        }
    }

    #[test]
    fn folds_a_chunked_review() {
        let mut t = ProgressTracker::new();
        t.apply(&ProgressEvent::Start { total_chunks: 4 });
        assert_eq!(t.mode, ReviewMode::Chunked);
        assert_eq!(t.status_line(), "Reviewing part 1/4");

        t.apply(&chunk_event(1, "1-35", true));
        t.apply(&chunk_event(2, "34-68", false));
        assert_eq!(t.fraction(), 0.5);
        assert_eq!(t.status_line(), "Reviewed 2/4 parts (last: pages 34-68)");

        t.apply(&chunk_event(3, "67-101", true));
        t.apply(&chunk_event(4, "100-105", true));
        t.apply(&ProgressEvent::ContentDelta {
            text: "### Overview".into(),
        });
        t.apply(&ProgressEvent::complete());

        assert_eq!(t.completed_chunks, 3);
        assert_eq!(t.failed_chunks, 1);
        assert_eq!(
            t.failures,
            vec![PartFailure {
                chunk: 2,
                pages: "34-68".into(),
                error: "timed out".into()
            }]
        );
        assert_eq!(t.text, "### Overview");
        assert!(t.is_finished());
        assert_eq!(t.status_line(), "Review complete (1 of 4 parts failed)");
    }

    #[test]
    fn partial_summary_fills_in_missed_failures() {
        let mut t = ProgressTracker::new();
        t.apply(&ProgressEvent::Start { total_chunks: 4 });
        t.apply(&chunk_event(1, "1-35", true));
        t.apply(&ProgressEvent::finished(
            3,
            vec![PartFailure {
                chunk: 3,
                pages: "67-101".into(),
                error: "429".into(),
            }],
        ));
        assert_eq!(t.completed_chunks, 3);
        assert_eq!(t.failed_chunks, 1);
        assert_eq!(t.failures[0].pages, "67-101");
        assert_eq!(t.status, TrackerStatus::Complete);
        assert_eq!(t.status_line(), "Review complete (1 of 4 parts failed)");
    }

    #[test]
    fn stream_without_start_is_single_pass() {
        let mut t = ProgressTracker::new();
        t.apply(&ProgressEvent::ContentDelta { text: "a".into() });
        t.apply(&ProgressEvent::ContentDelta { text: "b".into() });
        t.apply(&ProgressEvent::complete());
        assert_eq!(t.mode, ReviewMode::SinglePass);
        assert_eq!(t.text, "ab");
        assert_eq!(t.status, TrackerStatus::Complete);
    }

    #[test]
    fn events_after_terminal_are_ignored() {
        let mut t = ProgressTracker::new();
        t.apply(&ProgressEvent::error("All 2 review steps failed"));
        t.apply(&ProgressEvent::ContentDelta { text: "late".into() });
        assert!(t.text.is_empty());
        assert!(matches!(t.status, TrackerStatus::Failed(ref m) if m.contains("failed")));
    }

    #[test]
    fn folds_raw_sse_including_unknown_and_legacy_frames() {
        let wire = concat!(
            "event: review_start\ndata: {\"total_chunks\":2}\n\n",
            "event: heartbeat\ndata: {}\n\n",
            "event: chunk_progress\ndata: {\"chunk\":1,\"total\":2,\"pages\":\"1-35\",\"status\":\"complete\"}\n\n",
            "data: {\"text\":\"legacy \"}\n\n",
            "event: text\ndata: {\"text\":\"prose\"}\n\n",
            "event: complete\ndata: {\"status\":\"complete\"}\n\n",
        );
        let mut decoder = SseDecoder::new();
        let mut t = ProgressTracker::new();
        for frame in decoder.push(wire.as_bytes()) {
            t.apply_frame(&frame);
        }
        assert_eq!(t.total_chunks, 2);
        assert_eq!(t.completed_chunks, 1);
        assert_eq!(t.text, "legacy prose");
        assert_eq!(t.status, TrackerStatus::Complete);
    }
}
