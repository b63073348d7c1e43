//! Accumulated review state and its finalisation.
//!
//! [`ReviewState`] is owned by the orchestrator for the lifetime of one
//! review and mutated once per attempted step. Nothing else writes to it,
//! so no locking is involved. When all steps have been attempted (or the
//! review is cancelled) it is consumed by [`ReviewState::finalize`] into an
//! immutable [`ReviewResult`].

use crate::error::{ReviewError, StepError};
use crate::issues::{finalize_issues, parse_issue_block, render_issue_block, Issue, IssueParse};
use crate::pipeline::postprocess::{clean_prose, split_sections, Sections};
use crate::planner::Chunk;
use crate::service::AnalysisResponse;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// How a step's issue list was folded into the accumulated list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reconciliation {
    /// First step: its list is the starting point.
    Baseline,
    /// The step re-evaluated earlier pages; its list replaces the old one.
    Consolidation,
    /// The step only reported its own pages; its list is appended.
    Extension,
}

/// Fold a step's issues into the accumulated list.
///
/// A list that references any page before the step's first page is taken
/// as a full consolidation and replaces the accumulated list. Otherwise the
/// step only extended the review and its issues are appended.
///
/// This is a heuristic: a step that silently drops a stale issue without
/// touching earlier pages looks like an extension and the stale issue stays.
pub fn reconcile(
    accumulated: Vec<Issue>,
    incoming: Vec<Issue>,
    chunk: &Chunk,
) -> (Vec<Issue>, Reconciliation) {
    if chunk.is_first() {
        return (incoming, Reconciliation::Baseline);
    }
    if incoming
        .iter()
        .any(|issue| issue.references_before(chunk.first_page()))
    {
        return (incoming, Reconciliation::Consolidation);
    }
    let mut merged = accumulated;
    merged.extend(incoming);
    (merged, Reconciliation::Extension)
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Timeout { message: String },
    Error { message: String },
}

impl StepStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, StepStatus::Ok)
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            StepStatus::Ok => None,
            StepStatus::Timeout { message } | StepStatus::Error { message } => Some(message),
        }
    }
}

impl From<&StepError> for StepStatus {
    fn from(e: &StepError) -> Self {
        if e.is_timeout() {
            StepStatus::Timeout {
                message: e.to_string(),
            }
        } else {
            StepStatus::Error {
                message: e.to_string(),
            }
        }
    }
}

/// Record of one attempted step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub chunk: Chunk,
    #[serde(flatten)]
    pub status: StepStatus,
    /// Cleaned prose, without the issue block.
    #[serde(skip)]
    pub prose: String,
    /// Issues as returned by this step, before reconciliation.
    #[serde(skip)]
    pub issues: Vec<Issue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<Reconciliation>,
    #[serde(default)]
    pub input_tokens: usize,
    #[serde(default)]
    pub output_tokens: usize,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Final, immutable outcome of a review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    /// Review text with the rendered issue block at the end.
    pub text: String,
    pub issues: Vec<Issue>,
    pub sections: Sections,
    pub steps: Vec<StepResult>,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    /// False when the first step, which carries the document-wide checks, failed.
    pub document_wide_checks_verified: bool,
    pub cancelled: bool,
}

/// Accumulated state of one review.
#[derive(Debug)]
pub struct ReviewState {
    page_count: usize,
    total_steps: usize,
    fragments: Vec<(Chunk, Sections)>,
    issues: Vec<Issue>,
    completed: usize,
    document_wide_checked: bool,
    steps: Vec<StepResult>,
}

impl ReviewState {
    pub fn new(page_count: usize, total_steps: usize) -> Self {
        Self {
            page_count,
            total_steps,
            fragments: Vec::with_capacity(total_steps),
            issues: Vec::new(),
            completed: 0,
            document_wide_checked: false,
            steps: Vec::with_capacity(total_steps),
        }
    }

    /// The accumulated issue list as it stands now.
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn failed(&self) -> usize {
        self.steps.len() - self.completed
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    pub fn document_wide_checks_verified(&self) -> bool {
        self.document_wide_checked
    }

    /// Fold a successful answer into the state.
    pub fn record_success(
        &mut self,
        chunk: Chunk,
        response: AnalysisResponse,
        duration_ms: u64,
    ) -> &StepResult {
        let (incoming, parse_error) = match parse_issue_block(&response.text) {
            IssueParse::Parsed(issues) => (issues, None),
            IssueParse::Failed(reason) => {
                warn!("{}: issue block not usable ({}), keeping prose only", chunk, reason);
                (Vec::new(), Some(reason))
            }
        };

        let accumulated = std::mem::take(&mut self.issues);
        let (issues, reconciliation) = reconcile(accumulated, incoming.clone(), &chunk);
        info!(
            "{}: {} issue(s) returned, {:?} → {} accumulated",
            chunk,
            incoming.len(),
            reconciliation,
            issues.len()
        );
        self.issues = issues;

        let prose = clean_prose(&response.text);
        self.fragments.push((chunk, split_sections(&prose)));
        self.completed += 1;
        if chunk.is_first() {
            self.document_wide_checked = true;
        }

        self.steps.push(StepResult {
            chunk,
            status: StepStatus::Ok,
            prose,
            issues: incoming,
            parse_error,
            reconciliation: Some(reconciliation),
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            duration_ms,
        });
        &self.steps[self.steps.len() - 1]
    }

    /// Record a failed step. The accumulated issues are left untouched.
    pub fn record_failure(&mut self, chunk: Chunk, error: &StepError, duration_ms: u64) -> &StepResult {
        warn!("{} failed: {}", chunk, error);
        self.steps.push(StepResult {
            chunk,
            status: StepStatus::from(error),
            prose: String::new(),
            issues: Vec::new(),
            parse_error: None,
            reconciliation: None,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms,
        });
        &self.steps[self.steps.len() - 1]
    }

    /// Consume the state into the final result.
    ///
    /// Fails only when no step succeeded.
    pub fn finalize(self, cancelled: bool) -> Result<ReviewResult, ReviewError> {
        if self.completed == 0 {
            if cancelled {
                return Err(ReviewError::Cancelled { completed: 0 });
            }
            let first_error = self
                .steps
                .iter()
                .find_map(|s| s.status.message())
                .unwrap_or("no step was attempted")
                .to_string();
            return Err(ReviewError::AllStepsFailed {
                total: self.total_steps,
                first_error,
            });
        }

        let issues = finalize_issues(self.issues, self.page_count);
        let failed_steps = self.steps.len() - self.completed;

        let (text, sections) = if self.total_steps == 1 {
            let prose = self
                .steps
                .iter()
                .find(|s| s.status.is_ok())
                .map(|s| s.prose.clone())
                .unwrap_or_default();
            let sections = split_sections(&prose);
            let text = if prose.is_empty() {
                render_issue_block(&issues)
            } else {
                format!("{}\n\n{}", prose, render_issue_block(&issues))
            };
            (text, sections)
        } else {
            let notes = OverviewNotes {
                total: self.total_steps,
                attempted: self.steps.len(),
                failed: failed_steps,
                document_wide_checked: self.document_wide_checked,
                cancelled,
            };
            let sections = merge_sections(&self.fragments, &notes);
            let text = format!("{}\n\n{}", render_sections(&sections), render_issue_block(&issues));
            (text, sections)
        };

        info!(
            "Review finalised: {}/{} step(s) ok, {} issue(s){}",
            self.completed,
            self.total_steps,
            issues.len(),
            if cancelled { ", cancelled" } else { "" }
        );

        Ok(ReviewResult {
            text,
            issues,
            sections,
            steps: self.steps,
            total_steps: self.total_steps,
            completed_steps: self.completed,
            failed_steps,
            document_wide_checks_verified: self.document_wide_checked,
            cancelled,
        })
    }
}

// ── Merged text ──────────────────────────────────────────────────────────────

const NO_ATTENTION: &str = "Everything looks good!";
const NO_LOOKING_GOOD: &str = "Review completed.";
const NO_SUGGESTIONS: &str = "No additional suggestions.";
const MAX_LOOKING_GOOD: usize = 3;

struct OverviewNotes {
    total: usize,
    attempted: usize,
    failed: usize,
    document_wide_checked: bool,
    cancelled: bool,
}

impl OverviewNotes {
    fn render(&self) -> String {
        let mut note = format!("*This document was reviewed in {} parts.", self.total);
        if self.failed > 0 {
            note.push_str(&format!(" {} part(s) failed to process.", self.failed));
        }
        if self.cancelled {
            note.push_str(&format!(
                " The review was cancelled after {} of {} parts.",
                self.attempted, self.total
            ));
        }
        if !self.document_wide_checked {
            note.push_str(
                " Document-wide checks (ISBN, DOI, copyright, colophon) were not verified \
because part 1 failed.",
            );
        }
        note.push('*');
        note
    }
}

fn merge_sections(fragments: &[(Chunk, Sections)], notes: &OverviewNotes) -> Sections {
    let mut overview = vec![notes.render()];
    let mut attention = Vec::new();
    let mut good = Vec::new();
    let mut suggestions = Vec::new();

    for (chunk, sections) in fragments {
        if !sections.overview.is_empty() {
            overview.push(format!(
                "**Part {} (pages {}):** {}",
                chunk.number(),
                chunk.page_label(),
                sections.overview
            ));
        }
        let na = &sections.needs_attention;
        if !na.is_empty() && !na.to_lowercase().contains("everything looks good") {
            attention.push(na.as_str());
        }
        if !sections.looking_good.is_empty() {
            good.push(sections.looking_good.as_str());
        }
        if !sections.suggestions.is_empty() {
            suggestions.push(sections.suggestions.as_str());
        }
    }

    let or_placeholder = |parts: &[&str], placeholder: &str| {
        if parts.is_empty() {
            placeholder.to_string()
        } else {
            parts.join("\n\n")
        }
    };

    Sections {
        overview: overview.join("\n\n"),
        needs_attention: or_placeholder(&attention[..], NO_ATTENTION),
        looking_good: or_placeholder(
            &good[..good.len().min(MAX_LOOKING_GOOD)],
            NO_LOOKING_GOOD,
        ),
        suggestions: or_placeholder(&suggestions[..], NO_SUGGESTIONS),
    }
}

fn render_sections(sections: &Sections) -> String {
    use crate::pipeline::postprocess::Section;

    Section::ALL
        .iter()
        .map(|s| format!("### {}\n{}", s.heading(), sections.get(*s)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issues::IssueCategory;

    fn chunk(index: usize, start: usize, end: usize) -> Chunk {
        Chunk { index, start, end }
    }

    fn issue(title: &str, pages: Vec<usize>) -> Issue {
        Issue::new(IssueCategory::NeedsAttention, title, "", pages)
    }

    fn answer(overview: &str, issues: &[Issue]) -> AnalysisResponse {
        AnalysisResponse::new(format!(
            "### Overview\n{overview}\n\n### Needs Attention\n- item\n\n### Looking Good\nFonts.\n\n### Suggestions\nNone.\n\n{}",
            render_issue_block(issues)
        ))
    }

    #[test]
    fn first_step_is_baseline() {
        let (out, how) = reconcile(vec![issue("old", vec![1])], vec![issue("new", vec![2])], &chunk(0, 0, 35));
        assert_eq!(how, Reconciliation::Baseline);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "new");
    }

    #[test]
    fn prior_page_reference_replaces() {
        let acc = vec![issue("a", vec![3]), issue("b", vec![20])];
        let incoming = vec![issue("a+b merged", vec![3, 20, 40])];
        let (out, how) = reconcile(acc, incoming.clone(), &chunk(1, 33, 68));
        assert_eq!(how, Reconciliation::Consolidation);
        assert_eq!(out, incoming);
    }

    #[test]
    fn own_pages_only_extends() {
        let acc = vec![issue("a", vec![3])];
        // Page 34 is the step's first page, not a prior page.
        let incoming = vec![issue("c", vec![34]), issue("d", vec![50])];
        let (out, how) = reconcile(acc, incoming, &chunk(1, 33, 68));
        assert_eq!(how, Reconciliation::Extension);
        let titles: Vec<_> = out.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "c", "d"]);
    }

    #[test]
    fn consolidation_with_numeric_ids_replaces_accumulated_list() {
        let mut state = ReviewState::new(105, 4);
        state.record_success(
            chunk(0, 0, 35),
            answer("Part one.", &[issue("stale", vec![3]), issue("kept", vec![10])]),
            1,
        );
        let step = state.record_success(
            chunk(1, 33, 68),
            AnalysisResponse::new(
                "### Overview\nPart two.\n\n```json\n{\"issues\": [\
                 {\"id\": 7, \"category\": \"Needs Attention\", \"title\": \"kept\", \"pages\": [10]},\
                 {\"id\": 8, \"category\": \"suggestion\", \"title\": \"new\", \"pages\": [3, 40]}\
                 ]}\n```",
            ),
            1,
        );
        assert!(step.parse_error.is_none());
        assert_eq!(step.issues.len(), 2);
        assert_eq!(step.reconciliation, Some(Reconciliation::Consolidation));

        let titles: Vec<_> = state.issues().iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["kept", "new"]);

        let result = state.finalize(false).unwrap();
        assert_eq!(result.issues[0].id, "issue-1");
        assert_eq!(result.issues[1].id, "issue-2");
    }

    #[test]
    fn failure_keeps_accumulated_issues() {
        let mut state = ReviewState::new(105, 4);
        state.record_success(chunk(0, 0, 35), answer("Part one.", &[issue("a", vec![2])]), 10);
        state.record_failure(chunk(1, 33, 68), &StepError::Timeout { step: 2, secs: 60 }, 60_000);
        assert_eq!(state.issues().len(), 1);
        assert_eq!(state.completed(), 1);
        assert_eq!(state.failed(), 1);
        assert!(matches!(state.steps()[1].status, StepStatus::Timeout { .. }));
    }

    #[test]
    fn unparseable_block_keeps_prose() {
        let mut state = ReviewState::new(20, 1);
        let step = state.record_success(
            chunk(0, 0, 20),
            AnalysisResponse::new("### Overview\nShort brief.\n\n```json\n{ broken\n```"),
            5,
        );
        assert!(step.parse_error.is_some());
        assert!(step.prose.contains("Short brief."));
        assert!(!step.prose.contains("broken"));
        let result = state.finalize(false).unwrap();
        assert!(result.issues.is_empty());
        assert!(result.text.starts_with("### Overview\nShort brief."));
    }

    #[test]
    fn all_failed_is_an_error() {
        let mut state = ReviewState::new(105, 2);
        state.record_failure(chunk(0, 0, 35), &StepError::Service { step: 1, detail: "429".into() }, 1);
        state.record_failure(chunk(1, 33, 68), &StepError::Timeout { step: 2, secs: 60 }, 1);
        match state.finalize(false) {
            Err(ReviewError::AllStepsFailed { total, first_error }) => {
                assert_eq!(total, 2);
                assert!(first_error.contains("429"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancelled_before_any_success() {
        let state = ReviewState::new(105, 4);
        assert!(matches!(
            state.finalize(true),
            Err(ReviewError::Cancelled { completed: 0 })
        ));
    }

    #[test]
    fn merged_text_layout() {
        let mut state = ReviewState::new(105, 4);
        state.record_failure(chunk(0, 0, 35), &StepError::Timeout { step: 1, secs: 60 }, 1);
        state.record_success(chunk(1, 33, 68), answer("Middle part.", &[issue("x", vec![40, 200])]), 1);
        let result = state.finalize(true).unwrap();

        assert!(!result.document_wide_checks_verified);
        assert!(result.cancelled);
        assert!(result.text.contains("*This document was reviewed in 4 parts. 1 part(s) failed"));
        assert!(result.text.contains("cancelled after 2 of 4 parts"));
        assert!(result.text.contains("were not verified"));
        assert!(result.text.contains("**Part 2 (pages 34-68):** Middle part."));
        assert!(result.text.contains("### Suggestions\nNone."));
        assert_eq!(result.issues[0].id, "issue-1");
        assert_eq!(result.issues[0].pages, vec![40]);
        assert!(result.text.trim_end().ends_with("```"));
    }

    #[test]
    fn looking_good_is_capped_and_placeholders_fill_gaps() {
        let frags: Vec<(Chunk, Sections)> = (0..5)
            .map(|i| {
                (
                    chunk(i, i * 10, i * 10 + 12),
                    Sections {
                        looking_good: format!("good {i}"),
                        needs_attention: "Everything looks good!".into(),
                        ..Default::default()
                    },
                )
            })
            .collect();
        let notes = OverviewNotes {
            total: 5,
            attempted: 5,
            failed: 0,
            document_wide_checked: true,
            cancelled: false,
        };
        let s = merge_sections(&frags, &notes);
        assert_eq!(s.looking_good, "good 0\n\ngood 1\n\ngood 2");
        assert_eq!(s.needs_attention, NO_ATTENTION);
        assert_eq!(s.suggestions, NO_SUGGESTIONS);
        assert_eq!(s.overview, "*This document was reviewed in 5 parts.*");
    }
}
