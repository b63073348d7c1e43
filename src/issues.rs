//! Issues reported by the analysis service and the one function that knows
//! how they are embedded in its prose answer.
//!
//! The service answers in Markdown and appends a fenced block:
//!
//! ````text
//! ```json
//! { "issues": [ { "id": "issue-1", "category": "needs_attention",
//!                 "title": "…", "description": "…", "pages": [3, 4] } ] }
//! ```
//! ````
//!
//! [`parse_issue_block`] is the only place aware of that layout; the
//! orchestrator consumes its total [`IssueParse`] result.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::warn;

/// Kind of finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    NeedsAttention,
    Suggestion,
}

impl IssueCategory {
    /// Match a category label ignoring case and separators, so
    /// `"Needs Attention"`, `"needs-attention"` and `"NEEDS_ATTENTION"` agree.
    pub fn from_label(label: &str) -> Option<Self> {
        let key: String = label
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "needsattention" => Some(IssueCategory::NeedsAttention),
            "suggestion" | "suggestions" => Some(IssueCategory::Suggestion),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for IssueCategory {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        IssueCategory::from_label(&label)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown issue category '{label}'")))
    }
}

/// One finding. `pages` are always true document page numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    pub category: IssueCategory,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_pages")]
    pub pages: Vec<usize>,
    /// Fields the service adds beyond the core schema, passed through as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Issue {
    pub fn new(
        category: IssueCategory,
        title: impl Into<String>,
        description: impl Into<String>,
        pages: Vec<usize>,
    ) -> Self {
        Self {
            id: String::new(),
            category,
            title: title.into(),
            description: description.into(),
            pages,
            extra: Map::new(),
        }
    }

    /// True if any referenced page comes before `first_page` (1-indexed).
    pub fn references_before(&self, first_page: usize) -> bool {
        self.pages.iter().any(|&p| p < first_page)
    }

    fn dedup_key(&self) -> (IssueCategory, String, Option<usize>) {
        let title = self
            .title
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        (self.category, title, self.pages.first().copied())
    }
}

/// Outcome of reading the structured block out of a step's answer.
#[derive(Debug, Clone, PartialEq)]
pub enum IssueParse {
    Parsed(Vec<Issue>),
    Failed(String),
}

impl IssueParse {
    /// Issues contributed by this step; a failed parse contributes none.
    pub fn into_issues(self) -> Vec<Issue> {
        match self {
            IssueParse::Parsed(issues) => issues,
            IssueParse::Failed(_) => Vec::new(),
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, IssueParse::Parsed(_))
    }
}

pub(crate) static RE_ISSUE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json)?[ \t]*\r?\n\s*(\{.*?\})\s*\r?\n[ \t]*```")
        .expect("issue block pattern is valid")
});

/// Extract the issue list from a prose answer.
///
/// When several fenced blocks are present the last decodable one wins, since
/// the service is told to end its answer with the block. Entries that do not
/// match the schema are skipped individually.
pub fn parse_issue_block(content: &str) -> IssueParse {
    let blocks: Vec<&str> = RE_ISSUE_BLOCK
        .captures_iter(content)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    if blocks.is_empty() {
        return IssueParse::Failed("no fenced issue block found".into());
    }

    let mut first_error = None;
    for block in blocks.iter().rev() {
        match serde_json::from_str::<Value>(block) {
            Ok(Value::Object(mut obj)) => {
                let Some(Value::Array(entries)) = obj.remove("issues") else {
                    first_error.get_or_insert_with(|| "block has no \"issues\" array".to_string());
                    continue;
                };
                let issues = entries
                    .into_iter()
                    .enumerate()
                    .filter_map(|(i, entry)| match serde_json::from_value::<Issue>(entry) {
                        Ok(issue) => Some(issue),
                        Err(e) => {
                            warn!("Skipping malformed issue #{}: {}", i + 1, e);
                            None
                        }
                    })
                    .collect();
                return IssueParse::Parsed(issues);
            }
            Ok(_) => {
                first_error.get_or_insert_with(|| "block is not a JSON object".to_string());
            }
            Err(e) => {
                first_error.get_or_insert_with(|| format!("invalid JSON in issue block: {e}"));
            }
        }
    }

    IssueParse::Failed(first_error.unwrap_or_else(|| "unreadable issue block".into()))
}

/// Render issues back into the fenced block format.
pub fn render_issue_block(issues: &[Issue]) -> String {
    let body = serde_json::json!({ "issues": issues });
    let pretty = serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string());
    format!("```json\n{pretty}\n```")
}

/// Prepare the accumulated list for delivery.
///
/// 1. Drop page numbers outside `[1, page_count]` and repeated pages.
/// 2. Drop later entries sharing (category, title, first page) with an
///    earlier one; these only appear when a step ignored the reconciliation
///    instructions.
/// 3. Renumber ids `issue-1..N`.
pub fn finalize_issues(issues: Vec<Issue>, page_count: usize) -> Vec<Issue> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(issues.len());

    for mut issue in issues {
        let before = issue.pages.len();
        let mut pages_seen = HashSet::new();
        issue
            .pages
            .retain(|&p| (1..=page_count).contains(&p) && pages_seen.insert(p));
        if issue.pages.len() != before {
            warn!(
                "Issue '{}': dropped {} out-of-range or repeated page reference(s)",
                issue.title,
                before - issue.pages.len()
            );
        }

        if !seen.insert(issue.dedup_key()) {
            warn!("Dropping duplicate issue '{}'", issue.title);
            continue;
        }
        out.push(issue);
    }

    for (i, issue) in out.iter_mut().enumerate() {
        issue.id = format!("issue-{}", i + 1);
    }
    out
}

/// Ids are renumbered in [`finalize_issues`]; accept whatever scalar the
/// service sent.
fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    })
}

fn lenient_pages<'de, D>(deserializer: D) -> Result<Vec<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|v| match v {
            Value::Number(n) => n.as_u64().map(|p| p as usize),
            Value::String(s) => s.trim().parse::<usize>().ok(),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(block: &str) -> String {
        format!("### Overview\nA report.\n\n### Suggestions\nNone.\n\n```json\n{block}\n```\n")
    }

    #[test]
    fn parses_embedded_block() {
        let text = answer(
            r#"{"issues": [
                {"id": "issue-1", "category": "needs_attention", "title": "Missing ISBN",
                 "description": "No ISBN on the copyright page", "pages": [2]},
                {"id": "issue-2", "category": "suggestion", "title": "Low-res map",
                 "description": "Map at 96 DPI", "pages": [14, 15], "severity": "low"}
            ]}"#,
        );
        let IssueParse::Parsed(issues) = parse_issue_block(&text) else {
            panic!("expected parsed issues");
        };
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].category, IssueCategory::NeedsAttention);
        assert_eq!(issues[1].pages, vec![14, 15]);
        assert_eq!(issues[1].extra.get("severity"), Some(&Value::from("low")));
    }

    #[test]
    fn missing_block_is_a_parse_failure() {
        let parsed = parse_issue_block("### Overview\nAll fine.");
        assert!(matches!(parsed, IssueParse::Failed(_)));
        assert!(parsed.into_issues().is_empty());
    }

    #[test]
    fn broken_json_is_a_parse_failure() {
        let parsed = parse_issue_block(&answer(r#"{"issues": [ {"title": "x", }"#));
        match parsed {
            IssueParse::Failed(reason) => assert!(reason.contains("invalid JSON"), "{reason}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let text = answer(
            r#"{"issues": [
                {"category": "unknown_kind", "title": "?"},
                {"category": "suggestion", "title": "Alt text", "pages": ["7", -1, 8]}
            ]}"#,
        );
        let issues = parse_issue_block(&text).into_issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].pages, vec![7, 8]);
    }

    #[test]
    fn numeric_ids_and_spelled_out_categories_are_accepted() {
        let text = answer(
            r#"{"issues": [
                {"id": 1, "category": "Needs Attention", "title": "Bleed missing", "pages": [3]},
                {"id": 2, "category": "SUGGESTIONS", "title": "Widow line", "pages": [40]},
                {"id": null, "category": "needs-attention", "title": "Font not embedded"}
            ]}"#,
        );
        let issues = parse_issue_block(&text).into_issues();
        assert_eq!(issues.len(), 3);
        assert_eq!(issues[0].id, "1");
        assert_eq!(issues[0].category, IssueCategory::NeedsAttention);
        assert_eq!(issues[1].category, IssueCategory::Suggestion);
        assert_eq!(issues[2].id, "");
        assert_eq!(issues[2].category, IssueCategory::NeedsAttention);
    }

    #[test]
    fn category_labels_ignore_case_and_separators() {
        assert_eq!(IssueCategory::from_label("needs_attention"), Some(IssueCategory::NeedsAttention));
        assert_eq!(IssueCategory::from_label(" Needs-Attention "), Some(IssueCategory::NeedsAttention));
        assert_eq!(IssueCategory::from_label("Suggestion"), Some(IssueCategory::Suggestion));
        assert_eq!(IssueCategory::from_label("blocker"), None);
    }

    #[test]
    fn last_block_wins() {
        let text = "```json\n{\"issues\": []}\n```\nthen\n```json\n{\"issues\": [{\"category\": \"suggestion\", \"title\": \"T\"}]}\n```";
        assert_eq!(parse_issue_block(text).into_issues().len(), 1);
    }

    #[test]
    fn finalize_drops_out_of_range_pages_and_duplicates() {
        let issues = vec![
            Issue::new(IssueCategory::NeedsAttention, "Bad margin", "", vec![0, 3, 3, 120]),
            Issue::new(IssueCategory::NeedsAttention, "bad  margin", "dup", vec![3]),
            Issue::new(IssueCategory::Suggestion, "Bad margin", "other kind", vec![3]),
        ];
        let out = finalize_issues(issues, 100);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].pages, vec![3]);
        assert_eq!(out[0].id, "issue-1");
        assert_eq!(out[1].id, "issue-2");
        assert_eq!(out[1].category, IssueCategory::Suggestion);
        assert!(out
            .iter()
            .all(|i| i.pages.iter().all(|&p| (1..=100).contains(&p))));
    }

    #[test]
    fn rendered_block_parses_back() {
        let issues = finalize_issues(
            vec![Issue::new(IssueCategory::Suggestion, "Caption style", "Use sentence case", vec![9])],
            20,
        );
        let block = render_issue_block(&issues);
        assert!(block.starts_with("```json\n"));
        assert_eq!(parse_issue_block(&block).into_issues(), issues);
    }

    #[test]
    fn references_before_uses_true_pages() {
        let issue = Issue::new(IssueCategory::Suggestion, "t", "", vec![34, 40]);
        assert!(!issue.references_before(34));
        assert!(issue.references_before(35));
    }
}
