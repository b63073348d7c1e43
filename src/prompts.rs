//! Prompt text for the analysis service.
//!
//! Every piece of wording sent to the model lives here so prompt changes are
//! reviewed in one place and unit tests can inspect them without a model.
//! Which prompt a step gets is decided by [`crate::request::StepRequestBuilder`].
//!
//! The answer format fixed by [`system_prompt`] is what
//! [`crate::pipeline::postprocess::split_sections`] and
//! [`crate::issues::parse_issue_block`] read back.

use crate::config::OutputFormat;
use crate::error::ReviewError;
use crate::planner::Chunk;
use std::path::Path;
use tracing::{debug, warn};

/// Answer layout required from every step.
pub const RESPONSE_FORMAT: &str = r#"Structure your answer exactly like this:

### Overview
Two or three sentences on the document and its overall compliance.

### Needs Attention
Bullet list of problems that must be fixed, each with its page number(s).
Write "Everything looks good!" if there are none.

### Looking Good
Bullet list of what already meets the rules.

### Suggestions
Bullet list of optional improvements.

Finish with one fenced JSON block listing every finding from the two lists above:

```json
{
  "issues": [
    {
      "id": "issue-1",
      "category": "needs_attention",
      "title": "Short title",
      "description": "What is wrong and how to fix it",
      "pages": [3, 4]
    }
  ]
}
```

`category` is either "needs_attention" or "suggestion". `pages` holds document page numbers."#;

/// System prompt: reviewer role, house rules and answer format.
pub fn system_prompt(rules_context: &str) -> String {
    format!(
        "You are a publications compliance reviewer. You check PDF documents \
against the house design and editorial rules below, using both the page images \
and the extracted document structure (fonts, images with effective DPI, margins, \
metadata).\n\n\
Be specific: every finding names the page(s) it occurs on. Do not report the \
same problem twice; group pages that share a problem into one finding.\n\n\
## House rules\n\n{}\n\n## Answer format\n\n{}",
        rules_context.trim(),
        RESPONSE_FORMAT
    )
}

/// Facts about the review that every instruction repeats.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptContext {
    pub document_type: String,
    pub confidence: f32,
    pub output_format: OutputFormat,
    pub page_count: usize,
}

fn document_header(ctx: &PromptContext) -> String {
    format!(
        "Document type: {} (detection confidence {:.0}%)\n\
Total pages: {}\n\
Output format: {} (images need at least {} DPI effective resolution)",
        ctx.document_type,
        (ctx.confidence.clamp(0.0, 1.0) * 100.0),
        ctx.page_count,
        ctx.output_format.label(),
        ctx.output_format.min_dpi()
    )
}

const DOCUMENT_WIDE_CHECKS: &str = "Document-wide checks (evaluate these once, for the whole document):\n\
- ISBN and/or DOI present and correctly formatted\n\
- Copyright notice and disclaimer present\n\
- Colophon / imprint page complete (publisher, year, job number)\n\
- Front matter in the expected order";

/// Instructions for a document reviewed in one pass.
pub fn single_pass_instructions(ctx: &PromptContext) -> String {
    format!(
        "Review this document against the house rules.\n\n{}\n\n{}\n\n\
Page numbers in your answer are the document's page numbers, starting at 1.",
        document_header(ctx),
        DOCUMENT_WIDE_CHECKS
    )
}

fn page_contract(chunk: &Chunk) -> String {
    format!(
        "You are seeing pages {first} to {last} of the document. The first image is \
page {first}. The extracted structure already uses document page numbers. Always \
report document page numbers ({first}-{last} for findings in this part), never \
positions within this part.",
        first = chunk.first_page(),
        last = chunk.last_page()
    )
}

/// Instructions for the first step of a split review.
pub fn first_step_instructions(ctx: &PromptContext, chunk: &Chunk, total_steps: usize) -> String {
    format!(
        "Review part {} of {} of this document against the house rules.\n\n{}\n\n{}\n\n{}\n\n\
Later parts will be reviewed separately and will receive your issue list, so \
list every finding for these pages in the JSON block.",
        chunk.number(),
        total_steps,
        document_header(ctx),
        page_contract(chunk),
        DOCUMENT_WIDE_CHECKS
    )
}

/// Instructions for a continuation step.
///
/// `accumulated_json` is the issue list as it stands after the previous step.
pub fn continuation_instructions(
    ctx: &PromptContext,
    chunk: &Chunk,
    total_steps: usize,
    accumulated_json: &str,
) -> String {
    format!(
        "Review part {} of {} of this document against the house rules.\n\n{}\n\n{}\n\n\
Document-wide checks (ISBN, DOI, copyright, colophon, front matter) were already \
evaluated in part 1. Do not evaluate them again.\n\n\
## Issues found in earlier parts\n\n```json\n{}\n```\n\n\
Return the complete, reconciled issue list for the document so far in your JSON \
block, not only the findings for these pages:\n\
- keep earlier issues that still apply, with their original page numbers\n\
- when a problem continues into these pages, update the existing issue's pages \
instead of adding a new one\n\
- merge issues that describe the same problem\n\
- remove an earlier issue only if these pages show it was wrong\n\
- add new issues found on pages {}-{}",
        chunk.number(),
        total_steps,
        document_header(ctx),
        page_contract(chunk),
        accumulated_json,
        chunk.first_page(),
        chunk.last_page()
    )
}

/// Rules file used for a document type.
///
/// Unknown types fall back to the general publication rules.
pub fn rules_file_for(document_type: &str) -> &'static str {
    match document_type {
        "factsheet" => "factsheet.md",
        "policy-brief" | "issue-note" => "brief.md",
        "working-paper" => "working_paper.md",
        "publication" => "publication.md",
        other => {
            warn!("Unknown document type: {}, using publication rules", other);
            "publication.md"
        }
    }
}

/// Load the rules context for a document type from `dir`.
pub async fn load_rules_context(dir: &Path, document_type: &str) -> Result<String, ReviewError> {
    let path = dir.join(rules_file_for(document_type));
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => {
            debug!(
                "Loaded rules context for {}: {} chars",
                document_type,
                text.len()
            );
            Ok(text)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ReviewError::RulesContextNotFound { path })
        }
        Err(e) => Err(ReviewError::Internal(format!(
            "Failed to read rules '{}': {e}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PromptContext {
        PromptContext {
            document_type: "publication".into(),
            confidence: 0.87,
            output_format: OutputFormat::Print,
            page_count: 105,
        }
    }

    fn chunk(index: usize, start: usize, end: usize) -> Chunk {
        Chunk { index, start, end }
    }

    #[test]
    fn system_prompt_embeds_rules_and_format() {
        let p = system_prompt("  Use Roboto 10pt for body text.\n");
        assert!(p.contains("Use Roboto 10pt for body text."));
        assert!(p.contains("### Needs Attention"));
        assert!(p.contains("```json"));
    }

    #[test]
    fn header_carries_min_dpi() {
        let p = single_pass_instructions(&ctx());
        assert!(p.contains("300 DPI"));
        assert!(p.contains("87%"));
        assert!(p.contains("ISBN"));
    }

    #[test]
    fn first_step_includes_document_wide_checks() {
        let p = first_step_instructions(&ctx(), &chunk(0, 0, 35), 4);
        assert!(p.contains("part 1 of 4"));
        assert!(p.contains("pages 1 to 35"));
        assert!(p.contains("Colophon"));
    }

    #[test]
    fn continuation_skips_checks_and_embeds_prior_issues() {
        let prior = r#"[{"id":"issue-1","category":"suggestion","title":"T","pages":[5]}]"#;
        let p = continuation_instructions(&ctx(), &chunk(1, 33, 68), 4, prior);
        assert!(p.contains("part 2 of 4"));
        assert!(p.contains("already evaluated"));
        assert!(!p.contains("Colophon / imprint"));
        assert!(p.contains(prior));
        assert!(p.contains("pages 34 to 68"));
        assert!(p.contains("complete, reconciled issue list"));
        assert!(p.contains("## Issues found in earlier parts"));
        assert!(!p.contains("pages 1-33"));
    }

    #[test]
    fn rules_file_mapping() {
        assert_eq!(rules_file_for("factsheet"), "factsheet.md");
        assert_eq!(rules_file_for("policy-brief"), "brief.md");
        assert_eq!(rules_file_for("issue-note"), "brief.md");
        assert_eq!(rules_file_for("working-paper"), "working_paper.md");
        assert_eq!(rules_file_for("annual-report"), "publication.md");
    }

    #[tokio::test]
    async fn load_rules_context_reads_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("brief.md"), "# Brief rules").unwrap();

        let text = load_rules_context(dir.path(), "issue-note").await.unwrap();
        assert_eq!(text, "# Brief rules");

        let err = load_rules_context(dir.path(), "factsheet").await.unwrap_err();
        assert!(matches!(err, ReviewError::RulesContextNotFound { .. }));
    }
}
