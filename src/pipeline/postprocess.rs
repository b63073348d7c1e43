//! Post-processing of the analysis service's prose answer.
//!
//! Even well-prompted models wrap their answer in ```` ```markdown ```` fences,
//! emit CRLF line endings, pad with blank lines or sprinkle zero-width
//! characters. These passes fix that without touching content, then split
//! the answer into the four review sections so multi-step answers can be
//! merged section by section.
//!
//! Rule order matters: fences are stripped before line endings are
//! normalised, and the issue block is removed first so its JSON never leaks
//! into the section text.

use crate::issues::RE_ISSUE_BLOCK;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Clean a raw answer for display, without its structured issue block.
///
/// 1. Remove the fenced issue block(s)
/// 2. Strip outer markdown fences
/// 3. Normalise line endings (CRLF → LF)
/// 4. Trim trailing whitespace per line
/// 5. Collapse 3+ consecutive blank lines down to 1
/// 6. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
pub fn clean_prose(input: &str) -> String {
    let s = strip_issue_blocks(input);
    let s = strip_markdown_fences(&s);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

// ── Rule 1: Remove the issue block ───────────────────────────────────────────

// A ```json fence that never closed or holds broken JSON is still not prose.
static RE_JSON_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```json[ \t]*\r?\n.*?(?:```|\z)").expect("json fence pattern is valid")
});

fn strip_issue_blocks(input: &str) -> String {
    let s = RE_ISSUE_BLOCK.replace_all(input, "");
    RE_JSON_FENCE.replace_all(&s, "").into_owned()
}

// ── Rule 2: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown|md)?\r?\n(.*)\r?\n```\s*$").expect("fence pattern is valid")
});

fn strip_markdown_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 3: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("blank line pattern is valid"));

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

// ── Rule 6: Remove invisible Unicode characters ──────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Sections ─────────────────────────────────────────────────────────────────

/// The four sections every answer is asked to contain, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Overview,
    NeedsAttention,
    LookingGood,
    Suggestions,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Overview,
        Section::NeedsAttention,
        Section::LookingGood,
        Section::Suggestions,
    ];

    pub fn heading(self) -> &'static str {
        match self {
            Section::Overview => "Overview",
            Section::NeedsAttention => "Needs Attention",
            Section::LookingGood => "Looking Good",
            Section::Suggestions => "Suggestions",
        }
    }

    fn from_heading(heading: &str) -> Option<Self> {
        let h = heading
            .trim()
            .trim_matches(|c: char| c == '*' || c == ':' || c.is_whitespace())
            .to_lowercase();
        match h.as_str() {
            "overview" | "summary" => Some(Section::Overview),
            "needs attention" | "needs-attention" | "issues" => Some(Section::NeedsAttention),
            "looking good" | "what looks good" | "strengths" => Some(Section::LookingGood),
            "suggestions" | "suggestion" | "recommendations" => Some(Section::Suggestions),
            _ => None,
        }
    }
}

/// Section bodies of one answer (or of the merged review).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sections {
    pub overview: String,
    pub needs_attention: String,
    pub looking_good: String,
    pub suggestions: String,
}

impl Sections {
    pub fn get(&self, section: Section) -> &str {
        match section {
            Section::Overview => &self.overview,
            Section::NeedsAttention => &self.needs_attention,
            Section::LookingGood => &self.looking_good,
            Section::Suggestions => &self.suggestions,
        }
    }

    fn get_mut(&mut self, section: Section) -> &mut String {
        match section {
            Section::Overview => &mut self.overview,
            Section::NeedsAttention => &mut self.needs_attention,
            Section::LookingGood => &mut self.looking_good,
            Section::Suggestions => &mut self.suggestions,
        }
    }

    pub fn is_empty(&self) -> bool {
        Section::ALL.iter().all(|s| self.get(*s).is_empty())
    }
}

static RE_SECTION_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#{2,4}[ \t]*(.+?)[ \t]*$").expect("heading pattern is valid"));

/// Split a cleaned answer into its sections.
///
/// Text before the first recognised heading counts as overview. A heading
/// that is not one of the four is kept, with its body, inside the section
/// it appears in.
pub fn split_sections(cleaned: &str) -> Sections {
    let mut sections = Sections::default();
    let mut current = Section::Overview;
    let mut cursor = 0;

    for caps in RE_SECTION_HEADING.captures_iter(cleaned) {
        let (Some(whole), Some(title)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let Some(next) = Section::from_heading(title.as_str()) else {
            continue;
        };
        push(&mut sections, current, &cleaned[cursor..whole.start()]);
        current = next;
        cursor = whole.end();
    }
    push(&mut sections, current, &cleaned[cursor..]);

    sections
}

fn push(sections: &mut Sections, section: Section, body: &str) {
    let body = body.trim();
    if body.is_empty() {
        return;
    }
    let slot = sections.get_mut(section);
    if !slot.is_empty() {
        slot.push_str("\n\n");
    }
    slot.push_str(body);
}

// ── Tests ────────────────────────────────────────────────────────────────────
