//! Configuration types for a chunked document review.
//!
//! All review behaviour is controlled through [`ReviewConfig`], built via its
//! [`ReviewConfigBuilder`]. Planner parameters, per-step timeout and the
//! analysis-service knobs live in one struct so a server can share a single
//! config across requests and log it as a whole.

use crate::error::ReviewError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for a document review.
///
/// # Example
/// ```rust
/// use pdf_review::ReviewConfig;
///
/// let config = ReviewConfig::builder()
///     .pages_per_step(30)
///     .step_timeout_secs(90)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.overlap, 2);
/// ```
#[derive(Clone)]
pub struct ReviewConfig {
    /// Pages submitted to the analysis service per step. Default: 35.
    ///
    /// Each rendered page costs roughly 1 500 visual tokens plus its share of
    /// the extraction JSON; 35 pages stays well inside a 1M-token context.
    pub pages_per_step: usize,

    /// Pages shared between consecutive steps. Default: 2.
    pub overlap: usize,

    /// Documents with more pages than this are split into steps. Default: 40.
    pub threshold: usize,

    /// Timeout for one step's analysis call, retries included. Default: 60.
    pub step_timeout_secs: u64,

    /// LLM model identifier. If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per step. Default: 8192.
    ///
    /// A continuation step re-emits the whole accumulated issue list, so its
    /// answer grows with the document.
    pub max_tokens: usize,

    /// Retry attempts on a transient service failure. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Longest edge, in pixels, of each page image sent to the model. Default: 1600.
    pub max_rendered_pixels: u32,

    /// Custom system prompt. If None, built from `rules_context`.
    pub system_prompt: Option<String>,

    /// House rules for the document type, embedded in the system prompt.
    pub rules_context: Option<String>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            pages_per_step: 35,
            overlap: 2,
            threshold: 40,
            step_timeout_secs: 60,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 8192,
            max_retries: 2,
            retry_backoff_ms: 500,
            max_rendered_pixels: 1600,
            system_prompt: None,
            rules_context: None,
        }
    }
}

impl fmt::Debug for ReviewConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReviewConfig")
            .field("pages_per_step", &self.pages_per_step)
            .field("overlap", &self.overlap)
            .field("threshold", &self.threshold)
            .field("step_timeout_secs", &self.step_timeout_secs)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("rules_context", &self.rules_context.as_ref().map(|r| r.len()))
            .finish()
    }
}

impl ReviewConfig {
    /// Create a new builder for `ReviewConfig`.
    pub fn builder() -> ReviewConfigBuilder {
        ReviewConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ReviewConfig`].
#[derive(Debug)]
pub struct ReviewConfigBuilder {
    config: ReviewConfig,
}

impl ReviewConfigBuilder {
    pub fn pages_per_step(mut self, n: usize) -> Self {
        self.config.pages_per_step = n;
        self
    }

    pub fn overlap(mut self, n: usize) -> Self {
        self.config.overlap = n;
        self
    }

    pub fn threshold(mut self, n: usize) -> Self {
        self.config.threshold = n;
        self
    }

    pub fn step_timeout_secs(mut self, secs: u64) -> Self {
        self.config.step_timeout_secs = secs.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn rules_context(mut self, rules: impl Into<String>) -> Self {
        self.config.rules_context = Some(rules.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ReviewConfig, ReviewError> {
        let c = &self.config;
        if c.pages_per_step == 0 {
            return Err(ReviewError::InvalidConfig(
                "pages_per_step must be ≥ 1".into(),
            ));
        }
        if c.overlap >= c.pages_per_step {
            return Err(ReviewError::InvalidConfig(format!(
                "overlap ({}) must be smaller than pages_per_step ({})",
                c.overlap, c.pages_per_step
            )));
        }
        if c.threshold == 0 {
            return Err(ReviewError::InvalidConfig("threshold must be ≥ 1".into()));
        }
        if c.max_tokens == 0 {
            return Err(ReviewError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Intended output medium of the publication.
///
/// Drives the minimum image resolution the reviewer checks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Screen only. (default)
    #[default]
    Digital,
    /// Offset or digital print.
    Print,
    /// Published both ways.
    Both,
}

impl OutputFormat {
    /// Interpret a caller-supplied hint; anything unrecognised is `Digital`.
    pub fn from_hint(hint: &str) -> Self {
        match hint.trim().to_ascii_lowercase().as_str() {
            "print" => OutputFormat::Print,
            "both" => OutputFormat::Both,
            _ => OutputFormat::Digital,
        }
    }

    /// Minimum effective image resolution for this medium.
    pub fn min_dpi(self) -> u32 {
        match self {
            OutputFormat::Digital => 72,
            OutputFormat::Print => 300,
            OutputFormat::Both => 150,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OutputFormat::Digital => "Digital",
            OutputFormat::Print => "Print",
            OutputFormat::Both => "Print + Digital",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutputFormat::Digital => "digital",
            OutputFormat::Print => "print",
            OutputFormat::Both => "both",
        };
        f.write_str(s)
    }
}
