//! CLI binary for pdf-review-orchestrator.
//!
//! `review` runs a review in-process, `serve` exposes the HTTP/SSE
//! transport, `submit` posts a document to a running server and follows its
//! event stream. All three render progress from a [`ProgressTracker`].

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use pdf_review::pipeline::input::load_pdf;
use pdf_review::prompts::load_rules_context;
use pdf_review::{
    Document, Extraction, LlmAnalysisService, OutputFormat, PdfiumProjector, ProgressEmitter,
    ProgressEvent, ProgressTracker, ReviewConfig, ReviewRequest, ReviewResult,
    SequentialReviewOrchestrator, SseDecoder, SseFrame, TrackerStatus,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Progress display driven by the tracker ───────────────────────────────────

/// Terminal progress: a tracker plus the bar it drives.
///
/// The bar starts as a spinner and switches to a counter once the stream
/// announces more than one part. Single-pass reviews keep the spinner.
struct ProgressUi {
    tracker: ProgressTracker,
    bar: Option<ProgressBar>,
}

impl ProgressUi {
    fn new(show: bool) -> Self {
        let bar = show.then(|| {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_strings(SPINNER),
            );
            bar.set_prefix("Reviewing");
            bar.set_message("waiting for the first part…");
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        Self {
            tracker: ProgressTracker::new(),
            bar,
        }
    }

    fn apply(&mut self, event: &ProgressEvent) {
        self.update(|t| t.apply(event));
    }

    fn apply_frame(&mut self, frame: &SseFrame) {
        self.update(|t| t.apply_frame(frame));
    }

    fn update(&mut self, fold: impl FnOnce(&mut ProgressTracker)) {
        let total_before = self.tracker.total_chunks;
        let processed_before = self.tracker.processed_chunks();
        let failures_before = self.tracker.failures.len();
        fold(&mut self.tracker);

        let Some(bar) = &self.bar else { return };
        let t = &self.tracker;

        if t.total_chunks != total_before && t.total_chunks > 1 {
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  \
                     [{bar:42.green/238}] {pos:>2}/{len} parts  \
                     ⏱ {elapsed_precise}  {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(SPINNER),
            );
            bar.set_length(t.total_chunks as u64);
            bar.println(format!(
                "{} {}",
                yellow("◆"),
                bold(&format!("Large document: reviewing in {} parts", t.total_chunks))
            ));
        }

        if t.processed_chunks() != processed_before {
            let pages = t.last_pages.clone().unwrap_or_default();
            if t.failures.len() != failures_before {
                let msg = t
                    .failures
                    .last()
                    .map(|f| truncate(&f.error, 80))
                    .unwrap_or_default();
                bar.println(format!(
                    "  {} Part {:>2}/{:<2}  pages {:<9} {}",
                    red("✗"),
                    t.processed_chunks(),
                    t.total_chunks,
                    pages,
                    red(&msg)
                ));
            } else {
                bar.println(format!(
                    "  {} Part {:>2}/{:<2}  pages {}",
                    green("✓"),
                    t.processed_chunks(),
                    t.total_chunks,
                    dim(&pages)
                ));
            }
            bar.set_position(t.processed_chunks() as u64);
        }
        bar.set_message(t.status_line());

        if t.is_finished() {
            bar.finish_and_clear();
        }
    }

    fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{cut}\u{2026}")
    } else {
        s.to_string()
    }
}

/// Ctrl-C abandons the part in flight; finished parts still make a review.
const CANCEL_NOTICE: &str =
    "Cancelling: the part in progress is abandoned, finished parts are kept…";

const AFTER_HELP: &str = r#"EXAMPLES:
  # Review a publication in-process
  pdf-review review report.pdf --extraction report.json --type publication

  # Print-ready factsheet, rules loaded from a directory
  pdf-review review factsheet.pdf -e factsheet.json --type factsheet \
      --format print --rules-dir ./rules

  # Full result as JSON (issues, sections, per-step summaries)
  pdf-review review report.pdf -e report.json --json > review.json

  # Run the HTTP/SSE server
  pdf-review serve --port 8080 --rules-dir ./rules

  # Submit to a running server and follow its progress
  pdf-review submit report.pdf -e report.json --server http://localhost:8080

LARGE DOCUMENTS:
  Documents above --threshold pages (default 40) are reviewed in parts of
  --pages-per-step pages (default 35) sharing --overlap pages (default 2).
  A failed part is reported and skipped; the review fails only when no
  part succeeds. Ctrl-C stops at once and keeps the parts already done.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium
  PDF_REVIEW_*            Fallback for every flag, e.g. PDF_REVIEW_THRESHOLD
"#;

/// Review PDF publications against house rules with a vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "pdf-review",
    version,
    about = "Review PDF publications against house rules with a vision LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF_REVIEW_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF_REVIEW_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Review a document in-process.
    Review {
        #[command(flatten)]
        document: DocumentArgs,
        #[command(flatten)]
        engine: EngineArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Serve `POST /api/review` over HTTP with SSE progress.
    #[cfg(feature = "server")]
    Serve {
        #[command(flatten)]
        engine: EngineArgs,

        /// Interface to bind.
        #[arg(long, env = "PDF_REVIEW_HOST", default_value = "127.0.0.1")]
        host: String,

        /// Port to bind.
        #[arg(long, env = "PDF_REVIEW_PORT", default_value_t = 8080)]
        port: u16,

        /// Largest accepted upload, in MiB.
        #[arg(long, env = "PDF_REVIEW_MAX_UPLOAD_MB", default_value_t = 256)]
        max_upload_mb: usize,
    },
    /// Submit a document to a running server and follow its progress.
    Submit {
        #[command(flatten)]
        document: DocumentArgs,
        #[command(flatten)]
        output: OutputArgs,

        /// Base URL of the review server.
        #[arg(long, env = "PDF_REVIEW_SERVER", default_value = "http://127.0.0.1:8080")]
        server: String,
    },
}

#[derive(Args, Debug)]
struct DocumentArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Structural extraction of the PDF (JSON file).
    #[arg(short, long, env = "PDF_REVIEW_EXTRACTION")]
    extraction: PathBuf,

    /// Document type: factsheet, policy-brief, issue-note, working-paper, publication.
    #[arg(long = "type", env = "PDF_REVIEW_DOCUMENT_TYPE", default_value = "publication")]
    document_type: String,

    /// Confidence of the document-type detection (0.0–1.0).
    #[arg(long, env = "PDF_REVIEW_CONFIDENCE", default_value_t = 1.0)]
    confidence: f32,

    /// Output medium: digital, print, both.
    #[arg(long = "format", env = "PDF_REVIEW_OUTPUT_FORMAT", default_value = "digital")]
    output_format: String,

    /// HTTP download timeout in seconds (URL inputs).
    #[arg(long, env = "PDF_REVIEW_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// LLM model ID (e.g. gpt-4.1-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "PDF_REVIEW_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "PDF_REVIEW_PROVIDER")]
    provider: Option<String>,

    /// Pages per review step.
    #[arg(long, env = "PDF_REVIEW_PAGES_PER_STEP", default_value_t = 35)]
    pages_per_step: usize,

    /// Pages shared between consecutive steps.
    #[arg(long, env = "PDF_REVIEW_OVERLAP", default_value_t = 2)]
    overlap: usize,

    /// Documents with more pages than this are reviewed in steps.
    #[arg(long, env = "PDF_REVIEW_THRESHOLD", default_value_t = 40)]
    threshold: usize,

    /// Per-step timeout in seconds.
    #[arg(long, env = "PDF_REVIEW_STEP_TIMEOUT", default_value_t = 60)]
    step_timeout: u64,

    /// Max LLM output tokens per step.
    #[arg(long, env = "PDF_REVIEW_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF_REVIEW_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per step on LLM failure.
    #[arg(long, env = "PDF_REVIEW_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Longest edge in pixels of each page image.
    #[arg(long, env = "PDF_REVIEW_MAX_PIXELS", default_value_t = 1600)]
    max_pixels: u32,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF_REVIEW_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Directory holding the per-type rules files (factsheet.md, brief.md, …).
    #[arg(long, env = "PDF_REVIEW_RULES_DIR")]
    rules_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Write the review to this file instead of stdout.
    #[arg(short, long, env = "PDF_REVIEW_OUTPUT")]
    output: Option<PathBuf>,

    /// Output structured JSON instead of Markdown.
    #[arg(long, env = "PDF_REVIEW_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF_REVIEW_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar is the feedback in interactive mode; library INFO
    // lines would tear it.
    let show_progress = match &cli.command {
        Command::Review { output, .. } | Command::Submit { output, .. } => {
            !cli.quiet && !output.no_progress && !output.json
        }
        #[cfg(feature = "server")]
        Command::Serve { .. } => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Review {
            document,
            engine,
            output,
        } => run_review(document, engine, output, show_progress, cli.quiet).await,
        #[cfg(feature = "server")]
        Command::Serve {
            engine,
            host,
            port,
            max_upload_mb,
        } => run_serve(engine, host, port, max_upload_mb).await,
        Command::Submit {
            document,
            output,
            server,
        } => run_submit(document, output, server, show_progress, cli.quiet).await,
    }
}

// ── review ───────────────────────────────────────────────────────────────────

async fn run_review(
    doc: DocumentArgs,
    engine: EngineArgs,
    out: OutputArgs,
    show_progress: bool,
    quiet: bool,
) -> Result<()> {
    let request = load_request(&doc).await?;
    let mut config = build_config(&engine).await?;
    if let Some(ref dir) = engine.rules_dir {
        config.rules_context = Some(
            load_rules_context(dir, &request.document_type)
                .await
                .context("Failed to load rules context")?,
        );
    }

    let service = Arc::new(
        LlmAnalysisService::from_config(&config).context("Failed to configure LLM provider")?,
    );
    let orchestrator = SequentialReviewOrchestrator::new(
        service,
        Arc::new(PdfiumProjector::new()),
        config,
    );

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", yellow(CANCEL_NOTICE));
            on_ctrl_c.cancel();
        }
    });

    let (emitter, mut rx) = ProgressEmitter::channel();
    let ui_task = tokio::spawn(async move {
        let mut ui = ProgressUi::new(show_progress);
        while let Some(event) = rx.recv().await {
            ui.apply(&event);
        }
        ui.finish();
        ui
    });

    let outcome = orchestrator.run(&request, &emitter, &cancel).await;
    drop(emitter);
    let ui = ui_task.await.context("Progress display task failed")?;
    let result = outcome.context("Review failed")?;

    if out.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
        write_output(out.output.as_deref(), &json)?;
    } else {
        write_output(out.output.as_deref(), &result.text)?;
    }
    if !quiet {
        print_summary(&result, &ui.tracker);
    }
    Ok(())
}

fn print_summary(result: &ReviewResult, tracker: &ProgressTracker) {
    let mark = if result.failed_steps == 0 && !result.cancelled {
        green("✔")
    } else {
        yellow("⚠")
    };
    eprintln!(
        "{} {} issue(s)  {}/{} part(s) reviewed",
        mark,
        bold(&result.issues.len().to_string()),
        result.completed_steps,
        result.total_steps
    );
    for failure in &tracker.failures {
        eprintln!(
            "   {} part {} (pages {}): {}",
            red("✗"),
            failure.chunk,
            failure.pages,
            dim(&truncate(&failure.error, 100))
        );
    }
    let (input, output) = result
        .steps
        .iter()
        .fold((0, 0), |(i, o), s| (i + s.input_tokens, o + s.output_tokens));
    eprintln!(
        "   {} tokens in  /  {} tokens out",
        dim(&input.to_string()),
        dim(&output.to_string())
    );
}

// ── serve ────────────────────────────────────────────────────────────────────

#[cfg(feature = "server")]
async fn run_serve(engine: EngineArgs, host: String, port: u16, max_upload_mb: usize) -> Result<()> {
    use pdf_review::server::{serve, AppState};

    let config = build_config(&engine).await?;
    if engine.rules_dir.is_none() {
        tracing::warn!("No --rules-dir given; reviews run without house rules");
    }
    let service = Arc::new(
        LlmAnalysisService::from_config(&config).context("Failed to configure LLM provider")?,
    );
    let state = AppState::new(
        service,
        Arc::new(PdfiumProjector::new()),
        config,
        engine.rules_dir.clone(),
    );
    let addr = format!("{host}:{port}");
    serve(&addr, state, max_upload_mb.saturating_mul(1024 * 1024))
        .await
        .with_context(|| format!("Server on {addr} failed"))
}

// ── submit ───────────────────────────────────────────────────────────────────

async fn run_submit(
    doc: DocumentArgs,
    out: OutputArgs,
    server: String,
    show_progress: bool,
    quiet: bool,
) -> Result<()> {
    let pdf = load_pdf(&doc.input, doc.download_timeout)
        .await
        .context("Failed to load PDF")?;
    let extraction = read_extraction(&doc.extraction).await?;
    let filename = Path::new(&doc.input)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());

    let form = reqwest::multipart::Form::new()
        .part(
            "file",
            reqwest::multipart::Part::bytes(pdf)
                .file_name(filename)
                .mime_str("application/pdf")?,
        )
        .part(
            "extraction",
            reqwest::multipart::Part::text(extraction).mime_str("application/json")?,
        )
        .text("document_type", doc.document_type.clone())
        .text("confidence", doc.confidence.to_string())
        .text("output_format", doc.output_format.clone());

    let url = format!("{}/api/review", server.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&url)
        .multipart(form)
        .send()
        .await
        .with_context(|| format!("Failed to reach {url}"))?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("Server rejected the review ({status}): {body}");
    }

    let mut ui = ProgressUi::new(show_progress);
    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.context("Event stream interrupted")?;
        for frame in decoder.push(&chunk) {
            ui.apply_frame(&frame);
        }
        if ui.tracker.is_finished() {
            break;
        }
    }
    ui.finish();

    let tracker = ui.tracker;
    match &tracker.status {
        TrackerStatus::Failed(message) => bail!("Review failed: {message}"),
        TrackerStatus::Running => bail!("Server closed the stream before the review finished"),
        TrackerStatus::Complete => {}
    }

    if out.json {
        let failures: Vec<_> = tracker
            .failures
            .iter()
            .map(|f| serde_json::json!({ "chunk": f.chunk, "pages": f.pages, "error": f.error }))
            .collect();
        let json = serde_json::json!({
            "text": tracker.text,
            "total_chunks": tracker.total_chunks,
            "completed_chunks": tracker.completed_chunks,
            "failed_chunks": tracker.failed_chunks,
            "failures": failures,
        });
        let json = serde_json::to_string_pretty(&json).context("Failed to serialise result")?;
        write_output(out.output.as_deref(), &json)?;
    } else {
        write_output(out.output.as_deref(), &tracker.text)?;
    }
    if !quiet {
        eprintln!("{} {}", green("✔"), tracker.status_line());
    }
    Ok(())
}

// ── shared helpers ───────────────────────────────────────────────────────────

async fn read_extraction(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read extraction from {:?}", path))
}

async fn load_request(doc: &DocumentArgs) -> Result<ReviewRequest> {
    let bytes = load_pdf(&doc.input, doc.download_timeout)
        .await
        .context("Failed to load PDF")?;
    let extraction = Extraction::from_json(&read_extraction(&doc.extraction).await?)
        .context("Invalid extraction")?;
    let document = Document::new(bytes, extraction).context("Invalid document")?;
    if !(0.0..=1.0).contains(&doc.confidence) {
        bail!("--confidence must be within 0.0–1.0 (got {})", doc.confidence);
    }
    Ok(ReviewRequest::new(
        document,
        doc.document_type.clone(),
        doc.confidence,
        OutputFormat::from_hint(&doc.output_format),
    ))
}

/// Map CLI args to `ReviewConfig`.
async fn build_config(engine: &EngineArgs) -> Result<ReviewConfig> {
    let mut builder = ReviewConfig::builder()
        .pages_per_step(engine.pages_per_step)
        .overlap(engine.overlap)
        .threshold(engine.threshold)
        .step_timeout_secs(engine.step_timeout)
        .max_tokens(engine.max_tokens)
        .temperature(engine.temperature)
        .max_retries(engine.max_retries)
        .max_rendered_pixels(engine.max_pixels);

    if let Some(ref model) = engine.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = engine.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref path) = engine.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}

fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(text.as_bytes())
                .context("Failed to write to stdout")?;
            if !text.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_notice_matches_in_flight_abandon() {
        assert!(CANCEL_NOTICE.contains("abandoned"));
        assert!(!CANCEL_NOTICE.contains("after the current part"));
    }
}
