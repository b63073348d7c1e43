//! HTTP/SSE transport.
//!
//! ```text
//! POST /api/review   multipart: file, extraction, document_type, confidence, output_format
//!                    → text/event-stream of review_start / chunk_progress / text / complete | error
//! GET  /api/health   → {"status":"ok"}
//! ```
//!
//! Request validation (missing parts, bad PDF, malformed extraction, unknown
//! rules file) fails with a JSON 400/500 before the stream opens. Once the
//! stream is open every outcome is reported as an event. A client that
//! disconnects drops the stream, which cancels the review.

use crate::config::{OutputFormat, ReviewConfig};
use crate::document::{Document, Extraction};
use crate::error::ReviewError;
use crate::orchestrator::SequentialReviewOrchestrator;
use crate::pipeline::project::PageProjector;
use crate::prompts;
use crate::request::ReviewRequest;
use crate::service::AnalysisService;
use crate::stream::review_stream;
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Default upload cap: large print PDFs routinely exceed 100 MB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Request errors raised before the event stream opens.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Missing multipart field: {0}")]
    MissingField(&'static str),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Review(#[from] ReviewError),
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    code: String,
}

impl ServerError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ServerError::MissingField(_) => (StatusCode::BAD_REQUEST, "MISSING_FIELD"),
            ServerError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ServerError::Review(e) => match e {
                ReviewError::EmptyDocument | ReviewError::NotAPdf { .. } => {
                    (StatusCode::BAD_REQUEST, "INVALID_PDF")
                }
                ReviewError::NoPages => (StatusCode::BAD_REQUEST, "NO_PAGES"),
                ReviewError::InvalidExtraction(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_EXTRACTION")
                }
                ReviewError::RulesContextNotFound { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "RULES_NOT_FOUND")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Collaborators and defaults shared by every request.
#[derive(Clone)]
pub struct AppState {
    service: Arc<dyn AnalysisService>,
    projector: Arc<dyn PageProjector>,
    config: ReviewConfig,
    rules_dir: Option<PathBuf>,
}

impl AppState {
    /// `rules_dir`, when set, is searched per request for the document type's
    /// rules file; otherwise `config.rules_context` is used as-is.
    pub fn new(
        service: Arc<dyn AnalysisService>,
        projector: Arc<dyn PageProjector>,
        config: ReviewConfig,
        rules_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            service,
            projector,
            config,
            rules_dir,
        }
    }

    async fn orchestrator_for(
        &self,
        document_type: &str,
    ) -> Result<Arc<SequentialReviewOrchestrator>, ServerError> {
        let mut config = self.config.clone();
        if let Some(ref dir) = self.rules_dir {
            config.rules_context = Some(prompts::load_rules_context(dir, document_type).await?);
        }
        Ok(Arc::new(SequentialReviewOrchestrator::new(
            Arc::clone(&self.service),
            Arc::clone(&self.projector),
            config,
        )))
    }
}

/// The decoded parts of a `POST /api/review` form.
#[derive(Debug, Default)]
pub struct ReviewForm {
    pub file: Option<Vec<u8>>,
    pub extraction: Option<String>,
    pub document_type: Option<String>,
    pub confidence: Option<String>,
    pub output_format: Option<String>,
}

impl ReviewForm {
    async fn from_multipart(mut multipart: Multipart) -> Result<Self, ServerError> {
        let mut form = ReviewForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let bad = |e: axum::extract::multipart::MultipartError| {
                ServerError::InvalidRequest(format!("field '{name}': {e}"))
            };
            match name.as_str() {
                "file" => form.file = Some(field.bytes().await.map_err(bad)?.to_vec()),
                "extraction" => form.extraction = Some(field.text().await.map_err(bad)?),
                "document_type" => form.document_type = Some(field.text().await.map_err(bad)?),
                "confidence" => form.confidence = Some(field.text().await.map_err(bad)?),
                "output_format" => form.output_format = Some(field.text().await.map_err(bad)?),
                other => warn!("Ignoring unknown multipart field '{}'", other),
            }
        }
        Ok(form)
    }

    /// Validate the form into a review request.
    ///
    /// `file` and `extraction` are required. A missing document type falls
    /// back to `publication`, a missing confidence to 0, and a missing or
    /// unknown output format to digital.
    pub fn into_request(self) -> Result<ReviewRequest, ServerError> {
        let bytes = self.file.ok_or(ServerError::MissingField("file"))?;
        let extraction_json = self
            .extraction
            .ok_or(ServerError::MissingField("extraction"))?;
        let extraction = Extraction::from_json(&extraction_json)?;
        let document = Document::new(bytes, extraction)?;

        let confidence = match self.confidence.as_deref().map(str::trim) {
            None | Some("") => 0.0,
            Some(raw) => raw
                .parse::<f32>()
                .ok()
                .filter(|c| (0.0..=1.0).contains(c))
                .ok_or_else(|| {
                    ServerError::InvalidRequest(format!(
                        "confidence must be a number in [0, 1], got '{raw}'"
                    ))
                })?,
        };
        let document_type = self
            .document_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "publication".to_string());
        let output_format = self
            .output_format
            .as_deref()
            .map(OutputFormat::from_hint)
            .unwrap_or_default();

        Ok(ReviewRequest::new(
            document,
            document_type,
            confidence,
            output_format,
        ))
    }
}

/// Build the application router.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/review", post(handle_review))
        .route("/api/health", get(handle_health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .with_state(state)
}

/// Bind `addr` and serve until the process exits.
pub async fn serve(addr: &str, state: AppState, max_upload_bytes: usize) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Review server listening on {}", addr);
    axum::serve(listener, router(state, max_upload_bytes)).await
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_review(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let request = ReviewForm::from_multipart(multipart).await?.into_request()?;
    info!(
        "Review requested: '{}', {} pages, type={}",
        request.document.filename(),
        request.document.page_count(),
        request.document_type
    );
    let orchestrator = state.orchestrator_for(&request.document_type).await?;

    let events = review_stream(orchestrator, request, CancellationToken::new()).map(|event| {
        Ok::<_, Infallible>(Event::default().event(event.name()).data(event.payload()))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::fixtures;

    fn form(page_count: usize) -> ReviewForm {
        ReviewForm {
            file: Some(b"%PDF-1.7 test".to_vec()),
            extraction: Some(serde_json::to_string(&fixtures::extraction(page_count)).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn form_defaults() {
        let req = form(12).into_request().unwrap();
        assert_eq!(req.document_type, "publication");
        assert_eq!(req.confidence, 0.0);
        assert_eq!(req.output_format, OutputFormat::Digital);
        assert_eq!(req.document.page_count(), 12);
    }

    #[test]
    fn form_reads_all_fields() {
        let mut f = form(105);
        f.document_type = Some(" policy-brief ".into());
        f.confidence = Some("0.82".into());
        f.output_format = Some("print".into());
        let req = f.into_request().unwrap();
        assert_eq!(req.document_type, "policy-brief");
        assert!((req.confidence - 0.82).abs() < f32::EPSILON);
        assert_eq!(req.output_format, OutputFormat::Print);
    }

    #[test]
    fn form_rejections_map_to_400() {
        let missing = ReviewForm::default().into_request().unwrap_err();
        assert!(matches!(missing, ServerError::MissingField("file")));
        assert_eq!(missing.status_and_code().0, StatusCode::BAD_REQUEST);

        let mut not_pdf = form(3);
        not_pdf.file = Some(b"GIF89a".to_vec());
        let err = not_pdf.into_request().unwrap_err();
        assert_eq!(err.status_and_code(), (StatusCode::BAD_REQUEST, "INVALID_PDF"));

        let mut bad_conf = form(3);
        bad_conf.confidence = Some("1.7".into());
        assert!(matches!(
            bad_conf.into_request().unwrap_err(),
            ServerError::InvalidRequest(_)
        ));

        let mut bad_json = form(3);
        bad_json.extraction = Some("{not json".into());
        assert_eq!(
            bad_json.into_request().unwrap_err().status_and_code().1,
            "INVALID_EXTRACTION"
        );
    }

    #[test]
    fn error_body_shape() {
        let resp = ServerError::MissingField("extraction").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
