//! Streaming review API: progress events as they happen.
//!
//! [`review_stream`] runs the orchestrator on a background task and hands
//! back the receiving end of its event channel as a `Stream`. The HTTP
//! server maps it onto SSE frames; the CLI folds it into a progress bar.
//!
//! Dropping the stream cancels the review. A client that disconnects
//! mid-review therefore stops the remaining steps instead of paying for
//! model calls nobody will read.

use crate::orchestrator::SequentialReviewOrchestrator;
use crate::progress::{ProgressEmitter, ProgressEvent};
use crate::request::ReviewRequest;
use futures::stream::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A boxed stream of progress events, ending after the terminal event.
pub type ReviewEventStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// Start a review in the background and stream its events.
///
/// `cancel` may be triggered by the caller at any time; it is also
/// triggered when the returned stream is dropped.
pub fn review_stream(
    orchestrator: Arc<SequentialReviewOrchestrator>,
    request: ReviewRequest,
    cancel: CancellationToken,
) -> ReviewEventStream {
    let (emitter, rx) = ProgressEmitter::channel();
    let guard = cancel.clone().drop_guard();

    tokio::spawn(async move {
        // The outcome reaches the consumer through the emitter.
        if let Err(e) = orchestrator.run(&request, &emitter, &cancel).await {
            debug!("Streamed review ended with error: {}", e);
        }
    });

    let events = UnboundedReceiverStream::new(rx).map(move |event| {
        let _cancel_on_drop = &guard;
        event
    });
    Box::pin(events)
}

/// Render a review's events as SSE frames.
pub fn sse_frames(events: ReviewEventStream) -> Pin<Box<dyn Stream<Item = String> + Send>> {
    Box::pin(events.map(|event| event.to_sse_frame()))
}
