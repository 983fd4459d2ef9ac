//! Streaming upload endpoint (Server-Sent Events)

use axum::{
    extract::{Multipart, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::upload::read_upload;
use crate::error::ApiResult;
use crate::AppState;

/// POST /api/upload/stream
///
/// Same pipeline as `/api/upload`. Each SSE `data:` line is one JSON event:
/// - `{"status": "validating" | "extracting" | "classifying" | "generating" | "complete", "progress": N}`
/// - `{"chunk": "..."}` explanation increments
/// - `{"status": "complete", "summary": ..., ...}` or `{"status": "error", "message": ..., "code": ...}` last
///
/// Closing the connection drops the event receiver, which the pipeline treats as a
/// disconnect.
pub async fn upload_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let request = read_upload(&headers, multipart).await?;
    info!(
        session_id = request.session_id.as_deref().unwrap_or_default(),
        filename = %request.filename,
        size_bytes = request.bytes.len(),
        "Streaming document upload"
    );

    let mut events = state.processor.process_stream(request);

    let stream = async_stream::stream! {
        while let Some(event) = events.recv().await {
            let terminal = event.is_terminal();
            match serde_json::to_string(&event) {
                Ok(json) => yield Ok(Event::default().data(json)),
                Err(e) => warn!("SSE: Failed to serialize stream event: {}", e),
            }
            if terminal {
                debug!("SSE: Document stream finished");
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}
