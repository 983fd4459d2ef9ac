//! Document upload endpoint
//!
//! The pipeline runs in its own task. The handler holds a [`ConnectionGuard`] while it
//! waits; if the client disconnects, axum drops the handler future, the guard records the
//! disconnect and the pipeline's monitor picks it up.

use axum::{
    extract::{Multipart, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::session_from_headers;
use crate::error::{ApiError, ApiResult};
use crate::models::{Language, ProcessedDocument, Transition, UploadRequest};
use crate::pipeline::{ConnectionGuard, ProcessingError};
use crate::AppState;

/// Read `file`, `session_id` and `language` fields of a multipart upload
///
/// The `X-Session-ID` header wins over the form field; a token is generated when neither
/// is present.
pub async fn read_upload(headers: &HeaderMap, mut multipart: Multipart) -> ApiResult<UploadRequest> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut form_session: Option<String> = None;
    let mut language = Language::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {}", e)))?;
                file = Some((filename, bytes.to_vec()));
            }
            "session_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid session_id: {}", e)))?;
                if !value.trim().is_empty() {
                    form_session = Some(value.trim().to_string());
                }
            }
            "language" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid language: {}", e)))?;
                language = value.parse().map_err(ApiError::BadRequest)?;
            }
            _ => {}
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| ApiError::BadRequest("Missing 'file' field".to_string()))?;
    let session_id = session_from_headers(headers)
        .or(form_session)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Ok(UploadRequest {
        session_id: Some(session_id),
        filename,
        bytes,
        language,
    })
}

/// POST /api/upload
///
/// Validates, extracts, classifies and explains one document.
pub async fn upload_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<Json<ProcessedDocument>> {
    let request = read_upload(&headers, multipart).await?;
    let session_id = request.session_id.clone().unwrap_or_default();
    info!(
        session_id = %session_id,
        filename = %request.filename,
        size_bytes = request.bytes.len(),
        language = %request.language,
        "Document uploaded"
    );

    let (guard, probe) = ConnectionGuard::new();
    let processor = state.processor.clone();
    let task = tokio::spawn(async move { processor.process(request, Arc::new(probe)).await });

    let result = match task.await {
        Ok(result) => result,
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Processing task failed");
            let reason = e.to_string();
            state
                .recorder
                .transition(
                    &session_id,
                    &Transition::Unexpected {
                        reason: reason.clone(),
                        processing_time_ms: 0,
                    },
                    None,
                )
                .await;
            Err(ProcessingError::System(reason))
        }
    };
    guard.disarm();

    Ok(Json(result?))
}

/// Build upload routes
pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/api/upload", post(upload_document))
        .route("/api/upload/stream", post(super::upload_stream))
}
