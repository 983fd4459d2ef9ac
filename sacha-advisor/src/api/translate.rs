//! Explanation translation endpoint

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use sacha_common::derive_key;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::session_from_headers;
use crate::error::{ApiError, ApiResult};
use crate::models::{BehaviorEvent, Language};
use crate::pipeline::{translation_op, CachedResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub text: String,
    #[serde(default = "default_target_language")]
    pub target_language: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

fn default_target_language() -> String {
    "hi".to_string()
}

#[derive(Debug, Serialize)]
pub struct TranslationResponse {
    pub status: String,
    pub translated_text: String,
    pub language: String,
    pub cache_hit: bool,
}

/// POST /api/translate
///
/// Currently only Hindi (`hi`) is supported.
pub async fn translate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<TranslateRequest>, JsonRejection>,
) -> ApiResult<Json<TranslationResponse>> {
    let Json(request) = body.map_err(|rejection| {
        ApiError::BadRequest(format!(
            "Invalid translation request: {}",
            rejection.body_text()
        ))
    })?;
    if request.target_language.trim() != "hi" {
        return Err(ApiError::BadRequest(
            "Currently only Hindi (hi) translation is supported".to_string(),
        ));
    }
    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("Nothing to translate".to_string()));
    }

    let language = Language::Hindi;
    if let Some(session_id) = session_from_headers(&headers).or(request.session_id.clone()) {
        state
            .recorder
            .record_behavior(&session_id, BehaviorEvent::TranslationRequested);
    }

    let key = derive_key(&request.text, &translation_op(language));
    if let Some(translated) = state.cache.get(&key).and_then(CachedResult::into_translation) {
        debug!("Serving cached translation");
        return Ok(Json(TranslationResponse {
            status: "success".to_string(),
            translated_text: translated,
            language: language.code().to_string(),
            cache_hit: true,
        }));
    }

    let translated = state
        .analyst
        .translate(&request.text, language)
        .await
        .map_err(|e| {
            warn!(error = %e, "Translation failed");
            ApiError::Internal("Translation failed. Please try again.".to_string())
        })?;
    state
        .cache
        .set(key, CachedResult::Translation(translated.clone()));

    Ok(Json(TranslationResponse {
        status: "success".to_string(),
        translated_text: translated,
        language: language.code().to_string(),
        cache_hit: false,
    }))
}

/// Build translation routes
pub fn translate_routes() -> Router<AppState> {
    Router::new().route("/api/translate", post(translate))
}
