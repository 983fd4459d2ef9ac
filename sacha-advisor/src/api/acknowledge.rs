//! Analytics endpoints: result acknowledgment and behavior events
//!
//! Both always answer 200; failures are reported in the body only.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::session_from_headers;
use crate::models::BehaviorEvent;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_true")]
    pub result_viewed: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct BehaviorRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub event: BehaviorEvent,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct AnalyticsResponse {
    pub status: &'static str,
    pub message: String,
}

impl AnalyticsResponse {
    fn success(message: &str) -> Json<Self> {
        Json(Self {
            status: "success",
            message: message.to_string(),
        })
    }

    fn error(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            status: "error",
            message: message.into(),
        })
    }
}

/// POST /api/acknowledge
///
/// The consumer rendered the result: `completed_not_viewed` → `completed`.
pub async fn acknowledge(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<AcknowledgeRequest>, JsonRejection>,
) -> Json<AnalyticsResponse> {
    let body = body.ok().map(|Json(body)| body);
    let result_viewed = body.as_ref().map_or(true, |body| body.result_viewed);
    let session_id = session_from_headers(&headers).or_else(|| {
        body.and_then(|body| body.session_id)
            .filter(|id| !id.trim().is_empty())
    });

    let Some(session_id) = session_id else {
        return AnalyticsResponse::error("No session_id provided");
    };

    if result_viewed {
        state
            .recorder
            .record_behavior(&session_id, BehaviorEvent::ResultViewed);
    }

    match state.recorder.acknowledge(&session_id).await {
        Ok(true) => AnalyticsResponse::success("Result view acknowledged"),
        Ok(false) => {
            debug!(session_id = %session_id, "Acknowledgment for session not awaiting one");
            AnalyticsResponse::error("No result awaiting acknowledgment for this session")
        }
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Acknowledgment failed");
            AnalyticsResponse::error("Acknowledgment could not be recorded")
        }
    }
}

/// POST /api/behavior
///
/// Records a consumer action (`pdf_downloaded`, `shared_result`, ...) for a session.
pub async fn record_behavior(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<BehaviorRequest>, JsonRejection>,
) -> Json<AnalyticsResponse> {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            debug!(error = %rejection, "Invalid behavior event");
            return AnalyticsResponse::error(format!("Invalid behavior event: {}", rejection.body_text()));
        }
    };

    let Some(session_id) = session_from_headers(&headers)
        .or(body.session_id)
        .filter(|id| !id.trim().is_empty())
    else {
        return AnalyticsResponse::error("No session_id provided");
    };

    state.recorder.record_behavior(&session_id, body.event);
    AnalyticsResponse::success("Event recorded")
}

/// Build analytics routes
pub fn analytics_routes() -> Router<AppState> {
    Router::new()
        .route("/api/acknowledge", post(acknowledge))
        .route("/api/behavior", post(record_behavior))
}
