//! HTTP API handlers for sacha-advisor

pub mod acknowledge;
pub mod health;
pub mod stream;
pub mod translate;
pub mod upload;

pub use acknowledge::analytics_routes;
pub use health::health_routes;
pub use stream::upload_stream;
pub use translate::translate_routes;
pub use upload::upload_routes;

use axum::http::HeaderMap;

/// Header carrying the caller's session token
pub const SESSION_HEADER: &str = "x-session-id";

/// Non-empty session token from the `X-Session-ID` header
pub fn session_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
