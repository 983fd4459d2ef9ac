//! Health check and cache introspection endpoints

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use sacha_common::CacheStats;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok")
    pub status: String,
    /// Module name ("sacha-advisor")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    pub cache: CacheStats,
}

#[derive(Debug, Serialize)]
pub struct WelcomeResponse {
    pub message: String,
    pub version: String,
    pub status: String,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "sacha-advisor".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        cache: state.cache.stats(),
    })
}

/// GET /api/cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

/// GET /
pub async fn root() -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        message: "Welcome to Sacha Advisor API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "running".to_string(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/cache/stats", get(cache_stats))
}
