//! sacha-advisor library - financial document explanation microservice
//!
//! Accepts an uploaded document, extracts its text, classifies and explains it through
//! an AI service, and records every request's lifecycle, tolerating callers that
//! disconnect mid-request.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::AdvisorConfig;
use crate::pipeline::{AnalysisCache, DocumentProcessor, LifecycleRecorder};
use crate::services::{DocumentAnalyst, TextExtractor};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub processor: Arc<DocumentProcessor>,
    /// AI result cache, shared by all requests
    pub cache: Arc<AnalysisCache>,
    pub analyst: Arc<dyn DocumentAnalyst>,
    pub recorder: LifecycleRecorder,
    pub config: Arc<AdvisorConfig>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire the pipeline from its collaborators
    pub fn new(
        db: SqlitePool,
        analyst: Arc<dyn DocumentAnalyst>,
        extractor: Arc<dyn TextExtractor>,
        config: AdvisorConfig,
    ) -> Self {
        let cache = Arc::new(AnalysisCache::new(
            config.cache.enabled,
            config.cache.max_size,
            config.cache.ttl_seconds,
        ));
        let recorder = LifecycleRecorder::new(db.clone());
        let processor = Arc::new(DocumentProcessor::new(
            cache.clone(),
            analyst.clone(),
            extractor,
            recorder.clone(),
            &config,
        ));

        Self {
            db,
            processor,
            cache,
            analyst,
            recorder,
            config: Arc::new(config),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.server.max_upload_mb * 1024 * 1024;

    Router::new()
        .merge(api::health_routes())
        .merge(api::upload_routes())
        .merge(api::analytics_routes())
        .merge(api::translate_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
