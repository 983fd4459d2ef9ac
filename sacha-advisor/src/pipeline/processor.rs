//! Buffered document pipeline
//!
//! validate → extract → dispatch (classification ∥ explanation) → threshold policy,
//! with a [`DisconnectMonitor`] racing the whole path. The main path keeps running after a
//! disconnect so its AI results still reach the cache; its terminal write then loses.

use axum::http::StatusCode;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::monitor::{ConnectionProbe, DisconnectMonitor, Liveness, TerminalLatch};
use super::{AnalysisCache, DualDispatcher, LifecycleRecorder, ProcessingError};
use crate::config::{AdvisorConfig, PipelineConfig};
use crate::models::{
    Classification, CompletionRecord, ProcessedDocument, RequestContext, Transition, UploadRequest,
};
use crate::services::{extract_blocking, DocumentAnalyst, FileValidator, TextExtractor};

/// Message shown when a document yields too little text
pub const NOT_ENOUGH_TEXT_MESSAGE: &str = "Could not extract enough text from the document. \
     Please make sure the file contains readable text, not only scanned images.";

/// Validated, extracted document text
pub(crate) struct ExtractedDocument {
    pub text: String,
    pub page_count: usize,
}

/// Runs uploaded documents through the full request lifecycle
pub struct DocumentProcessor {
    pub(crate) dispatcher: DualDispatcher,
    pub(crate) analyst: Arc<dyn DocumentAnalyst>,
    extractor: Arc<dyn TextExtractor>,
    validator: FileValidator,
    pub(crate) recorder: LifecycleRecorder,
    pub(crate) pipeline: PipelineConfig,
    min_text_chars: usize,
}

impl DocumentProcessor {
    pub fn new(
        cache: Arc<AnalysisCache>,
        analyst: Arc<dyn DocumentAnalyst>,
        extractor: Arc<dyn TextExtractor>,
        recorder: LifecycleRecorder,
        config: &AdvisorConfig,
    ) -> Self {
        Self {
            dispatcher: DualDispatcher::new(cache, analyst.clone()),
            analyst,
            extractor,
            validator: FileValidator::new(&config.upload),
            recorder,
            pipeline: config.pipeline.clone(),
            min_text_chars: config.upload.min_text_chars,
        }
    }

    /// Per-request context with a generated session token when the caller sent none
    pub(crate) fn context(&self, request: &UploadRequest) -> RequestContext {
        let session_id = request
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        RequestContext::new(
            session_id,
            request.file_type(),
            request.bytes.len() as u64,
            request.language,
        )
    }

    /// Start the lifecycle: durable `processing` entry, then the disconnect monitor
    pub(crate) async fn start(
        &self,
        ctx: &RequestContext,
        probe: Arc<dyn ConnectionProbe>,
    ) -> (TerminalLatch, DisconnectMonitor) {
        self.recorder.begin(ctx).await;

        let latch = TerminalLatch::default();
        let monitor = DisconnectMonitor::spawn(
            probe,
            self.recorder.clone(),
            latch.clone(),
            ctx.session_id.clone(),
            ctx.started_at,
            ctx.file_size_bytes,
            self.pipeline.monitor_interval(),
        );
        (latch, monitor)
    }

    /// Process one upload; `probe` reports whether the caller is still waiting
    pub async fn process(
        &self,
        request: UploadRequest,
        probe: Arc<dyn ConnectionProbe>,
    ) -> Result<ProcessedDocument, ProcessingError> {
        let mut ctx = self.context(&request);
        let (latch, monitor) = self.start(&ctx, probe.clone()).await;

        let outcome = self.run(&ctx, &request).await;
        monitor.cancel().await;

        let elapsed_ms = ctx.elapsed_ms();
        let transition = match &outcome {
            Ok((_, record)) => self.delivery_transition(probe.as_ref(), record.clone(), elapsed_ms),
            Err(err) => err.transition(elapsed_ms),
        };
        self.finish(&mut ctx, transition, &latch).await;

        outcome.map(|(document, _)| document)
    }

    async fn run(
        &self,
        ctx: &RequestContext,
        request: &UploadRequest,
    ) -> Result<(ProcessedDocument, CompletionRecord), ProcessingError> {
        let document = self.validate_and_extract(ctx, request).await?;

        let dispatched = self
            .dispatcher
            .dispatch(&document.text, ctx.language)
            .await
            .map_err(|e| {
                warn!(session_id = %ctx.session_id, error = %e, "AI dispatch failed");
                ProcessingError::from(e)
            })?;

        self.apply_policy(ctx, &dispatched.classification).await?;

        let record = CompletionRecord {
            processing_time_ms: ctx.elapsed_ms(),
            explanation: dispatched.explanation.clone(),
            cache_hit: dispatched.cache_hit,
            document_type: dispatched.classification.document_type.clone(),
            confidence: dispatched.classification.confidence,
            text_length: document.text.chars().count(),
            page_count: document.page_count,
        };
        let processed = ProcessedDocument {
            status: "success".to_string(),
            is_in_scope: true,
            summary: dispatched.explanation,
            filename: Some(request.filename.clone()),
            session_id: ctx.session_id.clone(),
            cache_hit: dispatched.cache_hit,
        };

        Ok((processed, record))
    }

    pub(crate) async fn validate_and_extract(
        &self,
        ctx: &RequestContext,
        request: &UploadRequest,
    ) -> Result<ExtractedDocument, ProcessingError> {
        let page_count = self.validate(ctx, request)?;
        self.extract(ctx, request, page_count).await
    }

    pub(crate) fn validate(
        &self,
        ctx: &RequestContext,
        request: &UploadRequest,
    ) -> Result<usize, ProcessingError> {
        self.validator
            .validate(&request.bytes, &ctx.file_type)
            .map_err(|e| ProcessingError::Validation(e.to_string()))
    }

    pub(crate) async fn extract(
        &self,
        ctx: &RequestContext,
        request: &UploadRequest,
        page_count: usize,
    ) -> Result<ExtractedDocument, ProcessingError> {
        let text = extract_blocking(
            self.extractor.clone(),
            Arc::new(request.bytes.clone()),
            ctx.file_type.clone(),
        )
        .await
        .map_err(|e| ProcessingError::Extraction {
            message: e.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        })?;

        let chars = text.trim().chars().count();
        if chars < self.min_text_chars {
            debug!(session_id = %ctx.session_id, chars, "Not enough extracted text");
            return Err(ProcessingError::Extraction {
                message: NOT_ENOUGH_TEXT_MESSAGE.to_string(),
                status: StatusCode::BAD_REQUEST,
            });
        }

        Ok(ExtractedDocument { text, page_count })
    }

    /// Accept only in-scope documents classified with enough confidence
    pub(crate) async fn apply_policy(
        &self,
        ctx: &RequestContext,
        classification: &Classification,
    ) -> Result<(), ProcessingError> {
        if classification.accepts(self.pipeline.confidence_threshold) {
            return Ok(());
        }

        info!(
            session_id = %ctx.session_id,
            document_type = %classification.document_type,
            confidence = classification.confidence,
            "Document rejected"
        );
        let message = self
            .analyst
            .rejection_message(&classification.document_type, &classification.reason)
            .await;

        Err(ProcessingError::Rejected {
            message,
            document_type: classification.document_type.clone(),
            confidence: classification.confidence,
        })
    }

    /// Completion, or `abandoned` when the caller left before the result could be delivered
    pub(crate) fn delivery_transition(
        &self,
        probe: &dyn ConnectionProbe,
        record: CompletionRecord,
        elapsed_ms: u64,
    ) -> Transition {
        match probe.check() {
            Ok(Liveness::Disconnected { .. }) => Transition::Undelivered {
                processing_time_ms: elapsed_ms,
            },
            Ok(Liveness::Connected) => Transition::Completed(Box::new(record)),
            Err(e) => {
                debug!(error = %e, "Final liveness check failed, assuming delivered");
                Transition::Completed(Box::new(record))
            }
        }
    }

    /// Write the main path's terminal transition unless the monitor already did
    pub(crate) async fn finish(
        &self,
        ctx: &mut RequestContext,
        transition: Transition,
        latch: &TerminalLatch,
    ) {
        if !latch.claim() {
            debug!(
                session_id = %ctx.session_id,
                "Request already finalized by disconnect monitor"
            );
            return;
        }

        let applied = self
            .recorder
            .transition(&ctx.session_id, &transition, Some(ctx.file_size_bytes))
            .await;
        if applied {
            ctx.advance(&transition);
        }

        info!(
            session_id = %ctx.session_id,
            status = %transition.target(),
            applied,
            elapsed_ms = ctx.elapsed_ms(),
            "Request finished"
        );
    }
}
