//! Streaming variant of the document pipeline
//!
//! Same lifecycle as [`DocumentProcessor::process`], but progress markers and explanation
//! increments are pushed to the caller as they happen. A cached explanation is re-chunked
//! so the caller sees the same event shape either way. The caller is considered gone once
//! the event receiver is dropped.

use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::monitor::ChannelProbe;
use super::{AiStage, DocumentProcessor, ProcessingError};
use crate::models::{CompletionRecord, RequestContext, UploadRequest};
use crate::services::AiError;

const EVENT_BUFFER: usize = 64;

/// Stage named in progress and terminal events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStage {
    Validating,
    Extracting,
    Classifying,
    Generating,
    Complete,
    Error,
}

/// One event of the streaming response, serialized as a bare JSON object
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Progress {
        status: StreamStage,
        progress: u8,
    },
    Chunk {
        chunk: String,
    },
    Complete {
        status: StreamStage,
        summary: String,
        is_in_scope: bool,
        cache_hit: bool,
        filename: String,
        session_id: String,
    },
    Error {
        status: StreamStage,
        message: String,
        code: &'static str,
        session_id: String,
    },
}

impl StreamEvent {
    pub fn progress(status: StreamStage, progress: u8) -> Self {
        StreamEvent::Progress { status, progress }
    }

    pub fn chunk(chunk: impl Into<String>) -> Self {
        StreamEvent::Chunk {
            chunk: chunk.into(),
        }
    }

    pub fn error(err: &ProcessingError, session_id: &str) -> Self {
        StreamEvent::Error {
            status: StreamStage::Error,
            message: err.user_message(),
            code: err.code(),
            session_id: session_id.to_string(),
        }
    }

    /// Last event of a stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }
}

/// Split `text` into pieces of at most `size` characters
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|piece| piece.iter().collect())
        .collect()
}

/// Forwards events to the caller; a vanished caller only stops forwarding
struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    async fn send(&self, event: StreamEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("Stream receiver gone, event dropped");
        }
    }
}

/// Explanation produced by the streaming step
struct StreamedExplanation {
    text: String,
    cached: bool,
}

impl DocumentProcessor {
    /// Process one upload, returning the receiving end of its event stream
    pub fn process_stream(self: &Arc<Self>, request: UploadRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let processor = Arc::clone(self);
        tokio::spawn(async move {
            processor.run_stream(request, tx).await;
        });
        rx
    }

    async fn run_stream(&self, request: UploadRequest, tx: mpsc::Sender<StreamEvent>) {
        let mut ctx = self.context(&request);
        let probe = Arc::new(ChannelProbe::new(tx.clone()));
        let (latch, monitor) = self.start(&ctx, probe.clone()).await;
        let sink = EventSink { tx };

        let outcome = self.stream_pipeline(&ctx, &request, &sink).await;
        monitor.cancel().await;

        let elapsed_ms = ctx.elapsed_ms();
        match outcome {
            Ok(record) => {
                let summary = record.explanation.clone();
                let cache_hit = record.cache_hit;
                let transition = self.delivery_transition(probe.as_ref(), record, elapsed_ms);
                self.finish(&mut ctx, transition, &latch).await;

                sink.send(StreamEvent::progress(StreamStage::Complete, 100))
                    .await;
                sink.send(StreamEvent::Complete {
                    status: StreamStage::Complete,
                    summary,
                    is_in_scope: true,
                    cache_hit,
                    filename: request.filename.clone(),
                    session_id: ctx.session_id.clone(),
                })
                .await;
            }
            Err(err) => {
                self.finish(&mut ctx, err.transition(elapsed_ms), &latch)
                    .await;
                sink.send(StreamEvent::error(&err, &ctx.session_id)).await;
            }
        }
    }

    async fn stream_pipeline(
        &self,
        ctx: &RequestContext,
        request: &UploadRequest,
        sink: &EventSink,
    ) -> Result<CompletionRecord, ProcessingError> {
        sink.send(StreamEvent::progress(StreamStage::Validating, 10))
            .await;
        let page_count = self.validate(ctx, request)?;

        sink.send(StreamEvent::progress(StreamStage::Extracting, 30))
            .await;
        let document = self.extract(ctx, request, page_count).await?;

        sink.send(StreamEvent::progress(StreamStage::Classifying, 50))
            .await;
        let (classification, classification_cached) = self
            .dispatcher
            .classify(&document.text)
            .await
            .map_err(|source| ProcessingError::UpstreamAi {
                stage: AiStage::Classification,
                source,
            })?;
        self.apply_policy(ctx, &classification).await?;

        sink.send(StreamEvent::progress(StreamStage::Generating, 70))
            .await;
        let explanation = self.stream_explanation(ctx, &document.text, sink).await?;

        Ok(CompletionRecord {
            processing_time_ms: ctx.elapsed_ms(),
            cache_hit: classification_cached && explanation.cached,
            explanation: explanation.text,
            document_type: classification.document_type,
            confidence: classification.confidence,
            text_length: document.text.chars().count(),
            page_count: document.page_count,
        })
    }

    async fn stream_explanation(
        &self,
        ctx: &RequestContext,
        text: &str,
        sink: &EventSink,
    ) -> Result<StreamedExplanation, ProcessingError> {
        let explanation_error = |source: AiError| ProcessingError::UpstreamAi {
            stage: AiStage::Explanation,
            source,
        };

        if let Some(cached) = self.dispatcher.cached_explanation(text, ctx.language) {
            debug!(session_id = %ctx.session_id, "Replaying cached explanation");
            let delay = self.pipeline.stream_chunk_delay();
            for piece in chunk_text(&cached, self.pipeline.stream_chunk_chars) {
                sink.send(StreamEvent::chunk(piece)).await;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            return Ok(StreamedExplanation {
                text: cached,
                cached: true,
            });
        }

        let mut increments = self
            .analyst
            .explain_stream(text, ctx.language)
            .await
            .map_err(explanation_error)?;

        let mut explanation = String::new();
        while let Some(increment) = increments.next().await {
            let increment = increment.map_err(explanation_error)?;
            explanation.push_str(&increment);
            sink.send(StreamEvent::chunk(increment)).await;
        }

        if explanation.trim().is_empty() {
            return Err(explanation_error(AiError::Malformed(
                "empty explanation stream".to_string(),
            )));
        }

        self.dispatcher
            .store_explanation(text, ctx.language, &explanation);
        Ok(StreamedExplanation {
            text: explanation,
            cached: false,
        })
    }
}
