//! Document processing pipeline
//!
//! - [`dispatch`]: cache-aware concurrent classification and explanation
//! - [`monitor`]: disconnect detection racing the main path
//! - [`recorder`]: lifecycle persistence, awaited status writes and background side records
//! - [`processor`]: the buffered request lifecycle
//! - [`streaming`]: the incremental variant of the same lifecycle

pub mod dispatch;
pub mod monitor;
pub mod processor;
pub mod recorder;
pub mod streaming;

pub use dispatch::{DispatchError, DualDispatch, DualDispatcher, Subtask};
pub use monitor::{
    ChannelProbe, ConnectionGuard, ConnectionProbe, DisconnectMonitor, GuardProbe, Liveness,
    MonitorOutcome, ProbeError, TerminalLatch,
};
pub use processor::DocumentProcessor;
pub use recorder::LifecycleRecorder;
pub use streaming::{chunk_text, StreamEvent, StreamStage};

use axum::http::StatusCode;
use sacha_common::TtlCache;
use thiserror::Error;

use crate::models::{Classification, Language, StopStep, Transition};
use crate::services::AiError;

/// Cache operation tag for classifications
pub const CLASSIFICATION_OP: &str = "classification";

/// Cache operation tag for explanations in `language`
pub fn explanation_op(language: Language) -> String {
    format!("explanation:{}", language.code())
}

/// Cache operation tag for translations into `language`
pub fn translation_op(language: Language) -> String {
    format!("translation:{}", language.code())
}

/// Value stored in the shared analysis cache
#[derive(Debug, Clone, PartialEq)]
pub enum CachedResult {
    Classification(Classification),
    Explanation(String),
    Translation(String),
}

impl CachedResult {
    pub fn into_classification(self) -> Option<Classification> {
        match self {
            CachedResult::Classification(classification) => Some(classification),
            _ => None,
        }
    }

    pub fn into_explanation(self) -> Option<String> {
        match self {
            CachedResult::Explanation(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_translation(self) -> Option<String> {
        match self {
            CachedResult::Translation(text) => Some(text),
            _ => None,
        }
    }
}

/// Process-wide cache of AI results, keyed by [`sacha_common::derive_key`]
pub type AnalysisCache = TtlCache<CachedResult>;

/// Which AI call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiStage {
    Classification,
    Explanation,
}

/// Why a document request failed; the first failure short-circuits the pipeline
#[derive(Debug, Clone, Error)]
pub enum ProcessingError {
    /// Bad extension, size or page count
    #[error("{0}")]
    Validation(String),

    /// Document unreadable; 400 when too little text, 500 when the extractor failed
    #[error("{message}")]
    Extraction { message: String, status: StatusCode },

    /// Out-of-scope document or confidence below threshold
    #[error("{message}")]
    Rejected {
        message: String,
        document_type: String,
        confidence: f64,
    },

    #[error("AI {stage:?} failed: {source}")]
    UpstreamAi { stage: AiStage, source: AiError },

    #[error("Unexpected failure: {0}")]
    System(String),
}

impl ProcessingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProcessingError::Validation(_) | ProcessingError::Rejected { .. } => {
                StatusCode::BAD_REQUEST
            }
            ProcessingError::Extraction { status, .. } => *status,
            ProcessingError::UpstreamAi { .. } | ProcessingError::System(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProcessingError::Validation(_) => "INVALID_FILE",
            ProcessingError::Extraction { .. } => "UNREADABLE_DOCUMENT",
            ProcessingError::Rejected { .. } => "REJECTED_DOCUMENT",
            ProcessingError::UpstreamAi {
                stage: AiStage::Classification,
                ..
            } => "CLASSIFICATION_FAILED",
            ProcessingError::UpstreamAi {
                stage: AiStage::Explanation,
                ..
            } => "EXPLANATION_FAILED",
            ProcessingError::System(_) => "SYSTEM_ERROR",
        }
    }

    /// Short message safe to show the caller; upstream and internal details stay in logs
    pub fn user_message(&self) -> String {
        match self {
            ProcessingError::Validation(message)
            | ProcessingError::Extraction { message, .. }
            | ProcessingError::Rejected { message, .. } => message.clone(),
            ProcessingError::UpstreamAi {
                stage: AiStage::Classification,
                ..
            } => "We couldn't classify your document right now. Please try again.".to_string(),
            ProcessingError::UpstreamAi {
                stage: AiStage::Explanation,
                ..
            } => "We couldn't generate an explanation right now. Please try again.".to_string(),
            ProcessingError::System(_) => {
                "An unexpected error occurred. Please try again.".to_string()
            }
        }
    }

    /// Lifecycle transition recording this failure
    pub fn transition(&self, processing_time_ms: u64) -> Transition {
        match self {
            ProcessingError::Validation(reason) => Transition::InvalidFile {
                reason: reason.clone(),
                processing_time_ms,
            },
            ProcessingError::Extraction { message, .. } => Transition::UnreadableDocument {
                reason: message.clone(),
                processing_time_ms,
            },
            ProcessingError::Rejected {
                message,
                document_type,
                confidence,
            } => Transition::Rejected {
                document_type: document_type.clone(),
                confidence: *confidence,
                reason: message.clone(),
                processing_time_ms,
            },
            ProcessingError::UpstreamAi { stage, source } => Transition::SystemError {
                step: match stage {
                    AiStage::Classification => StopStep::Classification,
                    AiStage::Explanation => StopStep::Processing,
                },
                reason: source.to_string(),
                processing_time_ms,
            },
            ProcessingError::System(reason) => Transition::Unexpected {
                reason: reason.clone(),
                processing_time_ms,
            },
        }
    }
}

impl From<DispatchError> for ProcessingError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Classification(source) => ProcessingError::UpstreamAi {
                stage: AiStage::Classification,
                source,
            },
            DispatchError::Explanation(source) => ProcessingError::UpstreamAi {
                stage: AiStage::Explanation,
                source,
            },
        }
    }
}
