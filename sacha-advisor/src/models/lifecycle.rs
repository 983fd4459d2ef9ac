//! Request lifecycle state machine
//!
//! A request enters `processing` once, before any expensive work, and leaves it through
//! exactly one guarded transition:
//!
//! ```text
//! processing ─┬─> invalid_file            (validation)
//!             ├─> unreadable_document     (extraction)
//!             ├─> rejected_by_sachadvisor (classification)
//!             ├─> system_error            (classification | processing)
//!             ├─> abandoned_by_user       (client_disconnect, monitor)
//!             ├─> abandoned               (client_disconnect before delivery | unexpected_error)
//!             └─> completed_not_viewed ──> completed (acknowledgment)
//! ```
//!
//! Every transition names the status it requires; persistence applies it only while the
//! stored status still equals that value, so a late writer can never overwrite a status
//! another writer already finalized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::time::Instant;

use super::Language;

/// Durable request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Processing,
    InvalidFile,
    UnreadableDocument,
    RejectedBySachadvisor,
    SystemError,
    AbandonedByUser,
    /// Catch-all for unexpected failures and results never delivered
    Abandoned,
    CompletedNotViewed,
    Completed,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 9] = [
        RequestStatus::Processing,
        RequestStatus::InvalidFile,
        RequestStatus::UnreadableDocument,
        RequestStatus::RejectedBySachadvisor,
        RequestStatus::SystemError,
        RequestStatus::AbandonedByUser,
        RequestStatus::Abandoned,
        RequestStatus::CompletedNotViewed,
        RequestStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Processing => "processing",
            RequestStatus::InvalidFile => "invalid_file",
            RequestStatus::UnreadableDocument => "unreadable_document",
            RequestStatus::RejectedBySachadvisor => "rejected_by_sachadvisor",
            RequestStatus::SystemError => "system_error",
            RequestStatus::AbandonedByUser => "abandoned_by_user",
            RequestStatus::Abandoned => "abandoned",
            RequestStatus::CompletedNotViewed => "completed_not_viewed",
            RequestStatus::Completed => "completed",
        }
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            RequestStatus::Processing | RequestStatus::CompletedNotViewed
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown request status: {}", s))
    }
}

/// Where a request stopped, kept in the secondary behavior record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStep {
    Validation,
    Extraction,
    Classification,
    Processing,
    ClientDisconnect,
    UnexpectedError,
}

impl StopStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopStep::Validation => "validation",
            StopStep::Extraction => "extraction",
            StopStep::Classification => "classification",
            StopStep::Processing => "processing",
            StopStep::ClientDisconnect => "client_disconnect",
            StopStep::UnexpectedError => "unexpected_error",
        }
    }
}

impl fmt::Display for StopStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consumer-side behavior flags kept alongside the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorEvent {
    ResultViewed,
    TranslationRequested,
    PdfDownloaded,
    SharedResult,
}

impl BehaviorEvent {
    /// Column in `session_behavior` this event sets
    pub fn column(&self) -> &'static str {
        match self {
            BehaviorEvent::ResultViewed => "result_viewed",
            BehaviorEvent::TranslationRequested => "translation_requested",
            BehaviorEvent::PdfDownloaded => "pdf_downloaded",
            BehaviorEvent::SharedResult => "shared_result",
        }
    }
}

/// Details stored when a request completes
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRecord {
    pub processing_time_ms: u64,
    pub explanation: String,
    pub cache_hit: bool,
    pub document_type: String,
    pub confidence: f64,
    pub text_length: usize,
    pub page_count: usize,
}

/// A status change after the initial `processing` entry
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    InvalidFile {
        reason: String,
        processing_time_ms: u64,
    },
    UnreadableDocument {
        reason: String,
        processing_time_ms: u64,
    },
    Rejected {
        document_type: String,
        confidence: f64,
        reason: String,
        processing_time_ms: u64,
    },
    SystemError {
        step: StopStep,
        reason: String,
        processing_time_ms: u64,
    },
    /// Disconnect observed by the monitor while processing
    AbandonedByUser { processing_time_ms: u64 },
    /// Result produced but the caller was already gone
    Undelivered { processing_time_ms: u64 },
    Unexpected {
        reason: String,
        processing_time_ms: u64,
    },
    Completed(Box<CompletionRecord>),
    /// Consumer rendered the result
    Acknowledged,
}

impl Transition {
    /// Status this transition moves to
    pub fn target(&self) -> RequestStatus {
        match self {
            Transition::InvalidFile { .. } => RequestStatus::InvalidFile,
            Transition::UnreadableDocument { .. } => RequestStatus::UnreadableDocument,
            Transition::Rejected { .. } => RequestStatus::RejectedBySachadvisor,
            Transition::SystemError { .. } => RequestStatus::SystemError,
            Transition::AbandonedByUser { .. } => RequestStatus::AbandonedByUser,
            Transition::Undelivered { .. } | Transition::Unexpected { .. } => {
                RequestStatus::Abandoned
            }
            Transition::Completed(_) => RequestStatus::CompletedNotViewed,
            Transition::Acknowledged => RequestStatus::Completed,
        }
    }

    /// Status the stored record must still hold for this transition to apply
    pub fn expected(&self) -> RequestStatus {
        match self {
            Transition::Acknowledged => RequestStatus::CompletedNotViewed,
            _ => RequestStatus::Processing,
        }
    }

    /// Step recorded in the behavior record, if any
    pub fn step(&self) -> Option<StopStep> {
        match self {
            Transition::InvalidFile { .. } => Some(StopStep::Validation),
            Transition::UnreadableDocument { .. } => Some(StopStep::Extraction),
            Transition::Rejected { .. } => Some(StopStep::Classification),
            Transition::SystemError { step, .. } => Some(*step),
            Transition::AbandonedByUser { .. } | Transition::Undelivered { .. } => {
                Some(StopStep::ClientDisconnect)
            }
            Transition::Unexpected { .. } => Some(StopStep::UnexpectedError),
            Transition::Completed(_) | Transition::Acknowledged => None,
        }
    }

    pub fn processing_time_ms(&self) -> Option<u64> {
        match self {
            Transition::InvalidFile {
                processing_time_ms, ..
            }
            | Transition::UnreadableDocument {
                processing_time_ms, ..
            }
            | Transition::Rejected {
                processing_time_ms, ..
            }
            | Transition::SystemError {
                processing_time_ms, ..
            }
            | Transition::AbandonedByUser { processing_time_ms }
            | Transition::Undelivered { processing_time_ms }
            | Transition::Unexpected {
                processing_time_ms, ..
            } => Some(*processing_time_ms),
            Transition::Completed(record) => Some(record.processing_time_ms),
            Transition::Acknowledged => None,
        }
    }
}

/// Per-request bookkeeping owned by the task handling the request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session_id: String,
    pub started_at: Instant,
    pub started_at_utc: DateTime<Utc>,
    pub file_type: String,
    pub file_size_bytes: u64,
    pub language: Language,
    pub status: RequestStatus,
    pub processing_time_ms: Option<u64>,
    pub explanation: Option<String>,
}

impl RequestContext {
    pub fn new(
        session_id: String,
        file_type: String,
        file_size_bytes: u64,
        language: Language,
    ) -> Self {
        Self {
            session_id,
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
            file_type,
            file_size_bytes,
            language,
            status: RequestStatus::Processing,
            processing_time_ms: None,
            explanation: None,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        sacha_common::time::elapsed_millis(self.started_at)
    }

    /// Apply `transition` to the in-memory view; false if its guard does not hold
    pub fn advance(&mut self, transition: &Transition) -> bool {
        if self.status != transition.expected() {
            return false;
        }
        self.status = transition.target();
        if let Some(ms) = transition.processing_time_ms() {
            self.processing_time_ms = Some(ms);
        }
        if let Transition::Completed(record) = transition {
            self.explanation = Some(record.explanation.clone());
        }
        true
    }
}
