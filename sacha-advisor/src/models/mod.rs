//! Data models for sacha-advisor

pub mod lifecycle;

pub use lifecycle::{
    BehaviorEvent, CompletionRecord, RequestContext, RequestStatus, StopStep, Transition,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Language the explanation is written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    Hindi,
}

impl Language {
    /// ISO 639-1 code, used in cache operation tags
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Hindi => "hi",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Hindi => "Hindi",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "english",
            Language::Hindi => "hindi",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "en" | "english" => Ok(Language::English),
            "hi" | "hindi" => Ok(Language::Hindi),
            other => Err(format!("Unsupported language: {}", other)),
        }
    }
}

/// Outcome of the AI document classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Whether the document is a financial document this service explains
    #[serde(alias = "is_insurance", alias = "is_financial")]
    pub is_in_scope: bool,
    /// Classifier confidence, 0.0 - 1.0
    pub confidence: f64,
    #[serde(default = "unknown_document_type")]
    pub document_type: String,
    #[serde(default)]
    pub reason: String,
}

fn unknown_document_type() -> String {
    "unknown document".to_string()
}

impl Classification {
    /// Accepted only when in scope AND confident enough
    pub fn accepts(&self, threshold: f64) -> bool {
        self.is_in_scope && self.confidence >= threshold
    }
}

/// Successful result of the document pipeline
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedDocument {
    pub status: String,
    pub is_in_scope: bool,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub session_id: String,
    pub cache_hit: bool,
}

/// One uploaded document plus caller metadata
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Caller-supplied session token; generated when absent
    pub session_id: Option<String>,
    pub filename: String,
    pub bytes: Vec<u8>,
    pub language: Language,
}

impl UploadRequest {
    /// Lower-case extension including the leading dot (".pdf"), empty when absent
    pub fn file_type(&self) -> String {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
            .unwrap_or_default()
    }
}
