//! AI document analysis interface
//!
//! The pipeline talks to the AI service only through [`DocumentAnalyst`], so the
//! production OpenAI client and test doubles are interchangeable.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::models::{Classification, Language};

/// Stream of explanation text increments
pub type TextStream = BoxStream<'static, Result<String, AiError>>;

/// AI service errors
#[derive(Debug, Clone, Error)]
pub enum AiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("AI service returned {0}: {1}")]
    Api(u16, String),

    #[error("Malformed AI response: {0}")]
    Malformed(String),

    #[error("AI service not configured: {0}")]
    NotConfigured(String),
}

/// Classification, explanation and translation of document text
#[async_trait]
pub trait DocumentAnalyst: Send + Sync {
    /// Decide whether `text` is an in-scope (financial) document
    async fn classify(&self, text: &str) -> Result<Classification, AiError>;

    /// Plain-language explanation of the document
    async fn explain(&self, text: &str, language: Language) -> Result<String, AiError>;

    /// Same explanation, delivered incrementally
    async fn explain_stream(&self, text: &str, language: Language) -> Result<TextStream, AiError>;

    /// Friendly message telling the user why a document was rejected
    ///
    /// Never fails: implementations fall back to [`fallback_rejection_message`].
    async fn rejection_message(&self, document_type: &str, reason: &str) -> String;

    /// Translate an explanation into `language`
    async fn translate(&self, text: &str, language: Language) -> Result<String, AiError>;
}

/// Rejection text used when the AI service cannot produce one
pub fn fallback_rejection_message(document_type: &str) -> String {
    format!(
        "This appears to be a {}, not a financial document. Sacha Advisor can analyze ALL \
         financial documents including insurance, loans, investments, mutual funds, fixed \
         deposits, EMI schedules, pension plans, bank statements, and more. Please upload any \
         financial document to get started!",
        document_type
    )
}
