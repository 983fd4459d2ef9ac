//! External collaborators: AI analyst, text extraction, upload validation

pub mod analyst;
pub mod extractor;
pub mod openai_client;
pub mod validation;

pub use analyst::{fallback_rejection_message, AiError, DocumentAnalyst, TextStream};
pub use extractor::{extract_blocking, DocumentTextExtractor, ExtractionError, TextExtractor};
pub use openai_client::OpenAiClient;
pub use validation::{FileValidator, ValidationError};
