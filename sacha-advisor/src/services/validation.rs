//! Upload validation: extension allow-list, size and PDF page limits

use thiserror::Error;

use crate::config::UploadConfig;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Why an upload was refused; messages are shown to the user as-is
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("File type {extension} not supported. Please upload PDF, DOCX or TXT files.")]
    UnsupportedType { extension: String },

    #[error("The uploaded file is empty.")]
    Empty,

    #[error("File size ({size_mb:.2} MB) exceeds the maximum allowed size of {max_mb} MB.")]
    TooLarge { size_mb: f64, max_mb: u64 },

    #[error("PDF has {pages} pages, which exceeds the maximum allowed limit of {max_pages} pages.")]
    TooManyPages { pages: usize, max_pages: usize },

    #[error("Error reading PDF file: {0}")]
    UnreadablePdf(String),
}

/// Checks uploads against the configured limits
#[derive(Debug, Clone)]
pub struct FileValidator {
    allowed_extensions: Vec<String>,
    max_file_size_mb: u64,
    max_pages: usize,
}

impl FileValidator {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
            max_file_size_mb: config.max_file_size_mb,
            max_pages: config.max_pages,
        }
    }

    /// Validate `bytes` with extension `file_type` (".pdf"); returns the page count
    ///
    /// Non-PDF documents count as one page.
    pub fn validate(&self, bytes: &[u8], file_type: &str) -> Result<usize, ValidationError> {
        if !self.allowed_extensions.iter().any(|ext| ext == file_type) {
            return Err(ValidationError::UnsupportedType {
                extension: if file_type.is_empty() {
                    "(none)".to_string()
                } else {
                    file_type.to_string()
                },
            });
        }

        if bytes.is_empty() {
            return Err(ValidationError::Empty);
        }

        let size_mb = bytes.len() as f64 / BYTES_PER_MB;
        if size_mb > self.max_file_size_mb as f64 {
            return Err(ValidationError::TooLarge {
                size_mb,
                max_mb: self.max_file_size_mb,
            });
        }

        if file_type != ".pdf" {
            return Ok(1);
        }

        let pages = pdf_page_count(bytes)?;
        if pages > self.max_pages {
            return Err(ValidationError::TooManyPages {
                pages,
                max_pages: self.max_pages,
            });
        }
        Ok(pages)
    }
}

fn pdf_page_count(bytes: &[u8]) -> Result<usize, ValidationError> {
    let document = lopdf::Document::load_mem(bytes)
        .map_err(|e| ValidationError::UnreadablePdf(e.to_string()))?;
    Ok(document.get_pages().len())
}
