//! Plain-text extraction from uploaded documents

use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Main body part of a WordprocessingML package
const DOCX_BODY_PART: &str = "word/document.xml";

/// Document could not be turned into text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("Could not read PDF: {0}")]
    Pdf(String),

    #[error("Could not read Word document: {0}")]
    Docx(String),

    #[error("{0}")]
    UnsupportedFormat(String),

    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// Turns raw document bytes into plain text
///
/// Implementations are synchronous and may be CPU heavy; callers run them through
/// [`extract_blocking`].
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], file_type: &str) -> Result<String, ExtractionError>;
}

/// Extractor for the formats the service reads natively
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentTextExtractor;

impl TextExtractor for DocumentTextExtractor {
    fn extract(&self, bytes: &[u8], file_type: &str) -> Result<String, ExtractionError> {
        let text = match file_type {
            ".pdf" => pdf_extract::extract_text_from_mem(bytes)
                .map_err(|e| ExtractionError::Pdf(e.to_string()))?,
            ".txt" => String::from_utf8_lossy(bytes).into_owned(),
            ".docx" => extract_docx(bytes)?,
            ".doc" => {
                return Err(ExtractionError::UnsupportedFormat(
                    "Legacy .doc files cannot be read. Please save the document as DOCX or PDF and upload it again."
                        .to_string(),
                ))
            }
            ".jpg" | ".jpeg" | ".png" => {
                return Err(ExtractionError::UnsupportedFormat(
                    "Text cannot be read from images. Please upload a PDF of the document instead."
                        .to_string(),
                ))
            }
            other => {
                return Err(ExtractionError::UnsupportedFormat(format!(
                    "Unsupported file type: {}",
                    other
                )))
            }
        };

        let text = text.trim().to_string();
        debug!(file_type, chars = text.chars().count(), "Extracted document text");
        Ok(text)
    }
}

/// Paragraph text of a `.docx` package, one line per paragraph
fn extract_docx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractionError::Docx(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY_PART)
        .map_err(|e| ExtractionError::Docx(format!("{}: {}", DOCX_BODY_PART, e)))?
        .read_to_string(&mut xml)
        .map_err(|e| ExtractionError::Docx(e.to_string()))?;

    paragraphs_from_document_xml(&xml)
}

/// Collect `<w:t>` runs, breaking lines at paragraph ends and `<w:br/>`
fn paragraphs_from_document_xml(xml: &str) -> Result<String, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text_run = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => text.push('\t'),
                b"br" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text_run => {
                let run = t.unescape().map_err(|e| ExtractionError::Docx(e.to_string()))?;
                text.push_str(&run);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ExtractionError::Docx(format!(
                    "malformed {} at byte {}: {}",
                    DOCX_BODY_PART,
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    Ok(text)
}

/// Run `extractor` on the blocking thread pool
pub async fn extract_blocking(
    extractor: Arc<dyn TextExtractor>,
    bytes: Arc<Vec<u8>>,
    file_type: String,
) -> Result<String, ExtractionError> {
    tokio::task::spawn_blocking(move || extractor.extract(&bytes, &file_type))
        .await
        .map_err(|e| ExtractionError::Task(e.to_string()))?
}
