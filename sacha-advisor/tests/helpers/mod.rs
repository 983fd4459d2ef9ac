//! Test Helper Utilities
//!
//! Shared fixtures for sacha-advisor integration tests: temporary databases, a scripted
//! AI analyst, a scripted connection probe and multipart request builders.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use sacha_advisor::config::AdvisorConfig;
use sacha_advisor::models::{Classification, Language};
use sacha_advisor::pipeline::{ConnectionProbe, Liveness, ProbeError};
use sacha_advisor::services::{AiError, DocumentAnalyst, DocumentTextExtractor, TextStream};
use sacha_advisor::AppState;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

/// Text long enough to pass the minimum-length check
pub const POLICY_TEXT: &str = "HEALTH INSURANCE POLICY SCHEDULE. Policy number HX-2291. \
    Sum insured: Rs 5,00,000. Annual premium: Rs 12,400 payable on 1 April. \
    Waiting period for pre-existing diseases: 36 months. Room rent capped at 1% of sum insured.";

pub const RESUME_TEXT: &str = "CURRICULUM VITAE. Priya Sharma, software engineer with eight years \
    of experience in distributed systems, Rust and Go. Education: B.Tech, Computer Science.";

pub const EXPLANATION: &str = "**📋 Summary**\nThis is a health insurance policy covering \
    hospital costs up to Rs 5 lakh a year.\n\n**✅ Key Benefits**\n- Cashless hospitalisation\n";

/// Create temporary test database with tables created
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let pool = sacha_advisor::db::init_database_pool(&temp_dir.path().join("test_sacha.db"))
        .await
        .expect("Failed to initialize test database");
    (temp_dir, pool)
}

/// Defaults with a fast monitor and no artificial stream delay
pub fn test_config() -> AdvisorConfig {
    let mut config = AdvisorConfig::default();
    config.pipeline.monitor_interval_ms = 20;
    config.pipeline.stream_chunk_delay_ms = 0;
    config.pipeline.stream_chunk_chars = 16;
    config
}

/// App state over a temporary database and the given analyst
pub async fn create_test_state(analyst: Arc<ScriptedAnalyst>) -> (TempDir, AppState) {
    let (temp_dir, pool) = create_test_db().await;
    let state = AppState::new(pool, analyst, Arc::new(DocumentTextExtractor), test_config());
    (temp_dir, state)
}

/// AI analyst double with call counters, latency and failure switches
pub struct ScriptedAnalyst {
    pub classification: Classification,
    pub explanation: String,
    pub classify_delay: Duration,
    pub explain_delay: Duration,
    pub fail_classify: bool,
    pub fail_explain: bool,
    /// Streamed explanation errors after this many increments
    pub stream_fail_after: Option<usize>,
    pub classify_calls: AtomicUsize,
    pub explain_calls: AtomicUsize,
    pub stream_calls: AtomicUsize,
    pub rejection_calls: AtomicUsize,
    pub translate_calls: AtomicUsize,
}

impl Default for ScriptedAnalyst {
    fn default() -> Self {
        Self {
            classification: in_scope(0.92),
            explanation: EXPLANATION.to_string(),
            classify_delay: Duration::ZERO,
            explain_delay: Duration::ZERO,
            fail_classify: false,
            fail_explain: false,
            stream_fail_after: None,
            classify_calls: AtomicUsize::new(0),
            explain_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            rejection_calls: AtomicUsize::new(0),
            translate_calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedAnalyst {
    pub fn classifying(classification: Classification) -> Self {
        Self {
            classification,
            ..Default::default()
        }
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Explanation split into word-sized increments
    pub fn increments(&self) -> Vec<String> {
        self.explanation
            .split_inclusive(' ')
            .map(str::to_string)
            .collect()
    }
}

pub fn in_scope(confidence: f64) -> Classification {
    Classification {
        is_in_scope: true,
        confidence,
        document_type: "health insurance policy".to_string(),
        reason: "premium, sum insured and waiting periods".to_string(),
    }
}

pub fn out_of_scope(confidence: f64) -> Classification {
    Classification {
        is_in_scope: false,
        confidence,
        document_type: "resume".to_string(),
        reason: "employment history, no financial terms".to_string(),
    }
}

#[async_trait]
impl DocumentAnalyst for ScriptedAnalyst {
    async fn classify(&self, _text: &str) -> Result<Classification, AiError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.classify_delay).await;
        if self.fail_classify {
            return Err(AiError::Api(503, "classifier unavailable".to_string()));
        }
        Ok(self.classification.clone())
    }

    async fn explain(&self, _text: &str, _language: Language) -> Result<String, AiError> {
        self.explain_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.explain_delay).await;
        if self.fail_explain {
            return Err(AiError::Network("connection reset".to_string()));
        }
        Ok(self.explanation.clone())
    }

    async fn explain_stream(&self, _text: &str, _language: Language) -> Result<TextStream, AiError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_explain {
            return Err(AiError::Network("connection reset".to_string()));
        }
        let increments = self.increments();
        let delay = self.explain_delay / increments.len().max(1) as u32;
        let fail_after = self.stream_fail_after;
        let stream = async_stream::stream! {
            for (sent, increment) in increments.into_iter().enumerate() {
                if fail_after == Some(sent) {
                    yield Err(AiError::Network("stream interrupted".to_string()));
                    return;
                }
                tokio::time::sleep(delay).await;
                yield Ok::<String, AiError>(increment);
            }
        };
        Ok(Box::pin(stream))
    }

    async fn rejection_message(&self, document_type: &str, _reason: &str) -> String {
        self.rejection_calls.fetch_add(1, Ordering::SeqCst);
        format!(
            "This looks like a {}. Sacha Advisor explains financial documents such as insurance policies and loan agreements.",
            document_type
        )
    }

    async fn translate(&self, text: &str, _language: Language) -> Result<String, AiError> {
        self.translate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("[hi] {}", text))
    }
}

/// Probe that reports a disconnect from a fixed instant on
pub struct ScriptedProbe {
    disconnect_at: Option<Instant>,
}

impl ScriptedProbe {
    pub fn connected() -> Arc<Self> {
        Arc::new(Self {
            disconnect_at: None,
        })
    }

    pub fn disconnecting_after(after: Duration) -> Arc<Self> {
        Arc::new(Self {
            disconnect_at: Some(Instant::now() + after),
        })
    }
}

impl ConnectionProbe for ScriptedProbe {
    fn check(&self) -> Result<Liveness, ProbeError> {
        match self.disconnect_at {
            Some(at) if Instant::now() >= at => Ok(Liveness::Disconnected { since: at }),
            _ => Ok(Liveness::Connected),
        }
    }
}

/// Minimal `.docx` package with one paragraph per entry
pub fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
    use std::io::Write;

    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
        body
    );

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file("[Content_Types].xml", zip::write::FileOptions::default())
        .unwrap();
    writer
        .write_all(br#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#)
        .unwrap();
    writer
        .start_file("word/document.xml", zip::write::FileOptions::default())
        .unwrap();
    writer.write_all(document.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

/// Receive events until the sender side closes
pub async fn collect_events(
    mut rx: tokio::sync::mpsc::Receiver<sacha_advisor::pipeline::StreamEvent>,
) -> Vec<sacha_advisor::pipeline::StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub const BOUNDARY: &str = "sacha-test-boundary";

/// Multipart body with a `file` part plus extra text fields
pub fn multipart_body(filename: &str, content: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// POST multipart upload request to `uri`
pub fn upload_request(
    uri: &str,
    filename: &str,
    content: &[u8],
    session_id: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(session_id) = session_id {
        builder = builder.header("X-Session-ID", session_id);
    }
    builder
        .body(Body::from(multipart_body(filename, content, &[])))
        .unwrap()
}

/// POST JSON request
pub fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Wait until the stored status leaves `processing` (or give up after `timeout`)
pub async fn wait_for_terminal(
    pool: &SqlitePool,
    session_id: &str,
    timeout: Duration,
) -> Option<sacha_advisor::models::RequestStatus> {
    use sacha_advisor::models::RequestStatus;

    let deadline = Instant::now() + timeout;
    loop {
        let status = sacha_advisor::db::request_logs::load_status(pool, session_id)
            .await
            .unwrap();
        match status {
            Some(RequestStatus::Processing) | None if Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            other => return other,
        }
    }
}
