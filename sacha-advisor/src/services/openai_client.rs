//! OpenAI chat-completions client
//!
//! Implements [`DocumentAnalyst`] over `POST {base_url}/chat/completions`.
//! Streaming explanations use the server-sent `data:` line protocol, decoded by
//! [`ChatStreamDecoder`] which tolerates lines split across network chunks.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::analyst::{fallback_rejection_message, AiError, DocumentAnalyst, TextStream};
use crate::config::OpenAiConfig;
use crate::models::{Classification, Language};

/// Characters of document text sent for classification
const CLASSIFICATION_SAMPLE_CHARS: usize = 3000;
/// Characters of document text sent for explanation
const EXPLANATION_SAMPLE_CHARS: usize = 4000;
/// Upstream error bodies are truncated to this many characters in error messages
const ERROR_BODY_CHARS: usize = 300;

const CLASSIFICATION_SYSTEM_PROMPT: &str = r#"You classify documents for a service that explains financial documents.

Accept ANY financial document: insurance (policies, claims, premium notices, schedules),
banking (loan agreements, credit cards, fixed deposits, statements), investments
(mutual funds, demat, bonds, portfolio statements), retirement (EPF, PPF, NPS, pension,
annuity), wealth and tax planning, ULIP/REIT/gold bonds, EMI schedules and BNPL plans.

Reject only non-financial documents: identity documents, CVs and offer letters without
salary or benefit terms, medical records without insurance, educational certificates,
general contracts without financial terms, tickets and bookings, plain utility bills.

If the document mentions amounts, interest, premiums, NAV, returns, EMI or principal, or
comes from a financial institution, accept it. When in doubt, accept.
Confidence: 0.8+ for clear financial documents, 0.6+ for borderline ones.

Respond in JSON:
{"is_in_scope": true/false, "confidence": 0.0-1.0, "document_type": "short label", "reason": "brief explanation"}"#;

const EXPLANATION_SYSTEM_PROMPT: &str = "You are Sacha Advisor, a friendly assistant that \
simplifies financial documents. You explain complex terms in simple language without \
providing financial or legal advice.";

/// OpenAI-backed document analyst
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(config: &OpenAiConfig, api_key: String) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AiError::NotConfigured(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(&self, body: Value) -> Result<reqwest::Response, AiError> {
        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AiError::Api(
                status.as_u16(),
                truncate_chars(&text, ERROR_BODY_CHARS).to_string(),
            ));
        }

        Ok(response)
    }

    /// Send a non-streaming request and return the first choice's message content
    async fn complete(&self, body: Value) -> Result<String, AiError> {
        let response = self.send(body).await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| AiError::Malformed(e.to_string()))?;
        message_content(&payload)
    }

    fn explanation_request(&self, text: &str, language: Language, stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": EXPLANATION_SYSTEM_PROMPT},
                {"role": "user", "content": explanation_prompt(text, language)},
            ],
            "temperature": 0.7,
            "max_tokens": 1500,
            "stream": stream,
        })
    }
}

#[async_trait]
impl DocumentAnalyst for OpenAiClient {
    async fn classify(&self, text: &str) -> Result<Classification, AiError> {
        let sample = truncate_chars(text, CLASSIFICATION_SAMPLE_CHARS);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": CLASSIFICATION_SYSTEM_PROMPT},
                {"role": "user", "content": format!("Classify this document:\n\n{}", sample)},
            ],
            "temperature": 0.3,
            "max_tokens": 200,
            "response_format": {"type": "json_object"},
        });

        let content = self.complete(body).await?;
        parse_classification(&content)
    }

    async fn explain(&self, text: &str, language: Language) -> Result<String, AiError> {
        let body = self.explanation_request(text, language, false);
        self.complete(body).await
    }

    async fn explain_stream(&self, text: &str, language: Language) -> Result<TextStream, AiError> {
        let body = self.explanation_request(text, language, true);
        let response = self.send(body).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut decoder = ChatStreamDecoder::default();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        for item in decoder.push(&chunk) {
                            match item {
                                StreamItem::Content(delta) => yield Ok(delta),
                                StreamItem::Done => return,
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(AiError::Network(e.to_string()));
                        return;
                    }
                }
            }
            for item in decoder.finish() {
                if let StreamItem::Content(delta) = item {
                    yield Ok(delta);
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn rejection_message(&self, document_type: &str, reason: &str) -> String {
        let body = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a helpful assistant explaining why Sacha Advisor can only analyze financial documents. Be friendly and concise."
                },
                {
                    "role": "user",
                    "content": format!(
                        "The user uploaded a '{}' (classifier note: {}). In 2-3 friendly sentences explain \
                         why Sacha Advisor can't analyze it: we handle financial documents such as insurance \
                         policies, loan agreements, investment and mutual fund statements, fixed deposits, EMI \
                         schedules, pension plans, bank statements and credit card documents. Suggest what \
                         they could upload instead.",
                        document_type, reason
                    )
                },
            ],
            "temperature": 0.7,
            "max_tokens": 150,
        });

        match self.complete(body).await {
            Ok(message) if !message.trim().is_empty() => message.trim().to_string(),
            Ok(_) => fallback_rejection_message(document_type),
            Err(e) => {
                warn!(error = %e, "Rejection message generation failed, using fallback");
                fallback_rejection_message(document_type)
            }
        }
    }

    async fn translate(&self, text: &str, language: Language) -> Result<String, AiError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": format!(
                        "You are a professional translator for insurance and financial documents. \
                         Translate the explanation into {}. Keep the markdown formatting, section \
                         headers, emojis and bullet points exactly as they are, and use natural \
                         financial terminology.",
                        language.display_name()
                    )
                },
                {
                    "role": "user",
                    "content": format!("Translate this explanation to {}:\n\n{}", language.display_name(), text)
                },
            ],
            "temperature": 0.3,
            "max_tokens": 2000,
        });

        self.complete(body).await
    }
}

fn explanation_prompt(text: &str, language: Language) -> String {
    let sample = truncate_chars(text, EXPLANATION_SAMPLE_CHARS);
    format!(
        "Explain the following financial document to an everyday reader.\n\
         \n\
         Rules:\n\
         - Simple, conversational language; explain jargon and use analogies where helpful\n\
         - Do NOT give financial, legal or purchase advice; do not calculate premiums\n\
         - Only explain what is written in the document\n\
         - Write the whole answer in {language}\n\
         \n\
         Structure:\n\
         **📋 Summary** (2-3 sentences)\n\
         **✅ Key Benefits** (bullets)\n\
         **❌ Exclusions** (bullets)\n\
         **⚠️ Important Things to Know** (terms, conditions, waiting periods)\n\
         **💡 Simple Analogy**\n\
         **🎯 5-Point Breakdown** (numbered 1-5)\n\
         \n\
         Document text:\n\
         \n\
         {sample}",
        language = language.display_name(),
        sample = sample,
    )
}

/// Extract `choices[0].message.content` from a chat completion
fn message_content(payload: &Value) -> Result<String, AiError> {
    payload["choices"][0]["message"]["content"]
        .as_str()
        .map(|content| content.to_string())
        .ok_or_else(|| AiError::Malformed("missing choices[0].message.content".to_string()))
}

/// Parse the classifier's JSON answer, tolerating a fenced code block around it
fn parse_classification(content: &str) -> Result<Classification, AiError> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let mut classification: Classification = serde_json::from_str(trimmed)
        .map_err(|e| AiError::Malformed(format!("classification JSON: {}", e)))?;
    classification.confidence = classification.confidence.clamp(0.0, 1.0);
    Ok(classification)
}

/// Longest prefix of `text` holding at most `max_chars` characters
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Item decoded from a streaming chat completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Content(String),
    Done,
}

/// Incremental decoder for `data:` lines of a streaming chat completion
#[derive(Debug, Default)]
pub struct ChatStreamDecoder {
    buffer: Vec<u8>,
}

impl ChatStreamDecoder {
    /// Feed one network chunk; returns the items completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamItem> {
        self.buffer.extend_from_slice(chunk);

        let mut items = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(item) = decode_line(line.trim()) {
                items.push(item);
            }
        }
        items
    }

    /// Decode whatever remains once the connection ends without a trailing newline
    pub fn finish(&mut self) -> Vec<StreamItem> {
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        decode_line(line.trim()).into_iter().collect()
    }
}

fn decode_line(line: &str) -> Option<StreamItem> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(StreamItem::Done);
    }

    match serde_json::from_str::<Value>(data) {
        Ok(event) => event["choices"][0]["delta"]["content"]
            .as_str()
            .filter(|content| !content.is_empty())
            .map(|content| StreamItem::Content(content.to_string())),
        Err(e) => {
            debug!(error = %e, "Skipping undecodable stream line");
            None
        }
    }
}
