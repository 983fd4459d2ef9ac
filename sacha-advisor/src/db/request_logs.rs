//! Primary lifecycle record (`request_logs`)
//!
//! Every status change after the initial insert is a guarded update: it applies only while
//! the stored status still equals [`Transition::expected`].

use sacha_common::time::now;
use sacha_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use super::{retry_on_lock, MAX_LOCK_WAIT_MS};
use crate::models::{RequestContext, RequestStatus, Transition};

/// Stored view of one request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestLog {
    pub session_id: String,
    pub file_type: String,
    pub file_size_bytes: i64,
    pub language: String,
    pub page_count: Option<i64>,
    pub text_length: Option<i64>,
    pub document_type: Option<String>,
    pub confidence: Option<f64>,
    pub rejection_reason: Option<String>,
    pub validation_failure_reason: Option<String>,
    pub cache_hit: bool,
    pub processing_time_ms: Option<i64>,
    pub explanation: Option<String>,
    pub status: RequestStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// Record entry into `processing`
///
/// A session token reused by a new upload starts a fresh lifecycle for that token.
pub async fn insert_processing(pool: &SqlitePool, ctx: &RequestContext) -> Result<()> {
    let session_id = ctx.session_id.clone();
    let file_type = ctx.file_type.clone();
    let file_size_bytes = ctx.file_size_bytes as i64;
    let language = ctx.language.as_str();
    let created_at = ctx.started_at_utc.to_rfc3339();

    retry_on_lock("insert_processing", MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO request_logs (
                session_id, file_type, file_size_bytes, language, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                file_type = excluded.file_type,
                file_size_bytes = excluded.file_size_bytes,
                language = excluded.language,
                page_count = NULL,
                text_length = NULL,
                document_type = NULL,
                confidence = NULL,
                rejection_reason = NULL,
                validation_failure_reason = NULL,
                cache_hit = 0,
                processing_time_ms = NULL,
                explanation = NULL,
                status = excluded.status,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&session_id)
        .bind(&file_type)
        .bind(file_size_bytes)
        .bind(language)
        .bind(RequestStatus::Processing.as_str())
        .bind(&created_at)
        .bind(&created_at)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

/// Apply `transition` if the stored status still equals its expected status
///
/// Returns `true` when this call moved the record, `false` when another writer got there
/// first (or the session is unknown).
pub async fn apply_transition(
    pool: &SqlitePool,
    session_id: &str,
    transition: &Transition,
) -> Result<bool> {
    let target = transition.target().as_str();
    let expected = transition.expected().as_str();

    let rows = retry_on_lock("apply_transition", MAX_LOCK_WAIT_MS, || async {
        let updated_at = now().to_rfc3339();

        let query = match transition {
            Transition::InvalidFile {
                reason,
                processing_time_ms,
            } => sqlx::query(
                r#"
                UPDATE request_logs
                SET status = ?, validation_failure_reason = ?, processing_time_ms = ?, updated_at = ?
                WHERE session_id = ? AND status = ?
                "#,
            )
            .bind(target)
            .bind(reason.clone())
            .bind(*processing_time_ms as i64),

            Transition::UnreadableDocument {
                reason,
                processing_time_ms,
            }
            | Transition::SystemError {
                reason,
                processing_time_ms,
                ..
            }
            | Transition::Unexpected {
                reason,
                processing_time_ms,
            } => sqlx::query(
                r#"
                UPDATE request_logs
                SET status = ?, rejection_reason = ?, processing_time_ms = ?, updated_at = ?
                WHERE session_id = ? AND status = ?
                "#,
            )
            .bind(target)
            .bind(reason.clone())
            .bind(*processing_time_ms as i64),

            Transition::Rejected {
                document_type,
                confidence,
                reason,
                processing_time_ms,
            } => sqlx::query(
                r#"
                UPDATE request_logs
                SET status = ?, document_type = ?, confidence = ?, rejection_reason = ?,
                    processing_time_ms = ?, updated_at = ?
                WHERE session_id = ? AND status = ?
                "#,
            )
            .bind(target)
            .bind(document_type.clone())
            .bind(*confidence)
            .bind(reason.clone())
            .bind(*processing_time_ms as i64),

            Transition::AbandonedByUser { processing_time_ms }
            | Transition::Undelivered { processing_time_ms } => sqlx::query(
                r#"
                UPDATE request_logs
                SET status = ?, processing_time_ms = ?, updated_at = ?
                WHERE session_id = ? AND status = ?
                "#,
            )
            .bind(target)
            .bind(*processing_time_ms as i64),

            Transition::Completed(record) => sqlx::query(
                r#"
                UPDATE request_logs
                SET status = ?, explanation = ?, cache_hit = ?, document_type = ?, confidence = ?,
                    text_length = ?, page_count = ?, processing_time_ms = ?, updated_at = ?
                WHERE session_id = ? AND status = ?
                "#,
            )
            .bind(target)
            .bind(record.explanation.clone())
            .bind(record.cache_hit)
            .bind(record.document_type.clone())
            .bind(record.confidence)
            .bind(record.text_length as i64)
            .bind(record.page_count as i64)
            .bind(record.processing_time_ms as i64),

            Transition::Acknowledged => sqlx::query(
                r#"
                UPDATE request_logs
                SET status = ?, updated_at = ?
                WHERE session_id = ? AND status = ?
                "#,
            )
            .bind(target),
        };

        let result = query
            .bind(updated_at)
            .bind(session_id)
            .bind(expected)
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    })
    .await?;

    Ok(rows == 1)
}

/// Current stored status of a session
pub async fn load_status(pool: &SqlitePool, session_id: &str) -> Result<Option<RequestStatus>> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM request_logs WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(pool)
            .await?;

    status
        .map(|s| s.parse::<RequestStatus>().map_err(Error::Internal))
        .transpose()
}

/// Load the full record of a session
pub async fn load_request_log(pool: &SqlitePool, session_id: &str) -> Result<Option<RequestLog>> {
    let row = sqlx::query(
        r#"
        SELECT session_id, file_type, file_size_bytes, language, page_count, text_length,
               document_type, confidence, rejection_reason, validation_failure_reason,
               cache_hit, processing_time_ms, explanation, status, created_at, updated_at
        FROM request_logs
        WHERE session_id = ?
        "#,
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status: String = row.get("status");
    Ok(Some(RequestLog {
        session_id: row.get("session_id"),
        file_type: row.get("file_type"),
        file_size_bytes: row.get("file_size_bytes"),
        language: row.get("language"),
        page_count: row.get("page_count"),
        text_length: row.get("text_length"),
        document_type: row.get("document_type"),
        confidence: row.get("confidence"),
        rejection_reason: row.get("rejection_reason"),
        validation_failure_reason: row.get("validation_failure_reason"),
        cache_hit: row.get("cache_hit"),
        processing_time_ms: row.get("processing_time_ms"),
        explanation: row.get("explanation"),
        status: status.parse().map_err(Error::Internal)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }))
}
