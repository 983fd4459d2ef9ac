//! Secondary behavioral record (`session_behavior`)
//!
//! Rows are upserted so they may be written before, after, or without the matching
//! `request_logs` row.

use sacha_common::time::now;
use sacha_common::Result;
use sqlx::{Row, SqlitePool};

use super::{retry_on_lock, MAX_LOCK_WAIT_MS};
use crate::models::{BehaviorEvent, StopStep};

/// Stored behavior flags of one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionBehavior {
    pub abandoned_at_step: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub result_viewed: bool,
    pub translation_requested: bool,
    pub pdf_downloaded: bool,
    pub shared_result: bool,
}

/// Record where a request stopped
pub async fn record_step(
    pool: &SqlitePool,
    session_id: &str,
    step: StopStep,
    file_size_bytes: Option<u64>,
) -> Result<()> {
    let file_size_bytes = file_size_bytes.map(|size| size as i64);

    retry_on_lock("record_step", MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO session_behavior (session_id, abandoned_at_step, file_size_bytes, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                abandoned_at_step = excluded.abandoned_at_step,
                file_size_bytes = COALESCE(excluded.file_size_bytes, session_behavior.file_size_bytes),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(session_id)
        .bind(step.as_str())
        .bind(file_size_bytes)
        .bind(now().to_rfc3339())
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

/// Set the flag column belonging to `event`
pub async fn record_event(pool: &SqlitePool, session_id: &str, event: BehaviorEvent) -> Result<()> {
    // Column names come only from the closed event set
    let sql = match event {
        BehaviorEvent::ResultViewed => {
            r#"
            INSERT INTO session_behavior (session_id, result_viewed, updated_at) VALUES (?, 1, ?)
            ON CONFLICT(session_id) DO UPDATE SET result_viewed = 1, updated_at = excluded.updated_at
            "#
        }
        BehaviorEvent::TranslationRequested => {
            r#"
            INSERT INTO session_behavior (session_id, translation_requested, updated_at) VALUES (?, 1, ?)
            ON CONFLICT(session_id) DO UPDATE SET translation_requested = 1, updated_at = excluded.updated_at
            "#
        }
        BehaviorEvent::PdfDownloaded => {
            r#"
            INSERT INTO session_behavior (session_id, pdf_downloaded, updated_at) VALUES (?, 1, ?)
            ON CONFLICT(session_id) DO UPDATE SET pdf_downloaded = 1, updated_at = excluded.updated_at
            "#
        }
        BehaviorEvent::SharedResult => {
            r#"
            INSERT INTO session_behavior (session_id, shared_result, updated_at) VALUES (?, 1, ?)
            ON CONFLICT(session_id) DO UPDATE SET shared_result = 1, updated_at = excluded.updated_at
            "#
        }
    };

    retry_on_lock(event.column(), MAX_LOCK_WAIT_MS, || async {
        sqlx::query(sql)
            .bind(session_id)
            .bind(now().to_rfc3339())
            .execute(pool)
            .await?;

        Ok(())
    })
    .await
}

/// Load the behavior record of a session
pub async fn load_behavior(pool: &SqlitePool, session_id: &str) -> Result<Option<SessionBehavior>> {
    let row = sqlx::query(
        r#"
        SELECT abandoned_at_step, file_size_bytes, result_viewed, translation_requested,
               pdf_downloaded, shared_result
        FROM session_behavior
        WHERE session_id = ?
        "#,
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| SessionBehavior {
        abandoned_at_step: row.get("abandoned_at_step"),
        file_size_bytes: row.get("file_size_bytes"),
        result_viewed: row.get("result_viewed"),
        translation_requested: row.get("translation_requested"),
        pdf_downloaded: row.get("pdf_downloaded"),
        shared_result: row.get("shared_result"),
    }))
}
