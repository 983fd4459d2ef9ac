//! Database access for sacha-advisor
//!
//! The lifecycle sink: one `request_logs` row per session (primary status record) and one
//! `session_behavior` row per session (where the request stopped, consumer actions).

pub mod behavior;
pub mod request_logs;
pub mod retry;

use sacha_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;

pub use retry::retry_on_lock;

/// Connections kept by the pool
const POOL_SIZE: u32 = 5;
/// Per-connection SQLite busy timeout
const BUSY_TIMEOUT_MS: u64 = 2000;
/// Total time a write keeps retrying on "database is locked"
pub const MAX_LOCK_WAIT_MS: u64 = 5000;

/// Initialize database connection pool and create tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    tracing::debug!("Connecting to database: {}", db_path.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(POOL_SIZE)
        .acquire_timeout(Duration::from_millis(MAX_LOCK_WAIT_MS))
        .connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .create_if_missing(true),
        )
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create `request_logs` and `session_behavior` if they don't exist
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS request_logs (
            session_id TEXT PRIMARY KEY,
            file_type TEXT NOT NULL,
            file_size_bytes INTEGER NOT NULL,
            language TEXT NOT NULL,
            page_count INTEGER,
            text_length INTEGER,
            document_type TEXT,
            confidence REAL,
            rejection_reason TEXT,
            validation_failure_reason TEXT,
            cache_hit INTEGER NOT NULL DEFAULT 0,
            processing_time_ms INTEGER,
            explanation TEXT,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_request_logs_status ON request_logs(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_behavior (
            session_id TEXT PRIMARY KEY,
            abandoned_at_step TEXT,
            file_size_bytes INTEGER,
            result_viewed INTEGER NOT NULL DEFAULT 0,
            translation_requested INTEGER NOT NULL DEFAULT 0,
            pdf_downloaded INTEGER NOT NULL DEFAULT 0,
            shared_result INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (request_logs, session_behavior)");

    Ok(())
}
