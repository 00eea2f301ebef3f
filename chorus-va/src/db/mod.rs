//! Database access for chorus-va
//!
//! SQLite via sqlx. Timestamps are stored as RFC 3339 text, ids as UUID
//! text, nested values (sections, scores, tips) as JSON text.

pub mod attempts;
pub mod references;

use chorus_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Open (creating if needed) the database and ensure the schema exists
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!("Connecting to database: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(250));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create chorus-va tables and indexes if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reference_feature_sets (
            reference_id TEXT PRIMARY KEY,
            song_id TEXT NOT NULL,
            voice_part TEXT NOT NULL,
            status TEXT NOT NULL,
            source_track_ref TEXT NOT NULL,
            needs_isolation INTEGER NOT NULL DEFAULT 1,
            isolated_audio_ref TEXT,
            features_ref TEXT,
            source_duration_ms INTEGER,
            isolation_model_id TEXT,
            isolation_degraded INTEGER NOT NULL DEFAULT 0,
            sections TEXT,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one live (non-FAILED) reference per song and voice part
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_reference_active
        ON reference_feature_sets (song_id, voice_part)
        WHERE status != 'FAILED'
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_attempts (
            attempt_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            song_id TEXT NOT NULL,
            voice_part TEXT NOT NULL,
            recording_ref TEXT NOT NULL,
            status TEXT NOT NULL,
            reference_id TEXT,
            sections_override TEXT,
            pitch_score REAL,
            timing_score REAL,
            dynamics_score REAL,
            overall_score REAL,
            section_scores TEXT,
            tips TEXT,
            error_message TEXT,
            error_kind TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_attempts_user
        ON analysis_attempts (user_id, created_at)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_attempts_status
        ON analysis_attempts (status)
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (reference_feature_sets, analysis_attempts)");

    Ok(())
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid {} '{}': {}", column, value, e)))
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_optional_timestamp(value: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(&v, column)).transpose()
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T, column: &str) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", column, e)))
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(value: Option<String>, column: &str) -> Result<Option<T>> {
    value
        .map(|v| {
            serde_json::from_str(&v)
                .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", column, e)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_creates_schema_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("db").join("chorus.db")).await.unwrap();
        init_tables(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert!(tables.contains(&"analysis_attempts".to_string()));
        assert!(tables.contains(&"reference_feature_sets".to_string()));
    }

    #[test]
    fn test_timestamp_roundtrip_keeps_utc() {
        let now = Utc::now();
        let parsed = parse_timestamp(&now.to_rfc3339(), "created_at").unwrap();
        assert_eq!(parsed, now);
    }
}
