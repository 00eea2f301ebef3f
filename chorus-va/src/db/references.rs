//! Reference feature set persistence

use chorus_common::Result;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{from_json, parse_timestamp, parse_uuid, to_json};
use crate::models::{JobStatus, PreparedReference, ReferenceFeatureSet, Section};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

const SELECT_COLUMNS: &str = r#"
    SELECT reference_id, song_id, voice_part, status, source_track_ref,
           needs_isolation, isolated_audio_ref, features_ref, source_duration_ms,
           isolation_model_id, isolation_degraded, sections, error_message,
           created_at, updated_at
    FROM reference_feature_sets
"#;

/// Insert a new reference row
///
/// Fails with a unique violation when a non-FAILED row already exists for
/// the same (song_id, voice_part).
pub async fn insert_reference(pool: &SqlitePool, reference: &ReferenceFeatureSet) -> Result<()> {
    let reference_id = reference.reference_id.to_string();
    let sections = reference
        .sections
        .as_ref()
        .map(|s| to_json(s, "sections"))
        .transpose()?;
    let created_at = reference.created_at.to_rfc3339();
    let updated_at = reference.updated_at.to_rfc3339();
    let duration = reference.source_duration_ms.map(|d| d as i64);

    retry_on_lock("insert_reference", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO reference_feature_sets (
                reference_id, song_id, voice_part, status, source_track_ref,
                needs_isolation, isolated_audio_ref, features_ref, source_duration_ms,
                isolation_model_id, isolation_degraded, sections, error_message,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&reference_id)
        .bind(&reference.song_id)
        .bind(&reference.voice_part)
        .bind(reference.status.as_str())
        .bind(&reference.source_track_ref)
        .bind(reference.needs_isolation)
        .bind(&reference.isolated_audio_ref)
        .bind(&reference.features_ref)
        .bind(duration)
        .bind(&reference.isolation_model_id)
        .bind(reference.isolation_degraded)
        .bind(&sections)
        .bind(&reference.error_message)
        .bind(&created_at)
        .bind(&updated_at)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

/// Load a reference by id
pub async fn load_reference(pool: &SqlitePool, reference_id: Uuid) -> Result<Option<ReferenceFeatureSet>> {
    let sql = format!("{} WHERE reference_id = ?", SELECT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(reference_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| reference_from_row(&r)).transpose()
}

/// The non-FAILED reference for a song and voice part, if any
pub async fn find_active_reference(
    pool: &SqlitePool,
    song_id: &str,
    voice_part: &str,
) -> Result<Option<ReferenceFeatureSet>> {
    let sql = format!(
        "{} WHERE song_id = ? AND voice_part = ? AND status != 'FAILED'",
        SELECT_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(song_id)
        .bind(voice_part)
        .fetch_optional(pool)
        .await?;

    row.map(|r| reference_from_row(&r)).transpose()
}

/// Ids of every reference currently in `status`, oldest first
pub async fn list_reference_ids_by_status(pool: &SqlitePool, status: JobStatus) -> Result<Vec<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT reference_id FROM reference_feature_sets WHERE status = ? ORDER BY created_at",
    )
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    ids.iter().map(|id| parse_uuid(id, "reference_id")).collect()
}

/// PENDING → PROCESSING
///
/// Returns false when another worker already claimed the row or it is no
/// longer PENDING.
pub async fn claim_reference(pool: &SqlitePool, reference_id: Uuid) -> Result<bool> {
    let id = reference_id.to_string();
    let now = Utc::now().to_rfc3339();

    retry_on_lock("claim_reference", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE reference_feature_sets
            SET status = 'PROCESSING', updated_at = ?
            WHERE reference_id = ? AND status = 'PENDING'
            "#,
        )
        .bind(&now)
        .bind(&id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    })
    .await
}

/// PENDING/PROCESSING → READY with the preparation outputs
pub async fn complete_reference(
    pool: &SqlitePool,
    reference_id: Uuid,
    prepared: &PreparedReference,
) -> Result<bool> {
    let id = reference_id.to_string();
    let now = Utc::now().to_rfc3339();
    let duration = prepared.source_duration_ms as i64;

    retry_on_lock("complete_reference", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE reference_feature_sets
            SET status = 'READY',
                features_ref = ?,
                isolated_audio_ref = ?,
                isolation_model_id = ?,
                isolation_degraded = ?,
                source_duration_ms = ?,
                error_message = NULL,
                updated_at = ?
            WHERE reference_id = ? AND status IN ('PENDING', 'PROCESSING')
            "#,
        )
        .bind(&prepared.features_ref)
        .bind(&prepared.isolated_audio_ref)
        .bind(&prepared.isolation_model_id)
        .bind(prepared.isolation_degraded)
        .bind(duration)
        .bind(&now)
        .bind(&id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    })
    .await
}

/// Any non-FAILED status → FAILED
///
/// READY rows can be failed too (operator reprocess supersedes them).
pub async fn fail_reference(pool: &SqlitePool, reference_id: Uuid, message: &str) -> Result<bool> {
    let id = reference_id.to_string();
    let now = Utc::now().to_rfc3339();

    retry_on_lock("fail_reference", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE reference_feature_sets
            SET status = 'FAILED', error_message = ?, updated_at = ?
            WHERE reference_id = ? AND status != 'FAILED'
            "#,
        )
        .bind(message)
        .bind(&now)
        .bind(&id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    })
    .await
}

fn reference_from_row(row: &SqliteRow) -> Result<ReferenceFeatureSet> {
    let reference_id: String = row.get("reference_id");
    let status: String = row.get("status");
    let sections: Option<String> = row.get("sections");
    let duration: Option<i64> = row.get("source_duration_ms");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(ReferenceFeatureSet {
        reference_id: parse_uuid(&reference_id, "reference_id")?,
        song_id: row.get("song_id"),
        voice_part: row.get("voice_part"),
        status: status.parse()?,
        source_track_ref: row.get("source_track_ref"),
        needs_isolation: row.get("needs_isolation"),
        isolated_audio_ref: row.get("isolated_audio_ref"),
        features_ref: row.get("features_ref"),
        source_duration_ms: duration.map(|d| d.max(0) as u64),
        isolation_model_id: row.get("isolation_model_id"),
        isolation_degraded: row.get("isolation_degraded"),
        sections: from_json::<Vec<Section>>(sections, "sections")?,
        error_message: row.get("error_message"),
        created_at: parse_timestamp(&created_at, "created_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
    })
}
