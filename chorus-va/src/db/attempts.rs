//! Analysis attempt persistence
//!
//! Status changes are conditional UPDATEs so two workers can never both
//! claim an attempt, and a terminal attempt is never overwritten.

use chorus_common::Result;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{from_json, parse_optional_timestamp, parse_timestamp, parse_uuid, to_json};
use crate::models::{AnalysisAttempt, JobStatus, ScoreBreakdown, Section, SectionScore};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

const SELECT_COLUMNS: &str = r#"
    SELECT attempt_id, user_id, song_id, voice_part, recording_ref, status,
           reference_id, sections_override, pitch_score, timing_score,
           dynamics_score, overall_score, section_scores, tips,
           error_message, error_kind, created_at, started_at, completed_at
    FROM analysis_attempts
"#;

/// Insert a new attempt
pub async fn insert_attempt(pool: &SqlitePool, attempt: &AnalysisAttempt) -> Result<()> {
    let attempt_id = attempt.attempt_id.to_string();
    let reference_id = attempt.reference_id.map(|id| id.to_string());
    let sections_override = attempt
        .sections_override
        .as_ref()
        .map(|s| to_json(s, "sections_override"))
        .transpose()?;
    let created_at = attempt.created_at.to_rfc3339();

    retry_on_lock("insert_attempt", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO analysis_attempts (
                attempt_id, user_id, song_id, voice_part, recording_ref,
                status, reference_id, sections_override, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&attempt_id)
        .bind(&attempt.user_id)
        .bind(&attempt.song_id)
        .bind(&attempt.voice_part)
        .bind(&attempt.recording_ref)
        .bind(attempt.status.as_str())
        .bind(&reference_id)
        .bind(&sections_override)
        .bind(&created_at)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

/// Load an attempt by id
pub async fn load_attempt(pool: &SqlitePool, attempt_id: Uuid) -> Result<Option<AnalysisAttempt>> {
    let sql = format!("{} WHERE attempt_id = ?", SELECT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(attempt_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| attempt_from_row(&r)).transpose()
}

/// Most recent attempts for a user, newest first
pub async fn list_attempts_for_user(
    pool: &SqlitePool,
    user_id: &str,
    limit: u32,
) -> Result<Vec<AnalysisAttempt>> {
    let sql = format!(
        "{} WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
        SELECT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

    rows.iter().map(attempt_from_row).collect()
}

/// Ids of every attempt currently in `status`, oldest first
pub async fn list_attempt_ids_by_status(pool: &SqlitePool, status: JobStatus) -> Result<Vec<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT attempt_id FROM analysis_attempts WHERE status = ? ORDER BY created_at",
    )
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    ids.iter().map(|id| parse_uuid(id, "attempt_id")).collect()
}

/// PENDING → PROCESSING; false when the attempt was already claimed
pub async fn claim_attempt(pool: &SqlitePool, attempt_id: Uuid) -> Result<bool> {
    let id = attempt_id.to_string();
    let now = Utc::now().to_rfc3339();

    retry_on_lock("claim_attempt", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE analysis_attempts
            SET status = 'PROCESSING', started_at = ?
            WHERE attempt_id = ? AND status = 'PENDING'
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

/// PROCESSING → READY, writing scores, sections and tips in the same statement
pub async fn complete_attempt(
    pool: &SqlitePool,
    attempt_id: Uuid,
    reference_id: Uuid,
    scores: &ScoreBreakdown,
    tips: &[String],
) -> Result<bool> {
    let id = attempt_id.to_string();
    let reference_id = reference_id.to_string();
    let section_scores = to_json(&scores.sections, "section_scores")?;
    let tips = to_json(&tips, "tips")?;
    let now = Utc::now().to_rfc3339();

    retry_on_lock("complete_attempt", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE analysis_attempts
            SET status = 'READY',
                reference_id = ?,
                pitch_score = ?,
                timing_score = ?,
                dynamics_score = ?,
                overall_score = ?,
                section_scores = ?,
                tips = ?,
                completed_at = ?
            WHERE attempt_id = ? AND status = 'PROCESSING'
            "#,
        )
        .bind(&reference_id)
        .bind(scores.pitch)
        .bind(scores.timing)
        .bind(scores.dynamics)
        .bind(scores.overall)
        .bind(&section_scores)
        .bind(&tips)
        .bind(&now)
        .bind(&id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    })
    .await
}

/// PENDING/PROCESSING → FAILED with "<stage>: <message>" and the error kind
pub async fn fail_attempt(
    pool: &SqlitePool,
    attempt_id: Uuid,
    reference_id: Option<Uuid>,
    message: &str,
    kind: &str,
) -> Result<bool> {
    let id = attempt_id.to_string();
    let reference_id = reference_id.map(|r| r.to_string());
    let now = Utc::now().to_rfc3339();

    retry_on_lock("fail_attempt", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE analysis_attempts
            SET status = 'FAILED',
                reference_id = COALESCE(?, reference_id),
                error_message = ?,
                error_kind = ?,
                completed_at = ?
            WHERE attempt_id = ? AND status IN ('PENDING', 'PROCESSING')
            "#,
        )
        .bind(&reference_id)
        .bind(message)
        .bind(kind)
        .bind(&now)
        .bind(&id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    })
    .await
}

fn attempt_from_row(row: &SqliteRow) -> Result<AnalysisAttempt> {
    let attempt_id: String = row.get("attempt_id");
    let status: String = row.get("status");
    let reference_id: Option<String> = row.get("reference_id");
    let sections_override: Option<String> = row.get("sections_override");
    let section_scores: Option<String> = row.get("section_scores");
    let tips: Option<String> = row.get("tips");
    let created_at: String = row.get("created_at");

    let overall: Option<f64> = row.get("overall_score");
    let scores = match overall {
        Some(overall) => Some(ScoreBreakdown {
            pitch: row.get::<Option<f64>, _>("pitch_score").unwrap_or(0.0),
            timing: row.get::<Option<f64>, _>("timing_score").unwrap_or(0.0),
            dynamics: row.get::<Option<f64>, _>("dynamics_score").unwrap_or(0.0),
            overall,
            sections: from_json::<Vec<SectionScore>>(section_scores, "section_scores")?
                .unwrap_or_default(),
        }),
        None => None,
    };

    Ok(AnalysisAttempt {
        attempt_id: parse_uuid(&attempt_id, "attempt_id")?,
        user_id: row.get("user_id"),
        song_id: row.get("song_id"),
        voice_part: row.get("voice_part"),
        recording_ref: row.get("recording_ref"),
        status: status.parse()?,
        reference_id: reference_id
            .map(|r| parse_uuid(&r, "reference_id"))
            .transpose()?,
        sections_override: from_json::<Vec<Section>>(sections_override, "sections_override")?,
        scores,
        tips: from_json::<Vec<String>>(tips, "tips")?,
        error_message: row.get("error_message"),
        error_kind: row.get("error_kind"),
        created_at: parse_timestamp(&created_at, "created_at")?,
        started_at: parse_optional_timestamp(row.get("started_at"), "started_at")?,
        completed_at: parse_optional_timestamp(row.get("completed_at"), "completed_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database_pool;

    async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("chorus.db")).await.unwrap();
        (dir, pool)
    }

    fn breakdown() -> ScoreBreakdown {
        ScoreBreakdown {
            pitch: 92.0,
            timing: 81.0,
            dynamics: 64.0,
            overall: 83.1,
            sections: vec![SectionScore {
                section_index: 0,
                label: "Section 1".to_string(),
                start_ms: 0,
                end_ms: 10_000,
                pitch: Some(92.0),
                timing: Some(81.0),
                dynamics: Some(64.0),
                overall: Some(83.1),
            }],
        }
    }

    #[tokio::test]
    async fn test_ready_attempt_roundtrips_scores_and_tips() {
        let (_dir, pool) = test_pool().await;
        let attempt = AnalysisAttempt::new("bass-1", "requiem", "bass", "recordings/r.wav", None);
        insert_attempt(&pool, &attempt).await.unwrap();
        assert!(claim_attempt(&pool, attempt.attempt_id).await.unwrap());

        let reference_id = Uuid::new_v4();
        let tips = vec!["Listen for the entry in bar 12.".to_string()];
        assert!(complete_attempt(&pool, attempt.attempt_id, reference_id, &breakdown(), &tips)
            .await
            .unwrap());

        let loaded = load_attempt(&pool, attempt.attempt_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Ready);
        assert_eq!(loaded.reference_id, Some(reference_id));
        assert_eq!(loaded.tips, Some(tips));
        assert!(loaded.started_at.is_some());
        assert!(loaded.completed_at.is_some());

        let scores = loaded.scores.unwrap();
        assert_eq!(scores.overall, 83.1);
        assert_eq!(scores.sections.len(), 1);
        assert_eq!(scores.sections[0].pitch, Some(92.0));
    }

    #[tokio::test]
    async fn test_pending_attempt_has_no_scores() {
        let (_dir, pool) = test_pool().await;
        let attempt = AnalysisAttempt::new("bass-1", "requiem", "bass", "recordings/r.wav", None);
        insert_attempt(&pool, &attempt).await.unwrap();

        let loaded = load_attempt(&pool, attempt.attempt_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Pending);
        assert!(loaded.scores.is_none());
        assert!(loaded.tips.is_none());
    }

    #[tokio::test]
    async fn test_complete_requires_claim() {
        let (_dir, pool) = test_pool().await;
        let attempt = AnalysisAttempt::new("bass-1", "requiem", "bass", "recordings/r.wav", None);
        insert_attempt(&pool, &attempt).await.unwrap();

        let completed = complete_attempt(&pool, attempt.attempt_id, Uuid::new_v4(), &breakdown(), &[])
            .await
            .unwrap();
        assert!(!completed);
    }

    #[tokio::test]
    async fn test_failed_attempt_is_terminal() {
        let (_dir, pool) = test_pool().await;
        let attempt = AnalysisAttempt::new("alto-2", "requiem", "alto", "recordings/r.wav", None);
        insert_attempt(&pool, &attempt).await.unwrap();
        claim_attempt(&pool, attempt.attempt_id).await.unwrap();

        assert!(fail_attempt(&pool, attempt.attempt_id, None, "decode: too short", "DECODE_ERROR")
            .await
            .unwrap());
        assert!(!fail_attempt(&pool, attempt.attempt_id, None, "again", "PIPELINE_ERROR")
            .await
            .unwrap());

        let loaded = load_attempt(&pool, attempt.attempt_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(loaded.error_message.as_deref(), Some("decode: too short"));
        assert_eq!(loaded.error_kind.as_deref(), Some("DECODE_ERROR"));
    }

    #[tokio::test]
    async fn test_list_for_user_newest_first() {
        let (_dir, pool) = test_pool().await;
        let mut first = AnalysisAttempt::new("tenor-4", "s", "tenor", "recordings/1.wav", None);
        first.created_at = Utc::now() - chrono::Duration::seconds(60);
        let second = AnalysisAttempt::new("tenor-4", "s", "tenor", "recordings/2.wav", None);
        let other = AnalysisAttempt::new("alto-1", "s", "alto", "recordings/3.wav", None);
        insert_attempt(&pool, &first).await.unwrap();
        insert_attempt(&pool, &second).await.unwrap();
        insert_attempt(&pool, &other).await.unwrap();

        let listed = list_attempts_for_user(&pool, "tenor-4", 10).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|a| a.attempt_id).collect();
        assert_eq!(ids, vec![second.attempt_id, first.attempt_id]);

        let limited = list_attempts_for_user(&pool, "tenor-4", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
