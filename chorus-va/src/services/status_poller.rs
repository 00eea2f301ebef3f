//! Caller-side polling for attempt completion
//!
//! Polling gives up independently of the pipeline: a timed-out caller can
//! fetch the result later with `get_status`.

use sqlx::SqlitePool;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

use crate::db::attempts;
use crate::models::AttemptStatus;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("Attempt {attempt_id} not terminal after {waited_ms} ms")]
    Timeout { attempt_id: Uuid, waited_ms: u64 },

    #[error("Attempt not found: {0}")]
    NotFound(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] chorus_common::Error),
}

/// Polls the attempt table until an attempt reaches READY or FAILED
#[derive(Clone)]
pub struct StatusPoller {
    db: SqlitePool,
}

impl StatusPoller {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Wait until `attempt_id` is terminal or `timeout` elapses
    pub async fn wait_for_terminal(
        &self,
        attempt_id: Uuid,
        timeout: Duration,
        interval: Duration,
    ) -> Result<AttemptStatus, PollError> {
        let started = Instant::now();
        let interval = interval.max(Duration::from_millis(1));

        loop {
            let attempt = attempts::load_attempt(&self.db, attempt_id)
                .await?
                .ok_or(PollError::NotFound(attempt_id))?;

            if attempt.status.is_terminal() {
                return Ok(attempt.to_status());
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(PollError::Timeout {
                    attempt_id,
                    waited_ms: waited.as_millis() as u64,
                });
            }

            tokio::time::sleep(interval.min(timeout - waited)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database_pool;
    use crate::models::{AnalysisAttempt, JobStatus};

    #[tokio::test]
    async fn test_pending_attempt_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("chorus.db")).await.unwrap();
        let attempt = AnalysisAttempt::new("s1", "song", "soprano", "recordings/a.wav", None);
        attempts::insert_attempt(&pool, &attempt).await.unwrap();

        let poller = StatusPoller::new(pool);
        let result = poller
            .wait_for_terminal(attempt.attempt_id, Duration::from_millis(50), Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(PollError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_failed_attempt_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("chorus.db")).await.unwrap();
        let attempt = AnalysisAttempt::new("s1", "song", "soprano", "recordings/a.wav", None);
        attempts::insert_attempt(&pool, &attempt).await.unwrap();
        attempts::fail_attempt(&pool, attempt.attempt_id, None, "decode: bad", "DECODE_ERROR")
            .await
            .unwrap();

        let status = StatusPoller::new(pool)
            .wait_for_terminal(attempt.attempt_id, Duration::from_secs(1), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(status.status, JobStatus::Failed);
        assert_eq!(status.error_kind.as_deref(), Some("DECODE_ERROR"));
    }

    #[tokio::test]
    async fn test_unknown_attempt_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("chorus.db")).await.unwrap();
        let result = StatusPoller::new(pool)
            .wait_for_terminal(Uuid::new_v4(), Duration::from_millis(20), Duration::from_millis(5))
            .await;
        assert!(matches!(result, Err(PollError::NotFound(_))));
    }
}
