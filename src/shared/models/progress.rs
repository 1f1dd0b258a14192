use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type, ToSchema)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    InProgress,
    Completed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

/// Per-subject progress on an exercise, upserted by launch and completion.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExerciseProgress {
    pub subject_id: String,
    pub exercise_id: String,
    pub status: ProgressStatus,
    pub attempts: i64,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ExerciseProgress {
    /// Launch-side upsert: bump the attempt counter and (re)enter
    /// `in_progress`. A completed exercise relaunched for practice goes back
    /// to `in_progress` with its completion timestamp kept.
    pub async fn record_attempt(
        pool: &SqlitePool,
        subject_id: &str,
        exercise_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO exercise_progress (subject_id, exercise_id, status, attempts, updated_at)
            VALUES (?, ?, 'in_progress', 1, ?)
            ON CONFLICT (subject_id, exercise_id) DO UPDATE SET
                attempts = attempts + 1,
                status = 'in_progress',
                updated_at = excluded.updated_at
            "#,
        )
        .bind(subject_id)
        .bind(exercise_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Completion-side upsert; idempotent, the first completion timestamp
    /// wins.
    pub async fn mark_completed(
        pool: &SqlitePool,
        subject_id: &str,
        exercise_id: &str,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO exercise_progress (subject_id, exercise_id, status, attempts, completed_at, updated_at)
            VALUES (?, ?, 'completed', 0, ?, ?)
            ON CONFLICT (subject_id, exercise_id) DO UPDATE SET
                status = 'completed',
                completed_at = COALESCE(exercise_progress.completed_at, excluded.completed_at),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(subject_id)
        .bind(exercise_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find(
        pool: &SqlitePool,
        subject_id: &str,
        exercise_id: &str,
    ) -> Result<Option<ExerciseProgress>, sqlx::Error> {
        sqlx::query_as::<_, ExerciseProgress>(
            r#"
            SELECT subject_id, exercise_id, status, attempts, completed_at, updated_at
            FROM exercise_progress
            WHERE subject_id = ? AND exercise_id = ?
            "#,
        )
        .bind(subject_id)
        .bind(exercise_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_for_subject(
        pool: &SqlitePool,
        subject_id: &str,
    ) -> Result<Vec<ExerciseProgress>, sqlx::Error> {
        sqlx::query_as::<_, ExerciseProgress>(
            r#"
            SELECT subject_id, exercise_id, status, attempts, completed_at, updated_at
            FROM exercise_progress
            WHERE subject_id = ?
            "#,
        )
        .bind(subject_id)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::test_pool;

    #[tokio::test]
    async fn attempts_accumulate() {
        let pool = test_pool().await;

        ExerciseProgress::record_attempt(&pool, "u1", "e1").await.unwrap();
        ExerciseProgress::record_attempt(&pool, "u1", "e1").await.unwrap();
        ExerciseProgress::record_attempt(&pool, "u1", "e2").await.unwrap();

        let progress = ExerciseProgress::find(&pool, "u1", "e1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress.attempts, 2);
        assert_eq!(progress.status, ProgressStatus::InProgress);
        assert_eq!(
            ExerciseProgress::list_for_subject(&pool, "u1")
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn completion_is_idempotent() {
        let pool = test_pool().await;

        ExerciseProgress::record_attempt(&pool, "u1", "e1").await.unwrap();
        ExerciseProgress::mark_completed(&pool, "u1", "e1").await.unwrap();

        let first = ExerciseProgress::find(&pool, "u1", "e1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.status, ProgressStatus::Completed);
        let completed_at = first.completed_at.unwrap();

        ExerciseProgress::mark_completed(&pool, "u1", "e1").await.unwrap();
        let second = ExerciseProgress::find(&pool, "u1", "e1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.completed_at, Some(completed_at));
        assert_eq!(second.attempts, first.attempts);
    }

    #[tokio::test]
    async fn relaunch_after_completion_reenters_in_progress() {
        let pool = test_pool().await;

        ExerciseProgress::record_attempt(&pool, "u1", "e1").await.unwrap();
        ExerciseProgress::mark_completed(&pool, "u1", "e1").await.unwrap();
        ExerciseProgress::record_attempt(&pool, "u1", "e1").await.unwrap();

        let progress = ExerciseProgress::find(&pool, "u1", "e1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress.status, ProgressStatus::InProgress);
        assert_eq!(progress.attempts, 2);
        assert!(progress.completed_at.is_some());
    }
}
