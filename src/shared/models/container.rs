use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Completed,
}

/// One row per sandbox container, keyed by the runtime's container id. The
/// subdomain is the sandbox's stable external identity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContainerRecord {
    pub id: String,
    pub exercise_id: String,
    pub subject_id: String,
    pub subdomain: String,
    pub status: ContainerStatus,
    pub host_port: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewContainerRecord {
    pub id: String,
    pub exercise_id: String,
    pub subject_id: String,
    pub subdomain: String,
    pub host_port: String,
}

/// True when an insert bounced off the one-running-per-(subject, exercise)
/// index or the subdomain uniqueness constraint.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err.as_database_error().map(|e| e.kind()),
        Some(sqlx::error::ErrorKind::UniqueViolation)
    )
}

const COLUMNS: &str = "id, exercise_id, subject_id, subdomain, status, host_port, created_at, last_activity";

impl ContainerRecord {
    pub async fn insert(
        pool: &SqlitePool,
        new: &NewContainerRecord,
    ) -> Result<ContainerRecord, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, ContainerRecord>(&format!(
            r#"
            INSERT INTO containers (id, exercise_id, subject_id, subdomain, status, host_port, created_at, last_activity)
            VALUES (?, ?, ?, ?, 'running', ?, ?, ?)
            RETURNING {COLUMNS}
            "#,
        ))
        .bind(&new.id)
        .bind(&new.exercise_id)
        .bind(&new.subject_id)
        .bind(&new.subdomain)
        .bind(&new.host_port)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        id: &str,
    ) -> Result<Option<ContainerRecord>, sqlx::Error> {
        sqlx::query_as::<_, ContainerRecord>(&format!(
            "SELECT {COLUMNS} FROM containers WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Subdomain lookup used by the proxy; stale subdomains return `None`.
    pub async fn get_by_subdomain_running(
        pool: &SqlitePool,
        subdomain: &str,
    ) -> Result<Option<ContainerRecord>, sqlx::Error> {
        sqlx::query_as::<_, ContainerRecord>(&format!(
            "SELECT {COLUMNS} FROM containers WHERE subdomain = ? AND status = 'running'"
        ))
        .bind(subdomain)
        .fetch_optional(pool)
        .await
    }

    /// Subdomain lookup regardless of status (completion callback path).
    pub async fn get_by_subdomain(
        pool: &SqlitePool,
        subdomain: &str,
    ) -> Result<Option<ContainerRecord>, sqlx::Error> {
        sqlx::query_as::<_, ContainerRecord>(&format!(
            "SELECT {COLUMNS} FROM containers WHERE subdomain = ?"
        ))
        .bind(subdomain)
        .fetch_optional(pool)
        .await
    }

    pub async fn get_by_subject_exercise_running(
        pool: &SqlitePool,
        subject_id: &str,
        exercise_id: &str,
    ) -> Result<Option<ContainerRecord>, sqlx::Error> {
        sqlx::query_as::<_, ContainerRecord>(&format!(
            r#"
            SELECT {COLUMNS} FROM containers
            WHERE subject_id = ? AND exercise_id = ? AND status = 'running'
            "#
        ))
        .bind(subject_id)
        .bind(exercise_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_running_by_subject(
        pool: &SqlitePool,
        subject_id: &str,
    ) -> Result<Vec<ContainerRecord>, sqlx::Error> {
        sqlx::query_as::<_, ContainerRecord>(&format!(
            r#"
            SELECT {COLUMNS} FROM containers
            WHERE subject_id = ? AND status = 'running'
            ORDER BY created_at DESC
            "#
        ))
        .bind(subject_id)
        .fetch_all(pool)
        .await
    }

    pub async fn count_running_by_subject(
        pool: &SqlitePool,
        subject_id: &str,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM containers WHERE subject_id = ? AND status = 'running'",
        )
        .bind(subject_id)
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    pub async fn list_running(pool: &SqlitePool) -> Result<Vec<ContainerRecord>, sqlx::Error> {
        sqlx::query_as::<_, ContainerRecord>(&format!(
            "SELECT {COLUMNS} FROM containers WHERE status = 'running' ORDER BY created_at DESC"
        ))
        .fetch_all(pool)
        .await
    }

    /// Transition out of `running`. Status is monotone: a record that has
    /// already left `running` is never downgraded, so racing stop paths and
    /// a completed record surviving an admin force-stop both fall out of the
    /// `WHERE` clause. Returns whether a row changed.
    pub async fn set_status(
        pool: &SqlitePool,
        id: &str,
        status: ContainerStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE containers SET status = ? WHERE id = ? AND status = 'running'")
            .bind(status)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn touch_last_activity(
        pool: &SqlitePool,
        subdomain: &str,
        when: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE containers SET last_activity = ? WHERE subdomain = ?")
            .bind(when)
            .bind(subdomain)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Drop terminal rows past the audit retention window.
    pub async fn purge_stopped_older_than(
        pool: &SqlitePool,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM containers WHERE status != 'running' AND created_at < ?")
                .bind(cutoff)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::exercise::{Exercise, ExerciseLevel, NewExercise};
    use crate::shared::models::test_pool;
    use chrono::Duration;

    async fn seed_exercise(pool: &SqlitePool, tag: &str) -> Exercise {
        Exercise::upsert(
            pool,
            NewExercise {
                name: tag.to_string(),
                version: "latest".to_string(),
                description: "test".to_string(),
                level: ExerciseLevel::Beginner,
                image_tag: tag.to_string(),
                metadata: "{}".to_string(),
            },
        )
        .await
        .unwrap()
    }

    fn record(exercise_id: &str, subject: &str, n: u32) -> NewContainerRecord {
        NewContainerRecord {
            id: format!("container-{subject}-{n}"),
            exercise_id: exercise_id.to_string(),
            subject_id: subject.to_string(),
            subdomain: uuid::Uuid::new_v4().to_string(),
            host_port: "32768".to_string(),
        }
    }

    #[tokio::test]
    async fn second_running_insert_for_same_pair_is_rejected() {
        let pool = test_pool().await;
        let exercise = seed_exercise(&pool, "training/a:latest").await;

        ContainerRecord::insert(&pool, &record(&exercise.id, "u1", 0))
            .await
            .unwrap();
        let err = ContainerRecord::insert(&pool, &record(&exercise.id, "u1", 1))
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));

        // A different subject is unaffected
        ContainerRecord::insert(&pool, &record(&exercise.id, "u2", 0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stopped_record_frees_the_pair() {
        let pool = test_pool().await;
        let exercise = seed_exercise(&pool, "training/a:latest").await;

        let first = ContainerRecord::insert(&pool, &record(&exercise.id, "u1", 0))
            .await
            .unwrap();
        assert!(
            ContainerRecord::set_status(&pool, &first.id, ContainerStatus::Stopped)
                .await
                .unwrap()
        );

        // Pair is free again, and the stale subdomain no longer resolves
        ContainerRecord::insert(&pool, &record(&exercise.id, "u1", 1))
            .await
            .unwrap();
        assert!(
            ContainerRecord::get_by_subdomain_running(&pool, &first.subdomain)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn status_is_monotone() {
        let pool = test_pool().await;
        let exercise = seed_exercise(&pool, "training/a:latest").await;
        let rec = ContainerRecord::insert(&pool, &record(&exercise.id, "u1", 0))
            .await
            .unwrap();

        assert!(
            ContainerRecord::set_status(&pool, &rec.id, ContainerStatus::Completed)
                .await
                .unwrap()
        );
        // A later stop must not overwrite the completed marker
        assert!(
            !ContainerRecord::set_status(&pool, &rec.id, ContainerStatus::Stopped)
                .await
                .unwrap()
        );
        let reloaded = ContainerRecord::find_by_id(&pool, &rec.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.status, ContainerStatus::Completed);
    }

    #[tokio::test]
    async fn count_and_list_track_running_only() {
        let pool = test_pool().await;
        let a = seed_exercise(&pool, "training/a:latest").await;
        let b = seed_exercise(&pool, "training/b:latest").await;

        let first = ContainerRecord::insert(&pool, &record(&a.id, "u1", 0))
            .await
            .unwrap();
        ContainerRecord::insert(&pool, &record(&b.id, "u1", 1))
            .await
            .unwrap();
        assert_eq!(
            ContainerRecord::count_running_by_subject(&pool, "u1")
                .await
                .unwrap(),
            2
        );

        ContainerRecord::set_status(&pool, &first.id, ContainerStatus::Stopped)
            .await
            .unwrap();
        assert_eq!(
            ContainerRecord::count_running_by_subject(&pool, "u1")
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            ContainerRecord::list_running_by_subject(&pool, "u1")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn touch_last_activity_moves_the_fallback() {
        let pool = test_pool().await;
        let exercise = seed_exercise(&pool, "training/a:latest").await;
        let rec = ContainerRecord::insert(&pool, &record(&exercise.id, "u1", 0))
            .await
            .unwrap();

        let later = rec.last_activity + Duration::minutes(10);
        ContainerRecord::touch_last_activity(&pool, &rec.subdomain, later)
            .await
            .unwrap();

        let reloaded = ContainerRecord::find_by_id(&pool, &rec.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.last_activity, later);
    }

    #[tokio::test]
    async fn purge_spares_recent_and_running_rows() {
        let pool = test_pool().await;
        let a = seed_exercise(&pool, "training/a:latest").await;

        let stopped = ContainerRecord::insert(&pool, &record(&a.id, "u1", 0))
            .await
            .unwrap();
        ContainerRecord::set_status(&pool, &stopped.id, ContainerStatus::Stopped)
            .await
            .unwrap();
        let running = ContainerRecord::insert(&pool, &record(&a.id, "u1", 1))
            .await
            .unwrap();

        // Cutoff in the past removes nothing
        let purged =
            ContainerRecord::purge_stopped_older_than(&pool, Utc::now() - Duration::hours(24))
                .await
                .unwrap();
        assert_eq!(purged, 0);

        // Cutoff in the future removes only the terminal row
        let purged =
            ContainerRecord::purge_stopped_older_than(&pool, Utc::now() + Duration::hours(1))
                .await
                .unwrap();
        assert_eq!(purged, 1);
        assert!(ContainerRecord::find_by_id(&pool, &running.id)
            .await
            .unwrap()
            .is_some());
    }
}
