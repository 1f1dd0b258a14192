use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use utoipa::ToSchema;

/// Orchestration event kinds. The `user.*` kinds are written by the external
/// identity layer through the shared journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum EventKind {
    UserLogin,
    UserLogout,
    UserRegisterFailed,
    ImageBuilt,
    ImageDeleted,
    ContainerCreated,
    ContainerStopped,
    ExerciseCompleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserLogin => "user.login",
            Self::UserLogout => "user.logout",
            Self::UserRegisterFailed => "user.register.failed",
            Self::ImageBuilt => "image.built",
            Self::ImageDeleted => "image.deleted",
            Self::ContainerCreated => "container.created",
            Self::ContainerStopped => "container.stopped",
            Self::ExerciseCompleted => "exercise.completed",
        }
    }
}

/// Read cap for admin journal queries.
pub const MAX_PAGE: i64 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: i64,
    pub kind: String,
    pub subject_id: Option<String>,
    pub target_id: Option<String>,
    pub attributes: String,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub async fn append(
        pool: &SqlitePool,
        kind: &str,
        subject_id: Option<&str>,
        target_id: Option<&str>,
        attributes: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO events (kind, subject_id, target_id, attributes, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(kind)
        .bind(subject_id)
        .bind(target_id)
        .bind(attributes.to_string())
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Newest-first page; `before_id` continues a previous page.
    pub async fn list(
        pool: &SqlitePool,
        limit: i64,
        before_id: Option<i64>,
    ) -> Result<Vec<Event>, sqlx::Error> {
        let limit = limit.clamp(1, MAX_PAGE);
        match before_id {
            Some(before) => {
                sqlx::query_as::<_, Event>(
                    r#"
                    SELECT id, kind, subject_id, target_id, attributes, created_at
                    FROM events
                    WHERE id < ?
                    ORDER BY id DESC
                    LIMIT ?
                    "#,
                )
                .bind(before)
                .bind(limit)
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, Event>(
                    r#"
                    SELECT id, kind, subject_id, target_id, attributes, created_at
                    FROM events
                    ORDER BY id DESC
                    LIMIT ?
                    "#,
                )
                .bind(limit)
                .fetch_all(pool)
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::test_pool;

    #[tokio::test]
    async fn list_pages_newest_first() {
        let pool = test_pool().await;

        for i in 0..5 {
            Event::append(
                &pool,
                EventKind::ContainerCreated.as_str(),
                Some("u1"),
                Some(&format!("container-{i}")),
                &serde_json::json!({}),
            )
            .await
            .unwrap();
        }

        let first_page = Event::list(&pool, 2, None).await.unwrap();
        assert_eq!(first_page.len(), 2);
        assert!(first_page[0].id > first_page[1].id);
        assert_eq!(first_page[0].target_id.as_deref(), Some("container-4"));

        let second_page = Event::list(&pool, 2, Some(first_page[1].id))
            .await
            .unwrap();
        assert_eq!(second_page.len(), 2);
        assert_eq!(second_page[0].target_id.as_deref(), Some("container-2"));
    }

    #[tokio::test]
    async fn limit_is_clamped() {
        let pool = test_pool().await;
        Event::append(
            &pool,
            EventKind::ImageBuilt.as_str(),
            Some("admin"),
            Some("training/a:latest"),
            &serde_json::json!({"version": "latest"}),
        )
        .await
        .unwrap();

        // Degenerate limits still return sane pages
        assert_eq!(Event::list(&pool, 0, None).await.unwrap().len(), 1);
        assert_eq!(Event::list(&pool, 100_000, None).await.unwrap().len(), 1);
    }
}
