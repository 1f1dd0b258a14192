use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExerciseLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl ExerciseLevel {
    /// Case-insensitive parse of the metadata `level` field.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "beginner" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }
}

/// A catalog entry: one buildable exercise image.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Exercise {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub level: ExerciseLevel,
    pub image_tag: String,
    /// Raw `metadata.json` contents; unknown keys are preserved verbatim.
    pub metadata: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewExercise {
    pub name: String,
    pub version: String,
    pub description: String,
    pub level: ExerciseLevel,
    pub image_tag: String,
    pub metadata: String,
}

impl Exercise {
    pub fn metadata_value(&self) -> serde_json::Value {
        serde_json::from_str(&self.metadata).unwrap_or(serde_json::Value::Null)
    }

    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Exercise>, sqlx::Error> {
        sqlx::query_as::<_, Exercise>(
            r#"
            SELECT id, name, version, description, level, image_tag, metadata,
                   created_at, updated_at
            FROM exercises
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Exercise>, sqlx::Error> {
        sqlx::query_as::<_, Exercise>(
            r#"
            SELECT id, name, version, description, level, image_tag, metadata,
                   created_at, updated_at
            FROM exercises
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Insert a freshly built exercise; rebuilding the same image tag
    /// refreshes the existing row instead of duplicating it.
    pub async fn upsert(pool: &SqlitePool, new: NewExercise) -> Result<Exercise, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, Exercise>(
            r#"
            INSERT INTO exercises (id, name, version, description, level, image_tag, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (image_tag) DO UPDATE SET
                name = excluded.name,
                version = excluded.version,
                description = excluded.description,
                level = excluded.level,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            RETURNING id, name, version, description, level, image_tag, metadata,
                      created_at, updated_at
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&new.name)
        .bind(&new.version)
        .bind(&new.description)
        .bind(new.level)
        .bind(&new.image_tag)
        .bind(&new.metadata)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn delete(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM exercises WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::test_pool;

    fn sample(tag: &str) -> NewExercise {
        NewExercise {
            name: "SQL Injection Basics".to_string(),
            version: "latest".to_string(),
            description: "Find the flaw".to_string(),
            level: ExerciseLevel::Beginner,
            image_tag: tag.to_string(),
            metadata: r#"{"title":"SQL Injection Basics"}"#.to_string(),
        }
    }

    #[test]
    fn level_parse_is_case_insensitive() {
        assert_eq!(ExerciseLevel::parse("Beginner"), Some(ExerciseLevel::Beginner));
        assert_eq!(ExerciseLevel::parse("BEGINNER"), Some(ExerciseLevel::Beginner));
        assert_eq!(ExerciseLevel::parse("beginner"), Some(ExerciseLevel::Beginner));
        assert_eq!(ExerciseLevel::parse("aDvAnCeD"), Some(ExerciseLevel::Advanced));
        assert_eq!(ExerciseLevel::parse("expert"), None);
        assert_eq!(ExerciseLevel::parse(""), None);
    }

    #[tokio::test]
    async fn upsert_refreshes_existing_tag() {
        let pool = test_pool().await;

        let first = Exercise::upsert(&pool, sample("training/sql:latest"))
            .await
            .unwrap();

        let mut changed = sample("training/sql:latest");
        changed.description = "Updated description".to_string();
        let second = Exercise::upsert(&pool, changed).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.description, "Updated description");
        assert_eq!(Exercise::find_all(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let pool = test_pool().await;
        let exercise = Exercise::upsert(&pool, sample("training/xss:latest"))
            .await
            .unwrap();

        assert!(Exercise::delete(&pool, &exercise.id).await.unwrap());
        assert!(Exercise::find_by_id(&pool, &exercise.id)
            .await
            .unwrap()
            .is_none());
        assert!(!Exercise::delete(&pool, &exercise.id).await.unwrap());
    }
}
