use std::sync::Arc;

use sqlx::SqlitePool;
use thiserror::Error;

pub mod container;
pub mod event;
pub mod exercise;
pub mod progress;

pub use container::{ContainerRecord, ContainerStatus, NewContainerRecord};
pub use event::{Event, EventKind};
pub use exercise::{Exercise, ExerciseLevel, NewExercise};
pub use progress::{ExerciseProgress, ProgressStatus};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx::Error),
    #[error("UUID parse error: {0}")]
    UuidParse(#[from] uuid::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// In-memory database with the real schema applied, for store tests.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:")
        .await
        .expect("Failed to create in-memory database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Shared application state handed to every handler and middleware.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<crate::config::Config>,
    pub orchestrator: Arc<crate::orchestrator::Orchestrator>,
    pub builder: Arc<crate::builder::ImageBuilder>,
    pub activity: Arc<crate::orchestrator::ActivityTracker>,
    pub proxy_client: crate::proxy::ProxyClient,
    pub jwt_secret: String,
}
