//! Cross-store scenarios: the registry guarantees the proxy, watchers and
//! the completion path rely on.

use dojo::shared::models::container::is_unique_violation;
use dojo::shared::models::{
    ContainerRecord, ContainerStatus, Exercise, ExerciseLevel, ExerciseProgress,
    NewContainerRecord, NewExercise, ProgressStatus,
};
use sqlx::SqlitePool;

async fn setup_pool() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:")
        .await
        .expect("Failed to create in-memory database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

async fn seed_exercise(pool: &SqlitePool, tag: &str) -> Exercise {
    Exercise::upsert(
        pool,
        NewExercise {
            name: tag.to_string(),
            version: "latest".to_string(),
            description: "scenario exercise".to_string(),
            level: ExerciseLevel::Intermediate,
            image_tag: tag.to_string(),
            metadata: "{}".to_string(),
        },
    )
    .await
    .expect("Failed to seed exercise")
}

fn new_record(exercise_id: &str, subject: &str, container: &str) -> NewContainerRecord {
    NewContainerRecord {
        id: container.to_string(),
        exercise_id: exercise_id.to_string(),
        subject_id: subject.to_string(),
        subdomain: uuid::Uuid::new_v4().to_string(),
        host_port: "32768".to_string(),
    }
}

/// After a stop, the subdomain no longer resolves for the proxy.
#[tokio::test]
async fn stop_revokes_subdomain_lookup() {
    let pool = setup_pool().await;
    let exercise = seed_exercise(&pool, "training/scenario-a:latest").await;

    let record = ContainerRecord::insert(&pool, &new_record(&exercise.id, "u1", "c1"))
        .await
        .unwrap();

    assert!(
        ContainerRecord::get_by_subdomain_running(&pool, &record.subdomain)
            .await
            .unwrap()
            .is_some()
    );

    ContainerRecord::set_status(&pool, &record.id, ContainerStatus::Stopped)
        .await
        .unwrap();

    assert!(
        ContainerRecord::get_by_subdomain_running(&pool, &record.subdomain)
            .await
            .unwrap()
            .is_none()
    );
    // The record itself survives for audit until retention expires
    assert!(ContainerRecord::find_by_id(&pool, &record.id)
        .await
        .unwrap()
        .is_some());
}

/// Repeated completions converge on the same terminal state, and a later
/// admin force-stop cannot downgrade it.
#[tokio::test]
async fn completion_is_idempotent_and_survives_force_stop() {
    let pool = setup_pool().await;
    let exercise = seed_exercise(&pool, "training/scenario-b:latest").await;

    let record = ContainerRecord::insert(&pool, &new_record(&exercise.id, "u1", "c1"))
        .await
        .unwrap();

    // First completion: progress and registry both flip to completed
    ExerciseProgress::mark_completed(&pool, "u1", &exercise.id)
        .await
        .unwrap();
    ContainerRecord::set_status(&pool, &record.id, ContainerStatus::Completed)
        .await
        .unwrap();

    let progress = ExerciseProgress::find(&pool, "u1", &exercise.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.status, ProgressStatus::Completed);
    let completed_at = progress.completed_at;

    // Second completion changes nothing
    ExerciseProgress::mark_completed(&pool, "u1", &exercise.id)
        .await
        .unwrap();
    ContainerRecord::set_status(&pool, &record.id, ContainerStatus::Completed)
        .await
        .unwrap();

    let progress = ExerciseProgress::find(&pool, "u1", &exercise.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.completed_at, completed_at);

    // Admin force-stop removes the runtime container but the record keeps
    // its completed status
    ContainerRecord::set_status(&pool, &record.id, ContainerStatus::Stopped)
        .await
        .unwrap();
    let reloaded = ContainerRecord::find_by_id(&pool, &record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, ContainerStatus::Completed);
}

/// No two records ever share a subdomain, regardless of subject or status.
#[tokio::test]
async fn subdomains_are_unique_across_records() {
    let pool = setup_pool().await;
    let a = seed_exercise(&pool, "training/scenario-c:latest").await;
    let b = seed_exercise(&pool, "training/scenario-d:latest").await;

    let first = ContainerRecord::insert(&pool, &new_record(&a.id, "u1", "c1"))
        .await
        .unwrap();

    let mut clash = new_record(&b.id, "u2", "c2");
    clash.subdomain = first.subdomain.clone();
    let err = ContainerRecord::insert(&pool, &clash).await.unwrap_err();
    assert!(is_unique_violation(&err));

    // Even a stopped record keeps its claim on the subdomain
    ContainerRecord::set_status(&pool, &first.id, ContainerStatus::Stopped)
        .await
        .unwrap();
    let mut clash = new_record(&b.id, "u2", "c3");
    clash.subdomain = first.subdomain.clone();
    let err = ContainerRecord::insert(&pool, &clash).await.unwrap_err();
    assert!(is_unique_violation(&err));
}

/// Running-container counts per subject track launches and stops.
#[tokio::test]
async fn per_subject_counts_follow_lifecycle() {
    let pool = setup_pool().await;
    let a = seed_exercise(&pool, "training/scenario-e:latest").await;
    let b = seed_exercise(&pool, "training/scenario-f:latest").await;
    let c = seed_exercise(&pool, "training/scenario-g:latest").await;

    for (exercise, container) in [(&a, "c1"), (&b, "c2"), (&c, "c3")] {
        ContainerRecord::insert(&pool, &new_record(&exercise.id, "u1", container))
            .await
            .unwrap();
    }
    assert_eq!(
        ContainerRecord::count_running_by_subject(&pool, "u1")
            .await
            .unwrap(),
        3
    );
    assert_eq!(
        ContainerRecord::count_running_by_subject(&pool, "u2")
            .await
            .unwrap(),
        0
    );

    ContainerRecord::set_status(&pool, "c2", ContainerStatus::Stopped)
        .await
        .unwrap();
    assert_eq!(
        ContainerRecord::count_running_by_subject(&pool, "u1")
            .await
            .unwrap(),
        2
    );
}
