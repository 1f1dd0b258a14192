mod activity;
mod journal;
mod reconciler;
mod watcher;

pub use activity::ActivityTracker;
pub use journal::EventJournal;
pub use watcher::{reap_reason, StopReason};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::docker::{RuntimeClient, RuntimeError, SandboxSpec};
use crate::shared::models::container::is_unique_violation;
use crate::shared::models::{
    ContainerRecord, ContainerStatus, EventKind, Exercise, ExerciseProgress, NewContainerRecord,
};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("an instance of this exercise is already running")]
    AlreadyRunning { subdomain: String },
    #[error("concurrent container limit reached ({limit})")]
    QuotaExceeded { limit: usize },
    #[error("unknown exercise: {0}")]
    UnknownExercise(String),
    #[error("cannot reach container runtime: {0}")]
    RuntimeUnavailable(String),
    #[error("container runtime refused the launch: {0}")]
    RuntimeRefused(String),
    #[error("container not found")]
    NotFound,
    #[error("not the owner of this container")]
    Forbidden,
    #[error("orchestrator is shutting down")]
    ShuttingDown,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<RuntimeError> for OrchestratorError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Unavailable(msg) => Self::RuntimeUnavailable(msg),
            other => Self::RuntimeRefused(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LaunchedSandbox {
    pub container_id: String,
    pub subdomain: String,
}

/// Drives the container state machine: launch policy, watchers, stops,
/// completion, reconciliation. The only writer of container status.
pub struct Orchestrator {
    pub(crate) db: SqlitePool,
    runtime: Arc<RuntimeClient>,
    pub(crate) activity: Arc<ActivityTracker>,
    journal: EventJournal,
    pub(crate) config: Arc<Config>,
    launch_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    reconciling: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(
        db: SqlitePool,
        runtime: Arc<RuntimeClient>,
        activity: Arc<ActivityTracker>,
        journal: EventJournal,
        config: Arc<Config>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            db,
            runtime,
            activity,
            journal,
            config,
            launch_locks: Mutex::new(HashMap::new()),
            reconciling: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Seed activity from the registry and restart watchers for containers
    /// that survived a restart, then start the reconciler.
    pub async fn start(self: Arc<Self>) -> Result<(), OrchestratorError> {
        let running = ContainerRecord::list_running(&self.db).await?;
        info!("Recovering {} running container(s) from registry", running.len());

        for record in running {
            self.activity
                .seed(&record.subdomain, record.created_at)
                .await;
            watcher::spawn_watcher(self.clone(), record);
        }

        reconciler::spawn_reconciler(self.clone());
        Ok(())
    }

    /// Stop accepting launches and cancel watchers. Running containers are
    /// left alone; the next boot recovers them.
    pub fn begin_shutdown(&self) {
        info!("Orchestrator shutting down: launches disabled, watchers cancelled");
        let _ = self.shutdown_tx.send(true);
    }

    /// Launch a sandbox for (subject, exercise), enforcing the per-exercise
    /// and per-user policy.
    pub async fn launch(
        self: Arc<Self>,
        subject_id: &str,
        exercise_id: &str,
    ) -> Result<LaunchedSandbox, OrchestratorError> {
        if self.shutting_down() {
            return Err(OrchestratorError::ShuttingDown);
        }

        // Policy checks and the insert race only against launches by the
        // same subject; the partial unique index backstops anything that
        // slips through.
        let subject_lock = {
            let mut locks = self.launch_locks.lock().await;
            locks
                .entry(subject_id.to_string())
                .or_default()
                .clone()
        };
        let _guard = subject_lock.lock().await;

        if let Some(existing) =
            ContainerRecord::get_by_subject_exercise_running(&self.db, subject_id, exercise_id)
                .await?
        {
            return Err(OrchestratorError::AlreadyRunning {
                subdomain: existing.subdomain,
            });
        }

        let running = ContainerRecord::count_running_by_subject(&self.db, subject_id).await?;
        if running >= self.config.max_per_user as i64 {
            return Err(OrchestratorError::QuotaExceeded {
                limit: self.config.max_per_user,
            });
        }

        let exercise = Exercise::find_by_id(&self.db, exercise_id)
            .await?
            .ok_or_else(|| OrchestratorError::UnknownExercise(exercise_id.to_string()))?;

        self.runtime.ensure_network(&self.config.network_name).await?;

        let subdomain = Uuid::new_v4().to_string();
        let spec = SandboxSpec {
            image_tag: exercise.image_tag.clone(),
            container_name: format!("training-{subdomain}"),
            subdomain: subdomain.clone(),
            subject_id: subject_id.to_string(),
            exercise_id: exercise_id.to_string(),
            env: vec![
                format!("TRAINING_SUBDOMAIN={subdomain}"),
                format!("CALLBACK_URL={}", self.config.callback_url(&subdomain)),
            ],
            network: self.config.network_name.clone(),
        };

        let container_id = self.runtime.create_and_start(&spec).await?;

        let host_port = match self.runtime.host_port(&container_id).await {
            Ok(Some(port)) => port,
            Ok(None) => {
                let _ = self.runtime.stop_and_remove(&container_id).await;
                return Err(OrchestratorError::RuntimeRefused(
                    "runtime assigned no host port".into(),
                ));
            }
            Err(e) => {
                let _ = self.runtime.stop_and_remove(&container_id).await;
                return Err(e.into());
            }
        };

        let record = match ContainerRecord::insert(
            &self.db,
            &NewContainerRecord {
                id: container_id.clone(),
                exercise_id: exercise_id.to_string(),
                subject_id: subject_id.to_string(),
                subdomain: subdomain.clone(),
                host_port,
            },
        )
        .await
        {
            Ok(record) => record,
            Err(e) => {
                // Don't leak the started container when the registry insert
                // loses a race or fails outright
                let _ = self.runtime.stop_and_remove(&container_id).await;
                if is_unique_violation(&e) {
                    let existing = ContainerRecord::get_by_subject_exercise_running(
                        &self.db, subject_id, exercise_id,
                    )
                    .await?;
                    return Err(OrchestratorError::AlreadyRunning {
                        subdomain: existing.map(|r| r.subdomain).unwrap_or_default(),
                    });
                }
                return Err(e.into());
            }
        };

        self.activity.seed(&subdomain, record.created_at).await;
        watcher::spawn_watcher(self.clone(), record.clone());

        self.journal.record(
            EventKind::ContainerCreated,
            Some(subject_id.to_string()),
            Some(container_id.clone()),
            serde_json::json!({
                "exercise_id": exercise_id,
                "subdomain": subdomain,
                "host_port": record.host_port,
            }),
        );

        if let Err(e) = ExerciseProgress::record_attempt(&self.db, subject_id, exercise_id).await {
            warn!(
                subject = subject_id,
                exercise = exercise_id,
                "Failed to record exercise attempt: {}",
                e
            );
        }

        info!(
            container = %container_id,
            subject = subject_id,
            exercise = exercise_id,
            subdomain = %subdomain,
            "Sandbox launched"
        );

        Ok(LaunchedSandbox {
            container_id,
            subdomain,
        })
    }

    /// Subject-initiated stop; only the owner may stop a container.
    pub async fn stop_owned(
        &self,
        subject_id: &str,
        container_id: &str,
    ) -> Result<(), OrchestratorError> {
        let record = ContainerRecord::find_by_id(&self.db, container_id)
            .await?
            .ok_or(OrchestratorError::NotFound)?;
        if record.subject_id != subject_id {
            return Err(OrchestratorError::Forbidden);
        }
        self.reap(&record, StopReason::User).await
    }

    /// Admin force-stop of any container.
    pub async fn stop_any(&self, container_id: &str) -> Result<(), OrchestratorError> {
        let record = ContainerRecord::find_by_id(&self.db, container_id)
            .await?
            .ok_or(OrchestratorError::NotFound)?;
        self.reap(&record, StopReason::Admin).await
    }

    /// Tear a container down. The runtime stop is best-effort; the registry
    /// update and activity eviction always happen. A `completed` record keeps
    /// its status (the monotone update is a no-op).
    pub(crate) async fn reap(
        &self,
        record: &ContainerRecord,
        reason: StopReason,
    ) -> Result<(), OrchestratorError> {
        if let Err(e) = self.runtime.stop_and_remove(&record.id).await {
            warn!(
                container = %record.id,
                "Runtime stop failed (container may already be gone): {}",
                e
            );
        }

        ContainerRecord::set_status(&self.db, &record.id, ContainerStatus::Stopped).await?;
        self.activity.evict(&record.subdomain).await;

        self.journal.record(
            EventKind::ContainerStopped,
            Some(record.subject_id.clone()),
            Some(record.id.clone()),
            serde_json::json!({
                "reason": reason.as_str(),
                "subdomain": record.subdomain,
            }),
        );
        Ok(())
    }

    /// Completion callback from inside the sandbox. Idempotent; does not
    /// stop the container unless configured to.
    pub async fn complete(
        &self,
        subdomain: &str,
        payload: serde_json::Value,
    ) -> Result<(), OrchestratorError> {
        let record = ContainerRecord::get_by_subdomain(&self.db, subdomain)
            .await?
            .ok_or(OrchestratorError::NotFound)?;

        ExerciseProgress::mark_completed(&self.db, &record.subject_id, &record.exercise_id)
            .await?;
        ContainerRecord::set_status(&self.db, &record.id, ContainerStatus::Completed).await?;

        self.journal.record(
            EventKind::ExerciseCompleted,
            Some(record.subject_id.clone()),
            Some(record.exercise_id.clone()),
            serde_json::json!({
                "subdomain": subdomain,
                "container_id": record.id,
                "payload": payload,
            }),
        );

        info!(
            subject = %record.subject_id,
            exercise = %record.exercise_id,
            "Exercise completed"
        );

        if self.config.complete_stops_container {
            self.reap(&record, StopReason::User).await?;
        }
        Ok(())
    }

    /// Align registry and runtime: remove orphan runtime containers, mark
    /// registry rows whose container vanished, purge old terminal rows,
    /// prune. Returns false when another run is already in flight.
    pub async fn reconcile(&self) -> Result<bool, OrchestratorError> {
        if self
            .reconciling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }
        let result = self.reconcile_inner().await;
        self.reconciling.store(false, Ordering::SeqCst);
        result.map(|_| true)
    }

    async fn reconcile_inner(&self) -> Result<(), OrchestratorError> {
        info!("Reconciliation started");

        // Runtime side: containers we labeled but no longer track
        let sandboxes = self.runtime.list_sandboxes(true).await?;
        for sandbox in &sandboxes {
            if ContainerRecord::find_by_id(&self.db, &sandbox.id).await?.is_none() {
                warn!(container = %sandbox.id, "Removing orphan runtime container");
                if let Err(e) = self.runtime.stop_and_remove(&sandbox.id).await {
                    error!(container = %sandbox.id, "Orphan removal failed: {}", e);
                    continue;
                }
                self.journal.record(
                    EventKind::ContainerStopped,
                    sandbox.labels.get(crate::docker::LABEL_SUBJECT).cloned(),
                    Some(sandbox.id.clone()),
                    serde_json::json!({ "reason": StopReason::Orphan.as_str() }),
                );
            }
        }

        // Registry side: running rows whose container is gone
        let live: std::collections::HashSet<&str> =
            sandboxes.iter().map(|s| s.id.as_str()).collect();
        for record in ContainerRecord::list_running(&self.db).await? {
            if !live.contains(record.id.as_str()) {
                warn!(
                    container = %record.id,
                    subdomain = %record.subdomain,
                    "Registry row has no runtime container, marking stopped"
                );
                ContainerRecord::set_status(&self.db, &record.id, ContainerStatus::Stopped)
                    .await?;
                self.activity.evict(&record.subdomain).await;
                self.journal.record(
                    EventKind::ContainerStopped,
                    Some(record.subject_id.clone()),
                    Some(record.id.clone()),
                    serde_json::json!({
                        "reason": StopReason::Orphan.as_str(),
                        "subdomain": record.subdomain,
                    }),
                );
            }
        }

        let retention = chrono::Duration::from_std(self.config.stopped_retention)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let purged =
            ContainerRecord::purge_stopped_older_than(&self.db, Utc::now() - retention).await?;
        if purged > 0 {
            info!("Purged {} terminal registry row(s)", purged);
        }

        match self.runtime.prune().await {
            Ok(count) if count > 0 => info!("Pruned {} stopped container(s)", count),
            Ok(_) => {}
            Err(e) => warn!("Runtime prune failed: {}", e),
        }

        info!("Reconciliation finished");
        Ok(())
    }
}
