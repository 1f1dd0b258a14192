use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::interval;
use tracing::{debug, error, info};

use super::Orchestrator;
use crate::shared::models::{ContainerRecord, ContainerStatus};

/// Why a container left the running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    User,
    Admin,
    Idle,
    Lifetime,
    Orphan,
    Shutdown,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::Idle => "idle",
            Self::Lifetime => "lifetime",
            Self::Orphan => "orphan",
            Self::Shutdown => "shutdown",
        }
    }
}

/// The watcher's per-tick decision: reap when the idle window or the
/// absolute lifetime has elapsed.
pub fn reap_reason(
    now: DateTime<Utc>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    idle_limit: Duration,
    lifetime_limit: Duration,
) -> Option<StopReason> {
    let idle = chrono::Duration::from_std(idle_limit).unwrap_or(chrono::Duration::MAX);
    let lifetime = chrono::Duration::from_std(lifetime_limit).unwrap_or(chrono::Duration::MAX);

    if now - last_activity >= idle {
        Some(StopReason::Idle)
    } else if now - created_at >= lifetime {
        Some(StopReason::Lifetime)
    } else {
        None
    }
}

/// One watcher task per running container. Exits within one tick of the
/// record leaving `running` by any path, or on shutdown.
pub(super) fn spawn_watcher(orchestrator: Arc<Orchestrator>, record: ContainerRecord) {
    tokio::spawn(async move {
        let mut shutdown = orchestrator.shutdown_signal();
        let mut ticker = interval(orchestrator.config.check_interval);
        // The first tick of tokio's interval fires immediately
        ticker.tick().await;

        debug!(
            container = %record.id,
            subdomain = %record.subdomain,
            "Watcher started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    debug!(container = %record.id, "Watcher cancelled by shutdown");
                    return;
                }
            }

            let current = match ContainerRecord::find_by_id(&orchestrator.db, &record.id).await {
                Ok(Some(current)) => current,
                Ok(None) => return,
                Err(e) => {
                    error!(container = %record.id, "Watcher registry read failed: {}", e);
                    continue;
                }
            };
            if current.status != ContainerStatus::Running {
                return;
            }

            let last_activity = orchestrator
                .activity
                .last_seen(&record.subdomain)
                .await
                .unwrap_or(current.last_activity);

            // Persist observed activity so the registry fallback stays
            // close to the tracker across restarts
            if last_activity > current.last_activity {
                if let Err(e) = ContainerRecord::touch_last_activity(
                    &orchestrator.db,
                    &record.subdomain,
                    last_activity,
                )
                .await
                {
                    error!(container = %record.id, "Failed to persist last activity: {}", e);
                }
            }

            if let Some(reason) = reap_reason(
                Utc::now(),
                current.created_at,
                last_activity,
                orchestrator.config.idle_limit,
                orchestrator.config.lifetime_limit,
            ) {
                info!(
                    container = %record.id,
                    subdomain = %record.subdomain,
                    reason = reason.as_str(),
                    "Reaping container"
                );
                if let Err(e) = orchestrator.reap(&current, reason).await {
                    error!(container = %record.id, "Reap failed: {}", e);
                }
                return;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const IDLE: Duration = Duration::from_secs(15 * 60);
    const LIFETIME: Duration = Duration::from_secs(2 * 60 * 60);

    #[test]
    fn fresh_container_is_left_alone() {
        let now = Utc::now();
        assert_eq!(reap_reason(now, now, now, IDLE, LIFETIME), None);
    }

    #[test]
    fn idle_window_elapsed_reaps_with_idle_reason() {
        let now = Utc::now();
        let created = now - ChronoDuration::minutes(30);
        let last_activity = now - ChronoDuration::minutes(16);
        assert_eq!(
            reap_reason(now, created, last_activity, IDLE, LIFETIME),
            Some(StopReason::Idle)
        );
    }

    #[test]
    fn activity_inside_the_window_resets_idle() {
        let now = Utc::now();
        let created = now - ChronoDuration::minutes(90);
        let last_activity = now - ChronoDuration::minutes(14);
        assert_eq!(reap_reason(now, created, last_activity, IDLE, LIFETIME), None);
    }

    #[test]
    fn lifetime_elapsed_reaps_even_when_active() {
        let now = Utc::now();
        let created = now - ChronoDuration::hours(2) - ChronoDuration::seconds(1);
        let last_activity = now - ChronoDuration::seconds(10);
        assert_eq!(
            reap_reason(now, created, last_activity, IDLE, LIFETIME),
            Some(StopReason::Lifetime)
        );
    }

    #[test]
    fn boundary_is_inclusive() {
        let now = Utc::now();
        let last_activity = now - ChronoDuration::minutes(15);
        assert_eq!(
            reap_reason(now, now, last_activity, IDLE, LIFETIME),
            Some(StopReason::Idle)
        );
    }
}
