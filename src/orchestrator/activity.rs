use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Process-local map of subdomain → last observed request time. Updated by
/// the proxy path, consulted by watchers, rebuilt from the registry on boot.
/// Touches are last-writer-wins.
#[derive(Default)]
pub struct ActivityTracker {
    entries: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request for `subdomain` at "now".
    pub async fn touch(&self, subdomain: &str) {
        self.entries
            .write()
            .await
            .insert(subdomain.to_string(), Utc::now());
    }

    /// Boot-time seeding; never overwrites a live entry.
    pub async fn seed(&self, subdomain: &str, when: DateTime<Utc>) {
        self.entries
            .write()
            .await
            .entry(subdomain.to_string())
            .or_insert(when);
    }

    pub async fn last_seen(&self, subdomain: &str) -> Option<DateTime<Utc>> {
        self.entries.read().await.get(subdomain).copied()
    }

    pub async fn evict(&self, subdomain: &str) {
        self.entries.write().await.remove(subdomain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn touch_advances_and_evict_clears() {
        let tracker = ActivityTracker::new();
        assert!(tracker.last_seen("a").await.is_none());

        tracker.touch("a").await;
        let first = tracker.last_seen("a").await.unwrap();

        tracker.touch("a").await;
        let second = tracker.last_seen("a").await.unwrap();
        assert!(second >= first);

        tracker.evict("a").await;
        assert!(tracker.last_seen("a").await.is_none());
    }

    #[tokio::test]
    async fn seed_never_overwrites_a_touch() {
        let tracker = ActivityTracker::new();
        tracker.touch("a").await;
        let touched = tracker.last_seen("a").await.unwrap();

        tracker.seed("a", touched - Duration::hours(1)).await;
        assert_eq!(tracker.last_seen("a").await, Some(touched));

        // Seeding a fresh entry takes effect
        let boot = Utc::now() - Duration::minutes(5);
        tracker.seed("b", boot).await;
        assert_eq!(tracker.last_seen("b").await, Some(boot));
    }
}
