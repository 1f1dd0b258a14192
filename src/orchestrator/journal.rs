use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::error;

use crate::shared::models::{Event, EventKind};

struct JournalEntry {
    kind: EventKind,
    subject_id: Option<String>,
    target_id: Option<String>,
    attributes: serde_json::Value,
}

/// Append-only orchestration journal. Emitters push onto an unbounded
/// channel drained by a single writer task, so recording never blocks the
/// hot paths.
#[derive(Clone)]
pub struct EventJournal {
    tx: mpsc::UnboundedSender<JournalEntry>,
}

impl EventJournal {
    pub fn start(db: SqlitePool) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<JournalEntry>();

        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(e) = Event::append(
                    &db,
                    entry.kind.as_str(),
                    entry.subject_id.as_deref(),
                    entry.target_id.as_deref(),
                    &entry.attributes,
                )
                .await
                {
                    error!("Failed to journal {} event: {}", entry.kind.as_str(), e);
                }
            }
        });

        Self { tx }
    }

    pub fn record(
        &self,
        kind: EventKind,
        subject_id: Option<String>,
        target_id: Option<String>,
        attributes: serde_json::Value,
    ) {
        // Send only fails when the writer task is gone, i.e. at shutdown
        let _ = self.tx.send(JournalEntry {
            kind,
            subject_id,
            target_id,
            attributes,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::test_pool;
    use std::time::Duration;

    #[tokio::test]
    async fn recorded_events_land_in_the_table() {
        let pool = test_pool().await;
        let journal = EventJournal::start(pool.clone());

        journal.record(
            EventKind::ContainerCreated,
            Some("u1".to_string()),
            Some("container-1".to_string()),
            serde_json::json!({"subdomain": "abc"}),
        );

        // The writer task runs asynchronously; poll briefly
        let mut rows = Vec::new();
        for _ in 0..50 {
            rows = Event::list(&pool, 10, None).await.unwrap();
            if !rows.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, "container.created");
        assert_eq!(rows[0].subject_id.as_deref(), Some("u1"));
        let attributes: serde_json::Value = serde_json::from_str(&rows[0].attributes).unwrap();
        assert_eq!(attributes["subdomain"], "abc");
    }
}
