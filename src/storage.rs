use crate::error::{PipelineError, Result};
use crate::types::CanonicalEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

/// Namespace for keys of events that carry no `source_id`.
const NATURAL_KEY_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6c, 0x69, 0x66, 0x65, 0x6c, 0x69, 0x6e, 0x65, 0x2d, 0x65, 0x76, 0x65, 0x6e, 0x74, 0x73, 0x21,
]);

/// Natural key used for upserts: the event's `source_id`, or a UUIDv5 over
/// source, title and start date.
pub fn natural_key(event: &CanonicalEvent) -> String {
    match &event.source_id {
        Some(id) => id.clone(),
        None => {
            let name = format!("{}\u{1f}{}\u{1f}{}", event.source, event.title, event.start_date);
            Uuid::new_v5(&NATURAL_KEY_NAMESPACE, name.as_bytes()).to_string()
        }
    }
}

/// An event as persisted: identified, owned and timestamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub key: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub event: CanonicalEvent,
}

impl StoredEvent {
    pub fn new(owner: impl Into<String>, event: CanonicalEvent) -> Self {
        let now = Utc::now();
        Self {
            key: natural_key(&event),
            owner: owner.into(),
            created_at: now,
            updated_at: now,
            event,
        }
    }
}

/// Sink for imported events
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn add(&self, event: StoredEvent) -> Result<()>;
    async fn update(&self, event: StoredEvent) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<StoredEvent>>;
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Upsert the whole batch in one step; returns the number of records written.
    async fn batch_insert(&self, events: Vec<StoredEvent>) -> Result<usize>;
}

/// In-memory store for the CLI and tests
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<Mutex<HashMap<String, StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, StoredEvent>>> {
        self.events.lock().map_err(|_| PipelineError::Store {
            message: "event map lock poisoned".to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored events, ordered by start date.
    pub fn snapshot(&self) -> Result<Vec<StoredEvent>> {
        let events = self.lock()?;
        let mut all: Vec<StoredEvent> = events.values().cloned().collect();
        all.sort_by(|a, b| {
            a.event
                .start_date
                .cmp(&b.event.start_date)
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(all)
    }

    /// Insert or overwrite; an overwrite keeps the original `created_at`.
    fn upsert(events: &mut HashMap<String, StoredEvent>, mut event: StoredEvent) {
        if let Some(existing) = events.get(&event.key) {
            event.created_at = existing.created_at;
        }
        events.insert(event.key.clone(), event);
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn add(&self, event: StoredEvent) -> Result<()> {
        let mut events = self.lock()?;
        debug!("Stored event: {} with key {}", event.event.title, event.key);
        Self::upsert(&mut events, event);
        Ok(())
    }

    async fn update(&self, mut event: StoredEvent) -> Result<()> {
        let mut events = self.lock()?;
        if !events.contains_key(&event.key) {
            return Err(PipelineError::Store {
                message: format!("cannot update missing event {}", event.key),
            });
        }
        event.updated_at = Utc::now();
        debug!("Updated event: {} with key {}", event.event.title, event.key);
        Self::upsert(&mut events, event);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEvent>> {
        let events = self.lock()?;
        Ok(events.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut events = self.lock()?;
        Ok(events.remove(key).is_some())
    }

    async fn batch_insert(&self, batch: Vec<StoredEvent>) -> Result<usize> {
        let mut events = self.lock()?;
        let written = batch.len();
        for event in batch {
            Self::upsert(&mut events, event);
        }
        debug!("Batch inserted {} events ({} stored)", written, events.len());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::create_valid_day;
    use crate::types::{Layer, SourceKind};

    fn event(title: &str, source_id: Option<&str>) -> CanonicalEvent {
        let mut builder = CanonicalEvent::builder(SourceKind::Csv, Layer::Work, "custom")
            .title(title)
            .start(create_valid_day(2020, 1, 1));
        if let Some(id) = source_id {
            builder = builder.source_id(id);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_natural_key_prefers_source_id() {
        assert_eq!(natural_key(&event("A", Some("csv:row:1"))), "csv:row:1");
        let derived = natural_key(&event("A", None));
        assert_eq!(derived, natural_key(&event("A", None)));
        assert_ne!(derived, natural_key(&event("B", None)));
        assert!(Uuid::parse_str(&derived).is_ok());
    }

    #[tokio::test]
    async fn test_batch_insert_upserts_by_key() {
        let store = InMemoryEventStore::new();
        let first = StoredEvent::new("me", event("Offer accepted", Some("k1")));
        let created = first.created_at;
        store
            .batch_insert(vec![first, StoredEvent::new("me", event("Other", None))])
            .await
            .unwrap();

        let mut changed = event("Offer accepted (signed)", Some("k1"));
        changed.description = Some("updated".into());
        store.batch_insert(vec![StoredEvent::new("me", changed)]).await.unwrap();

        assert_eq!(store.len(), 2);
        let stored = store.get("k1").await.unwrap().unwrap();
        assert_eq!(stored.event.title, "Offer accepted (signed)");
        assert_eq!(stored.created_at, created);
    }

    #[tokio::test]
    async fn test_update_requires_existing_record() {
        let store = InMemoryEventStore::new();
        let record = StoredEvent::new("me", event("Missing", Some("k2")));
        assert!(matches!(store.update(record.clone()).await, Err(PipelineError::Store { .. })));

        store.add(record.clone()).await.unwrap();
        store.update(record).await.unwrap();
        assert!(store.delete("k2").await.unwrap());
        assert!(!store.delete("k2").await.unwrap());
        assert!(store.is_empty());
    }
}
