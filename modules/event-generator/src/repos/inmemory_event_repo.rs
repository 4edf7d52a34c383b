//! In-memory event store for tests and `STORE_TYPE=inmemory`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::event_repo::{EventStore, MarkOutcome};
use super::{StoreError, StoreResult};
use crate::models::{Event, NewEvent};

/// Event store backed by a mutex-guarded map
///
/// Every operation takes the lock once, so the processed transition is atomic
/// the same way the conditional UPDATE is in Postgres.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<Mutex<HashMap<Uuid, Event>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, HashMap<Uuid, Event>>> {
        self.events
            .lock()
            .map_err(|_| StoreError::Unavailable("event store lock poisoned".to_string()))
    }

    fn sorted(mut events: Vec<Event>) -> Vec<Event> {
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        events
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save(&self, event: NewEvent) -> StoreResult<Event> {
        let event = event.into_event();
        self.lock()?.insert(event.id, event.clone());
        Ok(event)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Event>> {
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn mark_processed(
        &self,
        id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> StoreResult<MarkOutcome> {
        let mut events = self.lock()?;

        Ok(match events.get_mut(&id) {
            None => MarkOutcome::NotFound,
            Some(event) if event.is_processed => MarkOutcome::AlreadyProcessed(event.clone()),
            Some(event) => {
                event.is_processed = true;
                event.processed_at = Some(processed_at);
                MarkOutcome::Marked(event.clone())
            }
        })
    }

    async fn count(&self) -> StoreResult<i64> {
        Ok(self.lock()?.len() as i64)
    }

    async fn count_by_processed(&self, processed: bool) -> StoreResult<i64> {
        Ok(self
            .lock()?
            .values()
            .filter(|e| e.is_processed == processed)
            .count() as i64)
    }

    async fn list_by_processed(&self, processed: bool) -> StoreResult<Vec<Event>> {
        let events = self
            .lock()?
            .values()
            .filter(|e| e.is_processed == processed)
            .cloned()
            .collect();
        Ok(Self::sorted(events))
    }

    async fn list_all(&self) -> StoreResult<Vec<Event>> {
        let events = self.lock()?.values().cloned().collect();
        Ok(Self::sorted(events))
    }

    async fn find_by_id_substring(&self, text: &str) -> StoreResult<Vec<Event>> {
        let needle = text.to_lowercase();
        let events = self
            .lock()?
            .values()
            .filter(|e| e.id.to_string().contains(&needle))
            .cloned()
            .collect();
        Ok(Self::sorted(events))
    }
}
