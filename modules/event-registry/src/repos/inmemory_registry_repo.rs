//! In-memory registry store for tests and `STORE_TYPE=inmemory`

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::registry_repo::{InsertOutcome, RegistryStore};
use super::{StoreError, StoreResult};
use crate::models::{EventFilter, Page, PageRequest, RegisteredEvent};

#[derive(Default)]
struct Tables {
    by_id: HashMap<Uuid, RegisteredEvent>,
    /// original_event_id -> id; the uniqueness index
    by_original: HashMap<Uuid, Uuid>,
}

/// Registry store backed by a mutex-guarded map with a unique index on
/// `original_event_id`
#[derive(Clone, Default)]
pub struct InMemoryRegistryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("registry store lock poisoned".to_string()))
    }

    fn by_registration_order(mut events: Vec<RegisteredEvent>) -> Vec<RegisteredEvent> {
        events.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.id.cmp(&b.id)));
        events
    }

    fn matching<F>(&self, predicate: F) -> StoreResult<Vec<RegisteredEvent>>
    where
        F: Fn(&RegisteredEvent) -> bool,
    {
        let events = self
            .lock()?
            .by_id
            .values()
            .filter(|e| predicate(e))
            .cloned()
            .collect();
        Ok(Self::by_registration_order(events))
    }

    fn distinct<F>(&self, field: F) -> StoreResult<Vec<String>>
    where
        F: Fn(&RegisteredEvent) -> &str,
    {
        let mut values: Vec<String> = self
            .lock()?
            .by_id
            .values()
            .map(|e| field(e).to_string())
            .collect();
        values.sort();
        values.dedup();
        Ok(values)
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistryStore {
    async fn register(&self, event: RegisteredEvent) -> StoreResult<InsertOutcome> {
        let mut tables = self.lock()?;

        if let Some(existing_id) = tables.by_original.get(&event.original_event_id) {
            let existing = tables.by_id.get(existing_id).cloned().ok_or_else(|| {
                StoreError::Unavailable("registry index out of sync".to_string())
            })?;
            return Ok(InsertOutcome::AlreadyRegistered(existing));
        }

        tables.by_original.insert(event.original_event_id, event.id);
        tables.by_id.insert(event.id, event.clone());
        Ok(InsertOutcome::Inserted(event))
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<RegisteredEvent>> {
        Ok(self.lock()?.by_id.get(&id).cloned())
    }

    async fn find_by_original_id(
        &self,
        original_event_id: Uuid,
    ) -> StoreResult<Option<RegisteredEvent>> {
        let tables = self.lock()?;
        Ok(tables
            .by_original
            .get(&original_event_id)
            .and_then(|id| tables.by_id.get(id))
            .cloned())
    }

    async fn count(&self) -> StoreResult<i64> {
        Ok(self.lock()?.by_id.len() as i64)
    }

    async fn list_all(&self) -> StoreResult<Vec<RegisteredEvent>> {
        self.matching(|_| true)
    }

    async fn find_with_filters(
        &self,
        filter: &EventFilter,
        page: &PageRequest,
    ) -> StoreResult<Page<RegisteredEvent>> {
        let filter = filter.normalized();
        let mut events = self.matching(|e| filter.matches(e))?;
        let total = events.len() as i64;

        page.sort(&mut events);
        let content = events
            .into_iter()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(page.size.max(1) as usize)
            .collect();

        Ok(Page::new(content, page, total))
    }

    async fn distinct_event_types(&self) -> StoreResult<Vec<String>> {
        self.distinct(|e| e.event_type.as_str())
    }

    async fn distinct_service_names(&self) -> StoreResult<Vec<String>> {
        self.distinct(|e| e.service_name.as_str())
    }

    async fn find_by_id_substring(&self, text: &str) -> StoreResult<Vec<RegisteredEvent>> {
        let needle = text.to_lowercase();
        self.matching(|e| e.id.to_string().contains(&needle))
    }

    async fn find_by_original_id_substring(
        &self,
        text: &str,
    ) -> StoreResult<Vec<RegisteredEvent>> {
        let needle = text.to_lowercase();
        self.matching(|e| e.original_event_id.to_string().contains(&needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SortDirection, SortField};
    use chrono::{Duration, TimeZone, Utc};

    fn registration(event_type: &str, service_name: &str, minute: u32) -> RegisteredEvent {
        let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 9, minute, 0).unwrap();
        RegisteredEvent {
            id: Uuid::new_v4(),
            original_event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            service_name: service_name.to_string(),
            payload: "p".to_string(),
            created_at,
            registered_at: created_at + Duration::seconds(1),
            processed_at: created_at + Duration::seconds(1),
        }
    }

    async fn seeded() -> InMemoryRegistryStore {
        let store = InMemoryRegistryStore::new();
        for (i, (event_type, service)) in [
            ("ORDER", "shop"),
            ("PAYMENT", "billing"),
            ("ORDER", "billing"),
            ("REFUND", "shop"),
            ("ORDER", "shop"),
        ]
        .iter()
        .enumerate()
        {
            store
                .register(registration(event_type, service, i as u32))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_original_id() {
        let store = InMemoryRegistryStore::new();
        let first = registration("ORDER", "shop", 0);
        let mut duplicate = registration("ORDER", "shop", 1);
        duplicate.original_event_id = first.original_event_id;

        assert_eq!(
            store.register(first.clone()).await.unwrap(),
            InsertOutcome::Inserted(first.clone())
        );
        assert_eq!(
            store.register(duplicate).await.unwrap(),
            InsertOutcome::AlreadyRegistered(first.clone())
        );
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(
            store.find_by_original_id(first.original_event_id).await.unwrap(),
            Some(first)
        );
    }

    #[tokio::test]
    async fn test_concurrent_register_inserts_once() {
        let store = InMemoryRegistryStore::new();
        let original_event_id = Uuid::new_v4();

        let mut handles = Vec::new();
        for minute in 0..16 {
            let store = store.clone();
            let mut event = registration("ORDER", "shop", minute);
            event.original_event_id = original_event_id;
            handles.push(tokio::spawn(async move { store.register(event).await.unwrap() }));
        }

        let mut inserted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), InsertOutcome::Inserted(_)) {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_filters_and_paging() {
        let store = seeded().await;

        let filter = EventFilter {
            event_type: Some("ORDER".to_string()),
            service_name: Some("shop".to_string()),
            ..Default::default()
        };
        let page = store
            .find_with_filters(&filter, &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total_items, 2);
        assert_eq!(page.content.len(), 2);
        // Newest first by default
        assert!(page.content[0].created_at > page.content[1].created_at);

        let request = PageRequest::new(1, 2).sorted_by(SortField::CreatedAt, SortDirection::Asc);
        let second = store
            .find_with_filters(&EventFilter::default(), &request)
            .await
            .unwrap();
        assert_eq!(second.total_items, 5);
        assert_eq!(second.total_pages, 3);
        assert_eq!(second.current_page, 1);
        assert!(second.has_next && second.has_previous);
        let types: Vec<_> = second.content.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["ORDER", "REFUND"]);
    }

    #[tokio::test]
    async fn test_page_index_past_the_end() {
        let store = seeded().await;

        let page = store
            .find_with_filters(&EventFilter::default(), &PageRequest::new(u32::MAX, 20))
            .await
            .unwrap();

        assert!(page.content.is_empty());
        assert_eq!(page.total_items, 5);
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.current_page, u32::MAX);
        assert!(!page.has_next);
        assert!(page.has_previous);
    }

    #[tokio::test]
    async fn test_date_range_filter() {
        let store = seeded().await;
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 1, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 9, 3, 0).unwrap();

        let filter = EventFilter {
            start_date: Some(start),
            end_date: Some(end),
            ..Default::default()
        };
        let page = store
            .find_with_filters(&filter, &PageRequest::default())
            .await
            .unwrap();

        assert_eq!(page.total_items, 3);
    }

    #[tokio::test]
    async fn test_distinct_values_sorted() {
        let store = seeded().await;

        assert_eq!(
            store.distinct_event_types().await.unwrap(),
            vec!["ORDER", "PAYMENT", "REFUND"]
        );
        assert_eq!(
            store.distinct_service_names().await.unwrap(),
            vec!["billing", "shop"]
        );
    }

    #[tokio::test]
    async fn test_substring_search() {
        let store = InMemoryRegistryStore::new();
        let event = registration("ORDER", "shop", 0);
        store.register(event.clone()).await.unwrap();

        let by_id = store
            .find_by_id_substring(&event.id.to_string()[..8].to_uppercase())
            .await
            .unwrap();
        assert_eq!(by_id, vec![event.clone()]);

        let by_original = store
            .find_by_original_id_substring(&event.original_event_id.to_string()[24..])
            .await
            .unwrap();
        assert_eq!(by_original, vec![event]);
    }
}
