//! Read side of the registry: lookups, filtered listing, statistics

use std::sync::Arc;
use uuid::Uuid;

use crate::models::{EventFilter, Page, PageRequest, RegisteredEvent, RegistryStats};
use crate::repos::{RegistryStore, StoreResult};

#[derive(Clone)]
pub struct RegistryQueryService {
    store: Arc<dyn RegistryStore>,
    service_name: String,
}

impl RegistryQueryService {
    pub fn new(store: Arc<dyn RegistryStore>, service_name: impl Into<String>) -> Self {
        Self {
            store,
            service_name: service_name.into(),
        }
    }

    pub async fn stats(&self) -> StoreResult<RegistryStats> {
        Ok(RegistryStats {
            service_name: self.service_name.clone(),
            total_registered_events: self.store.count().await?,
        })
    }

    pub async fn get(&self, id: Uuid) -> StoreResult<Option<RegisteredEvent>> {
        self.store.find_by_id(id).await
    }

    pub async fn get_by_original_id(&self, original_event_id: Uuid)
        -> StoreResult<Option<RegisteredEvent>> {
        self.store.find_by_original_id(original_event_id).await
    }

    pub async fn list_all(&self) -> StoreResult<Vec<RegisteredEvent>> {
        self.store.list_all().await
    }

    pub async fn list(
        &self,
        filter: &EventFilter,
        page: &PageRequest,
    ) -> StoreResult<Page<RegisteredEvent>> {
        self.store.find_with_filters(filter, page).await
    }

    pub async fn event_types(&self) -> StoreResult<Vec<String>> {
        self.store.distinct_event_types().await
    }

    pub async fn service_names(&self) -> StoreResult<Vec<String>> {
        self.store.distinct_service_names().await
    }

    /// Exact match when `text` is a known id, otherwise substring match
    pub async fn search_by_id(&self, text: &str) -> StoreResult<Vec<RegisteredEvent>> {
        let text = text.trim();
        if let Ok(id) = Uuid::parse_str(text) {
            if let Some(event) = self.store.find_by_id(id).await? {
                return Ok(vec![event]);
            }
        }
        self.store.find_by_id_substring(text).await
    }

    /// Exact match when `text` is a known original event id, otherwise substring match
    pub async fn search_by_original_id(&self, text: &str) -> StoreResult<Vec<RegisteredEvent>> {
        let text = text.trim();
        if let Ok(original_event_id) = Uuid::parse_str(text) {
            if let Some(event) = self.store.find_by_original_id(original_event_id).await? {
                return Ok(vec![event]);
            }
        }
        self.store.find_by_original_id_substring(text).await
    }
}
