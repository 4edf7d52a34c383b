//! Registry store: registered events keyed by a surrogate id, unique on
//! `original_event_id`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::StoreResult;
use crate::models::{EventFilter, Page, PageRequest, RegisteredEvent};

/// Result of the atomic insert-or-get-existing
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// This call created the registration
    Inserted(RegisteredEvent),
    /// A registration for the same original event already existed; nothing was written
    AlreadyRegistered(RegisteredEvent),
}

#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Insert `event` unless its `original_event_id` is already registered
    ///
    /// The existence check and the insert are one storage operation, so
    /// concurrent calls for the same original event yield exactly one
    /// `Inserted`.
    async fn register(&self, event: RegisteredEvent) -> StoreResult<InsertOutcome>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<RegisteredEvent>>;

    async fn find_by_original_id(&self, original_event_id: Uuid)
        -> StoreResult<Option<RegisteredEvent>>;

    async fn count(&self) -> StoreResult<i64>;

    /// All registrations, oldest registration first
    async fn list_all(&self) -> StoreResult<Vec<RegisteredEvent>>;

    async fn find_with_filters(
        &self,
        filter: &EventFilter,
        page: &PageRequest,
    ) -> StoreResult<Page<RegisteredEvent>>;

    /// Sorted ascending
    async fn distinct_event_types(&self) -> StoreResult<Vec<String>>;

    /// Sorted ascending
    async fn distinct_service_names(&self) -> StoreResult<Vec<String>>;

    /// Registrations whose hyphenated `id` contains `text` (case-insensitive)
    async fn find_by_id_substring(&self, text: &str) -> StoreResult<Vec<RegisteredEvent>>;

    /// Registrations whose hyphenated `original_event_id` contains `text` (case-insensitive)
    async fn find_by_original_id_substring(&self, text: &str)
        -> StoreResult<Vec<RegisteredEvent>>;
}

const REGISTERED_COLUMNS: &str = "id, original_event_id, event_type, service_name, payload, \
     created_at, registered_at, processed_at";

// Filters bind as NULL when absent.
const FILTER_PREDICATE: &str = "($1::TIMESTAMPTZ IS NULL OR created_at >= $1) \
     AND ($2::TIMESTAMPTZ IS NULL OR created_at <= $2) \
     AND ($3::TEXT IS NULL OR event_type = $3) \
     AND ($4::TEXT IS NULL OR service_name = $4)";

#[derive(Clone)]
pub struct PgRegistryStore {
    pool: PgPool,
}

impl PgRegistryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_by_column_substring(
        &self,
        column: &str,
        text: &str,
    ) -> StoreResult<Vec<RegisteredEvent>> {
        let events = sqlx::query_as::<_, RegisteredEvent>(&format!(
            "SELECT {} FROM registered_events \
             WHERE strpos({}::text, $1) > 0 \
             ORDER BY registered_at ASC",
            REGISTERED_COLUMNS, column
        ))
        .bind(text.to_lowercase())
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn distinct_column(&self, column: &str) -> StoreResult<Vec<String>> {
        let values = sqlx::query_scalar::<_, String>(&format!(
            "SELECT DISTINCT {0} FROM registered_events ORDER BY {0} ASC",
            column
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(values)
    }
}

#[async_trait]
impl RegistryStore for PgRegistryStore {
    async fn register(&self, event: RegisteredEvent) -> StoreResult<InsertOutcome> {
        let inserted = sqlx::query_as::<_, RegisteredEvent>(&format!(
            r#"
            INSERT INTO registered_events
                (id, original_event_id, event_type, service_name, payload,
                 created_at, registered_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (original_event_id) DO NOTHING
            RETURNING {}
            "#,
            REGISTERED_COLUMNS
        ))
        .bind(event.id)
        .bind(event.original_event_id)
        .bind(&event.event_type)
        .bind(&event.service_name)
        .bind(&event.payload)
        .bind(event.created_at)
        .bind(event.registered_at)
        .bind(event.processed_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(event) = inserted {
            return Ok(InsertOutcome::Inserted(event));
        }

        // Rows are never deleted, so the conflicting row is still there.
        let existing = self
            .find_by_original_id(event.original_event_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;

        Ok(InsertOutcome::AlreadyRegistered(existing))
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<RegisteredEvent>> {
        let event = sqlx::query_as::<_, RegisteredEvent>(&format!(
            "SELECT {} FROM registered_events WHERE id = $1",
            REGISTERED_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(event)
    }

    async fn find_by_original_id(
        &self,
        original_event_id: Uuid,
    ) -> StoreResult<Option<RegisteredEvent>> {
        let event = sqlx::query_as::<_, RegisteredEvent>(&format!(
            "SELECT {} FROM registered_events WHERE original_event_id = $1",
            REGISTERED_COLUMNS
        ))
        .bind(original_event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(event)
    }

    async fn count(&self) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM registered_events")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn list_all(&self) -> StoreResult<Vec<RegisteredEvent>> {
        let events = sqlx::query_as::<_, RegisteredEvent>(&format!(
            "SELECT {} FROM registered_events ORDER BY registered_at ASC",
            REGISTERED_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn find_with_filters(
        &self,
        filter: &EventFilter,
        page: &PageRequest,
    ) -> StoreResult<Page<RegisteredEvent>> {
        let filter = filter.normalized();
        let start: Option<DateTime<Utc>> = filter.start_date;
        let end: Option<DateTime<Utc>> = filter.end_date;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM registered_events WHERE {}",
            FILTER_PREDICATE
        ))
        .bind(start)
        .bind(end)
        .bind(filter.event_type.as_deref())
        .bind(filter.service_name.as_deref())
        .fetch_one(&self.pool)
        .await?;

        let content = sqlx::query_as::<_, RegisteredEvent>(&format!(
            "SELECT {} FROM registered_events \
             WHERE {} \
             ORDER BY {} {}, id {} \
             LIMIT $5 OFFSET $6",
            REGISTERED_COLUMNS,
            FILTER_PREDICATE,
            page.sort.column(),
            page.direction.keyword(),
            page.direction.keyword()
        ))
        .bind(start)
        .bind(end)
        .bind(filter.event_type.as_deref())
        .bind(filter.service_name.as_deref())
        .bind(page.size.max(1) as i64)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page::new(content, page, total))
    }

    async fn distinct_event_types(&self) -> StoreResult<Vec<String>> {
        self.distinct_column("event_type").await
    }

    async fn distinct_service_names(&self) -> StoreResult<Vec<String>> {
        self.distinct_column("service_name").await
    }

    async fn find_by_id_substring(&self, text: &str) -> StoreResult<Vec<RegisteredEvent>> {
        self.find_by_column_substring("id", text).await
    }

    async fn find_by_original_id_substring(
        &self,
        text: &str,
    ) -> StoreResult<Vec<RegisteredEvent>> {
        self.find_by_column_substring("original_event_id", text)
            .await
    }
}
