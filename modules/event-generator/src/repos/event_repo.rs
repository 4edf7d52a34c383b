//! Event store: durable table of generated events keyed by event id

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::StoreResult;
use crate::models::{Event, NewEvent};

/// Result of applying a confirmation to an event
#[derive(Debug, Clone, PartialEq)]
pub enum MarkOutcome {
    /// The event moved from unprocessed to processed
    Marked(Event),
    /// The event was already processed; nothing changed
    AlreadyProcessed(Event),
    NotFound,
}

/// Storage contract for generated events
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a new event, assigning `id`/`created_at` when absent
    async fn save(&self, event: NewEvent) -> StoreResult<Event>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Event>>;

    /// Mark an event processed
    ///
    /// The transition is a single conditional write, so concurrent or repeated
    /// confirmations for the same id produce exactly one `Marked`.
    async fn mark_processed(&self, id: Uuid, processed_at: DateTime<Utc>)
        -> StoreResult<MarkOutcome>;

    async fn count(&self) -> StoreResult<i64>;

    async fn count_by_processed(&self, processed: bool) -> StoreResult<i64>;

    /// Events with the given processed flag, oldest first
    async fn list_by_processed(&self, processed: bool) -> StoreResult<Vec<Event>>;

    /// All events, oldest first
    async fn list_all(&self) -> StoreResult<Vec<Event>>;

    /// Events whose hyphenated id contains `text` (case-insensitive)
    async fn find_by_id_substring(&self, text: &str) -> StoreResult<Vec<Event>>;
}

const EVENT_COLUMNS: &str =
    "id, event_type, service_name, payload, created_at, processed_at, is_processed";

/// Postgres-backed event store (`generated_events`)
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn save(&self, event: NewEvent) -> StoreResult<Event> {
        let event = event.into_event();

        let saved = sqlx::query_as::<_, Event>(&format!(
            r#"
            INSERT INTO generated_events
                (id, event_type, service_name, payload, created_at, processed_at, is_processed)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(event.id)
        .bind(&event.event_type)
        .bind(&event.service_name)
        .bind(&event.payload)
        .bind(event.created_at)
        .bind(event.processed_at)
        .bind(event.is_processed)
        .fetch_one(&self.pool)
        .await?;

        Ok(saved)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(&format!(
            "SELECT {} FROM generated_events WHERE id = $1",
            EVENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(event)
    }

    async fn mark_processed(
        &self,
        id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> StoreResult<MarkOutcome> {
        let marked = sqlx::query_as::<_, Event>(&format!(
            r#"
            UPDATE generated_events
            SET is_processed = TRUE, processed_at = $2
            WHERE id = $1 AND is_processed = FALSE
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(id)
        .bind(processed_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(event) = marked {
            return Ok(MarkOutcome::Marked(event));
        }

        Ok(match self.get(id).await? {
            Some(existing) => MarkOutcome::AlreadyProcessed(existing),
            None => MarkOutcome::NotFound,
        })
    }

    async fn count(&self) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM generated_events")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn count_by_processed(&self, processed: bool) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM generated_events WHERE is_processed = $1",
        )
        .bind(processed)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn list_by_processed(&self, processed: bool) -> StoreResult<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(&format!(
            "SELECT {} FROM generated_events WHERE is_processed = $1 ORDER BY created_at ASC",
            EVENT_COLUMNS
        ))
        .bind(processed)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn list_all(&self) -> StoreResult<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(&format!(
            "SELECT {} FROM generated_events ORDER BY created_at ASC",
            EVENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn find_by_id_substring(&self, text: &str) -> StoreResult<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(&format!(
            r#"
            SELECT {}
            FROM generated_events
            WHERE strpos(id::text, $1) > 0
            ORDER BY created_at ASC
            "#,
            EVENT_COLUMNS
        ))
        .bind(text.to_lowercase())
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}
