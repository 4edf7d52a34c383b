use chrono::{DateTime, SubsecRound, Utc};
use event_bus::EventMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event recorded by the generator
///
/// `is_processed` only ever moves from false to true, once, when the
/// registry's confirmation is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub event_type: String,
    pub service_name: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub is_processed: bool,
}

impl Event {
    /// Envelope announcing this event on `events.created`
    pub fn to_message(&self) -> EventMessage {
        EventMessage {
            event_id: self.id,
            event_type: self.event_type.clone(),
            service_name: self.service_name.clone(),
            payload: self.payload.clone(),
            created_at: self.created_at,
        }
    }
}

/// Event to be stored; `id` and `created_at` are assigned on save when absent
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub id: Option<Uuid>,
    pub event_type: String,
    pub service_name: String,
    pub payload: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl NewEvent {
    pub fn new(event_type: String, service_name: String, payload: String) -> Self {
        Self {
            id: None,
            event_type,
            service_name,
            payload,
            created_at: None,
        }
    }

    /// Materialize the stored record, filling in missing id and timestamp
    ///
    /// `created_at` is truncated to microseconds, the precision of both the
    /// wire format and the database.
    pub fn into_event(self) -> Event {
        Event {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            event_type: self.event_type,
            service_name: self.service_name,
            payload: self.payload,
            created_at: self.created_at.unwrap_or_else(Utc::now).trunc_subsecs(6),
            processed_at: None,
            is_processed: false,
        }
    }
}

/// Producer-side counters for the read side
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStats {
    pub service_name: String,
    pub total_events: i64,
    pub processed_events: i64,
    pub unprocessed_events: i64,
    pub processed_percentage: f64,
    pub unprocessed_percentage: f64,
    /// `ACTIVE` or `PAUSED`
    pub generation_status: String,
}

impl GenerationStats {
    pub fn new(
        service_name: String,
        total: i64,
        processed: i64,
        unprocessed: i64,
        generation_status: &str,
    ) -> Self {
        let percentage = |part: i64| {
            if total > 0 {
                part as f64 / total as f64 * 100.0
            } else {
                0.0
            }
        };

        Self {
            service_name,
            total_events: total,
            processed_events: processed,
            unprocessed_events: unprocessed,
            processed_percentage: percentage(processed),
            unprocessed_percentage: percentage(unprocessed),
            generation_status: generation_status.to_string(),
        }
    }
}
