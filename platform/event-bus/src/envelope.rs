//! # Wire Envelopes
//!
//! JSON envelopes carried on the two relay channels.
//!
//! ## `events.created`
//!
//! ```json
//! {"eventId": "<uuid>", "eventType": "SYSTEM_EVENT", "serviceName": "event-generator",
//!  "payload": "...", "createdAt": "2024-01-01T00:00:00Z"}
//! ```
//!
//! ## `events.processed`
//!
//! ```json
//! {"originalEventId": "<uuid>", "registeredEventId": "<uuid>", "status": "PROCESSED",
//!  "processedAt": "2024-01-01T00:00:01Z", "registryServiceName": "event-registry"}
//! ```
//!
//! Timestamps are written as RFC 3339 UTC. On input an ISO-8601 timestamp
//! without an offset is accepted and read as UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of the `eventType` and `serviceName` labels
pub const MAX_LABEL_LEN: usize = 100;

/// Envelope parse or validation failure
///
/// Never retriable: the same bytes fail the same way on every delivery.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid envelope: {0}")]
    Invalid(String),
}

/// Envelope published on `events.created`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub event_id: Uuid,
    pub event_type: String,
    pub service_name: String,
    /// A missing or `null` payload reads as empty
    #[serde(default, deserialize_with = "nullable_string")]
    pub payload: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl EventMessage {
    /// Parse and validate an envelope received from the bus
    pub fn from_slice(bytes: &[u8]) -> Result<Self, MessageError> {
        let message: EventMessage = serde_json::from_slice(bytes)?;
        message.validate()?;
        Ok(message)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Validation rules:
    /// - `eventType`: non-empty, at most 100 characters
    /// - `serviceName`: non-empty, at most 100 characters
    pub fn validate(&self) -> Result<(), MessageError> {
        validate_label("eventType", &self.event_type)?;
        validate_label("serviceName", &self.service_name)?;
        Ok(())
    }
}

/// Registration status carried by a confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Processed,
}

/// Confirmation published on `events.processed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub original_event_id: Uuid,
    pub registered_event_id: Uuid,
    pub status: ProcessingStatus,
    #[serde(with = "timestamp")]
    pub processed_at: DateTime<Utc>,
    pub registry_service_name: String,
}

impl EventResponse {
    /// Build a `PROCESSED` confirmation
    pub fn processed(
        original_event_id: Uuid,
        registered_event_id: Uuid,
        processed_at: DateTime<Utc>,
        registry_service_name: String,
    ) -> Self {
        Self {
            original_event_id,
            registered_event_id,
            status: ProcessingStatus::Processed,
            processed_at,
            registry_service_name,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn validate_label(field: &str, value: &str) -> Result<(), MessageError> {
    if value.trim().is_empty() {
        return Err(MessageError::Invalid(format!("{} cannot be empty", field)));
    }
    if value.chars().count() > MAX_LABEL_LEN {
        return Err(MessageError::Invalid(format!(
            "{} exceeds {} characters",
            field, MAX_LABEL_LEN
        )));
    }
    Ok(())
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// RFC 3339 on output; RFC 3339 or offset-less ISO-8601 on input
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp '{}': {}", raw, e))
    }
}
