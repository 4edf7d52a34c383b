//! Dead Letter Queue (DLQ) routing
//!
//! Messages that cannot be handled (unparseable envelopes, storage failures
//! that outlive their retries, confirmations that could not be published) are
//! republished on `dlq.<subject>` so they can be inspected and replayed. The
//! original message is acknowledged afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{channels, BusMessage, EventBus};

/// Record published on a dead-letter subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Subject the failed message was received on (or meant for)
    pub subject: String,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
    /// Original payload: parsed JSON when possible, otherwise the lossy UTF-8 text
    pub payload: serde_json::Value,
}

impl DeadLetter {
    pub fn new(subject: &str, payload: &[u8], error: &str, attempts: u32) -> Self {
        let payload = serde_json::from_slice(payload).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(payload).into_owned())
        });

        Self {
            subject: subject.to_string(),
            error: error.to_string(),
            attempts,
            failed_at: Utc::now(),
            payload,
        }
    }
}

/// Route a failed message to its dead-letter subject
///
/// Never fails: when the dead letter itself cannot be published, the loss is
/// logged with enough context to recover the message from the logs.
pub async fn route_to_dead_letter(bus: &dyn EventBus, msg: &BusMessage, error: &str, attempts: u32) {
    let letter = DeadLetter::new(&msg.subject, &msg.payload, error, attempts);
    publish_dead_letter(bus, letter).await;
}

/// Publish a prepared dead letter on `dlq.<letter.subject>`
pub async fn publish_dead_letter(bus: &dyn EventBus, letter: DeadLetter) {
    let dlq_subject = channels::dead_letter(&letter.subject);

    let bytes = match serde_json::to_vec(&letter) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(
                subject = %letter.subject,
                error = %letter.error,
                serialize_error = %e,
                "Failed to serialize dead letter - message may be lost!"
            );
            return;
        }
    };

    match bus.publish(&dlq_subject, bytes).await {
        Ok(receipt) => {
            tracing::error!(
                subject = %letter.subject,
                dlq_subject = %dlq_subject,
                sequence = ?receipt.sequence,
                attempts = letter.attempts,
                error = %letter.error,
                "Message moved to DLQ"
            );
        }
        Err(dlq_err) => {
            tracing::error!(
                subject = %letter.subject,
                dlq_subject = %dlq_subject,
                attempts = letter.attempts,
                error = %letter.error,
                dlq_error = %dlq_err,
                payload = %letter.payload,
                "Failed to publish to DLQ - message may be lost!"
            );
        }
    }
}
