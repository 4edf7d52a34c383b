//! Registry consumer
//!
//! This consumer subscribes to `events.created` in the registry consumer group,
//! registers each event at most once and confirms the registration on
//! `events.processed`.
//!
//! ## Delivery handling
//! - Unparseable or invalid envelopes go to `dlq.events.created`
//! - Registration is an atomic insert-or-get-existing; transient store
//!   failures are retried with backoff, and a registration that keeps failing
//!   or fails permanently goes to `dlq.events.created`
//! - A redelivered event finds the existing registration and publishes nothing
//! - The confirmation is published only by the delivery that inserted; if it
//!   cannot be published after retries it goes to `dlq.events.processed`

use chrono::{SubsecRound, Utc};
use event_bus::consumer_retry::{
    retry_with_backoff, retry_with_backoff_if, RetryConfig, RetryError,
};
use event_bus::dlq::{publish_dead_letter, route_to_dead_letter, DeadLetter};
use event_bus::{channels, BusMessage, BusResult, EventBus, EventMessage, EventResponse};
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::models::RegisteredEvent;
use crate::repos::{InsertOutcome, RegistryStore, StoreError};

/// What handling one `events.created` message did
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    /// Registered by this delivery and confirmed on `events.processed`
    Registered(RegisteredEvent),
    /// Registered by this delivery; the confirmation went to `dlq.events.processed`
    ConfirmationDeadLettered(RegisteredEvent),
    /// Already registered by an earlier delivery; nothing published
    Duplicate(RegisteredEvent),
    /// Unparseable, invalid, or the store kept failing; sent to `dlq.events.created`
    DeadLettered,
}

#[derive(Clone)]
pub struct RegistryConsumer {
    store: Arc<dyn RegistryStore>,
    bus: Arc<dyn EventBus>,
    service_name: String,
    retry: RetryConfig,
}

impl RegistryConsumer {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        bus: Arc<dyn EventBus>,
        service_name: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            bus,
            service_name: service_name.into(),
            retry,
        }
    }

    /// Handle one delivery; never fails, every message counts as handled
    pub async fn handle(&self, msg: &BusMessage) -> RegistrationOutcome {
        let message = match EventMessage::from_slice(&msg.payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(
                    subject = %msg.subject,
                    error = %e,
                    "Failed to parse event message"
                );
                route_to_dead_letter(self.bus.as_ref(), msg, &e.to_string(), 1).await;
                return RegistrationOutcome::DeadLettered;
            }
        };

        let span = tracing::info_span!(
            "register_event",
            event_id = %message.event_id,
            event_type = %message.event_type,
            service_name = %message.service_name,
            subject = %msg.subject
        );

        self.register(msg, &message).instrument(span).await
    }

    async fn register(&self, msg: &BusMessage, message: &EventMessage) -> RegistrationOutcome {
        tracing::info!("Received event");

        // Microseconds: the precision of the wire format and the database
        let now = Utc::now().trunc_subsecs(6);
        let candidate = RegisteredEvent::from_message(message, now);
        let result = retry_with_backoff_if(
            || self.store.register(candidate.clone()),
            &self.retry,
            "registry_consumer",
            StoreError::is_transient,
        )
        .await;

        match result {
            Ok(InsertOutcome::Inserted(event)) => {
                tracing::info!(registered_event_id = %event.id, "Event registered");
                self.confirm(event).await
            }
            Ok(InsertOutcome::AlreadyRegistered(existing)) => {
                tracing::warn!(
                    registered_event_id = %existing.id,
                    "Event already registered"
                );
                RegistrationOutcome::Duplicate(existing)
            }
            Err(RetryError { error, attempts }) => {
                tracing::error!(
                    error = %error,
                    attempts = attempts,
                    "Registration failed after retries, sending to DLQ"
                );
                route_to_dead_letter(self.bus.as_ref(), msg, &error.to_string(), attempts).await;
                RegistrationOutcome::DeadLettered
            }
        }
    }

    async fn confirm(&self, event: RegisteredEvent) -> RegistrationOutcome {
        let response = EventResponse::processed(
            event.original_event_id,
            event.id,
            event.processed_at,
            self.service_name.clone(),
        );

        let bytes = match response.to_vec() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize confirmation");
                let letter = DeadLetter::new(channels::EVENTS_PROCESSED, &[], &e.to_string(), 1);
                publish_dead_letter(self.bus.as_ref(), letter).await;
                return RegistrationOutcome::ConfirmationDeadLettered(event);
            }
        };

        let result = retry_with_backoff(
            || self.bus.publish(channels::EVENTS_PROCESSED, bytes.clone()),
            &self.retry,
            "registry_confirmation",
        )
        .await;

        match result {
            Ok(receipt) => {
                tracing::info!(
                    subject = %receipt.subject,
                    sequence = ?receipt.sequence,
                    registered_event_id = %event.id,
                    "Confirmation sent"
                );
                RegistrationOutcome::Registered(event)
            }
            Err(RetryError { error, attempts }) => {
                tracing::error!(
                    error = %error,
                    attempts = attempts,
                    registered_event_id = %event.id,
                    "Confirmation could not be published, sending to DLQ"
                );
                let letter = DeadLetter::new(
                    channels::EVENTS_PROCESSED,
                    &bytes,
                    &error.to_string(),
                    attempts,
                );
                publish_dead_letter(self.bus.as_ref(), letter).await;
                RegistrationOutcome::ConfirmationDeadLettered(event)
            }
        }
    }

    /// Subscribe to `events.created` and handle messages on a background task
    ///
    /// The subscription is in place when this returns. The task exits when
    /// `cancel` fires (after the message in hand) or the stream ends.
    pub async fn start(self, cancel: CancellationToken) -> BusResult<JoinHandle<()>> {
        let mut stream = self
            .bus
            .queue_subscribe(channels::EVENTS_CREATED, channels::REGISTRY_GROUP)
            .await?;

        tracing::info!(
            subject = channels::EVENTS_CREATED,
            group = channels::REGISTRY_GROUP,
            "Registry consumer subscribed"
        );

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = stream.next() => match next {
                        Some(msg) => {
                            self.handle(&msg).await;
                        }
                        None => {
                            tracing::warn!("Event stream ended");
                            break;
                        }
                    },
                }
            }

            tracing::info!("Registry consumer stopped");
        }))
    }
}
