//! Confirmation consumer
//!
//! Subscribes to `events.processed` in the confirmation consumer group and
//! marks the originating event processed. Redelivered confirmations are no-ops.

use event_bus::consumer_retry::{retry_with_backoff_if, RetryConfig, RetryError};
use event_bus::dlq::route_to_dead_letter;
use event_bus::{channels, BusMessage, BusResult, EventBus, EventResponse};
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::models::Event;
use crate::repos::{EventStore, MarkOutcome, StoreError};

/// What handling one `events.processed` message did
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationOutcome {
    /// The event was marked processed by this delivery
    Applied(Event),
    AlreadyProcessed,
    /// No event with the confirmation's `originalEventId`; dropped
    UnknownEvent,
    /// Unparseable, or the store kept failing; sent to `dlq.events.processed`
    DeadLettered,
}

#[derive(Clone)]
pub struct ConfirmationHandler {
    store: Arc<dyn EventStore>,
    bus: Arc<dyn EventBus>,
    retry: RetryConfig,
}

impl ConfirmationHandler {
    pub fn new(store: Arc<dyn EventStore>, bus: Arc<dyn EventBus>, retry: RetryConfig) -> Self {
        Self { store, bus, retry }
    }

    /// Handle one delivery; never fails, every message counts as handled
    pub async fn handle(&self, msg: &BusMessage) -> ConfirmationOutcome {
        let response = match EventResponse::from_slice(&msg.payload) {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    subject = %msg.subject,
                    error = %e,
                    "Failed to parse confirmation"
                );
                route_to_dead_letter(self.bus.as_ref(), msg, &e.to_string(), 1).await;
                return ConfirmationOutcome::DeadLettered;
            }
        };

        let span = tracing::info_span!(
            "apply_confirmation",
            original_event_id = %response.original_event_id,
            registered_event_id = %response.registered_event_id,
            subject = %msg.subject
        );

        self.apply(msg, &response).instrument(span).await
    }

    async fn apply(&self, msg: &BusMessage, response: &EventResponse) -> ConfirmationOutcome {
        tracing::info!(
            status = ?response.status,
            processed_at = %response.processed_at,
            registry_service_name = %response.registry_service_name,
            "Received confirmation"
        );

        let result = retry_with_backoff_if(
            || {
                self.store
                    .mark_processed(response.original_event_id, response.processed_at)
            },
            &self.retry,
            "confirmation_handler",
            StoreError::is_transient,
        )
        .await;

        match result {
            Ok(MarkOutcome::Marked(event)) => {
                tracing::info!(
                    event_id = %event.id,
                    processed_at = ?event.processed_at,
                    "Event marked as processed"
                );
                ConfirmationOutcome::Applied(event)
            }
            Ok(MarkOutcome::AlreadyProcessed(event)) => {
                tracing::warn!(event_id = %event.id, "Event already marked as processed");
                ConfirmationOutcome::AlreadyProcessed
            }
            Ok(MarkOutcome::NotFound) => {
                tracing::error!("Event not found for confirmation");
                ConfirmationOutcome::UnknownEvent
            }
            Err(RetryError { error, attempts }) => {
                tracing::error!(
                    error = %error,
                    attempts = attempts,
                    "Confirmation failed after retries, sending to DLQ"
                );
                route_to_dead_letter(self.bus.as_ref(), msg, &error.to_string(), attempts).await;
                ConfirmationOutcome::DeadLettered
            }
        }
    }

    /// Subscribe to `events.processed` and handle messages on a background task
    ///
    /// The subscription is in place when this returns. The task exits when
    /// `cancel` fires (after the message in hand) or the stream ends.
    pub async fn start(self, cancel: CancellationToken) -> BusResult<JoinHandle<()>> {
        let mut stream = self
            .bus
            .queue_subscribe(channels::EVENTS_PROCESSED, channels::CONFIRMATION_GROUP)
            .await?;

        tracing::info!(
            subject = channels::EVENTS_PROCESSED,
            group = channels::CONFIRMATION_GROUP,
            "Confirmation consumer subscribed"
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
                            tracing::warn!("Confirmation stream ended");
                            break;
                        }
                    },
                }
            }

            tracing::info!("Confirmation consumer stopped");
        }))
    }
}
