//! Event generation
//!
//! Both the periodic tick and the manual trigger go through [`EventGenerator`]:
//! the event is persisted first, then announced on `events.created` by a
//! spawned publish whose outcome is only logged. A failed publish leaves the
//! stored event unprocessed; nothing is rolled back.

use chrono::Utc;
use event_bus::{channels, EventBus, MAX_LABEL_LEN};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::models::{Event, GenerationStats, NewEvent};
use crate::repos::{EventStore, StoreError};

/// Event type stamped on events created by the periodic tick
pub const SYSTEM_EVENT: &str = "SYSTEM_EVENT";

/// Event type of a manual generation that did not name one
pub const MANUAL_EVENT: &str = "MANUAL_EVENT";

const PAYLOAD_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Shared on/off flag for the periodic tick
///
/// Cloning shares the flag, so a toggle is seen by the scheduler on its next
/// tick. Manual generation ignores it.
#[derive(Debug, Clone)]
pub struct GenerationSwitch(Arc<AtomicBool>);

impl GenerationSwitch {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.0.store(enabled, Ordering::SeqCst);
    }

    /// `ACTIVE` or `PAUSED`
    pub fn status_label(&self) -> &'static str {
        if self.is_enabled() {
            "ACTIVE"
        } else {
            "PAUSED"
        }
    }
}

impl Default for GenerationSwitch {
    fn default() -> Self {
        Self::new(true)
    }
}

#[derive(Clone)]
pub struct EventGenerator {
    store: Arc<dyn EventStore>,
    bus: Arc<dyn EventBus>,
    service_name: String,
    switch: GenerationSwitch,
}

impl EventGenerator {
    pub fn new(
        store: Arc<dyn EventStore>,
        bus: Arc<dyn EventBus>,
        service_name: impl Into<String>,
        switch: GenerationSwitch,
    ) -> Self {
        Self {
            store,
            bus,
            service_name: service_name.into(),
            switch,
        }
    }

    pub fn switch(&self) -> &GenerationSwitch {
        &self.switch
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// One periodic tick
    ///
    /// Returns `Ok(None)` without touching the store or the bus while
    /// generation is paused.
    pub async fn generate_scheduled(&self) -> Result<Option<Event>, GenerationError> {
        if !self.switch.is_enabled() {
            tracing::debug!("Event generation is disabled");
            return Ok(None);
        }

        let payload = format!(
            "Auto-generated event at {}",
            Utc::now().format(PAYLOAD_TIMESTAMP_FORMAT)
        );

        let event = self.create(SYSTEM_EVENT.to_string(), payload).await?;
        Ok(Some(event))
    }

    /// Manual generation with optional overrides
    ///
    /// A missing type becomes `MANUAL_EVENT`; a missing payload becomes a
    /// timestamped description. An explicit type must be a valid label.
    pub async fn generate_manual(
        &self,
        event_type: Option<String>,
        payload: Option<String>,
    ) -> Result<Event, GenerationError> {
        let event_type = match event_type {
            Some(event_type) => {
                validate_event_type(&event_type)?;
                event_type
            }
            None => MANUAL_EVENT.to_string(),
        };

        let payload = payload.unwrap_or_else(|| {
            format!(
                "Manually generated at {}",
                Utc::now().format(PAYLOAD_TIMESTAMP_FORMAT)
            )
        });

        self.create(event_type, payload).await
    }

    pub async fn stats(&self) -> Result<GenerationStats, GenerationError> {
        let total = self.store.count().await?;
        let processed = self.store.count_by_processed(true).await?;
        let unprocessed = self.store.count_by_processed(false).await?;

        Ok(GenerationStats::new(
            self.service_name.clone(),
            total,
            processed,
            unprocessed,
            self.switch.status_label(),
        ))
    }

    async fn create(&self, event_type: String, payload: String) -> Result<Event, GenerationError> {
        let new_event = NewEvent::new(event_type, self.service_name.clone(), payload);
        let event = self.store.save(new_event).await?;

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            service_name = %event.service_name,
            "Event created"
        );

        self.announce(&event);
        Ok(event)
    }

    /// Publish `events.created` in the background and log the completion
    fn announce(&self, event: &Event) {
        let event_id = event.id;
        let bytes = match event.to_message().to_vec() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(event_id = %event_id, error = %e, "Failed to serialize event message");
                return;
            }
        };

        let bus = self.bus.clone();
        tokio::spawn(async move {
            match bus.publish(channels::EVENTS_CREATED, bytes).await {
                Ok(receipt) => {
                    tracing::info!(
                        event_id = %event_id,
                        subject = %receipt.subject,
                        sequence = ?receipt.sequence,
                        "Event message published"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        event_id = %event_id,
                        subject = channels::EVENTS_CREATED,
                        error = %e,
                        "Failed to publish event message"
                    );
                }
            }
        });
    }
}

fn validate_event_type(event_type: &str) -> Result<(), GenerationError> {
    if event_type.trim().is_empty() {
        return Err(GenerationError::InvalidInput(
            "eventType cannot be empty".to_string(),
        ));
    }
    if event_type.chars().count() > MAX_LABEL_LEN {
        return Err(GenerationError::InvalidInput(format!(
            "eventType exceeds {} characters",
            MAX_LABEL_LEN
        )));
    }
    Ok(())
}
