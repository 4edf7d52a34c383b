//! # EventBus Abstraction
//!
//! The message bus contract shared by the event generator and the event
//! registry.
//!
//! ## Channels
//!
//! - `events.created`: [`EventMessage`] envelopes published by the generator
//! - `events.processed`: [`EventResponse`] confirmations published by the registry
//!
//! Delivery is at-least-once with no ordering guarantee across distinct event
//! ids. Consumers must be idempotent; the bus never deduplicates.
//!
//! ## Implementations
//!
//! - **NatsBus**: Production implementation using NATS queue groups
//! - **InMemoryBus**: Test/dev implementation using in-memory channels
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{EventBus, InMemoryBus, channels};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//!
//! let mut stream = bus
//!     .queue_subscribe(channels::EVENTS_CREATED, channels::REGISTRY_GROUP)
//!     .await?;
//!
//! let receipt = bus.publish(channels::EVENTS_CREATED, b"{}".to_vec()).await?;
//! println!("published on {} seq={:?}", receipt.subject, receipt.sequence);
//!
//! while let Some(msg) = futures::StreamExt::next(&mut stream).await {
//!     println!("Received: {} bytes on {}", msg.payload.len(), msg.subject);
//! }
//! # Ok(())
//! # }
//! ```

pub mod consumer_retry;
pub mod dlq;
mod envelope;
mod inmemory_bus;
mod nats_bus;

pub use envelope::{EventMessage, EventResponse, MessageError, ProcessingStatus, MAX_LABEL_LEN};
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;

/// Channel and consumer-group names used across the relay
pub mod channels {
    /// Generator → registry: a new event was created
    pub const EVENTS_CREATED: &str = "events.created";

    /// Registry → generator: an event was registered
    pub const EVENTS_PROCESSED: &str = "events.processed";

    /// Consumer group of the registry's `events.created` consumer
    pub const REGISTRY_GROUP: &str = "event-registry-group";

    /// Consumer group of the generator's `events.processed` consumer
    pub const CONFIRMATION_GROUP: &str = "event-generator-confirmation-group";

    /// Dead-letter subject for a channel (`dlq.<channel>`)
    pub fn dead_letter(channel: &str) -> String {
        format!("dlq.{}", channel)
    }
}

/// A message received from the event bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subject/topic this message was published to
    pub subject: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
    /// Optional headers
    pub headers: Option<std::collections::HashMap<String, String>>,
}

impl BusMessage {
    /// Create a new bus message
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self {
            subject,
            payload,
            headers: None,
        }
    }

    /// Add headers to the message
    pub fn with_headers(mut self, headers: std::collections::HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// Completion signal of a successful publish
///
/// `sequence` is the bus-assigned position of the message when the
/// implementation has one (the in-memory bus does, NATS core does not).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub subject: String,
    pub sequence: Option<u64>,
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to subject: {0}")]
    SubscribeError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core event bus abstraction for publish-subscribe messaging
///
/// Publishing is not part of any storage transaction; callers that need
/// fire-and-forget semantics spawn the publish and log its outcome.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message to a subject
    ///
    /// # Returns
    /// * `Ok(PublishReceipt)` once the bus accepted the message
    /// * `Err(BusError)` if publishing failed
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<PublishReceipt>;

    /// Subscribe to every message matching a subject pattern
    ///
    /// Supports wildcards: `*` matches a single token, `>` matches one or more
    /// tokens.
    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>>;

    /// Subscribe as a member of a consumer group
    ///
    /// Each message is delivered to exactly one member of `group`; distinct
    /// groups each receive their own copy.
    async fn queue_subscribe(
        &self,
        subject: &str,
        group: &str,
    ) -> BusResult<BoxStream<'static, BusMessage>>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}
