//! NATS-based implementation of the EventBus trait

use crate::{BusError, BusMessage, BusResult, EventBus, PublishReceipt};
use async_nats::{Client, Subscriber};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

/// EventBus implementation using NATS
///
/// Consumer groups map onto NATS queue groups. Publishing flushes the client
/// so a returned receipt means the server has the message.
///
/// # Example
/// ```rust,no_run
/// use event_bus::{EventBus, NatsBus};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let nats_client = async_nats::connect("nats://localhost:4222").await?;
/// let bus = NatsBus::new(nats_client);
///
/// bus.publish("events.created", b"{}".to_vec()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    /// Create a new NatsBus from an already-connected client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect to a NATS server and wrap the client
    pub async fn connect(url: &str) -> BusResult<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;
        Ok(Self::new(client))
    }

    /// Round-trip to the server so the subscription is registered before
    /// the caller publishes from another connection
    async fn confirm_subscription(&self) -> BusResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))
    }

    fn into_bus_stream(subscriber: Subscriber) -> BoxStream<'static, BusMessage> {
        subscriber
            .map(|nats_msg| {
                let mut msg =
                    BusMessage::new(nats_msg.subject.to_string(), nats_msg.payload.to_vec());

                if let Some(nats_headers) = nats_msg.headers {
                    let mut headers = std::collections::HashMap::new();
                    for (key, values) in nats_headers.iter() {
                        if let Some(value) = values.first() {
                            headers.insert(key.to_string(), value.to_string());
                        }
                    }
                    if !headers.is_empty() {
                        msg = msg.with_headers(headers);
                    }
                }

                msg
            })
            .boxed()
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<PublishReceipt> {
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        self.client
            .flush()
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        Ok(PublishReceipt {
            subject: subject.to_string(),
            sequence: None,
        })
    }

    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;
        self.confirm_subscription().await?;

        Ok(Self::into_bus_stream(subscriber))
    }

    async fn queue_subscribe(
        &self,
        subject: &str,
        group: &str,
    ) -> BusResult<BoxStream<'static, BusMessage>> {
        let subscriber = self
            .client
            .queue_subscribe(subject.to_string(), group.to_string())
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;
        self.confirm_subscription().await?;

        Ok(Self::into_bus_stream(subscriber))
    }
}
