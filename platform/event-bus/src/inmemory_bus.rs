//! In-memory implementation of the EventBus trait for testing and development

use crate::{BusMessage, BusResult, EventBus, PublishReceipt};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Mutex as AsyncMutex};

type SharedReceiver = Arc<AsyncMutex<broadcast::Receiver<BusMessage>>>;

/// EventBus implementation using in-memory channels
///
/// Messages are broadcast to all plain subscribers via a Tokio broadcast
/// channel. Queue-group subscribers sharing the same `(subject, group)` pull
/// from one shared receiver, so each message reaches exactly one member of the
/// group.
///
/// # Example
/// ```rust
/// use event_bus::{EventBus, InMemoryBus};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
///
/// // Subscribe before publishing
/// let mut stream = bus.subscribe("events.>").await?;
///
/// bus.publish("events.created", b"hello".to_vec()).await?;
///
/// let msg = stream.next().await.unwrap();
/// assert_eq!(msg.subject, "events.created");
/// assert_eq!(msg.payload, b"hello");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    sender: Arc<broadcast::Sender<BusMessage>>,
    groups: Arc<Mutex<HashMap<(String, String), SharedReceiver>>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryBus {
    /// Create a new in-memory event bus
    ///
    /// The bus uses a broadcast channel with a buffer of 1000 messages.
    /// If this buffer is exceeded, the oldest messages will be dropped.
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Create a new in-memory event bus with a custom buffer size
    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender: Arc::new(sender),
            groups: Arc::new(Mutex::new(HashMap::new())),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of messages published so far
    pub fn published_count(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Check if a subject matches a subscription pattern
    ///
    /// Supports NATS-style wildcards:
    /// - `*` matches exactly one token
    /// - `>` matches one or more tokens
    fn matches_pattern(subject: &str, pattern: &str) -> bool {
        let subject_tokens: Vec<&str> = subject.split('.').collect();
        let pattern_tokens: Vec<&str> = pattern.split('.').collect();

        let mut s_idx = 0;
        let mut p_idx = 0;

        while s_idx < subject_tokens.len() && p_idx < pattern_tokens.len() {
            let pattern_token = pattern_tokens[p_idx];

            if pattern_token == ">" {
                return true;
            } else if pattern_token == "*" || subject_tokens[s_idx] == pattern_token {
                s_idx += 1;
                p_idx += 1;
            } else {
                return false;
            }
        }

        s_idx == subject_tokens.len() && p_idx == pattern_tokens.len()
    }

    fn group_receiver(&self, pattern: &str, group: &str) -> SharedReceiver {
        // A poisoned map only means another subscriber panicked mid-insert;
        // the map itself is still consistent.
        let mut groups = self
            .groups
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        groups
            .entry((pattern.to_string(), group.to_string()))
            .or_insert_with(|| Arc::new(AsyncMutex::new(self.sender.subscribe())))
            .clone()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<PublishReceipt> {
        let msg = BusMessage::new(subject.to_string(), payload);
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        // No receivers is fine: at-least-once only applies to subscribed consumers
        let _ = self.sender.send(msg);

        Ok(PublishReceipt {
            subject: subject.to_string(),
            sequence: Some(sequence),
        })
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let mut receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if Self::matches_pattern(&msg.subject, &pattern) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, pattern = %pattern, "InMemoryBus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(stream.boxed())
    }

    async fn queue_subscribe(
        &self,
        pattern: &str,
        group: &str,
    ) -> BusResult<BoxStream<'static, BusMessage>> {
        let shared = self.group_receiver(pattern, group);
        let pattern = pattern.to_string();
        let group = group.to_string();

        let stream = async_stream::stream! {
            loop {
                let next = {
                    let mut receiver = shared.lock().await;
                    receiver.recv().await
                };
                match next {
                    Ok(msg) => {
                        if Self::matches_pattern(&msg.subject, &pattern) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, group = %group, "InMemoryBus queue group lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    async fn next_within(
        stream: &mut BoxStream<'static, BusMessage>,
        ms: u64,
    ) -> Option<BusMessage> {
        tokio::time::timeout(Duration::from_millis(ms), stream.next())
            .await
            .ok()
            .flatten()
    }

    #[test]
    fn test_pattern_matching() {
        assert!(InMemoryBus::matches_pattern("events.created", "events.created"));
        assert!(InMemoryBus::matches_pattern("events.created", "events.*"));
        assert!(InMemoryBus::matches_pattern("dlq.events.created", "dlq.>"));
        assert!(!InMemoryBus::matches_pattern("events.created", "events.processed"));
        assert!(!InMemoryBus::matches_pattern("dlq.events.created", "events.>"));
        assert!(!InMemoryBus::matches_pattern("one.two", "one"));
        assert!(InMemoryBus::matches_pattern("single", ">"));
    }

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("events.created").await.unwrap();

        let receipt = bus
            .publish("events.created", b"test message".to_vec())
            .await
            .unwrap();
        assert_eq!(receipt.subject, "events.created");
        assert_eq!(receipt.sequence, Some(1));

        let msg = next_within(&mut stream, 1000).await.expect("message");
        assert_eq!(msg.subject, "events.created");
        assert_eq!(msg.payload, b"test message");
    }

    #[tokio::test]
    async fn test_sequence_is_monotonic() {
        let bus = InMemoryBus::new();

        for expected in 1..=3 {
            let receipt = bus.publish("events.created", vec![]).await.unwrap();
            assert_eq!(receipt.sequence, Some(expected));
        }
        assert_eq!(bus.published_count(), 3);
    }

    #[tokio::test]
    async fn test_queue_group_delivers_each_message_once() {
        let bus = InMemoryBus::new();
        let mut member_a = bus.queue_subscribe("events.created", "registry").await.unwrap();
        let mut member_b = bus.queue_subscribe("events.created", "registry").await.unwrap();

        for i in 0..4 {
            bus.publish("events.created", format!("m{}", i).into_bytes())
                .await
                .unwrap();
        }

        let mut received = Vec::new();
        while let Some(msg) = next_within(&mut member_a, 100).await {
            received.push(msg.payload);
        }
        while let Some(msg) = next_within(&mut member_b, 100).await {
            received.push(msg.payload);
        }

        received.sort();
        assert_eq!(
            received,
            vec![b"m0".to_vec(), b"m1".to_vec(), b"m2".to_vec(), b"m3".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_distinct_groups_each_get_a_copy() {
        let bus = InMemoryBus::new();
        let mut registry = bus.queue_subscribe("events.>", "registry").await.unwrap();
        let mut audit = bus.queue_subscribe("events.>", "audit").await.unwrap();

        bus.publish("events.created", b"copy".to_vec()).await.unwrap();

        assert_eq!(next_within(&mut registry, 1000).await.unwrap().payload, b"copy");
        assert_eq!(next_within(&mut audit, 1000).await.unwrap().payload, b"copy");
    }

    #[tokio::test]
    async fn test_wildcard_filtering() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("events.*").await.unwrap();

        bus.publish("events.created", b"match".to_vec()).await.unwrap();
        bus.publish("dlq.events.created", b"no match".to_vec()).await.unwrap();
        bus.publish("events.processed", b"match".to_vec()).await.unwrap();

        assert_eq!(next_within(&mut stream, 100).await.unwrap().subject, "events.created");
        assert_eq!(next_within(&mut stream, 100).await.unwrap().subject, "events.processed");
        assert!(next_within(&mut stream, 100).await.is_none());
    }
}
