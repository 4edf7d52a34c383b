//! Registry consumer tests: dedup under redelivery, confirmation publishing,
//! DLQ routing
//!
//! Run with: cargo test --package event-registry --test registry_consumer_test

mod common;

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use common::{fast_retry, next_within};
use event_bus::dlq::DeadLetter;
use event_bus::{
    channels, BusError, BusMessage, BusResult, EventBus, EventMessage, EventResponse,
    InMemoryBus, ProcessingStatus, PublishReceipt,
};
use event_registry::models::{EventFilter, Page, PageRequest, RegisteredEvent};
use event_registry::repos::{
    InMemoryRegistryStore, InsertOutcome, RegistryStore, StoreError, StoreResult,
};
use event_registry::{RegistrationOutcome, RegistryConsumer};
use futures::stream::BoxStream;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const REGISTRY: &str = "event-registry";

fn event_message() -> EventMessage {
    EventMessage {
        event_id: Uuid::new_v4(),
        event_type: "TEST".to_string(),
        service_name: "event-generator".to_string(),
        payload: "hello".to_string(),
        created_at: Utc::now().trunc_subsecs(6),
    }
}

fn created(message: &EventMessage) -> BusMessage {
    BusMessage::new(
        channels::EVENTS_CREATED.to_string(),
        message.to_vec().unwrap(),
    )
}

#[tokio::test]
async fn test_new_event_is_registered_and_confirmed() {
    let store = Arc::new(InMemoryRegistryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let consumer = RegistryConsumer::new(store.clone(), bus.clone(), REGISTRY, fast_retry(3));
    let mut processed = bus.subscribe(channels::EVENTS_PROCESSED).await.unwrap();
    let message = event_message();

    let outcome = consumer.handle(&created(&message)).await;

    let RegistrationOutcome::Registered(registered) = outcome else {
        panic!("expected Registered, got {:?}", outcome);
    };
    assert_eq!(registered.original_event_id, message.event_id);
    assert_eq!(registered.event_type, "TEST");
    assert_eq!(registered.payload, "hello");
    assert_eq!(registered.created_at, message.created_at);
    assert!(registered.processed_at >= registered.registered_at);

    let msg = next_within(&mut processed, Duration::from_secs(1))
        .await
        .expect("events.processed message");
    let response = EventResponse::from_slice(&msg.payload).unwrap();
    assert_eq!(response.original_event_id, message.event_id);
    assert_eq!(response.registered_event_id, registered.id);
    assert_eq!(response.status, ProcessingStatus::Processed);
    assert_eq!(response.processed_at, registered.processed_at);
    assert_eq!(response.registry_service_name, REGISTRY);
}

#[tokio::test]
async fn test_redelivery_registers_once_and_confirms_once() {
    let store = Arc::new(InMemoryRegistryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let consumer = RegistryConsumer::new(store.clone(), bus.clone(), REGISTRY, fast_retry(3));
    let mut processed = bus.subscribe(channels::EVENTS_PROCESSED).await.unwrap();
    let message = event_message();
    let msg = created(&message);

    let first = consumer.handle(&msg).await;
    assert!(matches!(first, RegistrationOutcome::Registered(_)));
    for _ in 0..4 {
        assert!(matches!(
            consumer.handle(&msg).await,
            RegistrationOutcome::Duplicate(ref e) if e.original_event_id == message.event_id
        ));
    }

    assert_eq!(store.count().await.unwrap(), 1);
    assert!(next_within(&mut processed, Duration::from_millis(200)).await.is_some());
    assert!(next_within(&mut processed, Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn test_concurrent_duplicate_deliveries_register_once() {
    let store = Arc::new(InMemoryRegistryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let consumer = RegistryConsumer::new(store.clone(), bus.clone(), REGISTRY, fast_retry(3));
    let msg = created(&event_message());

    let mut handles = Vec::new();
    for _ in 0..10 {
        let consumer = consumer.clone();
        let msg = msg.clone();
        handles.push(tokio::spawn(async move { consumer.handle(&msg).await }));
    }

    let mut registered = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            RegistrationOutcome::Registered(_) => registered += 1,
            RegistrationOutcome::Duplicate(_) => duplicates += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(registered, 1);
    assert_eq!(duplicates, 9);
    assert_eq!(store.count().await.unwrap(), 1);
    // One confirmation
    assert_eq!(bus.published_count(), 1);
}

#[tokio::test]
async fn test_consumer_group_members_share_deliveries() {
    let store = Arc::new(InMemoryRegistryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let cancel = CancellationToken::new();
    let mut processed = bus.subscribe(channels::EVENTS_PROCESSED).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let consumer =
            RegistryConsumer::new(store.clone(), bus.clone(), REGISTRY, fast_retry(3));
        handles.push(consumer.start(cancel.clone()).await.unwrap());
    }

    let message = event_message();
    for _ in 0..5 {
        bus.publish(channels::EVENTS_CREATED, message.to_vec().unwrap())
            .await
            .unwrap();
    }

    let msg = next_within(&mut processed, Duration::from_secs(2))
        .await
        .expect("confirmation");
    let response = EventResponse::from_slice(&msg.payload).unwrap();
    assert_eq!(response.original_event_id, message.event_id);
    assert!(next_within(&mut processed, Duration::from_millis(300)).await.is_none());
    assert_eq!(store.count().await.unwrap(), 1);

    cancel.cancel();
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_malformed_event_goes_to_dlq() {
    let store = Arc::new(InMemoryRegistryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let consumer = RegistryConsumer::new(store.clone(), bus.clone(), REGISTRY, fast_retry(3));
    let mut dlq = bus
        .subscribe(&channels::dead_letter(channels::EVENTS_CREATED))
        .await
        .unwrap();

    let payload = json!({ "eventId": "not-a-uuid", "eventType": "TEST" });
    let msg = BusMessage::new(
        channels::EVENTS_CREATED.to_string(),
        serde_json::to_vec(&payload).unwrap(),
    );

    assert_eq!(consumer.handle(&msg).await, RegistrationOutcome::DeadLettered);
    assert_eq!(store.count().await.unwrap(), 0);

    let dead = next_within(&mut dlq, Duration::from_secs(1))
        .await
        .expect("dead letter");
    let letter: DeadLetter = serde_json::from_slice(&dead.payload).unwrap();
    assert_eq!(letter.subject, channels::EVENTS_CREATED);
    assert_eq!(letter.payload, payload);
    assert!(letter.error.contains("malformed"));
}

#[tokio::test]
async fn test_blank_event_type_goes_to_dlq() {
    let store = Arc::new(InMemoryRegistryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let consumer = RegistryConsumer::new(store.clone(), bus.clone(), REGISTRY, fast_retry(3));

    let mut message = event_message();
    message.event_type = String::new();

    assert_eq!(
        consumer.handle(&created(&message)).await,
        RegistrationOutcome::DeadLettered
    );
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_naive_created_at_is_read_as_utc() {
    let store = Arc::new(InMemoryRegistryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let consumer = RegistryConsumer::new(store.clone(), bus.clone(), REGISTRY, fast_retry(3));

    let payload = json!({
        "eventId": Uuid::new_v4(),
        "eventType": "SYSTEM_EVENT",
        "serviceName": "event-generator",
        "payload": "Auto-generated event",
        "createdAt": "2024-06-01T10:15:30.123456"
    });
    let msg = BusMessage::new(
        channels::EVENTS_CREATED.to_string(),
        serde_json::to_vec(&payload).unwrap(),
    );

    let RegistrationOutcome::Registered(registered) = consumer.handle(&msg).await else {
        panic!("expected Registered");
    };
    assert_eq!(
        registered.created_at.to_rfc3339(),
        "2024-06-01T10:15:30.123456+00:00"
    );
}

/// Registry store whose `register` always fails
struct FailingStore {
    attempts: AtomicU32,
    error: fn() -> StoreError,
}

impl FailingStore {
    fn unavailable() -> Self {
        Self {
            attempts: AtomicU32::new(0),
            error: || StoreError::Unavailable("database is down".to_string()),
        }
    }
}

#[async_trait]
impl RegistryStore for FailingStore {
    async fn register(&self, _event: RegisteredEvent) -> StoreResult<InsertOutcome> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err((self.error)())
    }

    async fn find_by_id(&self, _id: Uuid) -> StoreResult<Option<RegisteredEvent>> {
        Ok(None)
    }

    async fn find_by_original_id(&self, _id: Uuid) -> StoreResult<Option<RegisteredEvent>> {
        Ok(None)
    }

    async fn count(&self) -> StoreResult<i64> {
        Ok(0)
    }

    async fn list_all(&self) -> StoreResult<Vec<RegisteredEvent>> {
        Ok(vec![])
    }

    async fn find_with_filters(
        &self,
        _filter: &EventFilter,
        page: &PageRequest,
    ) -> StoreResult<Page<RegisteredEvent>> {
        Ok(Page::new(vec![], page, 0))
    }

    async fn distinct_event_types(&self) -> StoreResult<Vec<String>> {
        Ok(vec![])
    }

    async fn distinct_service_names(&self) -> StoreResult<Vec<String>> {
        Ok(vec![])
    }

    async fn find_by_id_substring(&self, _text: &str) -> StoreResult<Vec<RegisteredEvent>> {
        Ok(vec![])
    }

    async fn find_by_original_id_substring(
        &self,
        _text: &str,
    ) -> StoreResult<Vec<RegisteredEvent>> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn test_store_failure_is_retried_then_dead_lettered() {
    let store = Arc::new(FailingStore::unavailable());
    let bus = Arc::new(InMemoryBus::new());
    let consumer = RegistryConsumer::new(store.clone(), bus.clone(), REGISTRY, fast_retry(4));
    let mut dlq = bus
        .subscribe(&channels::dead_letter(channels::EVENTS_CREATED))
        .await
        .unwrap();
    let message = event_message();

    assert_eq!(
        consumer.handle(&created(&message)).await,
        RegistrationOutcome::DeadLettered
    );
    assert_eq!(store.attempts.load(Ordering::SeqCst), 4);

    let dead = next_within(&mut dlq, Duration::from_secs(1))
        .await
        .expect("dead letter");
    let letter: DeadLetter = serde_json::from_slice(&dead.payload).unwrap();
    assert_eq!(letter.attempts, 4);
    assert_eq!(letter.payload["eventId"], json!(message.event_id.to_string()));
}

#[tokio::test]
async fn test_permanent_store_failure_is_dead_lettered_without_retry() {
    let store = Arc::new(FailingStore {
        attempts: AtomicU32::new(0),
        error: || {
            StoreError::Database(sqlx::Error::ColumnNotFound("registered_at".to_string()))
        },
    });
    let bus = Arc::new(InMemoryBus::new());
    let consumer = RegistryConsumer::new(store.clone(), bus.clone(), REGISTRY, fast_retry(4));
    let mut dlq = bus
        .subscribe(&channels::dead_letter(channels::EVENTS_CREATED))
        .await
        .unwrap();

    assert_eq!(
        consumer.handle(&created(&event_message())).await,
        RegistrationOutcome::DeadLettered
    );
    assert_eq!(store.attempts.load(Ordering::SeqCst), 1);

    let dead = next_within(&mut dlq, Duration::from_secs(1))
        .await
        .expect("dead letter");
    let letter: DeadLetter = serde_json::from_slice(&dead.payload).unwrap();
    assert_eq!(letter.attempts, 1);
}

/// Bus that refuses to publish on `events.processed` and forwards everything else
struct NoConfirmationsBus {
    inner: InMemoryBus,
}

#[async_trait]
impl EventBus for NoConfirmationsBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<PublishReceipt> {
        if subject == channels::EVENTS_PROCESSED {
            return Err(BusError::PublishError("broker unavailable".to_string()));
        }
        self.inner.publish(subject, payload).await
    }

    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        self.inner.subscribe(subject).await
    }

    async fn queue_subscribe(
        &self,
        subject: &str,
        group: &str,
    ) -> BusResult<BoxStream<'static, BusMessage>> {
        self.inner.queue_subscribe(subject, group).await
    }
}

#[tokio::test]
async fn test_unpublishable_confirmation_goes_to_dlq() {
    let store = Arc::new(InMemoryRegistryStore::new());
    let inner = InMemoryBus::new();
    let mut dlq = inner
        .subscribe(&channels::dead_letter(channels::EVENTS_PROCESSED))
        .await
        .unwrap();
    let bus = Arc::new(NoConfirmationsBus { inner });
    let consumer = RegistryConsumer::new(store.clone(), bus, REGISTRY, fast_retry(2));
    let message = event_message();

    let outcome = consumer.handle(&created(&message)).await;
    let RegistrationOutcome::ConfirmationDeadLettered(registered) = outcome else {
        panic!("expected ConfirmationDeadLettered, got {:?}", outcome);
    };
    // The registration stays
    assert_eq!(store.count().await.unwrap(), 1);

    let dead = next_within(&mut dlq, Duration::from_secs(1))
        .await
        .expect("dead letter");
    let letter: DeadLetter = serde_json::from_slice(&dead.payload).unwrap();
    assert_eq!(letter.subject, channels::EVENTS_PROCESSED);
    assert_eq!(letter.attempts, 2);

    // The dead letter carries a replayable confirmation
    let replay: EventResponse = serde_json::from_value(letter.payload).unwrap();
    assert_eq!(replay.original_event_id, message.event_id);
    assert_eq!(replay.registered_event_id, registered.id);
}
