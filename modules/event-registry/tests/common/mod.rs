//! Shared helpers for registry integration tests
#![allow(dead_code)]

use event_bus::consumer_retry::RetryConfig;
use event_bus::BusMessage;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;

/// Retry policy with a 1ms initial backoff so failure paths stay fast
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::default()
        .with_max_attempts(max_attempts)
        .with_initial_backoff(Duration::from_millis(1))
}

/// Next message on `stream`, or `None` if nothing arrives within `wait`
pub async fn next_within(
    stream: &mut BoxStream<'static, BusMessage>,
    wait: Duration,
) -> Option<BusMessage> {
    tokio::time::timeout(wait, stream.next()).await.ok().flatten()
}
