//! Periodic event generation
//!
//! A single timer drives [`EventGenerator::generate_scheduled`]. Ticks run
//! inline in the timer loop, so they never overlap: a tick that is still
//! running when the next one is due causes that one to be skipped. Cancelling
//! stops new ticks; a tick in flight runs to completion first.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::services::EventGenerator;

pub struct Scheduler {
    generator: EventGenerator,
    interval: Duration,
}

impl Scheduler {
    pub fn new(generator: EventGenerator, interval: Duration) -> Self {
        Self { generator, interval }
    }

    /// Run the timer loop on a background task
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Run the timer loop until `cancel` is triggered
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            enabled = self.generator.switch().is_enabled(),
            "Event scheduler started"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Event scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.generator.generate_scheduled().await {
                        Ok(Some(event)) => {
                            tracing::debug!(event_id = %event.id, "Scheduled generation completed");
                        }
                        Ok(None) => {}
                        // The failed cycle is dropped; the timer keeps its schedule.
                        Err(e) => {
                            tracing::error!(error = %e, "Error generating event");
                        }
                    }
                }
            }
        }
    }
}
