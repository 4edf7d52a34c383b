use event_bus::consumer_retry::RetryConfig;
use event_bus::{EventBus, InMemoryBus, NatsBus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use event_generator::{
    config::{BusType, Config, StoreType},
    db,
    repos::{EventStore, InMemoryEventStore, PgEventStore},
    ConfirmationHandler, EventGenerator, GenerationSwitch, Scheduler,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting event generator...");

    let config = Config::from_env()?;
    tracing::info!(
        service_name = %config.service_name,
        bus_type = ?config.bus_type,
        store_type = ?config.store_type,
        generation_enabled = config.generation_enabled,
        interval_ms = config.generation_interval.as_millis() as u64,
        "Configuration loaded"
    );

    let store: Arc<dyn EventStore> = match config.store_type {
        StoreType::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or("DATABASE_URL must be set when STORE_TYPE=postgres")?;

            tracing::info!("Connecting to database...");
            let pool = db::init_pool(database_url).await?;

            tracing::info!("Running migrations...");
            db::run_migrations(&pool).await?;

            Arc::new(PgEventStore::new(pool))
        }
        StoreType::InMemory => {
            tracing::info!("Using in-memory event store");
            Arc::new(InMemoryEventStore::new())
        }
    };

    let bus: Arc<dyn EventBus> = match config.bus_type {
        BusType::Nats => {
            tracing::info!("Connecting to NATS at {}", config.nats_url);
            Arc::new(NatsBus::connect(&config.nats_url).await?)
        }
        BusType::InMemory => {
            tracing::info!("Using in-memory event bus");
            Arc::new(InMemoryBus::new())
        }
    };

    let cancel = CancellationToken::new();
    let retry = RetryConfig::default().with_max_attempts(config.retry_max_attempts);

    let confirmations = ConfirmationHandler::new(store.clone(), bus.clone(), retry)
        .start(cancel.clone())
        .await?;

    let generator = EventGenerator::new(
        store,
        bus,
        config.service_name.clone(),
        GenerationSwitch::new(config.generation_enabled),
    );
    let scheduler = Scheduler::new(generator, config.generation_interval).spawn(cancel.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    cancel.cancel();
    let _ = tokio::join!(scheduler, confirmations);

    tracing::info!("Event generator stopped");
    Ok(())
}
