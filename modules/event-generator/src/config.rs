use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    Nats,
    InMemory,
}

impl BusType {
    fn parse(raw: Option<String>) -> Self {
        match raw.unwrap_or_else(|| "inmemory".to_string()).to_lowercase().as_str() {
            "nats" => BusType::Nats,
            "inmemory" => BusType::InMemory,
            other => {
                tracing::warn!(bus_type = %other, "Unknown BUS_TYPE, defaulting to inmemory");
                BusType::InMemory
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    Postgres,
    InMemory,
}

impl StoreType {
    fn parse(raw: Option<String>) -> Self {
        match raw.unwrap_or_else(|| "inmemory".to_string()).to_lowercase().as_str() {
            "postgres" => StoreType::Postgres,
            "inmemory" => StoreType::InMemory,
            other => {
                tracing::warn!(store_type = %other, "Unknown STORE_TYPE, defaulting to inmemory");
                StoreType::InMemory
            }
        }
    }
}

/// Generator configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub bus_type: BusType,
    pub nats_url: String,
    pub store_type: StoreType,
    /// Required when `store_type` is Postgres
    pub database_url: Option<String>,
    pub service_name: String,
    pub generation_enabled: bool,
    pub generation_interval: Duration,
    pub retry_max_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bus_type = BusType::parse(lookup("BUS_TYPE"));
        let nats_url = lookup("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string());

        let store_type = StoreType::parse(lookup("STORE_TYPE"));
        let database_url = lookup("DATABASE_URL");
        if store_type == StoreType::Postgres && database_url.is_none() {
            return Err("DATABASE_URL must be set when STORE_TYPE=postgres".to_string());
        }

        let service_name =
            lookup("SERVICE_NAME").unwrap_or_else(|| "event-generator".to_string());

        let generation_enabled: bool = lookup("GENERATION_ENABLED")
            .unwrap_or_else(|| "true".to_string())
            .to_lowercase()
            .parse()
            .map_err(|_| "GENERATION_ENABLED must be true or false".to_string())?;

        let interval_ms: u64 = lookup("GENERATION_INTERVAL_MS")
            .unwrap_or_else(|| "10000".to_string())
            .parse()
            .map_err(|_| "GENERATION_INTERVAL_MS must be a valid u64".to_string())?;
        if interval_ms == 0 {
            return Err("GENERATION_INTERVAL_MS must be greater than 0".to_string());
        }

        let retry_max_attempts: u32 = lookup("RETRY_MAX_ATTEMPTS")
            .unwrap_or_else(|| "3".to_string())
            .parse()
            .map_err(|_| "RETRY_MAX_ATTEMPTS must be a valid u32".to_string())?;

        Ok(Config {
            bus_type,
            nats_url,
            store_type,
            database_url,
            service_name,
            generation_enabled,
            generation_interval: Duration::from_millis(interval_ms),
            retry_max_attempts,
        })
    }
}
