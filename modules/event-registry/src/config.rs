use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    Nats,
    InMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    Postgres,
    InMemory,
}

/// Registry configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub bus_type: BusType,
    pub nats_url: String,
    pub store_type: StoreType,
    pub database_url: Option<String>,
    /// Stamped as `registryServiceName` on confirmations
    pub service_name: String,
    pub retry_max_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bus_type = match lookup("BUS_TYPE")
            .unwrap_or_else(|| "inmemory".to_string())
            .to_lowercase()
            .as_str()
        {
            "nats" => BusType::Nats,
            "inmemory" => BusType::InMemory,
            other => {
                tracing::warn!(bus_type = %other, "Unknown BUS_TYPE, defaulting to inmemory");
                BusType::InMemory
            }
        };

        let store_type = match lookup("STORE_TYPE")
            .unwrap_or_else(|| "inmemory".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" => StoreType::Postgres,
            "inmemory" => StoreType::InMemory,
            other => {
                tracing::warn!(store_type = %other, "Unknown STORE_TYPE, defaulting to inmemory");
                StoreType::InMemory
            }
        };

        let database_url = lookup("DATABASE_URL");
        if store_type == StoreType::Postgres && database_url.is_none() {
            return Err("DATABASE_URL must be set when STORE_TYPE=postgres".to_string());
        }

        let retry_max_attempts: u32 = lookup("RETRY_MAX_ATTEMPTS")
            .unwrap_or_else(|| "3".to_string())
            .parse()
            .map_err(|_| "RETRY_MAX_ATTEMPTS must be a valid u32".to_string())?;

        Ok(Config {
            bus_type,
            nats_url: lookup("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string()),
            store_type,
            database_url,
            service_name: lookup("REGISTRY_SERVICE_NAME")
                .unwrap_or_else(|| "event-registry".to_string()),
            retry_max_attempts,
        })
    }
}
