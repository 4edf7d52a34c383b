pub mod registry_consumer;

pub use registry_consumer::{RegistrationOutcome, RegistryConsumer};
