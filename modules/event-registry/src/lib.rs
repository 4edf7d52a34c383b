pub mod config;
pub mod consumer;
pub mod db;
pub mod models;
pub mod repos;
pub mod services;

pub use consumer::{RegistrationOutcome, RegistryConsumer};
pub use services::RegistryQueryService;
