pub mod config;
pub mod consumer;
pub mod db;
pub mod models;
pub mod repos;
pub mod scheduler;
pub mod services;

pub use consumer::{ConfirmationHandler, ConfirmationOutcome};
pub use scheduler::Scheduler;
pub use services::{EventGenerator, GenerationError, GenerationSwitch};
