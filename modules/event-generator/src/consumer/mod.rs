pub mod confirmation_consumer;

pub use confirmation_consumer::{ConfirmationHandler, ConfirmationOutcome};
