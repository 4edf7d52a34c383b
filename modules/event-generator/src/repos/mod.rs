pub mod event_repo;
pub mod inmemory_event_repo;

pub use event_repo::{EventStore, MarkOutcome, PgEventStore};
pub use inmemory_event_repo::InMemoryEventStore;

/// Errors that can occur during event storage operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether a retry can succeed where this attempt failed
    ///
    /// Connection, pool and serialization-conflict failures are transient.
    /// Schema mismatches, decode failures and constraint violations repeat on
    /// every attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(e) => is_transient_sqlx(e),
        }
    }
}

fn is_transient_sqlx(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        // SQLSTATE classes 08 (connection), 40 (rollback), 53 (resources), 57 (operator)
        sqlx::Error::Database(db) => db.code().is_some_and(|code| {
            ["08", "40", "53", "57"]
                .iter()
                .any(|class| code.starts_with(class))
        }),
        _ => false,
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
