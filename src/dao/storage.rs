use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by room stores regardless of the backing implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend cannot be reached or refused the operation.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// What failed.
        message: String,
        /// Backend error, when there is one.
        #[source]
        source: Option<Box<dyn Error + Send + Sync>>,
    },
    /// A write targeted a room the store does not know.
    #[error("room `{0}` does not exist")]
    MissingRoom(String),
    /// A write targeted a ticket the store does not know.
    #[error("ticket `{ticket_id}` does not exist in room `{room}`")]
    MissingTicket {
        /// Room that was addressed.
        room: String,
        /// Ticket that was not found.
        ticket_id: u64,
    },
}

impl StorageError {
    /// Construct an unavailable error without an underlying cause.
    pub fn offline(message: impl Into<String>) -> Self {
        StorageError::Unavailable {
            message: message.into(),
            source: None,
        }
    }
}
