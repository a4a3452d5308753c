use thiserror::Error;

/// Failures of the local conversation store. Always returned to the caller of
/// the mutating operation; the store never retries on its own.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage unavailable: {message}")]
    Unavailable { message: String },

    #[error("message {message_id} has no conversation id")]
    UnassignedMessage { message_id: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("a stream is already active (conversation: {conversation_id:?})")]
    AlreadyStreaming { conversation_id: Option<String> },
}

/// Outcome of a failed `StreamCoordinator::send`.
#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The message could not be delivered or the reply stream broke.
    #[error("message could not be delivered: {0:#}")]
    Transport(anyhow::Error),
}
