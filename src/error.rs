use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Failures raised by the backing idempotency stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("postgres: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Central error type for pipeline and coordinator operations.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required collaborator or tuning value is invalid.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// No in-progress record exists for the key being transitioned.
    #[error("not found: {0}")]
    NotFound(String),

    /// The bounded wait for a terminal idempotency state was exhausted.
    #[error("max idempotency poll attempts exceeded")]
    MaxAttemptsExceeded,

    /// The payload could not be decoded or is missing a required field.
    #[error("decode: {0}")]
    Decode(String),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// The caller's cancellation fired while waiting on the store.
    #[error("invocation cancelled")]
    Cancelled,

    /// A terminal failure recorded by an earlier invocation of the same
    /// unit of work, replayed from the store.
    #[error("{0}")]
    Recorded(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the hosting runtime should redeliver: the key holder may
    /// still write a terminal state before the next attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::MaxAttemptsExceeded | AppError::Store(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Store(StoreError::Postgres(err))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Store(StoreError::Redis(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::MaxAttemptsExceeded.is_retryable());
        assert!(AppError::Store(StoreError::Unavailable("ping timed out".into())).is_retryable());
        assert!(!AppError::Decode("bad payload".into()).is_retryable());
        assert!(!AppError::NotFound("k1".into()).is_retryable());
        assert!(!AppError::Cancelled.is_retryable());
    }

    #[test]
    fn test_recorded_error_displays_original_text() {
        let err = AppError::Recorded("insufficient funds".into());
        assert_eq!(err.to_string(), "insufficient funds");
    }
}
