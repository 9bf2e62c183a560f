use thiserror::Error;

/// Failure reported by a shared counter store backend.
#[derive(Debug, Error)]
pub enum CounterStoreError {
    /// Backend could not be reached or refused the operation.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    /// Stored value could not be interpreted as a counter.
    #[error("corrupt counter value for key {0}")]
    Corrupt(String),
}

/// Errors returned by identifier generators.
#[derive(Debug, Error)]
pub enum IdError {
    /// Shared counter store round trip failed.
    #[error("counter store error: {0}")]
    Store(#[from] CounterStoreError),
    /// Too many concurrent block claims collided on the shared counter.
    #[error("block claim contention after {0} attempts")]
    Contention(u32),
    /// Initial seed must be strictly positive.
    #[error("invalid seed: {0}")]
    InvalidSeed(i64),
}

#[cfg(test)]
mod tests {
    use super::{CounterStoreError, IdError};

    #[test]
    fn error_messages_are_stable() {
        assert_eq!(
            IdError::InvalidSeed(0).to_string(),
            "invalid seed: 0"
        );
        assert_eq!(
            IdError::Contention(64).to_string(),
            "block claim contention after 64 attempts"
        );
        assert_eq!(
            IdError::from(CounterStoreError::Unavailable("down".into())).to_string(),
            "counter store error: counter store unavailable: down"
        );
    }
}
