use thiserror::Error;

/// Shared error type used across all hxscan crates.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] eyre::Error),
}

impl AppError {
    /// Persistence failures desynchronize derived state from the chain, so
    /// callers must never swallow them.
    pub fn is_persistence(&self) -> bool {
        matches!(self, AppError::Database(_))
    }
}
