//! Error types for tether

use thiserror::Error;
use uuid::Uuid;

/// Core error type for connection lifecycle operations
#[derive(Error, Debug)]
pub enum TetherError {
    /// Bad user input: name length, malformed descriptor
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operation was rejected by the current lifecycle state
    #[error("Busy: {0}")]
    Busy(String),

    /// A connect attempt settled after a newer attempt superseded it.
    ///
    /// Never returned to callers; the superseded caller gets
    /// `ConnectOutcome::Cancelled` instead.
    #[error("Connect attempt {token} was superseded")]
    StaleAttempt { token: u64 },

    /// Failure reported by the connector. The message is passed through as-is.
    #[error("{0}")]
    Connector(String),

    #[error("Connection not found: {0}")]
    NotFound(Uuid),

    /// No secret vault backs the store; secrets live for this session only
    #[error("Secret store unavailable: {0}")]
    SecretStoreUnavailable(String),

    #[error("Secret store error: {0}")]
    SecretStore(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TetherError {
    /// Build a connector error from anything displayable, keeping its message verbatim
    pub fn connector(message: impl ToString) -> Self {
        Self::Connector(message.to_string())
    }

    /// Whether telemetry-grade consumers should treat this as a real failure
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::StaleAttempt { .. })
    }
}

/// Result type alias for tether operations
pub type Result<T> = std::result::Result<T, TetherError>;
