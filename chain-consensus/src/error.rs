//! Consensus error types

use thiserror::Error;

/// Consensus error type
#[derive(Error, Debug, Clone)]
pub enum ConsensusError {
    /// Encoding or decoding failure in the core codec
    #[error("Codec error: {0}")]
    Codec(String),

    /// Malformed consensus payload or message
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Validator index outside the current validator set
    #[error("Unknown validator index {index} (validator count {count})")]
    UnknownValidator { index: u16, count: usize },

    /// Persisted round state is unusable
    #[error("Persisted state rejected: {0}")]
    Persistence(String),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Wallet cannot sign for the requested key
    #[error("Wallet error: {0}")]
    Wallet(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Actor channel closed
    #[error("Consensus actor is not running")]
    ChannelClosed,

    /// Other error
    #[error("Consensus error: {0}")]
    Other(String),
}

impl From<chain_core::CoreError> for ConsensusError {
    fn from(err: chain_core::CoreError) -> Self {
        ConsensusError::Codec(err.to_string())
    }
}

impl From<chain_db::DbError> for ConsensusError {
    fn from(err: chain_db::DbError) -> Self {
        ConsensusError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ConsensusError {
    fn from(err: serde_json::Error) -> Self {
        ConsensusError::Serialization(err.to_string())
    }
}

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;
