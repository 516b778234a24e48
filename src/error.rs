//! Error types for the quicgate transport endpoint.

use thiserror::Error;

use crate::engine::EngineError;

pub type Result<T> = std::result::Result<T, QuicError>;

/// Wire-level parse failures.
///
/// Always recoverable: the offending datagram is dropped and the receive
/// loop continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The datagram ended before the current field did.
    #[error("truncated input: need {needed} bytes, have {remaining}")]
    TruncatedInput { needed: usize, remaining: usize },

    /// The datagram is structurally invalid (bad type code, oversized
    /// connection id, negative retry token length).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

#[derive(Debug, Error)]
pub enum QuicError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("invalid address validation token")]
    TokenInvalid,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
