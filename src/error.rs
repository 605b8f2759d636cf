//! Error types for pairgate.

use std::time::Duration;

use crate::session::SessionState;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Failures surfaced by the pairing lifecycle operations.
///
/// Every variant maps to one machine-readable kind via [`PairingError::kind`],
/// which is what the HTTP facade puts on the wire.
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("Invalid identity: {reason}")]
    InvalidIdentity { reason: String },

    #[error("Submitted code does not match the active pairing session")]
    InvalidCode,

    #[error("Too many pairing attempts, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("A pairing session is already pending for {identity}")]
    Conflict { identity: String },

    #[error("No active pairing session for this identity")]
    NotFound,

    #[error("Pairing code has not been verified yet")]
    NotVerified,

    #[error("Pairing handshake timed out after {timeout:?}")]
    UpstreamTimeout { timeout: Duration },

    #[error("Pairing handshake failed: {reason}")]
    UpstreamFailure { reason: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl PairingError {
    /// Machine-readable failure kind carried in API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidIdentity { .. } => "invalid_identity",
            Self::InvalidCode => "invalid_code",
            Self::RateLimited { .. } => "rate_limited",
            Self::Conflict { .. } => "conflict",
            Self::NotFound => "not_found",
            Self::NotVerified => "not_verified",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UpstreamFailure { .. } => "upstream_failure",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Session-store errors. The lifecycle manager maps these onto
/// [`PairingError`] variants per call site.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("A live pairing session already exists for {identity}")]
    Conflict { identity: String },

    #[error("No live pairing session for {identity}")]
    NotFound { identity: String },

    #[error("Session for {identity} is {current}, expected {expected}")]
    InvalidState {
        identity: String,
        current: SessionState,
        expected: SessionState,
    },

    #[error("Illegal state transition {from} -> {to}")]
    IllegalTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("Pairing code is already in use by another live session")]
    CodeCollision,
}

/// Errors raised by a [`crate::handshake::HandshakeDriver`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("Handshake rejected for {identity}: {reason}")]
    Rejected { identity: String, reason: String },

    #[error("No open handshake for artifact {artifact_id}")]
    NotOpen { artifact_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP facade errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {reason}")]
    BindFailed { addr: String, reason: String },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
