use thiserror::Error;

use crate::config::DeviceRole;

/// Classification of a failed session-open attempt.
///
/// Every failure reported by an [`Overlay`](crate::Overlay) backend falls
/// into one of these classes. All of them are retryable: the session
/// establisher logs the class and retries after a fixed delay, without
/// limit.
#[derive(Error, Debug)]
pub enum OpenError {
    /// The underlying transport could not be reached at all.
    #[error("transport unavailable")]
    TransportUnavailable,

    /// The transport was reachable but refused or dropped the open.
    #[error("failed to open session")]
    OpenFailed,

    /// The session handshake failed while negotiating sequence numbers.
    #[error("sequence number negotiation failed")]
    SequenceNegotiation,

    /// The locator string could not be parsed or addressed.
    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    /// The backend does not support the requested multicast/unicast
    /// arrangement.
    #[error("unsupported multicast/unicast combination")]
    UnsupportedCombination,

    /// Anything the backend could not classify further.
    #[error("{0}")]
    Other(String),
}

/// Errors that can occur in the session manager and its collaborators.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid static configuration (incompatible role/mode/transport,
    /// missing addresses). Rejected before any connection attempt.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A session-open attempt failed. See [`OpenError`] for the classes.
    #[error(transparent)]
    Open(#[from] OpenError),

    /// A resource declaration failed. Non-fatal: the resource stays
    /// unavailable for the rest of the session.
    #[error("declaration failed for '{keyexpr}': {reason}")]
    Declaration { keyexpr: String, reason: String },

    /// No session is currently open.
    #[error("session not open")]
    NotConnected,

    /// The operation is not available to the configured device role.
    #[error("operation not available to role {0:?}")]
    Role(DeviceRole),

    /// Transport-level failure outside of session open.
    #[error("transport error: {0}")]
    Transport(String),

    /// The overlay backend cannot scout for peers.
    #[error("scouting not supported by this overlay")]
    ScoutUnsupported,

    /// Wire envelope serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for session-manager operations.
pub type Result<T> = std::result::Result<T, Error>;
