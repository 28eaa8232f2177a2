//! Error types for handshake acquisition

/// Errors from a handshake attempt.
///
/// Every variant is terminal for that attempt; retry policy belongs to the
/// caller. `Clone` so callers coalesced onto one handshake can share the
/// outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("handshake step {step} ({path}) failed: {message}")]
    Transport {
        step: usize,
        path: String,
        message: String,
    },

    #[error("handshake step {step} ({path}) returned status {status}")]
    Status {
        step: usize,
        path: String,
        status: u16,
    },

    #[error("handshake completed without a {cookie_name} cookie")]
    MissingCookie { cookie_name: String },

    #[error("handshake completed without an anti-forgery token")]
    MissingToken,

    #[error("invalid handshake configuration: {0}")]
    Config(String),
}

/// The handshake could not mint a credential pair.
pub type AcquisitionError = Error;

/// Result alias for handshake operations.
pub type Result<T> = std::result::Result<T, Error>;
