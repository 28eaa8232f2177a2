//! Error types for session client calls

use session_auth::AcquisitionError;

/// Errors surfaced to callers of `SessionClient::call`.
///
/// Callers use the variant to decide between "retry later" and "this
/// endpoint is not reachable with client credentials".
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A protected call needed a handshake and the handshake failed
    #[error("authentication unavailable: {0}")]
    AuthUnavailable(#[source] AcquisitionError),

    /// Credentials were still rejected after one fresh handshake
    #[error("{endpoint} rejected credentials after a fresh handshake (status {status})")]
    PersistentAuthFailure { endpoint: String, status: u16 },

    /// Non-auth failure from the remote side; `status` is `None` for wire errors
    #[error("{endpoint} failed: {details}")]
    RemoteFailure {
        endpoint: String,
        status: Option<u16>,
        details: String,
    },

    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),
}

impl ClientError {
    /// Whether retrying later might succeed without a configuration change.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::AuthUnavailable(_) => true,
            ClientError::RemoteFailure { status, .. } => match status {
                None => true,
                Some(status) => *status == 408 || *status == 429 || *status >= 500,
            },
            ClientError::PersistentAuthFailure { .. } | ClientError::UnknownEndpoint(_) => false,
        }
    }

    /// Error kind label for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::AuthUnavailable(_) => "auth_unavailable",
            ClientError::PersistentAuthFailure { .. } => "persistent_auth_failure",
            ClientError::RemoteFailure { .. } => "remote_failure",
            ClientError::UnknownEndpoint(_) => "unknown_endpoint",
        }
    }
}

/// Result alias for session client calls.
pub type Result<T> = std::result::Result<T, ClientError>;
