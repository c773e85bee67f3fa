//! Error taxonomy for the session core.
//!
//! DESIGN
//! ======
//! Only [`CredentialError`] is meant for display to the user. Session
//! invalidation and transport-level auth failures are resolved internally by
//! resetting to the unauthenticated baseline; their types exist so callers
//! and logs can tell what happened.

#[cfg(test)]
#[path = "error_test.rs"]
mod error_test;

/// HTTP status the remote API uses for a rejected or expired credential.
pub const AUTH_FAILURE_STATUS: u16 = 401;

// =============================================================================
// TRANSPORT
// =============================================================================

/// A request carrying a credential came back with an authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("authentication rejected by server (status {status})")]
pub struct TransportAuthError {
    pub status: u16,
}

/// Errors produced by the Transport Guard and its backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The server rejected the credential. Forced logout has already run
    /// when this is returned for an authenticated request.
    #[error(transparent)]
    Auth(#[from] TransportAuthError),

    /// The request never produced a response (DNS, connect, timeout).
    #[error("request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("server responded with status {status}")]
    Status { status: u16, detail: Option<String> },

    /// A success body could not be decoded.
    #[error("response parse failed: {0}")]
    Parse(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    ClientBuild(String),
}

impl TransportError {
    /// Whether this failure means the server rejected the credential.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Auth(_) => true,
            Self::Status { status, .. } => *status == AUTH_FAILURE_STATUS,
            _ => false,
        }
    }

    /// Server-supplied `detail` text, when the response carried one.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

// =============================================================================
// STORAGE
// =============================================================================

/// Durable credential storage failed.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("credential storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not determine a state directory for credential storage")]
    NoStateDir,
}

// =============================================================================
// SESSION
// =============================================================================

/// Login or registration did not produce a session. Existing session state
/// is untouched when this is returned.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The server refused the identifier/secret pair.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    /// The request never reached a verdict.
    #[error("{message}")]
    Unreachable { message: String },

    /// The server accepted the login but the credential could not be persisted.
    #[error("could not store credential: {0}")]
    Storage(#[from] StorageError),
}

impl CredentialError {
    /// Map a transport failure on an auth endpoint to a user-facing error,
    /// preferring the server's `detail` text over `fallback`.
    #[must_use]
    pub fn from_transport(err: TransportError, fallback: &str) -> Self {
        match err {
            TransportError::Status { status, detail } => {
                Self::Rejected { status, message: detail.unwrap_or_else(|| fallback.to_owned()) }
            }
            TransportError::Auth(TransportAuthError { status }) => {
                Self::Rejected { status, message: fallback.to_owned() }
            }
            TransportError::Request(_) | TransportError::Parse(_) | TransportError::ClientBuild(_) => {
                tracing::debug!(error = %err, "auth endpoint unreachable");
                Self::Unreachable { message: fallback.to_owned() }
            }
        }
    }
}

/// The combined profile/privilege fetch failed and the session was reset.
///
/// Always displays as "session invalid"; the cause is kept for logging.
#[derive(Debug, thiserror::Error)]
#[error("session invalid")]
pub struct SessionInvalidError {
    cause: TransportError,
}

impl SessionInvalidError {
    #[must_use]
    pub fn new(cause: TransportError) -> Self {
        Self { cause }
    }

    /// The transport failure that invalidated the session.
    #[must_use]
    pub fn cause(&self) -> &TransportError {
        &self.cause
    }
}
