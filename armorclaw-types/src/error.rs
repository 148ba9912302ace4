//! The shared error taxonomy for the bridge.
//!
//! Every subsystem returns [`BridgeError`] (or a crate-local error that
//! converts into it at the seam). The RPC layer maps variants onto
//! JSON-RPC error codes; the retry wrapper keys off [`BridgeError::is_transient`].

use thiserror::Error;

/// Errors surfaced across subsystem boundaries.
///
/// Grouped by how the caller must treat them:
/// input errors are rejected at the boundary, authorization errors are
/// audited and (by policy) silently dropped, transient errors are
/// retryable, and fatal errors refuse the operation outright.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Malformed or empty input rejected at the boundary.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A provider tag outside the recognized set.
    #[error("invalid provider: {0}")]
    InvalidProvider(String),

    /// A file name that escapes its configured directory.
    #[error("path traversal rejected: {0}")]
    PathTraversal(String),

    /// The caller is not authorized for this operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The sender is not in the trust policy.
    #[error("sender not trusted: {0}")]
    SenderNotTrusted(String),

    /// The room is not in the trust policy.
    #[error("room not trusted: {0}")]
    RoomNotTrusted(String),

    /// No credential with the given ID.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// No worker session with the given ID.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// AEAD open failure, short key, or RNG failure. Treated as
    /// tampering unless provably an input bug; always audited.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Connection-class or 5xx-class failure; the retry wrapper may
    /// re-attempt the operation.
    #[error("transient network error: {0}")]
    NetworkTransient(String),

    /// The operation observed the root cancellation token.
    #[error("cancelled")]
    Cancelled,

    /// The keystore cannot be read or written.
    #[error("keystore unavailable: {0}")]
    KeystoreUnavailable(String),

    /// An audit append failed. Audit-required operations abort on this.
    #[error("audit append failed: {0}")]
    AuditAppendFailed(String),

    /// Secret handoff to a worker failed; the worker has been terminated.
    #[error("secret injection failed: {0}")]
    SecretInjectionFailed(String),

    /// Catch-all. Include context.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl BridgeError {
    /// Whether the retry wrapper may re-attempt the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::NetworkTransient(_))
    }

    /// Whether the deny path must be recorded in the audit log.
    pub fn is_audited_denial(&self) -> bool {
        matches!(
            self,
            BridgeError::Unauthorized(_)
                | BridgeError::SenderNotTrusted(_)
                | BridgeError::RoomNotTrusted(_)
                | BridgeError::Crypto(_)
        )
    }
}
