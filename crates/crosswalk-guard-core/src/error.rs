//! Error types for the coordination engine.
//!
//! Store failures are transient by nature and are modeled separately from
//! delivery failures, because the two propagate differently: a store failure
//! during a client mutation surfaces to the caller, while a delivery failure
//! is always swallowed per recipient. Lease contention is not an error at
//! all; see [`crate::lease::RequestOutcome`].

use thiserror::Error;

/// A specialized `Result` type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Top-level error type for the coordination engine.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
    /// A document store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A notification could not be delivered.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Invalid engine configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration error
        message: String,
    },
}

impl CoreError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Errors surfaced by [`crate::store::DocumentStore`] implementations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// The backing store could not be reached or rejected the operation.
    ///
    /// Transient: callers on the evaluation path log and retry on the next
    /// tick, callers on the mutation path propagate it upstream.
    #[error("store unavailable during {operation}: {message}")]
    Unavailable {
        /// The store operation that failed
        operation: &'static str,
        /// Backend-specific failure description
        message: String,
    },

    /// A stored document did not match the expected schema.
    #[error("malformed document at '{key}': {message}")]
    Serialization {
        /// Key of the offending document
        key: String,
        /// Decode failure description
        message: String,
    },
}

impl StoreError {
    /// Creates a new unavailability error.
    #[must_use]
    pub fn unavailable(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            operation,
            message: message.into(),
        }
    }

    /// Creates a new malformed-document error.
    #[must_use]
    pub fn serialization(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serialization {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if retrying the operation later may succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Serialization { .. } => false,
        }
    }
}

/// Per-recipient delivery failure.
///
/// Never aborts the remaining dispatch list; see
/// [`crate::dispatch::emit_to_sids`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DispatchError {
    /// The session's outbound channel is gone (client disconnected).
    #[error("session '{sid}' is closed")]
    SessionClosed {
        /// The unreachable session
        sid: String,
    },

    /// No session is registered under this id.
    #[error("unknown session '{sid}'")]
    UnknownSession {
        /// The unknown session id
        sid: String,
    },
}
