//! Error types for coordination primitives.

use coordkit_service::ServiceError;
use coordkit_service::SessionId;
use snafu::Snafu;

use crate::codec::CodecError;
use crate::session::SessionState;

/// Errors from coordination primitives.
///
/// Timeouts are not errors: timed operations return `false` or `None`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CoordinationError {
    /// The session is not connected (connecting or temporarily disconnected).
    #[snafu(display("session not connected (state: {state})"))]
    NotConnected {
        /// Session state at the time of the call.
        state: SessionState,
    },

    /// The session expired; every primitive bound to it is unusable.
    #[snafu(display("session {session_id} expired"))]
    SessionExpired {
        /// The expired session.
        session_id: SessionId,
    },

    /// The session was closed locally while the operation was in flight.
    #[snafu(display("{operation} cancelled: session closed"))]
    Cancelled {
        /// Description of the operation.
        operation: String,
    },

    /// Illegal use of a primitive by its owner.
    #[snafu(display("protocol violation: {reason}"))]
    ProtocolViolation {
        /// What was violated.
        reason: String,
    },

    /// The primitive (or its session) was destroyed.
    #[snafu(display("{primitive} '{name}' destroyed"))]
    Destroyed {
        /// Kind of primitive.
        primitive: &'static str,
        /// Primitive name.
        name: String,
    },

    /// The coordination service failed the request.
    #[snafu(display("{operation} failed: {source}"))]
    Unavailable {
        /// Description of the operation.
        operation: String,
        /// The underlying error.
        source: ServiceError,
    },

    /// A bounded queue is full.
    #[snafu(display("queue '{name}' is full (capacity: {capacity})"))]
    CapacityExceeded {
        /// Queue name.
        name: String,
        /// Configured capacity.
        capacity: u32,
    },

    /// The queue is empty.
    #[snafu(display("queue '{name}' is empty"))]
    NoSuchElement {
        /// Queue name.
        name: String,
    },

    /// A primitive name or parameter is not usable.
    #[snafu(display("invalid name '{name}': {reason}"))]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A payload could not be encoded.
    #[snafu(display("failed to encode payload for '{path}': {source}"))]
    Encode {
        /// Target path.
        path: String,
        /// The underlying error.
        source: CodecError,
    },

    /// A stored payload could not be decoded.
    #[snafu(display("failed to decode payload of '{path}': {source}"))]
    Decode {
        /// Node the payload came from.
        path: String,
        /// The underlying error.
        source: CodecError,
    },

    /// No `Connected` event arrived in time.
    #[snafu(display("timed out after {timeout_ms}ms waiting for session to connect"))]
    ConnectTimeout {
        /// The configured timeout.
        timeout_ms: u64,
    },
}

impl CoordinationError {
    /// Returns true for `SessionExpired`.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, CoordinationError::SessionExpired { .. })
    }

    /// Returns true for `Cancelled`.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoordinationError::Cancelled { .. })
    }

    /// Map a service failure to the library error.
    ///
    /// Session-level failures keep their meaning; everything else is wrapped
    /// with the operation name.
    pub fn from_service(source: ServiceError, session_id: SessionId, operation: &str) -> Self {
        match source {
            ServiceError::SessionExpired => CoordinationError::SessionExpired { session_id },
            ServiceError::ConnectionLoss => CoordinationError::NotConnected {
                state: SessionState::Disconnected,
            },
            ServiceError::SessionClosed => CoordinationError::Cancelled {
                operation: operation.to_string(),
            },
            source => CoordinationError::Unavailable {
                operation: operation.to_string(),
                source,
            },
        }
    }
}

/// Result alias for coordination operations.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Attach session context to raw service results.
pub(crate) trait ServiceResultExt<T> {
    fn or_unavailable(self, session_id: SessionId, operation: &str) -> CoordinationResult<T>;
}

impl<T> ServiceResultExt<T> for Result<T, ServiceError> {
    fn or_unavailable(self, session_id: SessionId, operation: &str) -> CoordinationResult<T> {
        self.map_err(|source| CoordinationError::from_service(source, session_id, operation))
    }
}

/// Reject names that are empty, too long or contain `/`.
pub(crate) fn validate_name(name: &str) -> CoordinationResult<()> {
    let invalid = |reason: &str| CoordinationError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if name.len() > crate::constants::MAX_NAME_LEN {
        return Err(invalid("name too long"));
    }
    if name.contains('/') {
        return Err(invalid("name must not contain '/'"));
    }
    Ok(())
}
