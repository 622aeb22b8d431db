//! Client-side error types.

use grpcweb_core::{Code, FrameError, Status, TimeoutError, TrailerError};

/// Errors surfaced by client RPC operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// The peer resolved the call with a non-OK `grpc-status`, or the
    /// call was cancelled / timed out locally.
    #[error("{0}")]
    Rpc(Status),

    /// Transport-level fault: connection failure, premature body end.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer violated the gRPC wire contract: malformed frame, bad
    /// content-type, missing `grpc-status`, duplicate trailers.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Request message serialization failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// Response message deserialization failed.
    #[error("decode error: {0}")]
    Decode(String),

    /// API misuse: writing after completion, reading trailers before the
    /// call finished. A programmer bug, not a peer status.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl ClientError {
    /// Create a status error with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        ClientError::Rpc(Status::new(code, message))
    }

    /// The status code this error maps to.
    ///
    /// Non-status variants map per the gRPC taxonomy: transport faults
    /// are `Unavailable`, wire violations and codec failures are
    /// `Internal`, API misuse is `Unknown` (it never reaches the wire).
    pub fn code(&self) -> Code {
        match self {
            ClientError::Rpc(status) => status.code(),
            ClientError::Transport(_) => Code::Unavailable,
            ClientError::Protocol(_) | ClientError::Encode(_) | ClientError::Decode(_) => {
                Code::Internal
            }
            ClientError::InvalidOperation(_) => Code::Unknown,
        }
    }

    /// The error message, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            ClientError::Rpc(status) => status.message(),
            ClientError::Transport(msg)
            | ClientError::Protocol(msg)
            | ClientError::Encode(msg)
            | ClientError::Decode(msg)
            | ClientError::InvalidOperation(msg) => Some(msg),
        }
    }

    /// The inner [`Status`] if this is a status error.
    pub fn status(&self) -> Option<&Status> {
        match self {
            ClientError::Rpc(status) => Some(status),
            _ => None,
        }
    }

    /// Whether this error indicates a transient condition worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// The error a cancelled await surfaces, disambiguated by whether the
    /// deadline timer fired.
    pub(crate) fn cancellation(deadline_reached: bool) -> Self {
        if deadline_reached {
            ClientError::Rpc(Status::deadline_exceeded("Deadline Exceeded"))
        } else {
            ClientError::Rpc(Status::cancelled("call was cancelled"))
        }
    }
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        ClientError::Rpc(status)
    }
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        match err {
            // Oversized messages map to ResourceExhausted; a truncated
            // tail at end-of-body is a wire violation.
            FrameError::Oversize { length, limit } => ClientError::Rpc(Status::resource_exhausted(
                format!("received message of {length} bytes exceeds the limit of {limit} bytes"),
            )),
            FrameError::Truncated { .. } => ClientError::Protocol(err.to_string()),
        }
    }
}

impl From<TrailerError> for ClientError {
    fn from(err: TrailerError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

impl From<TimeoutError> for ClientError {
    fn from(err: TimeoutError) -> Self {
        ClientError::Rpc(Status::invalid_argument(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_code_mapping() {
        assert_eq!(
            ClientError::new(Code::NotFound, "missing").code(),
            Code::NotFound
        );
        assert_eq!(
            ClientError::Transport("connection reset".into()).code(),
            Code::Unavailable
        );
        assert_eq!(
            ClientError::Protocol("bad frame".into()).code(),
            Code::Internal
        );
        assert_eq!(ClientError::Encode("x".into()).code(), Code::Internal);
        assert_eq!(ClientError::Decode("x".into()).code(), Code::Internal);
    }

    #[test]
    fn test_cancellation_mapping() {
        assert_eq!(
            ClientError::cancellation(true).code(),
            Code::DeadlineExceeded
        );
        assert_eq!(ClientError::cancellation(false).code(), Code::Canceled);
    }

    #[test]
    fn test_oversize_maps_to_resource_exhausted() {
        let err: ClientError = FrameError::Oversize {
            length: 10,
            limit: 5,
        }
        .into();
        assert_eq!(err.code(), Code::ResourceExhausted);
    }

    #[test]
    fn test_truncated_maps_to_internal() {
        let err: ClientError = FrameError::Truncated { remaining: 3 }.into();
        assert_eq!(err.code(), Code::Internal);
    }

    #[test]
    fn test_status_accessor() {
        let err = ClientError::new(Code::Aborted, "retry");
        assert_eq!(err.status().unwrap().code(), Code::Aborted);
        assert!(ClientError::Transport("x".into()).status().is_none());
    }

    #[test]
    fn test_is_retryable() {
        assert!(ClientError::Transport("reset".into()).is_retryable());
        assert!(ClientError::new(Code::Unavailable, "down").is_retryable());
        assert!(!ClientError::new(Code::NotFound, "missing").is_retryable());
        assert!(!ClientError::InvalidOperation("x".into()).is_retryable());
    }
}
