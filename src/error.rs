use std::time::Duration;

use thiserror::Error;

use crate::roundtrip::RejectReason;

/// Failure taxonomy for the egress path. Every per-request failure is a
/// value of this type; nothing in the crate aborts the process.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    /// The token endpoint rejected the exchange or returned a token that
    /// failed structural validation. Never retried inside the authenticator.
    #[error("token exchange rejected: {reason}")]
    TokenInvalid { reason: String },

    /// The publish queue was full and the submission was dropped.
    #[error("publish queue full, submission dropped")]
    QueueOverflow,

    /// The request did not complete within its deadline. The underlying
    /// network call may still be running; its result is discarded.
    #[error("request exceeded {0:?} deadline")]
    Timeout(Duration),

    /// A configured proxy refused the CONNECT tunnel.
    #[error("proxy refused connection with status {status}")]
    ProxyConnectionFailed { status: u16 },

    /// Transport-level disruption (connection reset, stream killed).
    /// Recoverable: only the in-flight request fails, the pipeline keeps
    /// running.
    #[error("transport disrupted: {0}")]
    InternalError(String),

    /// A live command reply could not be parsed back into a signal.
    #[error("response could not be parsed: {0}")]
    MalformedResponse(String),

    /// The response did not correspond to the command that produced it.
    #[error("round-trip validation failed: {0}")]
    RoundTrip(#[from] RejectReason),

    /// The request itself was unusable (bad header value, malformed URI).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl PublishError {
    /// Short stable label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TokenInvalid { .. } => "token_invalid",
            Self::QueueOverflow => "queue_overflow",
            Self::Timeout(_) => "timeout",
            Self::ProxyConnectionFailed { .. } => "proxy_connection_failed",
            Self::InternalError(_) => "internal_error",
            Self::MalformedResponse(_) => "malformed_response",
            Self::RoundTrip(_) => "round_trip_rejected",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}
