use thiserror::Error;

/// Canonical error taxonomy for gateway operations
///
/// Each adapter maps its backend's native failures into exactly one of
/// these; unmapped failures pass through as [`GatewayError::Other`] with a
/// logged warning so gaps in mapping stay observable.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Backend rejected the request due to rate limiting
    #[error("rate limited by provider")]
    RateLimited,

    /// Backend is temporarily unavailable
    #[error("provider unavailable: {0}")]
    ServiceUnavailable(String),

    /// Request was malformed or violated a backend schema
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Backend reported an internal failure
    #[error("provider internal error: {0}")]
    InternalProviderError(String),

    /// The invocation was cancelled; never retried
    #[error("stream aborted")]
    StreamAborted,

    /// Network-level failure reaching the backend
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Tool loop ran past its configured round cap
    #[error("tool loop exceeded {max_rounds} rounds")]
    ToolLoopExceeded {
        /// The cap that was hit
        max_rounds: u32,
    },

    /// Unmapped backend error, passed through after a warn log
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    /// Whether the backoff retry in the controller may re-attempt this error
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServiceUnavailable(_) | Self::ConnectionError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_are_retryable() {
        assert!(GatewayError::RateLimited.is_transient());
        assert!(GatewayError::ServiceUnavailable("overloaded".into()).is_transient());
        assert!(GatewayError::ConnectionError("reset".into()).is_transient());
    }

    #[test]
    fn terminal_kinds_are_not_retryable() {
        assert!(!GatewayError::InvalidRequest("bad schema".into()).is_transient());
        assert!(!GatewayError::StreamAborted.is_transient());
        assert!(!GatewayError::InternalProviderError("boom".into()).is_transient());
        assert!(!GatewayError::ToolLoopExceeded { max_rounds: 8 }.is_transient());
    }
}
