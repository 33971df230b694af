//! Error taxonomy shared by every component of the engine.
//!
//! Cancellation is not an error here: a pre-empted conversation operation
//! ends in `GuardedOutcome::Cancelled`, which callers discard.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Malformed input rejected before any I/O (bad conversation id, empty text).
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Upstream asked us to slow down (HTTP 429).
    #[error("Rate limited by completion provider: {0}")]
    RateLimited(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    /// Transient upstream failure (5xx, connection reset). Safe to retry.
    #[error("Completion provider error: {0}")]
    Provider(String),

    /// Malformed response or authentication failure. Never retried.
    #[error("Completion provider rejected the request: {0}")]
    ProviderFatal(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A background task died (panic or runtime shutdown).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the scheduler or classifier may retry the failed call.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::RateLimited(_) | EngineError::Timeout(_) | EngineError::Provider(_)
        )
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        EngineError::StorageUnavailable(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::RateLimited("slow down".into()).is_transient());
        assert!(EngineError::Timeout("deadline".into()).is_transient());
        assert!(EngineError::Provider("502".into()).is_transient());
        assert!(!EngineError::ProviderFatal("401".into()).is_transient());
        assert!(!EngineError::validation("empty").is_transient());
        assert!(!EngineError::storage("down").is_transient());
        assert!(!EngineError::Internal("join failed".into()).is_transient());
    }
}
