//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable`: counted against the node's retry policy.
/// - `ExecutorNotFound`: no executor is bound; retried like any other failure.
/// - `Fatal`: the node is marked failed without further attempts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Transient failure; the engine may re-run the node.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal node error: {0}")]
    Fatal(String),

    /// The node references an executor id that is unset or not registered.
    #[error("no executor bound for '{0}'")]
    ExecutorNotFound(String),
}

impl NodeError {
    /// Whether the retry policy applies to this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }

    /// The bare message, without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Fatal(msg) | Self::ExecutorNotFound(msg) => msg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fatal_errors_bypass_retries() {
        assert!(NodeError::Retryable("x".into()).is_retryable());
        assert!(NodeError::ExecutorNotFound("x".into()).is_retryable());
        assert!(!NodeError::Fatal("x".into()).is_retryable());
    }

    #[test]
    fn display_keeps_original_detail() {
        let err = NodeError::Fatal("disk full".into());
        assert_eq!(err.to_string(), "fatal node error: disk full");
        assert_eq!(err.message(), "disk full");
    }
}
