use thiserror::Error;

/// Request-level failures of the evaluation engine.
///
/// Per-run failures (compile errors, crashes, limit breaches) are not errors:
/// they are carried as a [`Verdict`](crate::types::Verdict) on the outcome.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("challenge not found: {0}")]
    ChallengeNotFound(String),

    #[error("sandbox fault: {0}")]
    SandboxFault(String),

    #[error("{what} exceeds maximum size of {limit} bytes")]
    SubmissionTooLarge { what: &'static str, limit: usize },

    #[error("evaluation exceeded its deadline of {0}ms")]
    DeadlineExceeded(u64),

    #[error("challenge store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Stable identifier used in logs, metrics and error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::UnsupportedLanguage(_) => "unsupported_language",
            EngineError::ChallengeNotFound(_) => "challenge_not_found",
            EngineError::SandboxFault(_) => "sandbox_fault",
            EngineError::SubmissionTooLarge { .. } => "submission_too_large",
            EngineError::DeadlineExceeded(_) => "deadline_exceeded",
            EngineError::Store(_) => "store_error",
            EngineError::Config(_) => "config_error",
        }
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        EngineError::Store(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(EngineError::UnsupportedLanguage("cobol".into()).kind(), "unsupported_language");
        assert_eq!(EngineError::ChallengeNotFound("x".into()).kind(), "challenge_not_found");
        assert_eq!(EngineError::DeadlineExceeded(10).kind(), "deadline_exceeded");
    }

    #[test]
    fn test_too_large_message() {
        let err = EngineError::SubmissionTooLarge { what: "source code", limit: 1024 };
        assert_eq!(err.to_string(), "source code exceeds maximum size of 1024 bytes");
    }
}
