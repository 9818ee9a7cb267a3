use redis::RedisError;
use thiserror::Error;

/// Errors surfaced by pattern evaluation and number generation.
///
/// Only [`GeneratorError::Backend`] is worth retrying; everything else is either a
/// caller mistake or an internal consistency bug.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("invalid pattern `{pattern}`: {}", errors.join("; "))]
    InvalidPattern { pattern: String, errors: Vec<String> },

    #[error("missing context variables: {}", variables.join(", "))]
    MissingContext { variables: Vec<String> },

    #[error("unsupported configuration: {0}")]
    UnsupportedConfig(String),

    #[error("storage backend failure: {0}")]
    Backend(#[source] StorageError),

    #[error(
        "verification failed for {sequence}: storage produced `{actual}`, \
         evaluator produced `{expected}`"
    )]
    VerificationFailed {
        sequence: String,
        expected: String,
        actual: String,
    },
}

impl GeneratorError {
    pub fn invalid_pattern(pattern: impl Into<String>, errors: Vec<String>) -> Self {
        GeneratorError::InvalidPattern {
            pattern: pattern.into(),
            errors,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, GeneratorError::Backend(_))
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            GeneratorError::InvalidPattern { .. } => "invalid_pattern",
            GeneratorError::MissingContext { .. } => "missing_context",
            GeneratorError::UnsupportedConfig(_) => "unsupported_config",
            GeneratorError::Backend(_) => "backend",
            GeneratorError::VerificationFailed { .. } => "verification_failed",
        }
    }
}

impl From<StorageError> for GeneratorError {
    fn from(err: StorageError) -> Self {
        match err {
            // A store that evaluates the pattern hands evaluator errors back untouched.
            StorageError::Evaluation(inner) => *inner,
            other => GeneratorError::Backend(other),
        }
    }
}

/// Failures reported by a [`crate::sequence_store::SequenceStore`].
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sequence not found: {0}")]
    SequenceNotFound(String),

    #[error("Corrupt sequence state for {key}: {reason}")]
    CorruptState { key: String, reason: String },

    #[error("Counter overflow for {0}")]
    Overflow(String),

    #[error("Store not configured: {0}")]
    NotConfigured(String),

    #[error("Evaluation failed inside store: {0}")]
    Evaluation(Box<GeneratorError>),
}

impl From<GeneratorError> for StorageError {
    fn from(err: GeneratorError) -> Self {
        StorageError::Evaluation(Box::new(err))
    }
}
