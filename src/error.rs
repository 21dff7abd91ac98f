//! Error types shared across the review engine.

use thiserror::Error;

/// Result type alias using this crate's [`ReviewError`].
pub type Result<T> = std::result::Result<T, ReviewError>;

/// Classification of an LLM-transport failure, used by the retry classifier
/// (see [`crate::llm::RetryConfig`]) instead of scanning message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmErrorKind {
    Network,
    Timeout,
    RateLimit,
    Auth,
    Other,
}

/// Errors that can occur while running a review.
#[derive(Error, Debug)]
pub enum ReviewError {
    /// The input task grammar was malformed or referenced no files.
    #[error("invalid review task: {0}")]
    InvalidTask(String),

    /// A fact failed arity/shape validation against its predicate's prior declaration.
    #[error("invalid fact for predicate {predicate}: {reason}")]
    InvalidFact { predicate: String, reason: String },

    /// Query evaluation hit the iteration bound before reaching a fixpoint.
    #[error("query for predicate {predicate} did not reach a fixpoint after {iterations} iterations")]
    QueryIncomplete { predicate: String, iterations: u32 },

    /// A source file could not be read from the filesystem/VCS collaborator.
    #[error("could not read file {path}: {message}")]
    FileUnreadable { path: String, message: String },

    /// The LLM transport returned an error; `kind` drives retry eligibility.
    #[error("LLM call failed ({kind:?}): {message}")]
    LlmFailure { kind: LlmErrorKind, message: String },

    /// A verifier response could not be parsed into verdict JSON.
    #[error("failed to parse verifier response: {0}")]
    ParseFailure(String),

    /// The review run was cancelled before completion.
    #[error("review run cancelled")]
    Cancelled,

    /// The learning store failed to persist or load a record.
    #[error("learning store error: {0}")]
    LearningStore(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A declarative rule file failed to parse.
    #[error("rule file parse error: {0}")]
    RuleParse(String),

    /// Internal invariant violation; should not occur in normal operation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReviewError {
    pub fn invalid_task(message: impl Into<String>) -> Self {
        Self::InvalidTask(message.into())
    }

    pub fn invalid_fact(predicate: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFact {
            predicate: predicate.into(),
            reason: reason.into(),
        }
    }

    pub fn query_incomplete(predicate: impl Into<String>, iterations: u32) -> Self {
        Self::QueryIncomplete {
            predicate: predicate.into(),
            iterations,
        }
    }

    pub fn file_unreadable(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FileUnreadable {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn llm_failure(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self::LlmFailure {
            kind,
            message: message.into(),
        }
    }

    pub fn rule_parse(message: impl Into<String>) -> Self {
        Self::RuleParse(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_expected_fields() {
        let err = ReviewError::query_incomplete("risky/2", 30);
        match err {
            ReviewError::QueryIncomplete { predicate, iterations } => {
                assert_eq!(predicate, "risky/2");
                assert_eq!(iterations, 30);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn display_includes_context() {
        let err = ReviewError::llm_failure(LlmErrorKind::RateLimit, "429 received");
        assert!(err.to_string().contains("RateLimit"));
        assert!(err.to_string().contains("429"));
    }
}
