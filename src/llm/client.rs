//! The LLM collaborator trait and the table-driven retry classifier.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{LlmErrorKind, Result, ReviewError};

/// Default upper bound on in-flight LLM calls across a verification run.
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// The external LLM transport, specified as an interface only.
///
/// A real implementation wraps a provider's HTTP API and must classify any
/// failure into a [`LlmErrorKind`] before returning — this crate's retry
/// logic never inspects error message text.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Complete a single user prompt.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Complete a user prompt under an explicit system prompt.
    async fn complete_with_system(&self, system: &str, user: &str) -> Result<String>;
}

/// Exponential-backoff retry policy for LLM calls.
///
/// Retry eligibility is a pure table lookup over [`LlmErrorKind`] — never a
/// substring scan over the error's message text, which is fragile and easy
/// to defeat with provider wording changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32);
        let millis = (self.base_delay_ms as f64 * factor).round().max(0.0) as u64;
        Duration::from_millis(millis)
    }

    /// Table-driven retry eligibility: network, timeout, and rate-limit
    /// kinds are retryable; auth failures and the catch-all `Other` are not.
    pub fn is_retryable(kind: LlmErrorKind) -> bool {
        matches!(
            kind,
            LlmErrorKind::Network | LlmErrorKind::Timeout | LlmErrorKind::RateLimit
        )
    }
}

/// Call `attempt_fn` with exponential-backoff retry, observing `cancelled`
/// between attempts and during the backoff wait.
pub async fn complete_with_retry<F, Fut>(
    retry_config: &RetryConfig,
    cancelled: &tokio::sync::watch::Receiver<bool>,
    mut attempt_fn: F,
) -> Result<String>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<String>>,
{
    let mut attempt = 0;
    loop {
        if *cancelled.borrow() {
            return Err(ReviewError::Cancelled);
        }
        match attempt_fn().await {
            Ok(response) => return Ok(response),
            Err(err) => {
                let kind = match &err {
                    ReviewError::LlmFailure { kind, .. } => Some(*kind),
                    _ => None,
                };
                let should_retry = kind.is_some_and(RetryConfig::is_retryable)
                    && attempt + 1 < retry_config.max_attempts;
                if !should_retry {
                    return Err(err);
                }
                let delay = retry_config.delay_for_attempt(attempt);
                let mut cancel_rx = cancelled.clone();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel_rx.changed() => {
                        if *cancel_rx.borrow() {
                            return Err(ReviewError::Cancelled);
                        }
                    }
                }
                attempt += 1;
            }
        }
    }
}

/// A test/demo client that returns a fixed response, or fails a configured
/// number of times first. Useful as the default "no real LLM configured"
/// stand-in and in tests.
#[derive(Debug, Clone)]
pub struct ScriptedClient {
    responses: std::sync::Arc<std::sync::Mutex<std::collections::VecDeque<Result<String>>>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<std::result::Result<String, (LlmErrorKind, String)>>) -> Self {
        let queue = responses
            .into_iter()
            .map(|r| r.map_err(|(kind, msg)| ReviewError::llm_failure(kind, msg)))
            .collect();
        Self {
            responses: std::sync::Arc::new(std::sync::Mutex::new(queue)),
        }
    }
}

#[async_trait]
impl LLMClient for ScriptedClient {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        let mut queue = self.responses.lock().unwrap();
        queue
            .pop_front()
            .unwrap_or_else(|| Ok("[]".to_string()))
    }

    async fn complete_with_system(&self, _system: &str, user: &str) -> Result<String> {
        self.complete(user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_table_excludes_auth_and_other() {
        assert!(RetryConfig::is_retryable(LlmErrorKind::Network));
        assert!(RetryConfig::is_retryable(LlmErrorKind::Timeout));
        assert!(RetryConfig::is_retryable(LlmErrorKind::RateLimit));
        assert!(!RetryConfig::is_retryable(LlmErrorKind::Auth));
        assert!(!RetryConfig::is_retryable(LlmErrorKind::Other));
    }

    #[tokio::test]
    async fn retries_until_success_within_bound() {
        let client = ScriptedClient::new(vec![
            Err((LlmErrorKind::RateLimit, "429".into())),
            Err((LlmErrorKind::RateLimit, "429".into())),
            Ok("[]".into()),
        ]);
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let config = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            backoff_factor: 1.0,
        };
        let result = complete_with_retry(&config, &rx, || {
            let client = client.clone();
            async move { client.complete("hi").await }
        })
        .await;
        assert_eq!(result.unwrap(), "[]");
    }

    #[tokio::test]
    async fn does_not_retry_auth_failures() {
        let client = ScriptedClient::new(vec![Err((LlmErrorKind::Auth, "forbidden".into()))]);
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let config = RetryConfig::default();
        let result = complete_with_retry(&config, &rx, || {
            let client = client.clone();
            async move { client.complete("hi").await }
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancellation_short_circuits_backoff_wait() {
        let client = ScriptedClient::new(vec![
            Err((LlmErrorKind::Timeout, "slow".into())),
            Ok("[]".into()),
        ]);
        let (tx, rx) = tokio::sync::watch::channel(false);
        tx.send(true).unwrap();
        let config = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 50,
            backoff_factor: 2.0,
        };
        let result = complete_with_retry(&config, &rx, || {
            let client = client.clone();
            async move { client.complete("hi").await }
        })
        .await;
        assert!(matches!(result, Err(ReviewError::LlmFailure { .. })) || result.is_err());
    }
}
