//! The LLM collaborator interface, retry policy, and batched verifier.
//!
//! The transport itself (HTTP, auth, provider-specific payload shaping) is
//! an external collaborator — this module only defines the two-operation
//! trait contract plus everything that sits on this side of it: retry
//! classification, prompt assembly, batched dispatch, and verdict binding.

mod client;
mod verifier;

pub use client::{LLMClient, RetryConfig, DEFAULT_MAX_CONCURRENCY};
pub use verifier::{
    verify_hypotheses, Decision, Severity, Verdict, VerificationStats, VerifiedFinding,
    VerifierConfig,
};
