//! Batched LLM verification: prompt assembly, dispatch, response parsing,
//! and verdict binding.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use super::client::{complete_with_retry, LLMClient, RetryConfig, DEFAULT_MAX_CONCURRENCY};
use crate::error::ReviewError;
use crate::fact::{Fact, Value};
use crate::hypothesis::{Hypothesis, HypothesisType};
use crate::kernel::Kernel;
use crate::response_parser::parse_verdict_array;

const DEFAULT_BATCH_SIZE: usize = 10;
const PROMPT_CHAR_BUDGET: usize = 15_000;
const PRESERVE_WINDOW: u32 = 5;
const FUZZY_LINE_WINDOW: i64 = 3;

/// Configuration for one verification pass.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub retry_config: RetryConfig,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry_config: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Confirmed,
    Dismissed,
}

/// The LLM's decision on a single hypothesis, as returned from the wire
/// format produced by [`crate::response_parser`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Verdict {
    pub hypothesis_index: Option<usize>,
    pub hypothesis_type: String,
    pub file: String,
    pub line: u32,
    pub decision: Decision,
    pub reasoning: String,
    pub confidence: f64,
    pub fix: Option<String>,
    #[serde(default)]
    pub false_positive: bool,
    pub pattern_note: Option<String>,
    pub alternative_risk: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

fn base_severity(kind: HypothesisType) -> Severity {
    use HypothesisType::*;
    match kind {
        SqlInjection | CommandInjection | HardcodedSecret => Severity::Critical,
        UnsafeDeref | NilChannel | Xss | Deadlock => Severity::Error,
        UncheckedError | RaceCondition | GoroutineLeak | ResourceLeak | PathTraversal
        | WeakCrypto => Severity::Warning,
        _ => Severity::Info,
    }
}

/// Deterministic severity derivation from hypothesis kind and verdict
/// confidence (§4.6 step 6).
pub fn determine_severity(kind: HypothesisType, confidence: f64) -> Severity {
    let base = base_severity(kind);
    if confidence >= 0.9 && base == Severity::Warning {
        Severity::Error
    } else if confidence < 0.6 && base == Severity::Critical {
        Severity::Error
    } else {
        base
    }
}

/// A confirmed verdict projected back onto its hypothesis's location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedFinding {
    pub hypothesis: Hypothesis,
    pub severity: Severity,
    pub reasoning: String,
    pub fix: Option<String>,
}

/// Aggregate statistics over one verification pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationStats {
    pub total: usize,
    pub confirmed: usize,
    pub dismissed: usize,
    pub orphaned: usize,
}

impl VerificationStats {
    pub fn precision(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.confirmed as f64 / self.total as f64
        }
    }
}

fn hypothesis_type_name(kind: HypothesisType) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Apply the ±5-line preservation algorithm, stopping at [`PROMPT_CHAR_BUDGET`].
///
/// Walks line indices, marks a window around every hypothesis line as
/// "preserve", then emits contiguous preserved regions separated by
/// `// ... lines X-Y omitted ...` markers.
pub fn truncate_file_for_prompt(contents: &str, hypothesis_lines: &[u32]) -> String {
    let lines: Vec<&str> = contents.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let mut preserve = vec![false; lines.len()];
    for &line in hypothesis_lines {
        let center = line.saturating_sub(1) as usize;
        let lo = center.saturating_sub(PRESERVE_WINDOW as usize);
        let hi = (center + PRESERVE_WINDOW as usize).min(lines.len() - 1);
        for slot in preserve.iter_mut().take(hi + 1).skip(lo) {
            *slot = true;
        }
    }
    if hypothesis_lines.is_empty() {
        preserve.iter_mut().for_each(|p| *p = true);
    }

    let mut out = String::new();
    let mut i = 0;
    while i < lines.len() {
        if !preserve[i] {
            let start = i;
            while i < lines.len() && !preserve[i] {
                i += 1;
            }
            out.push_str(&format!("// ... lines {}-{} omitted ...\n", start + 1, i));
        } else {
            out.push_str(lines[i]);
            out.push('\n');
            i += 1;
        }
        if out.len() >= PROMPT_CHAR_BUDGET {
            out.truncate(PROMPT_CHAR_BUDGET);
            break;
        }
    }
    out
}

fn system_prompt() -> String {
    "You are a precise code-review verifier. For each candidate finding decide \
     Confirmed (a real bug or security issue) or Dismissed (a false positive or \
     already compensated for). Respond with a JSON array of verdicts, one per \
     hypothesis, each an object with fields: hypothesis_index, hypothesis_type, \
     file, line, decision, reasoning, confidence, fix, false_positive, \
     pattern_note, alternative_risk."
        .to_string()
}

fn user_prompt(file: &str, contents: &str, batch: &[(usize, &Hypothesis)]) -> String {
    let lines: Vec<u32> = batch.iter().map(|(_, h)| h.line).collect();
    let truncated = truncate_file_for_prompt(contents, &lines);
    let mut listing = String::new();
    for (index, hyp) in batch {
        listing.push_str(&format!(
            "- index={index} type={:?} line={} message={}\n",
            hyp.kind, hyp.line, hyp.message
        ));
    }
    format!(
        "File: {file}\n```\n{truncated}\n```\n\nCandidate findings:\n{listing}"
    )
}

/// Bind a verdict to its originating hypothesis.
///
/// Order: the echoed `hypothesis_index` if it's in range; exact
/// `(file, line)`; fuzzy `(file, type)` within ±3 lines; first `(file,
/// type)` match; otherwise `None` (the caller logs and drops it).
fn bind_verdict<'a>(verdict: &Verdict, batch: &[(usize, &'a Hypothesis)]) -> Option<usize> {
    if let Some(idx) = verdict.hypothesis_index {
        if batch.iter().any(|(i, _)| *i == idx) {
            return Some(idx);
        }
    }
    if let Some((idx, _)) = batch
        .iter()
        .find(|(_, h)| h.file == verdict.file && h.line == verdict.line)
    {
        return Some(*idx);
    }
    let type_name = verdict.hypothesis_type.to_ascii_lowercase();
    if let Some((idx, _)) = batch.iter().find(|(_, h)| {
        h.file == verdict.file
            && hypothesis_type_name(h.kind).to_ascii_lowercase() == type_name
            && (h.line as i64 - verdict.line as i64).abs() <= FUZZY_LINE_WINDOW
    }) {
        return Some(*idx);
    }
    if let Some((idx, _)) = batch.iter().find(|(_, h)| {
        h.file == verdict.file && hypothesis_type_name(h.kind).to_ascii_lowercase() == type_name
    }) {
        return Some(*idx);
    }
    None
}

async fn assert_feedback(kernel: &Kernel, hyp: &Hypothesis, finding: Option<&VerifiedFinding>, verdict: &Verdict) {
    let delta_conf = (verdict.confidence - hyp.confidence).clamp(-1.0, 1.0);
    match verdict.decision {
        Decision::Confirmed => {
            if let Some(finding) = finding {
                let _ = kernel
                    .assert(Fact::new(
                        "verified_finding",
                        vec![
                            Value::Str(hyp.file.clone()),
                            Value::Int(hyp.line as i64),
                            Value::Str(hypothesis_type_name(hyp.kind)),
                            Value::Str(format!("{:?}", finding.severity)),
                            Value::Int((verdict.confidence * 100.0) as i64),
                            Value::Str(verdict.reasoning.clone()),
                        ],
                    ))
                    .await;
            }
            let _ = kernel
                .assert(Fact::new(
                    "hypothesis_confirmed",
                    vec![
                        Value::Str(hyp.rule_id.clone()),
                        Value::Str(hypothesis_type_name(hyp.kind)),
                        Value::Int((delta_conf * 100.0) as i64),
                    ],
                ))
                .await;
        }
        Decision::Dismissed => {
            let _ = kernel
                .assert(Fact::new(
                    "hypothesis_dismissed",
                    vec![
                        Value::Str(hyp.rule_id.clone()),
                        Value::Str(hypothesis_type_name(hyp.kind)),
                        Value::Int((verdict.confidence * 100.0) as i64),
                        Value::Int((delta_conf * 100.0) as i64),
                        Value::Atom(if verdict.false_positive { "/true" } else { "/false" }.into()),
                    ],
                ))
                .await;
            if let Some(risk) = &verdict.alternative_risk {
                let _ = kernel
                    .assert(Fact::new(
                        "alternative_risk_discovered",
                        vec![
                            Value::Str(hyp.file.clone()),
                            Value::Int(hyp.line as i64),
                            Value::Str(risk.clone()),
                        ],
                    ))
                    .await;
            }
        }
    }
}

/// Run verification over every hypothesis, grouping by file and batching,
/// and assert the resulting kernel feedback facts.
///
/// `file_contents` must contain an entry for every hypothesis's file; a
/// missing entry is treated as an empty file body for prompt purposes.
pub async fn verify_hypotheses(
    kernel: &Kernel,
    client: Arc<dyn LLMClient>,
    hypotheses: Vec<Hypothesis>,
    file_contents: &HashMap<String, String>,
    config: &VerifierConfig,
    cancelled: &tokio::sync::watch::Receiver<bool>,
) -> (Vec<VerifiedFinding>, VerificationStats) {
    let mut by_file: HashMap<String, Vec<(usize, Hypothesis)>> = HashMap::new();
    for (global_index, hyp) in hypotheses.into_iter().enumerate() {
        by_file
            .entry(hyp.file.clone())
            .or_default()
            .push((global_index, hyp));
    }

    let mut batches: Vec<Vec<(usize, Hypothesis)>> = Vec::new();
    for (_, mut group) in by_file {
        group.sort_by_key(|(_, h)| h.line);
        for chunk in group.chunks(config.batch_size) {
            batches.push(chunk.to_vec());
        }
    }

    let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
    let mut tasks = Vec::new();
    for batch in batches {
        let client = Arc::clone(&client);
        let semaphore = Arc::clone(&semaphore);
        let retry_config = config.retry_config.clone();
        let contents = batch
            .first()
            .and_then(|(_, h)| file_contents.get(&h.file).cloned())
            .unwrap_or_default();
        let cancelled = cancelled.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let file = batch.first().map(|(_, h)| h.file.clone()).unwrap_or_default();
            let refs: Vec<(usize, &Hypothesis)> = batch.iter().map(|(i, h)| (*i, h)).collect();
            let system = system_prompt();
            let user = user_prompt(&file, &contents, &refs);
            let response = complete_with_retry(&retry_config, &cancelled, || {
                let client = Arc::clone(&client);
                let system = system.clone();
                let user = user.clone();
                async move { client.complete_with_system(&system, &user).await }
            })
            .await;
            (batch, response)
        }));
    }

    let mut index_to_hyp: HashMap<usize, Hypothesis> = HashMap::new();
    let mut batch_refs: Vec<(usize, Hypothesis)> = Vec::new();
    let mut findings = Vec::new();
    let mut stats = VerificationStats::default();
    let mut resolved: std::collections::HashSet<usize> = std::collections::HashSet::new();

    for task in tasks {
        let (batch, response) = match task.await {
            Ok(result) => result,
            Err(_) => continue,
        };
        stats.total += batch.len();
        for (idx, hyp) in &batch {
            index_to_hyp.insert(*idx, hyp.clone());
        }
        batch_refs.extend(batch.iter().map(|(i, h)| (*i, h.clone())));

        let response = match response {
            Ok(text) => text,
            Err(ReviewError::Cancelled) => {
                stats.orphaned += batch.len();
                continue;
            }
            Err(_) => {
                tracing::warn!(file = %batch.first().map(|(_, h)| h.file.clone()).unwrap_or_default(), "LLM batch failed; dismissing all hypotheses in batch");
                stats.orphaned += batch.len();
                continue;
            }
        };

        let verdicts = match parse_verdict_array(&response) {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("could not parse verifier response; dismissing batch");
                stats.orphaned += batch.len();
                continue;
            }
        };

        let refs: Vec<(usize, &Hypothesis)> = batch.iter().map(|(i, h)| (*i, h)).collect();
        for verdict in &verdicts {
            let Some(bound_index) = bind_verdict(verdict, &refs) else {
                tracing::warn!("dropping unbindable verdict for {}:{}", verdict.file, verdict.line);
                continue;
            };
            if resolved.contains(&bound_index) && matches!(verdict.decision, Decision::Dismissed) {
                // a prior Confirmed arrival wins; later Dismissed never overrides.
                continue;
            }
            let hyp = match index_to_hyp.get(&bound_index) {
                Some(h) => h.clone(),
                None => continue,
            };
            let confidence = verdict.confidence.clamp(0.0, 1.0);
            let mut verdict = verdict.clone();
            verdict.confidence = confidence;

            match verdict.decision {
                Decision::Confirmed => {
                    let severity = determine_severity(hyp.kind, confidence);
                    let finding = VerifiedFinding {
                        hypothesis: hyp.clone(),
                        severity,
                        reasoning: verdict.reasoning.clone(),
                        fix: verdict.fix.clone(),
                    };
                    assert_feedback(kernel, &hyp, Some(&finding), &verdict).await;
                    if !resolved.contains(&bound_index) {
                        stats.confirmed += 1;
                    }
                    resolved.insert(bound_index);
                    findings.push(finding);
                }
                Decision::Dismissed => {
                    assert_feedback(kernel, &hyp, None, &verdict).await;
                    if !resolved.contains(&bound_index) {
                        stats.dismissed += 1;
                        resolved.insert(bound_index);
                    }
                }
            }
        }
    }

    let unresolved = batch_refs
        .iter()
        .filter(|(idx, _)| !resolved.contains(idx))
        .count();
    stats.orphaned += unresolved;

    (findings, stats)
}
