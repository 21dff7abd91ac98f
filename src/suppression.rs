//! Suppression filtering and the autopoiesis learning loop.
//!
//! Suppression never reconstructs a finding from kernel query results — it
//! only filters the caller's original list against `suppressed_finding`
//! facts. Autopoiesis tracks recurring message/file patterns across runs and
//! promotes them to persistent flagged/approved patterns once they cross a
//! count threshold, plus learns from individual dismissal/anti-pattern
//! feedback via the [`crate::learning_store::LearningStore`].

use std::sync::LazyLock;

use regex::Regex;

use crate::error::Result;
use crate::fact::{Fact, Value};
use crate::kernel::Kernel;
use crate::learning_store::LearningStore;
use crate::scanner::RawFinding;

/// Critical/error findings recurring this many times in a namespace are
/// promoted to a persistent flagged pattern.
pub const FLAG_PROMOTION_THRESHOLD: u32 = 3;

/// Clean/info findings recurring this many times are promoted to a
/// persistent approved pattern (a file that keeps coming back clean).
pub const APPROVE_PROMOTION_THRESHOLD: u32 = 5;

/// Dismissal-confidence grows toward this ceiling before the suppression is
/// promoted to a global (cross-run) suppression fact. The growth curve
/// itself (a capped additive step per dismissal, matching
/// [`crate::learning_store::SqliteLearningStore::save`]'s `+0.1` update) was
/// an open question in the source design notes; a linear approach-to-ceiling
/// was chosen over a sigmoid since the store only tracks a single scalar per
/// key and has no notion of elapsed "rounds" to parameterize a sigmoid with.
pub const DISMISSAL_PROMOTION_THRESHOLD: f64 = 0.8;

static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());

/// Normalize a message or path into a stable pattern key: collapse digit
/// runs to `N`, lowercase, truncate to 100 chars. Idempotent.
pub fn normalize(s: &str) -> String {
    let collapsed = DIGIT_RUN.replace_all(s, "N");
    let lowered = collapsed.to_ascii_lowercase();
    lowered.chars().take(100).collect()
}

/// Filter `findings` down to the ones the kernel does not consider
/// suppressed, after asserting each as a `raw_finding` fact and querying
/// `suppressed_finding`. The returned list is a subset of the input, in the
/// same order — never reconstructed from fact data.
pub async fn apply_suppression(
    kernel: &Kernel,
    findings: Vec<RawFinding>,
) -> Result<Vec<RawFinding>> {
    if findings.is_empty() {
        return Ok(findings);
    }

    let raw_facts: Vec<Fact> = findings
        .iter()
        .map(|f| Fact {
            predicate: "raw_finding".to_string(),
            args: vec![
                Value::Str(f.file.clone()),
                Value::Int(f.line as i64),
                Value::Atom(format!("/{}", severity_atom(f.severity))),
                Value::Atom(format!("/{}", category_atom(f.category))),
                Value::Str(f.rule_id.clone()),
                Value::Str(f.message.clone()),
            ],
        })
        .collect();
    kernel.assert_all(raw_facts).await?;

    let suppressed = kernel.query_best_effort("suppressed_finding").await;
    let suppressed_keys: std::collections::HashSet<(String, i64, String)> = suppressed
        .into_iter()
        .filter_map(|fact| {
            let file = fact.args.first()?.as_str_lossy();
            let line = match fact.args.get(1)? {
                Value::Int(n) => *n,
                other => other.as_str_lossy().parse().ok()?,
            };
            let rule_id = fact.args.get(2)?.as_str_lossy();
            Some((file, line, rule_id))
        })
        .collect();

    Ok(findings
        .into_iter()
        .filter(|f| !suppressed_keys.contains(&(f.file.clone(), f.line as i64, f.rule_id.clone())))
        .collect())
}

fn severity_atom(s: crate::scanner::Severity) -> &'static str {
    use crate::scanner::Severity::*;
    match s {
        Info => "info",
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

fn category_atom(c: crate::scanner::FindingCategory) -> &'static str {
    use crate::scanner::FindingCategory::*;
    match c {
        Security => "security",
        Bug => "bug",
        Maintainability => "maintainability",
        Architecture => "architecture",
    }
}

trait ValueLossy {
    fn as_str_lossy(&self) -> String;
}

impl ValueLossy for Value {
    fn as_str_lossy(&self) -> String {
        match self {
            Value::Atom(s) | Value::Str(s) => s.clone(),
            Value::Int(n) => n.to_string(),
        }
    }
}

/// Autopoiesis step run after suppression: feed recurring message/file
/// patterns into the learning store, promoting to a persistent
/// `flagged_pattern`/`approved_pattern` fact once the count threshold is
/// crossed.
pub async fn record_finding_patterns(
    store: &dyn LearningStore,
    kernel: &Kernel,
    findings: &[RawFinding],
) -> Result<()> {
    for finding in findings {
        let is_severe = matches!(
            finding.severity,
            crate::scanner::Severity::Critical | crate::scanner::Severity::High
        );
        if is_severe {
            let key = normalize(&finding.message);
            store
                .save("autopoiesis", "flagged_pattern", &[key.clone()], Some(&finding.rule_id))
                .await?;
            let records = store.load_by_predicate("autopoiesis", "flagged_pattern").await?;
            if let Some(record) = records.iter().find(|r| r.fact_args == vec![key.clone()]) {
                if promotion_count(record.confidence) >= FLAG_PROMOTION_THRESHOLD {
                    kernel
                        .assert(Fact {
                            predicate: "flagged_pattern".to_string(),
                            args: vec![Value::Str(key)],
                        })
                        .await?;
                }
            }
        }
    }
    Ok(())
}

/// Record that a file's scan came back clean, for the "approved pattern"
/// side of autopoiesis (a file with a long clean streak).
pub async fn record_clean_file(
    store: &dyn LearningStore,
    kernel: &Kernel,
    file: &str,
) -> Result<()> {
    let key = normalize(file);
    store.save("autopoiesis", "approved_pattern", &[key.clone()], None).await?;
    let records = store.load_by_predicate("autopoiesis", "approved_pattern").await?;
    if let Some(record) = records.iter().find(|r| r.fact_args == vec![key.clone()]) {
        if promotion_count(record.confidence) >= APPROVE_PROMOTION_THRESHOLD {
            kernel
                .assert(Fact {
                    predicate: "approved_pattern".to_string(),
                    args: vec![Value::Str(key)],
                })
                .await?;
        }
    }
    Ok(())
}

/// Confidence accumulates by +0.1 per repeated save (see
/// [`crate::learning_store::SqliteLearningStore::save`]); recover an
/// approximate occurrence count from it for threshold comparisons.
fn promotion_count(confidence: f64) -> u32 {
    (confidence / 0.1).round() as u32
}

/// A reviewer dismissed a hypothesis as a false positive: persist a
/// suppression record keyed by `(file, rule_id)` with growing confidence,
/// and promote it to a kernel-visible global suppression once it crosses
/// [`DISMISSAL_PROMOTION_THRESHOLD`].
pub async fn learn_from_dismissal(
    store: &dyn LearningStore,
    kernel: &Kernel,
    file: &str,
    rule_id: &str,
    reason: &str,
) -> Result<()> {
    store
        .save("suppression", "dismissal", &[file.to_string(), rule_id.to_string()], Some(reason))
        .await?;
    let records = store.load_by_predicate("suppression", "dismissal").await?;
    let key = vec![file.to_string(), rule_id.to_string()];
    if let Some(record) = records.iter().find(|r| r.fact_args == key) {
        if record.confidence >= DISMISSAL_PROMOTION_THRESHOLD {
            kernel
                .assert(Fact {
                    predicate: "suppressed_finding".to_string(),
                    args: vec![
                        Value::Str(file.to_string()),
                        Value::Atom("/any".to_string()),
                        Value::Str(rule_id.to_string()),
                        Value::Str(reason.to_string()),
                    ],
                })
                .await?;
        }
    }
    Ok(())
}

/// A reviewer flagged a *new* anti-pattern outright: persist it immediately,
/// no threshold, since this is an explicit human judgement rather than an
/// inferred recurrence.
pub async fn learn_anti_pattern(
    store: &dyn LearningStore,
    pattern: &str,
    reason: &str,
) -> Result<()> {
    let key = normalize(pattern);
    store
        .save("suppression", "anti_pattern", &[key], Some(reason))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{FindingCategory, Severity};

    fn finding(file: &str, line: u32, rule_id: &str, severity: Severity) -> RawFinding {
        RawFinding {
            file: file.to_string(),
            line,
            rule_id: rule_id.to_string(),
            severity,
            category: FindingCategory::Security,
            message: format!("issue at line {line}"),
            suggestion: "fix it".to_string(),
        }
    }

    #[test]
    fn normalize_collapses_digits_and_truncates() {
        let a = normalize("error on line 123 in file42.go");
        assert_eq!(a, "error on line n in fileN.go");
        assert!(normalize(&"x".repeat(500)).len() == 100);
    }

    #[test]
    fn normalize_is_idempotent() {
        let s = "Error 404 at Line99";
        assert_eq!(normalize(&normalize(s)), normalize(s));
    }

    #[tokio::test]
    async fn suppression_filters_without_reconstructing() {
        let kernel = Kernel::new();
        kernel
            .assert(Fact {
                predicate: "suppressed_finding".to_string(),
                args: vec![
                    Value::Str("a.go".into()),
                    Value::Int(10),
                    Value::Str("SQL_CONCAT".into()),
                    Value::Str("reviewed false positive".into()),
                ],
            })
            .await
            .unwrap();

        let findings = vec![
            finding("a.go", 10, "SQL_CONCAT", Severity::High),
            finding("a.go", 20, "SQL_CONCAT", Severity::High),
        ];
        let remaining = apply_suppression(&kernel, findings).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].line, 20);
    }

    #[tokio::test]
    async fn empty_input_short_circuits() {
        let kernel = Kernel::new();
        let remaining = apply_suppression(&kernel, vec![]).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn repeated_severe_findings_promote_to_flagged_pattern() {
        let store = crate::learning_store::SqliteLearningStore::in_memory().unwrap();
        let kernel = Kernel::new();
        for i in 0..FLAG_PROMOTION_THRESHOLD {
            let f = finding("b.go", i, "HARDCODED_SECRET", Severity::Critical);
            record_finding_patterns(&store, &kernel, std::slice::from_ref(&f))
                .await
                .unwrap();
        }
        let facts = kernel.query_best_effort("flagged_pattern").await;
        assert_eq!(facts.len(), 1);
    }

    #[tokio::test]
    async fn dismissal_promotes_after_threshold_crossed() {
        let store = crate::learning_store::SqliteLearningStore::in_memory().unwrap();
        let kernel = Kernel::new();
        for _ in 0..9 {
            learn_from_dismissal(&store, &kernel, "c.go", "TODO_FIXME", "not actionable")
                .await
                .unwrap();
        }
        let facts = kernel.query_best_effort("suppressed_finding").await;
        assert_eq!(facts.len(), 1);
    }
}
