//! Translates kernel query results into ranked [`Hypothesis`] records.

use serde::{Deserialize, Serialize};

use crate::fact::{Fact, Value};
use crate::kernel::Kernel;

/// Tagged kind of a derived hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum HypothesisType {
    SqlInjection,
    CommandInjection,
    HardcodedSecret,
    UnsafeDeref,
    NilChannel,
    UncheckedError,
    RaceCondition,
    GoroutineLeak,
    ResourceLeak,
    PathTraversal,
    WeakCrypto,
    Xss,
    Deadlock,
    HeroRisk,
    ShotgunSurgery,
    LayerLeakage,
    CircularDependency,
    ZombieTest,
}

impl HypothesisType {
    /// The kernel predicate this kind is read from, and the query's minimum
    /// expected positional arity (file, line, plus any extra bindings).
    pub fn query_predicate(&self) -> &'static str {
        match self {
            Self::SqlInjection => "sql_injection",
            Self::CommandInjection => "command_injection",
            Self::HardcodedSecret => "hardcoded_secret",
            Self::UnsafeDeref => "unsafe_deref",
            Self::NilChannel => "nil_channel",
            Self::UncheckedError => "unchecked_error",
            Self::RaceCondition => "race_condition",
            Self::GoroutineLeak => "goroutine_leak",
            Self::ResourceLeak => "resource_leak",
            Self::PathTraversal => "path_traversal",
            Self::WeakCrypto => "weak_crypto",
            Self::Xss => "xss",
            Self::Deadlock => "deadlock",
            Self::HeroRisk => "hero_risk",
            Self::ShotgunSurgery => "shotgun_surgery",
            Self::LayerLeakage => "layer_leakage",
            Self::CircularDependency => "circular_dependency",
            Self::ZombieTest => "zombie_test",
        }
    }

    pub fn all() -> &'static [HypothesisType] {
        use HypothesisType::*;
        &[
            SqlInjection,
            CommandInjection,
            HardcodedSecret,
            UnsafeDeref,
            NilChannel,
            UncheckedError,
            RaceCondition,
            GoroutineLeak,
            ResourceLeak,
            PathTraversal,
            WeakCrypto,
            Xss,
            Deadlock,
            HeroRisk,
            ShotgunSurgery,
            LayerLeakage,
            CircularDependency,
            ZombieTest,
        ]
    }
}

/// Category a hypothesis (and its eventual finding) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Security,
    Bug,
    Maintainability,
    Architecture,
}

/// A derived candidate finding pending LLM verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub kind: HypothesisType,
    pub file: String,
    pub line: u32,
    pub variable: Option<String>,
    pub category: Category,
    pub rule_id: String,
    pub confidence: f64,
    pub logic_trace: String,
    pub message: String,
}

impl Hypothesis {
    fn dedup_key(&self) -> (HypothesisType, &str, u32, Option<&str>) {
        (self.kind, self.file.as_str(), self.line, self.variable.as_deref())
    }
}

fn value_as_str(v: &Value) -> String {
    match v {
        Value::Str(s) => s.clone(),
        Value::Atom(a) => a.clone(),
        Value::Int(i) => i.to_string(),
    }
}

fn value_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        Value::Str(s) => s.parse().ok(),
        Value::Atom(_) => None,
    }
}

/// Project a fact derived from `predicate/N` onto a [`Hypothesis`].
///
/// Expected fact shape: `predicate(file, line, confidence, rule_id,
/// logic_trace, message[, variable])`. Facts that don't meet the minimum
/// shape are skipped rather than causing the whole generation pass to fail.
fn project_fact(kind: HypothesisType, category: Category, fact: &Fact) -> Option<Hypothesis> {
    if fact.args.len() < 5 {
        return None;
    }
    let file = value_as_str(&fact.args[0]);
    let line = value_as_i64(&fact.args[1])? as u32;
    let confidence = match &fact.args[2] {
        Value::Int(i) => *i as f64 / 100.0,
        Value::Str(s) => s.parse().ok()?,
        Value::Atom(_) => return None,
    }
    .clamp(0.0, 1.0);
    let rule_id = value_as_str(&fact.args[3]);
    let logic_trace = value_as_str(&fact.args[4]);
    let message = fact
        .args
        .get(5)
        .map(value_as_str)
        .unwrap_or_else(|| format!("{:?} detected at {file}:{line}", kind));
    let variable = fact.args.get(6).map(value_as_str);

    Some(Hypothesis {
        kind,
        file,
        line,
        variable,
        category,
        rule_id,
        confidence,
        logic_trace,
        message,
    })
}

fn category_for(kind: HypothesisType) -> Category {
    use HypothesisType::*;
    match kind {
        SqlInjection | CommandInjection | HardcodedSecret | PathTraversal | WeakCrypto | Xss => {
            Category::Security
        }
        UnsafeDeref | NilChannel | UncheckedError | RaceCondition | GoroutineLeak
        | ResourceLeak | Deadlock => Category::Bug,
        HeroRisk | ShotgunSurgery | ZombieTest => Category::Maintainability,
        LayerLeakage | CircularDependency => Category::Architecture,
    }
}

/// Outcome of a hypothesis generation pass.
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    pub hypotheses: Vec<Hypothesis>,
    /// Predicates whose query did not reach a fixpoint (degraded, not fatal).
    pub incomplete_predicates: Vec<String>,
}

/// Run every registered hypothesis kind's query against the kernel, project,
/// dedupe, filter, and rank the results.
pub async fn generate_hypotheses(
    kernel: &Kernel,
    min_confidence: f64,
    max_hypotheses: usize,
) -> GenerationReport {
    let mut by_key: std::collections::HashMap<(HypothesisType, String, u32, Option<String>), Hypothesis> =
        std::collections::HashMap::new();
    let mut incomplete = Vec::new();

    for &kind in HypothesisType::all() {
        let predicate = kind.query_predicate();
        let facts = match kernel.query(predicate).await {
            Ok(facts) => facts,
            Err(crate::error::ReviewError::QueryIncomplete { .. }) => {
                incomplete.push(predicate.to_string());
                kernel.query_best_effort(predicate).await
            }
            Err(_) => continue,
        };
        let category = category_for(kind);
        for fact in &facts {
            if let Some(hyp) = project_fact(kind, category, fact) {
                let key = (
                    hyp.kind,
                    hyp.file.clone(),
                    hyp.line,
                    hyp.variable.clone(),
                );
                by_key
                    .entry(key)
                    .and_modify(|existing| {
                        if hyp.confidence > existing.confidence {
                            *existing = hyp.clone();
                        }
                    })
                    .or_insert(hyp);
            }
        }
    }

    let mut hypotheses: Vec<Hypothesis> = by_key
        .into_values()
        .filter(|h| h.confidence >= min_confidence)
        .collect();
    hypotheses.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.dedup_key().1.cmp(b.dedup_key().1))
            .then_with(|| a.line.cmp(&b.line))
    });
    hypotheses.truncate(max_hypotheses);

    GenerationReport {
        hypotheses,
        incomplete_predicates: incomplete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generates_and_ranks_by_confidence() {
        let kernel = Kernel::new();
        kernel
            .assert_all([
                Fact::new(
                    "sql_injection",
                    vec![
                        Value::Str("a.go".into()),
                        Value::Int(10),
                        Value::Int(90),
                        Value::Str("r1".into()),
                        Value::Str("trace1".into()),
                    ],
                ),
                Fact::new(
                    "hardcoded_secret",
                    vec![
                        Value::Str("b.go".into()),
                        Value::Int(5),
                        Value::Int(95),
                        Value::Str("r2".into()),
                        Value::Str("trace2".into()),
                    ],
                ),
            ])
            .await
            .unwrap();

        let report = generate_hypotheses(&kernel, 0.3, 50).await;
        assert_eq!(report.hypotheses.len(), 2);
        assert_eq!(report.hypotheses[0].kind, HypothesisType::HardcodedSecret);
        assert!(report.incomplete_predicates.is_empty());
    }

    #[tokio::test]
    async fn dedupes_keeping_higher_confidence() {
        let kernel = Kernel::new();
        kernel
            .assert_all([
                Fact::new(
                    "xss",
                    vec![
                        Value::Str("a.go".into()),
                        Value::Int(1),
                        Value::Int(50),
                        Value::Str("r1".into()),
                        Value::Str("t1".into()),
                    ],
                ),
                Fact::new(
                    "xss",
                    vec![
                        Value::Str("a.go".into()),
                        Value::Int(1),
                        Value::Int(80),
                        Value::Str("r2".into()),
                        Value::Str("t2".into()),
                    ],
                ),
            ])
            .await
            .unwrap();

        let report = generate_hypotheses(&kernel, 0.0, 50).await;
        assert_eq!(report.hypotheses.len(), 1);
        assert_eq!(report.hypotheses[0].confidence, 0.8);
    }

    #[tokio::test]
    async fn filters_by_minimum_confidence() {
        let kernel = Kernel::new();
        kernel
            .assert(Fact::new(
                "deadlock",
                vec![
                    Value::Str("a.go".into()),
                    Value::Int(1),
                    Value::Int(20),
                    Value::Str("r1".into()),
                    Value::Str("t1".into()),
                ],
            ))
            .await
            .unwrap();
        let report = generate_hypotheses(&kernel, 0.5, 50).await;
        assert!(report.hypotheses.is_empty());
    }
}
