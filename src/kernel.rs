//! The fact store and bounded Datalog-style query evaluator.
//!
//! Facts are asserted once and never retracted within a run; rules are
//! loaded once per process and shared via `Arc<Kernel>`. Evaluation is a
//! naive bottom-up fixpoint bounded by an iteration cap so that an
//! accidentally cyclic or tail-recursive rule set cannot hang a review.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use crate::error::{Result, ReviewError};
use crate::fact::{ground_atom, unify_atom_with_fact, Atom, Fact, Rule, Substitution};

/// How many fixpoint iterations to allow per query, expressed as a
/// multiplier of the loaded rule count.
const ITERATION_BOUND_FACTOR: u32 = 10;

#[derive(Debug, Default)]
struct KernelState {
    facts: HashSet<Fact>,
    rules: Vec<Rule>,
    arities: HashMap<String, usize>,
}

/// The shared fact store and rule evaluator for one review run.
pub struct Kernel {
    state: RwLock<KernelState>,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(KernelState::default()),
        }
    }

    /// Assert a fact. A duplicate assertion is a no-op. A fact whose arity
    /// disagrees with a prior fact of the same predicate is rejected.
    pub async fn assert(&self, fact: Fact) -> Result<()> {
        let mut state = self.state.write().await;
        let arity = state.arities.get(&fact.predicate).copied();
        match arity {
            Some(expected) if expected != fact.args.len() => {
                return Err(ReviewError::invalid_fact(
                    fact.predicate.clone(),
                    format!(
                        "expected arity {expected}, got {} for {fact}",
                        fact.args.len()
                    ),
                ));
            }
            None => {
                state.arities.insert(fact.predicate.clone(), fact.args.len());
            }
            _ => {}
        }
        state.facts.insert(fact);
        Ok(())
    }

    /// Assert many facts, short-circuiting on the first malformed one.
    pub async fn assert_all(&self, facts: impl IntoIterator<Item = Fact>) -> Result<()> {
        for fact in facts {
            self.assert(fact).await?;
        }
        Ok(())
    }

    /// Load a rule set, replacing any previously loaded rules.
    pub async fn load_rules(&self, rules: Vec<Rule>) {
        let mut state = self.state.write().await;
        state.rules = rules;
    }

    /// Pre-register a predicate's arity without asserting any fact, for a
    /// rule file's `Decl` statements. Redeclaring with a different arity is
    /// rejected the same way a mismatched [`Kernel::assert`] would be.
    pub async fn declare(&self, predicate: impl Into<String>, arity: usize) -> Result<()> {
        let mut state = self.state.write().await;
        let predicate = predicate.into();
        match state.arities.get(&predicate) {
            Some(existing) if *existing != arity => Err(ReviewError::invalid_fact(
                predicate.clone(),
                format!("Decl arity {arity} conflicts with previously declared arity {existing}"),
            )),
            _ => {
                state.arities.entry(predicate).or_insert(arity);
                Ok(())
            }
        }
    }

    /// Number of rules currently loaded.
    pub async fn rule_count(&self) -> usize {
        self.state.read().await.rules.len()
    }

    /// Evaluate the fixpoint of the loaded rules over the current facts and
    /// return every derivable ground fact whose predicate is `predicate`.
    ///
    /// On exceeding the iteration bound, returns the best-effort frontier
    /// computed so far via `Err(ReviewError::QueryIncomplete)`; callers that
    /// want to proceed in degraded mode should catch that variant and use
    /// [`Kernel::query_best_effort`] instead.
    pub async fn query(&self, predicate: &str) -> Result<Vec<Fact>> {
        let state = self.state.read().await;
        let bound = (state.rules.len() as u32).max(1) * ITERATION_BOUND_FACTOR;
        let (derived, iterations, complete) = evaluate_fixpoint(&state.facts, &state.rules, bound);
        if !complete {
            return Err(ReviewError::query_incomplete(predicate, iterations));
        }
        Ok(derived
            .into_iter()
            .filter(|f| f.predicate == predicate)
            .collect())
    }

    /// Like [`Kernel::query`] but never fails: on an incomplete fixpoint it
    /// logs a warning and returns whatever frontier had been computed.
    pub async fn query_best_effort(&self, predicate: &str) -> Vec<Fact> {
        let state = self.state.read().await;
        let bound = (state.rules.len() as u32).max(1) * ITERATION_BOUND_FACTOR;
        let (derived, iterations, complete) = evaluate_fixpoint(&state.facts, &state.rules, bound);
        if !complete {
            tracing::warn!(
                predicate,
                iterations,
                "fixpoint evaluation did not converge within the iteration bound"
            );
        }
        derived
            .into_iter()
            .filter(|f| f.predicate == predicate)
            .collect()
    }

    /// All facts currently asserted (ground, not derived).
    pub async fn base_facts(&self) -> Vec<Fact> {
        self.state.read().await.facts.iter().cloned().collect()
    }
}

/// Join one rule's body atoms against the fact base, returning all
/// substitutions that satisfy every body atom conjunctively.
fn solve_body(body: &[Atom], facts: &HashSet<Fact>) -> Vec<Substitution> {
    let mut substitutions = vec![Substitution::new()];
    for atom in body {
        let mut next = Vec::new();
        for subst in &substitutions {
            for fact in facts {
                if let Some(extended) = unify_atom_with_fact(atom, fact, subst) {
                    next.push(extended);
                }
            }
        }
        substitutions = next;
        if substitutions.is_empty() {
            break;
        }
    }
    substitutions
}

/// Naive bottom-up fixpoint: repeatedly apply every rule until no new facts
/// are derived or the iteration bound is exceeded.
///
/// Returns `(facts, iterations_used, reached_fixpoint)`.
fn evaluate_fixpoint(
    base_facts: &HashSet<Fact>,
    rules: &[Rule],
    bound: u32,
) -> (HashSet<Fact>, u32, bool) {
    let mut facts = base_facts.clone();
    if rules.is_empty() {
        return (facts, 0, true);
    }
    for iteration in 0..bound {
        let mut new_facts = Vec::new();
        for rule in rules {
            if rule.body.is_empty() {
                if let Some(fact) = ground_atom(&rule.head, &Substitution::new()) {
                    if !facts.contains(&fact) {
                        new_facts.push(fact);
                    }
                }
                continue;
            }
            for subst in solve_body(&rule.body, &facts) {
                if let Some(fact) = ground_atom(&rule.head, &subst) {
                    if !facts.contains(&fact) {
                        new_facts.push(fact);
                    }
                }
            }
        }
        if new_facts.is_empty() {
            return (facts, iteration, true);
        }
        for fact in new_facts {
            facts.insert(fact);
        }
    }
    (facts, bound, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::{Term, Value};

    fn atom(pred: &str, terms: Vec<Term>) -> Atom {
        Atom::new(pred, terms)
    }

    #[tokio::test]
    async fn derives_transitive_closure() {
        let kernel = Kernel::new();
        kernel
            .assert_all([
                Fact::new("calls", vec![Value::Str("a".into()), Value::Str("b".into())]),
                Fact::new("calls", vec![Value::Str("b".into()), Value::Str("c".into())]),
            ])
            .await
            .unwrap();

        // reaches/2 :- calls/2.
        // reaches/2 :- calls(x,y), reaches(y,z).
        let rules = vec![
            Rule {
                id: "base".into(),
                head: atom(
                    "reaches",
                    vec![Term::Var("x".into()), Term::Var("y".into())],
                ),
                body: vec![atom(
                    "calls",
                    vec![Term::Var("x".into()), Term::Var("y".into())],
                )],
            },
            Rule {
                id: "trans".into(),
                head: atom(
                    "reaches",
                    vec![Term::Var("x".into()), Term::Var("z".into())],
                ),
                body: vec![
                    atom("calls", vec![Term::Var("x".into()), Term::Var("y".into())]),
                    atom(
                        "reaches",
                        vec![Term::Var("y".into()), Term::Var("z".into())],
                    ),
                ],
            },
        ];
        kernel.load_rules(rules).await;

        let mut reaches = kernel.query("reaches").await.unwrap();
        reaches.sort_by(|a, b| format!("{a}").cmp(&format!("{b}")));
        assert_eq!(reaches.len(), 3); // a-b, b-c, a-c
    }

    #[tokio::test]
    async fn duplicate_assert_is_noop() {
        let kernel = Kernel::new();
        let fact = Fact::new("f", vec![Value::Int(1)]);
        kernel.assert(fact.clone()).await.unwrap();
        kernel.assert(fact).await.unwrap();
        assert_eq!(kernel.base_facts().await.len(), 1);
    }

    #[tokio::test]
    async fn arity_mismatch_is_rejected() {
        let kernel = Kernel::new();
        kernel
            .assert(Fact::new("f", vec![Value::Int(1)]))
            .await
            .unwrap();
        let err = kernel
            .assert(Fact::new("f", vec![Value::Int(1), Value::Int(2)]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::InvalidFact { .. }));
    }

    #[tokio::test]
    async fn cyclic_rules_terminate_via_iteration_bound() {
        let kernel = Kernel::new();
        kernel
            .assert(Fact::new("seed", vec![Value::Atom("/true".into())]))
            .await
            .unwrap();
        // seed :- seed. -- a self-referential rule that produces no new
        // facts after the first pass, so the fixpoint converges immediately
        // despite the cycle.
        kernel
            .load_rules(vec![Rule {
                id: "cycle".into(),
                head: atom("seed", vec![Term::Var("x".into())]),
                body: vec![atom("seed", vec![Term::Var("x".into())])],
            }])
            .await;
        let result = kernel.query("seed").await.unwrap();
        assert_eq!(result.len(), 1);
    }
}
