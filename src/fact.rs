//! Ground facts, rules, and the values that appear inside them.
//!
//! A [`Fact`] is a predicate name plus an ordered tuple of ground [`Value`]s.
//! A [`Rule`] is a Horn clause over [`Atom`]s whose [`Term`]s may contain
//! variables; [`crate::kernel::Kernel`] evaluates rules against the fact base.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A ground value carried by a fact argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// An interned symbolic atom, e.g. `/true`, `/high`. Compared by identity
    /// of the symbol text, never treated as free-form text.
    Atom(String),
    Str(String),
    Int(i64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Atom(a) => write!(f, "{a}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Int(i) => write!(f, "{i}"),
        }
    }
}

/// A ground fact: a predicate applied to concrete values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fact {
    pub predicate: String,
    pub args: Vec<Value>,
}

impl Fact {
    pub fn new(predicate: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            predicate: predicate.into(),
            args,
        }
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        write!(f, "{}({})", self.predicate, args.join(", "))
    }
}

/// A term inside a rule atom: either a free variable or a fixed value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    Var(String),
    Const(Value),
}

/// An atom in a rule (head or body position): a predicate applied to terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Atom {
    pub predicate: String,
    pub terms: Vec<Term>,
}

impl Atom {
    pub fn new(predicate: impl Into<String>, terms: Vec<Term>) -> Self {
        Self {
            predicate: predicate.into(),
            terms,
        }
    }

    /// Arity of this atom (number of argument positions).
    pub fn arity(&self) -> usize {
        self.terms.len()
    }
}

/// A Horn clause: `head :- body[0], body[1], ..., body[n]`.
///
/// An empty body means the head is unconditionally asserted whenever the
/// rule is loaded (a fact expressed as a rule).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub head: Atom,
    pub body: Vec<Atom>,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body: Vec<String> = self
            .body
            .iter()
            .map(|a| format!("{}/{}", a.predicate, a.arity()))
            .collect();
        write!(f, "{} :- {}", self.head.predicate, body.join(", "))
    }
}

/// A variable binding built up while unifying an atom against facts.
pub type Substitution = HashMap<String, Value>;

/// Attempt to unify a rule atom against a concrete fact, extending `base`.
///
/// Returns `None` if the predicate/arity don't match or a variable would be
/// bound inconsistently with an existing binding in `base`.
pub fn unify_atom_with_fact(atom: &Atom, fact: &Fact, base: &Substitution) -> Option<Substitution> {
    if atom.predicate != fact.predicate || atom.terms.len() != fact.args.len() {
        return None;
    }
    let mut subst = base.clone();
    for (term, value) in atom.terms.iter().zip(fact.args.iter()) {
        match term {
            Term::Const(c) => {
                if c != value {
                    return None;
                }
            }
            Term::Var(name) => match subst.get(name) {
                Some(existing) if existing != value => return None,
                Some(_) => {}
                None => {
                    subst.insert(name.clone(), value.clone());
                }
            },
        }
    }
    Some(subst)
}

/// Instantiate an atom's terms under a substitution, producing a ground fact.
///
/// Returns `None` if any variable in the atom is unbound.
pub fn ground_atom(atom: &Atom, subst: &Substitution) -> Option<Fact> {
    let mut args = Vec::with_capacity(atom.terms.len());
    for term in &atom.terms {
        match term {
            Term::Const(c) => args.push(c.clone()),
            Term::Var(name) => args.push(subst.get(name)?.clone()),
        }
    }
    Some(Fact::new(atom.predicate.clone(), args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unify_binds_variables_consistently() {
        let atom = Atom::new(
            "calls",
            vec![Term::Var("caller".into()), Term::Var("callee".into())],
        );
        let fact = Fact::new(
            "calls",
            vec![Value::Str("a".into()), Value::Str("b".into())],
        );
        let subst = unify_atom_with_fact(&atom, &fact, &Substitution::new()).unwrap();
        assert_eq!(subst.get("caller"), Some(&Value::Str("a".into())));
        assert_eq!(subst.get("callee"), Some(&Value::Str("b".into())));
    }

    #[test]
    fn unify_rejects_conflicting_binding() {
        let atom = Atom::new("calls", vec![Term::Var("x".into()), Term::Var("x".into())]);
        let fact = Fact::new(
            "calls",
            vec![Value::Str("a".into()), Value::Str("b".into())],
        );
        assert!(unify_atom_with_fact(&atom, &fact, &Substitution::new()).is_none());
    }

    #[test]
    fn ground_atom_requires_all_variables_bound() {
        let atom = Atom::new("risky", vec![Term::Var("x".into())]);
        assert!(ground_atom(&atom, &Substitution::new()).is_none());
        let mut subst = Substitution::new();
        subst.insert("x".into(), Value::Atom("/true".into()));
        assert_eq!(
            ground_atom(&atom, &subst),
            Some(Fact::new("risky", vec![Value::Atom("/true".into())]))
        );
    }
}
