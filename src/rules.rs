//! Parser for the declarative, persistent rule-file text format
//! (`LoadPolicyFile`): `#` comments, `Decl pred(arg, ...).` arity
//! declarations, `head :- body, ... .` Horn clauses, and ground
//! `pred(v, ...).` facts. Symbolic atoms begin with `/`.
//!
//! Term grammar: a quoted `"..."` string, a `/`-prefixed atom, an integer,
//! or a bare identifier. Bare identifiers are variables in rule position;
//! a ground fact (a statement with no `:-`) rejects them, since a fact's
//! arguments must already be concrete.

use crate::error::{Result, ReviewError};
use crate::fact::{Atom, Fact, Rule, Term, Value};
use crate::kernel::Kernel;

/// The default architecture/maintainability rule set, loaded whenever a
/// review doesn't supply its own `custom_rules_path`. It derives the five
/// architecture-pattern hypothesis predicates from the base facts asserted
/// by `orchestrator::assert_architecture_signals`.
pub const DEFAULT_RULES_TEXT: &str = r#"
# Architecture and maintainability signal rules.
#
# Base facts:
#   churn_rate(file, line, level)
#   complexity_warning(file, line, function, flag)
#   git_history(file, stability)
#   dependency_link(from_file, to_file)

Decl churn_rate(file, line, level).
Decl complexity_warning(file, line, function, flag).
Decl git_history(file, stability).
Decl dependency_link(from_file, to_file).

hero_risk(file, line, 85, "hero-risk", "churn_rate(/high) and complexity_warning(/true) on the same function", "a single function combines high churn with an existing complexity warning", function) :-
    churn_rate(file, line, /high), complexity_warning(file, line, function, /true).

shotgun_surgery(file, line, 70, "shotgun-surgery", "a high-churn, complexity-flagged function also fans out through a dependency link", "this change touches a complex, high-churn function with a dependency link into another file; the edit may need to land in both places", function) :-
    churn_rate(file, line, /high), complexity_warning(file, line, function, /true), dependency_link(file, other).

layer_leakage(file, line, 65, "layer-leakage", "an unstable, complexity-flagged file reaches directly into a dependency", "an unstable and complex file depends directly on another file; check whether this crosses a layer boundary", function) :-
    git_history(file, /unstable), complexity_warning(file, line, function, /true), dependency_link(file, other).

circular_dependency(file_a, 1, 90, "circular-dependency", "two files depend on each other", "these two files depend on each other, forming a cycle", file_b) :-
    dependency_link(file_a, file_b), dependency_link(file_b, file_a).

zombie_test(file, 1, 55, "zombie-test", "a stable file is the sole dependent of an unstable file it exists to cover", "this file has seen no recent churn despite depending on a file that just changed; confirm it still exercises the new behavior", other) :-
    git_history(file, /stable), dependency_link(other, file), git_history(other, /unstable).
"#;

/// A parsed rule-file document: arity declarations, Horn-clause rules, and
/// any ground facts written directly into the file alongside them.
#[derive(Debug, Clone, Default)]
pub struct RuleFile {
    pub declarations: Vec<(String, usize)>,
    pub rules: Vec<Rule>,
    pub facts: Vec<Fact>,
}

/// Parse one rule-file document.
pub fn parse_rule_file(text: &str) -> Result<RuleFile> {
    let stripped = strip_comments(text);
    let mut file = RuleFile::default();
    let mut rule_index = 0usize;
    for statement in split_unquoted(&stripped, '.') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        if let Some(rest) = statement.strip_prefix("Decl ") {
            let atom = parse_rule_atom(rest.trim())?;
            file.declarations.push((atom.predicate, atom.terms.len()));
            continue;
        }
        if let Some(pos) = statement.find(":-") {
            let head = parse_rule_atom(statement[..pos].trim())?;
            let body = split_atoms(&statement[pos + 2..])
                .into_iter()
                .map(|a| parse_rule_atom(a.trim()))
                .collect::<Result<Vec<_>>>()?;
            if body.is_empty() {
                return Err(ReviewError::rule_parse(format!(
                    "rule for {} has an empty body after ':-'",
                    head.predicate
                )));
            }
            rule_index += 1;
            file.rules.push(Rule {
                id: format!("rule_{rule_index}"),
                head,
                body,
            });
            continue;
        }
        file.facts.push(parse_ground_fact(statement)?);
    }
    Ok(file)
}

/// Declare arities, load rules, and assert ground facts from a parsed rule
/// file into `kernel`, in that order.
pub async fn load_into_kernel(kernel: &Kernel, file: RuleFile) -> Result<()> {
    for (predicate, arity) in file.declarations {
        kernel.declare(predicate, arity).await?;
    }
    kernel.load_rules(file.rules).await;
    kernel.assert_all(file.facts).await
}

/// Strip `#` line comments, honoring double-quoted strings so a literal `#`
/// inside one survives.
fn strip_comments(text: &str) -> String {
    text.lines().map(strip_comment_from_line).collect::<Vec<_>>().join("\n")
}

fn strip_comment_from_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_string = false;
    for c in line.chars() {
        if c == '"' {
            in_string = !in_string;
        }
        if c == '#' && !in_string {
            break;
        }
        out.push(c);
    }
    out
}

/// Split `text` on `sep` wherever it appears outside a quoted string.
fn split_unquoted(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    for c in text.chars() {
        if c == '"' {
            in_string = !in_string;
        }
        if c == sep && !in_string {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

/// Split a rule body into its top-level comma-separated atoms, tracking
/// paren depth so an atom's own argument commas aren't mistaken for
/// body-atom separators.
fn split_atoms(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_string = false;
    for c in body.chars() {
        if c == '"' {
            in_string = !in_string;
        }
        if !in_string {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
        }
        if c == ',' && depth == 0 && !in_string {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

fn parse_rule_atom(s: &str) -> Result<Atom> {
    let open = s
        .find('(')
        .ok_or_else(|| ReviewError::rule_parse(format!("expected '(' in atom: {s}")))?;
    let close = s
        .rfind(')')
        .ok_or_else(|| ReviewError::rule_parse(format!("expected ')' in atom: {s}")))?;
    if close < open {
        return Err(ReviewError::rule_parse(format!("malformed atom: {s}")));
    }
    let predicate = s[..open].trim().to_string();
    if predicate.is_empty() {
        return Err(ReviewError::rule_parse(format!("atom has no predicate name: {s}")));
    }
    let args_str = s[open + 1..close].trim();
    let terms = if args_str.is_empty() {
        Vec::new()
    } else {
        split_atoms(args_str)
            .into_iter()
            .map(|a| parse_term(a.trim()))
            .collect::<Result<Vec<_>>>()?
    };
    Ok(Atom::new(predicate, terms))
}

fn parse_term(s: &str) -> Result<Term> {
    if s.is_empty() {
        return Err(ReviewError::rule_parse("empty term".to_string()));
    }
    if let Some(inner) = s.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        return Ok(Term::Const(Value::Str(inner.to_string())));
    }
    if let Some(atom) = s.strip_prefix('/') {
        if atom.is_empty() {
            return Err(ReviewError::rule_parse(format!("empty symbolic atom: {s}")));
        }
        return Ok(Term::Const(Value::Atom(s.to_string())));
    }
    if let Ok(n) = s.parse::<i64>() {
        return Ok(Term::Const(Value::Int(n)));
    }
    let is_identifier = s.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_alphanumeric() || c == '_');
    if is_identifier {
        return Ok(Term::Var(s.to_string()));
    }
    Err(ReviewError::rule_parse(format!("unrecognized term: {s}")))
}

fn parse_ground_fact(statement: &str) -> Result<Fact> {
    let atom = parse_rule_atom(statement)?;
    let mut args = Vec::with_capacity(atom.terms.len());
    for term in atom.terms {
        match term {
            Term::Const(v) => args.push(v),
            Term::Var(name) => {
                return Err(ReviewError::rule_parse(format!(
                    "ground fact `{}` contains unbound variable `{name}`",
                    atom.predicate
                )))
            }
        }
    }
    Ok(Fact::new(atom.predicate, args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::Value;

    #[test]
    fn parses_decl_rule_and_fact_statements() {
        let text = r#"
            # a comment line
            Decl calls(caller, callee).
            reaches(x, y) :- calls(x, y).
            calls("a", "b").
        "#;
        let parsed = parse_rule_file(text).unwrap();
        assert_eq!(parsed.declarations, vec![("calls".to_string(), 2)]);
        assert_eq!(parsed.rules.len(), 1);
        assert_eq!(parsed.rules[0].head.predicate, "reaches");
        assert_eq!(parsed.facts.len(), 1);
        assert_eq!(
            parsed.facts[0],
            Fact::new("calls", vec![Value::Str("a".into()), Value::Str("b".into())])
        );
    }

    #[test]
    fn parses_symbolic_atoms_and_multi_atom_bodies() {
        let text = r#"risky(file) :- flagged(file, /true), not_reviewed(file)."#;
        let parsed = parse_rule_file(text).unwrap();
        let rule = &parsed.rules[0];
        assert_eq!(rule.body.len(), 2);
        match &rule.body[0].terms[1] {
            Term::Const(Value::Atom(a)) => assert_eq!(a, "/true"),
            other => panic!("expected symbolic atom, got {other:?}"),
        }
    }

    #[test]
    fn comment_inside_string_is_not_stripped() {
        let text = r#"note("see issue #42")."#;
        let parsed = parse_rule_file(text).unwrap();
        match &parsed.facts[0].args[0] {
            Value::Str(s) => assert_eq!(s, "see issue #42"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn ground_fact_with_variable_is_rejected() {
        let err = parse_rule_file("calls(x, \"b\").").unwrap_err();
        assert!(matches!(err, ReviewError::RuleParse(_)));
    }

    #[test]
    fn rule_with_empty_body_is_rejected() {
        let err = parse_rule_file("always_true(x) :- .").unwrap_err();
        assert!(matches!(err, ReviewError::RuleParse(_)));
    }

    #[test]
    fn default_rules_text_parses() {
        let parsed = parse_rule_file(DEFAULT_RULES_TEXT).unwrap();
        assert_eq!(parsed.declarations.len(), 4);
        assert_eq!(parsed.rules.len(), 5);
        assert!(parsed.facts.is_empty());
    }

    #[tokio::test]
    async fn default_rules_derive_hero_risk_from_base_facts() {
        let kernel = Kernel::new();
        let parsed = parse_rule_file(DEFAULT_RULES_TEXT).unwrap();
        load_into_kernel(&kernel, parsed).await.unwrap();
        kernel
            .assert_all([
                Fact::new(
                    "churn_rate",
                    vec![Value::Str("a.go".into()), Value::Int(10), Value::Atom("/high".into())],
                ),
                Fact::new(
                    "complexity_warning",
                    vec![
                        Value::Str("a.go".into()),
                        Value::Int(10),
                        Value::Str("Process".into()),
                        Value::Atom("/true".into()),
                    ],
                ),
            ])
            .await
            .unwrap();

        let facts = kernel.query("hero_risk").await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].args[0], Value::Str("a.go".into()));
        assert_eq!(facts[0].args[6], Value::Str("Process".into()));
    }

    #[tokio::test]
    async fn default_rules_derive_circular_dependency() {
        let kernel = Kernel::new();
        let parsed = parse_rule_file(DEFAULT_RULES_TEXT).unwrap();
        load_into_kernel(&kernel, parsed).await.unwrap();
        kernel
            .assert_all([
                Fact::new(
                    "dependency_link",
                    vec![Value::Str("a.go".into()), Value::Str("b.go".into())],
                ),
                Fact::new(
                    "dependency_link",
                    vec![Value::Str("b.go".into()), Value::Str("a.go".into())],
                ),
            ])
            .await
            .unwrap();

        let facts = kernel.query("circular_dependency").await.unwrap();
        assert_eq!(facts.len(), 2); // (a,b) and (b,a) both satisfy the symmetric body
    }
}
