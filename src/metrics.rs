//! Per-file and per-function code metrics, centered on McCabe cyclomatic
//! complexity.
//!
//! Three correctness rules drive this module, each load-bearing enough to
//! have a regression test below:
//! - comments and string literals are stripped before any keyword is
//!   counted, so a keyword mentioned in a comment never inflates a score;
//! - compound tokens (`else if`, `if let`) are matched and consumed before
//!   their shorter prefixes (`if`) so they are never counted twice;
//! - every keyword match is word-boundary delimited so `notify` never
//!   matches `if` and `platform` never matches `for`;
//! - a bare `?` only counts as a ternary predicate when a `:` follows later
//!   on the line, so Rust's postfix try operator and `?.` optional chaining
//!   are never miscounted as a branch.

use serde::{Deserialize, Serialize};

use crate::scanner::Language;

/// Aggregate metrics for one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetrics {
    pub total_lines: u32,
    pub code_lines: u32,
    pub comment_lines: u32,
    pub blank_lines: u32,
    pub function_count: u32,
    pub long_functions: u32,
    pub cyclomatic_max: u32,
    pub cyclomatic_avg: f64,
    pub max_nesting: u32,
}

/// Metrics for a single function within a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionMetrics {
    pub name: String,
    pub start_line: u32,
    pub end_line: u32,
    pub cyclomatic_complexity: u32,
    pub max_nesting: u32,
}

/// Ordered list of keyword tokens that add a predicate node to cyclomatic
/// complexity. Compound tokens are listed before the shorter prefixes they
/// contain so [`strip_keyword_matches`] consumes them first.
const PREDICATE_KEYWORDS: &[&str] = &[
    "else if", "elif", "if let", "while let", "guard let", "guard", "when", "if", "for", "while",
    "loop", "catch", "except", "rescue", "case", "match", "select", "&&", "||", "and", "or", "??",
];

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Strip // and # line comments, /* */ block comments, and string/char
/// literals from a line, replacing their content with spaces so column
/// positions (and therefore line numbers) are preserved.
fn strip_noise(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    let mut in_block_comment = false;
    while i < chars.len() {
        let c = chars[i];
        if in_block_comment {
            if c == '*' && chars.get(i + 1) == Some(&'/') {
                in_block_comment = false;
                out.push(' ');
                out.push(' ');
                i += 2;
                continue;
            }
            out.push(' ');
            i += 1;
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            out.extend(std::iter::repeat(' ').take(chars.len() - i));
            break;
        }
        if c == '#' {
            out.extend(std::iter::repeat(' ').take(chars.len() - i));
            break;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            in_block_comment = true;
            out.push(' ');
            out.push(' ');
            i += 2;
            continue;
        }
        if c == '"' || c == '\'' || c == '`' {
            let quote = c;
            out.push(' ');
            i += 1;
            while i < chars.len() && chars[i] != quote {
                if chars[i] == '\\' && i + 1 < chars.len() {
                    out.push(' ');
                    i += 1;
                }
                out.push(' ');
                i += 1;
            }
            if i < chars.len() {
                out.push(' '); // closing quote
                i += 1;
            }
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Count bare `?` tokens that read as a ternary conditional (`cond ? a : b`)
/// rather than Rust's postfix try operator or optional-chaining `?.`. A `?`
/// only counts if it isn't immediately followed by `.` and a `:` appears
/// later on the same line; Rust's `?` operator never pairs with a trailing
/// `:`, so this keeps it (and `?.`) excluded without a language tag.
fn count_ternary_operators(chars: &[char], consumed: &mut [bool]) -> u32 {
    let mut count = 0u32;
    for i in 0..chars.len() {
        if chars[i] != '?' || consumed[i] {
            continue;
        }
        if chars.get(i + 1) == Some(&'.') {
            consumed[i] = true;
            consumed[i + 1] = true;
            continue;
        }
        if chars[i + 1..].contains(&':') {
            consumed[i] = true;
            count += 1;
        }
    }
    count
}

/// Count predicate nodes in a noise-stripped line, consuming compound
/// tokens first so they are never double-counted against their prefixes.
fn count_predicate_nodes(clean_line: &str) -> u32 {
    let lower = clean_line.to_ascii_lowercase();
    let chars: Vec<char> = lower.chars().collect();
    let mut consumed = vec![false; chars.len()];
    let mut count = count_ternary_operators(&chars, &mut consumed);

    for keyword in PREDICATE_KEYWORDS {
        let kw_chars: Vec<char> = keyword.chars().collect();
        if kw_chars.is_empty() || kw_chars.len() > chars.len() {
            continue;
        }
        let is_symbolic = !keyword.chars().next().unwrap().is_alphanumeric();
        let mut start = 0;
        while start + kw_chars.len() <= chars.len() {
            if consumed[start..start + kw_chars.len()].iter().any(|&c| c) {
                start += 1;
                continue;
            }
            if chars[start..start + kw_chars.len()] != kw_chars[..] {
                start += 1;
                continue;
            }
            let before_ok = is_symbolic
                || start == 0
                || !is_word_char(chars[start - 1]);
            let end = start + kw_chars.len();
            let after_ok = is_symbolic || end == chars.len() || !is_word_char(chars[end]);
            if before_ok && after_ok {
                for slot in consumed.iter_mut().take(end).skip(start) {
                    *slot = true;
                }
                count += 1;
                start = end;
            } else {
                start += 1;
            }
        }
    }
    count
}

/// Compute cyclomatic complexity (`M = 1 + P`) for a function body.
pub fn cyclomatic_complexity(body_lines: &[&str]) -> u32 {
    let predicates: u32 = body_lines
        .iter()
        .map(|line| count_predicate_nodes(&strip_noise(line)))
        .sum();
    1 + predicates
}

/// Compute aggregate file metrics; `functions` are `(start_line, end_line)`
/// pairs (1-based, inclusive) already detected by a caller-supplied pass.
pub fn file_metrics(
    _language: Language,
    contents: &str,
    functions: &[(String, u32, u32)],
) -> (FileMetrics, Vec<FunctionMetrics>) {
    let lines: Vec<&str> = contents.lines().collect();
    let mut metrics = FileMetrics {
        total_lines: lines.len() as u32,
        ..Default::default()
    };

    for line in &lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            metrics.blank_lines += 1;
        } else if trimmed.starts_with("//") || trimmed.starts_with('#') || trimmed.starts_with("/*") {
            metrics.comment_lines += 1;
        } else {
            metrics.code_lines += 1;
        }
    }

    let mut function_metrics = Vec::with_capacity(functions.len());
    let mut total_complexity = 0u32;
    for (name, start, end) in functions {
        let start_idx = (*start as usize).saturating_sub(1);
        let end_idx = (*end as usize).min(lines.len());
        let body = if start_idx < end_idx {
            &lines[start_idx..end_idx]
        } else {
            &[][..]
        };
        let complexity = cyclomatic_complexity(body);
        let nesting = max_nesting(body);
        total_complexity += complexity;
        metrics.cyclomatic_max = metrics.cyclomatic_max.max(complexity);
        metrics.max_nesting = metrics.max_nesting.max(nesting);
        if end.saturating_sub(*start) > 50 {
            metrics.long_functions += 1;
        }
        function_metrics.push(FunctionMetrics {
            name: name.clone(),
            start_line: *start,
            end_line: *end,
            cyclomatic_complexity: complexity,
            max_nesting: nesting,
        });
    }
    metrics.function_count = functions.len() as u32;
    metrics.cyclomatic_avg = if functions.is_empty() {
        0.0
    } else {
        total_complexity as f64 / functions.len() as f64
    };

    (metrics, function_metrics)
}

/// Maximum brace/indent nesting depth reached within a function body.
fn max_nesting(body_lines: &[&str]) -> u32 {
    let mut depth: i32 = 0;
    let mut max_depth: i32 = 0;
    for line in body_lines {
        let clean = strip_noise(line);
        for c in clean.chars() {
            match c {
                '{' => {
                    depth += 1;
                    max_depth = max_depth.max(depth);
                }
                '}' => depth = (depth - 1).max(0),
                _ => {}
            }
        }
    }
    max_depth.max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_complexity_is_one() {
        assert_eq!(cyclomatic_complexity(&["return 1;"]), 1);
    }

    #[test]
    fn counts_if_and_for() {
        let body = ["if x > 0 {", "  for i in xs {", "    y += i;", "  }", "}"];
        assert_eq!(cyclomatic_complexity(&body), 3);
    }

    #[test]
    fn else_if_is_not_double_counted() {
        // "else if" must count once, not once for "if" and once for "else if".
        let body = ["if a {", "} else if b {", "} else {", "}"];
        assert_eq!(cyclomatic_complexity(&body), 2);
    }

    #[test]
    fn keywords_inside_comments_are_ignored() {
        let body = ["// if this breaks, check for loops", "return 1;"];
        assert_eq!(cyclomatic_complexity(&body), 1);
    }

    #[test]
    fn keywords_inside_string_literals_are_ignored() {
        let body = [r#"log("if this happens call for help")"#];
        assert_eq!(cyclomatic_complexity(&body), 1);
    }

    #[test]
    fn word_boundaries_prevent_false_matches() {
        let body = ["notify(platform);"];
        assert_eq!(cyclomatic_complexity(&body), 1);
    }

    #[test]
    fn short_circuit_operators_count() {
        let body = ["if a && b || c {", "}"];
        assert_eq!(cyclomatic_complexity(&body), 1 + 3);
    }

    #[test]
    fn ternary_operator_counts_as_one_predicate() {
        let body = ["const y = cond ? a : b;"];
        assert_eq!(cyclomatic_complexity(&body), 2);
    }

    #[test]
    fn rust_try_operator_is_not_counted_as_ternary() {
        let body = ["let x = compute()?;"];
        assert_eq!(cyclomatic_complexity(&body), 1);
    }

    #[test]
    fn optional_chaining_is_not_counted_as_ternary() {
        let body = ["const y = a?.b?.c;"];
        assert_eq!(cyclomatic_complexity(&body), 1);
    }

    #[test]
    fn nesting_depth_tracks_braces() {
        let body = ["if a {", "  if b {", "    if c {", "    }", "  }", "}"];
        assert_eq!(max_nesting(&body), 3);
    }

    #[test]
    fn file_metrics_flags_long_functions() {
        let contents = (0..60).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let functions = vec![("big".to_string(), 1u32, 60u32)];
        let (metrics, funcs) = file_metrics(Language::Go, &contents, &functions);
        assert_eq!(metrics.long_functions, 1);
        assert_eq!(funcs[0].name, "big");
    }
}
