//! Parses the review task grammar:
//!
//! ```text
//! (review|check|security_scan|style_check|complexity|diff) ( <tok> )*
//! ```
//!
//! where `<tok>` is `file:PATH`, `files:P1,P2,...`, `diff:REF`,
//! `pr:files:P1,...`, or a bare path. An unrecognized first token containing
//! `.` or `/` is treated as a single-file review (`review file:<token>`).

use crate::error::{Result, ReviewError};

/// What kind of review was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewKind {
    Review,
    Check,
    SecurityScan,
    StyleCheck,
    Complexity,
    Diff,
}

impl ReviewKind {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "review" => Some(Self::Review),
            "check" => Some(Self::Check),
            "security_scan" => Some(Self::SecurityScan),
            "style_check" => Some(Self::StyleCheck),
            "complexity" => Some(Self::Complexity),
            "diff" => Some(Self::Diff),
            _ => None,
        }
    }
}

/// A fully parsed review request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewTask {
    pub kind: ReviewKind,
    pub files: Vec<String>,
    pub diff_ref: Option<String>,
}

/// Parse a raw task string into a [`ReviewTask`].
pub fn parse_task(input: &str) -> Result<ReviewTask> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ReviewError::invalid_task("empty task"));
    }
    let mut words = trimmed.split_whitespace();
    let first = words.next().unwrap();

    let (kind, remaining): (ReviewKind, Vec<&str>) = match ReviewKind::parse(first) {
        Some(kind) => (kind, words.collect()),
        None if first.contains('.') || first.contains('/') => {
            (ReviewKind::Review, std::iter::once(first).chain(words).collect())
        }
        None => {
            return Err(ReviewError::invalid_task(format!(
                "unrecognized task verb or path: {first}"
            )))
        }
    };

    let mut files = Vec::new();
    let mut diff_ref = None;
    for tok in remaining {
        if let Some(rest) = tok.strip_prefix("file:") {
            files.push(rest.to_string());
        } else if let Some(rest) = tok.strip_prefix("files:") {
            files.extend(rest.split(',').filter(|s| !s.is_empty()).map(str::to_string));
        } else if let Some(rest) = tok.strip_prefix("pr:files:") {
            files.extend(rest.split(',').filter(|s| !s.is_empty()).map(str::to_string));
        } else if let Some(rest) = tok.strip_prefix("diff:") {
            diff_ref = Some(rest.to_string());
        } else {
            files.push(tok.to_string());
        }
    }

    if kind == ReviewKind::Diff && diff_ref.is_none() {
        return Err(ReviewError::invalid_task(
            "diff task requires a diff:REF token",
        ));
    }
    if kind != ReviewKind::Diff && files.is_empty() {
        return Err(ReviewError::invalid_task(
            "task names no files to review",
        ));
    }

    Ok(ReviewTask {
        kind,
        files,
        diff_ref,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_explicit_verb_with_single_file() {
        let task = parse_task("review file:src/main.go").unwrap();
        assert_eq!(task.kind, ReviewKind::Review);
        assert_eq!(task.files, vec!["src/main.go"]);
    }

    #[test]
    fn parses_comma_separated_files() {
        let task = parse_task("check files:a.go,b.go,c.go").unwrap();
        assert_eq!(task.files, vec!["a.go", "b.go", "c.go"]);
    }

    #[test]
    fn parses_pr_files_token() {
        let task = parse_task("security_scan pr:files:a.go,b.go").unwrap();
        assert_eq!(task.files, vec!["a.go", "b.go"]);
    }

    #[test]
    fn parses_diff_ref() {
        let task = parse_task("diff diff:HEAD~1").unwrap();
        assert_eq!(task.kind, ReviewKind::Diff);
        assert_eq!(task.diff_ref.as_deref(), Some("HEAD~1"));
    }

    #[test]
    fn bare_path_first_token_implies_review() {
        let task = parse_task("src/main.go").unwrap();
        assert_eq!(task.kind, ReviewKind::Review);
        assert_eq!(task.files, vec!["src/main.go"]);
    }

    #[test]
    fn unrecognized_non_path_first_token_is_rejected() {
        assert!(parse_task("frobnicate").is_err());
    }

    #[test]
    fn diff_without_ref_is_rejected() {
        assert!(parse_task("diff").is_err());
    }

    #[test]
    fn empty_task_is_rejected() {
        assert!(parse_task("   ").is_err());
    }
}
