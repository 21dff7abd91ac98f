//! Table-driven pattern scanner producing raw findings from source lines.
//!
//! Each [`PatternRule`] is a plain data record, not a code path — adding a
//! new lint means adding a table entry, mirroring the declarative-rule
//! philosophy the [`crate::kernel`] uses for logic-derived hypotheses.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Category assigned to a raw finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    Security,
    Bug,
    Maintainability,
    Architecture,
}

/// Severity assigned at scan time; the verifier may later revise it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// Source language, detected from file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Go,
    Python,
    TypeScript,
    JavaScript,
    Rust,
    Java,
    CSharp,
    Ruby,
    Php,
    C,
    Cpp,
    Unknown,
}

impl Language {
    pub fn detect(path: &str) -> Self {
        let ext = path.rsplit('.').next().unwrap_or("");
        match ext {
            "go" => Language::Go,
            "py" => Language::Python,
            "ts" | "tsx" => Language::TypeScript,
            "js" | "jsx" => Language::JavaScript,
            "rs" => Language::Rust,
            "java" => Language::Java,
            "cs" => Language::CSharp,
            "rb" => Language::Ruby,
            "php" => Language::Php,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "hpp" => Language::Cpp,
            _ => Language::Unknown,
        }
    }
}

/// One entry in the pattern table.
pub struct PatternRule {
    pub rule_id: &'static str,
    pub pattern: LazyLock<Regex>,
    pub severity: Severity,
    pub category: FindingCategory,
    pub message: &'static str,
    pub suggestion: &'static str,
    /// Restrict to these languages; empty means "all languages".
    pub languages: &'static [Language],
    /// Skip a match if the line or filepath contains any of these substrings.
    pub excludes: &'static [&'static str],
}

macro_rules! pattern_rule {
    ($name:ident, $rule_id:expr, $regex:expr, $severity:expr, $category:expr, $message:expr, $suggestion:expr, $languages:expr, $excludes:expr) => {
        pub static $name: PatternRule = PatternRule {
            rule_id: $rule_id,
            pattern: LazyLock::new(|| Regex::new($regex).expect("invalid pattern rule regex")),
            severity: $severity,
            category: $category,
            message: $message,
            suggestion: $suggestion,
            languages: $languages,
            excludes: $excludes,
        };
    };
}

pattern_rule!(
    HARDCODED_SECRET,
    "hardcoded-secret",
    r#"(?i)(api[_-]?key|secret|password|token)\s*[:=]\s*["'][A-Za-z0-9+/_-]{12,}["']"#,
    Severity::High,
    FindingCategory::Security,
    "possible hardcoded credential",
    "load this value from a secrets manager or environment variable",
    &[],
    &["example", "test", "_test", "fixture", "dummy"]
);

pattern_rule!(
    SQL_CONCAT,
    "sql-string-concat",
    r#"(?i)(select|insert|update|delete)\b.*["']\s*\+\s*\w+|f["'].*\{.*\}.*\b(select|insert|update|delete)\b"#,
    Severity::High,
    FindingCategory::Security,
    "SQL statement built via string concatenation or interpolation",
    "use a parameterized query instead",
    &[],
    &[]
);

pattern_rule!(
    SHELL_EXEC_CONCAT,
    "command-injection",
    r#"(?i)(exec|system|popen|subprocess\.call|os\.system)\s*\(\s*["'].*\+"#,
    Severity::High,
    FindingCategory::Security,
    "shell command built from concatenated input",
    "pass arguments as a list/array, never via a concatenated shell string",
    &[],
    &[]
);

pattern_rule!(
    TODO_FIXME,
    "unresolved-todo",
    r"(?i)\b(TODO|FIXME|XXX)\b",
    Severity::Info,
    FindingCategory::Maintainability,
    "unresolved TODO/FIXME marker",
    "resolve or file a tracked issue",
    &[],
    &[]
);

pattern_rule!(
    EMPTY_CATCH,
    "empty-error-handler",
    r"(?i)(catch|except)\s*[\w\s.():]*\{?\s*(pass|//\s*ignore)?\s*\}?\s*$",
    Severity::Medium,
    FindingCategory::Bug,
    "error handler appears to discard the error silently",
    "log or propagate the error instead of discarding it",
    &[],
    &[]
);

/// The full pattern table consulted by [`scan_line`].
pub fn rule_table() -> Vec<&'static PatternRule> {
    vec![
        &HARDCODED_SECRET,
        &SQL_CONCAT,
        &SHELL_EXEC_CONCAT,
        &TODO_FIXME,
        &EMPTY_CATCH,
    ]
}

/// A finding produced directly by the pattern scanner, before suppression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFinding {
    pub file: String,
    pub line: u32,
    pub rule_id: String,
    pub severity: Severity,
    pub category: FindingCategory,
    pub message: String,
    pub suggestion: String,
}

/// Scan one file's contents line by line against the pattern table.
///
/// Findings are returned in `(file, line, rule_id)` order.
pub fn scan_file(path: &str, contents: &str) -> Vec<RawFinding> {
    let language = Language::detect(path);
    let mut findings = Vec::new();
    for (rule, (line_no, line)) in rule_table()
        .into_iter()
        .flat_map(|rule| contents.lines().enumerate().map(move |le| (rule, le)))
    {
        if !rule.languages.is_empty() && !rule.languages.contains(&language) {
            continue;
        }
        if !rule.pattern.is_match(line) {
            continue;
        }
        if rule
            .excludes
            .iter()
            .any(|needle| line.contains(needle) || path.contains(needle))
        {
            continue;
        }
        findings.push(RawFinding {
            file: path.to_string(),
            line: (line_no + 1) as u32,
            rule_id: rule.rule_id.to_string(),
            severity: rule.severity,
            category: rule.category,
            message: rule.message.to_string(),
            suggestion: rule.suggestion.to_string(),
        });
    }
    findings.sort_by(|a, b| {
        a.file
            .cmp(&b.file)
            .then(a.line.cmp(&b.line))
            .then(a.rule_id.cmp(&b.rule_id))
    });
    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_hardcoded_secret() {
        let findings = scan_file(
            "service.go",
            "apiKey := \"sk_live_abcdefghijklmnop1234\"\n",
        );
        assert!(findings.iter().any(|f| f.rule_id == "hardcoded-secret"));
    }

    #[test]
    fn excludes_test_fixtures() {
        let findings = scan_file(
            "service_test.go",
            "apiKey := \"sk_live_abcdefghijklmnop1234\"\n",
        );
        assert!(findings.is_empty());
    }

    #[test]
    fn findings_are_ordered_by_file_then_line_then_rule() {
        let findings = scan_file(
            "a.py",
            "# TODO fix this\napiKey = \"abcdefghijklmnopqrst\"\n",
        );
        for pair in findings.windows(2) {
            assert!(
                (pair[0].line, pair[0].rule_id.as_str())
                    <= (pair[1].line, pair[1].rule_id.as_str())
            );
        }
    }

    #[test]
    fn language_detection_by_extension() {
        assert_eq!(Language::detect("main.go"), Language::Go);
        assert_eq!(Language::detect("app.tsx"), Language::TypeScript);
        assert_eq!(Language::detect("README"), Language::Unknown);
    }
}
