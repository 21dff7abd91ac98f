//! The top-level review report, its markdown rendering, and the process
//! exit-code mapping.

use serde::{Deserialize, Serialize};

use crate::impact::ImpactContext;
use crate::llm::{Severity as VerdictSeverity, VerificationStats, VerifiedFinding};
use crate::metrics::FileMetrics;
use crate::scanner::RawFinding;

/// Everything produced by one review run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewReport {
    pub raw_findings: Vec<RawFinding>,
    pub verified_findings: Vec<VerifiedFinding>,
    pub verification_stats: Option<VerificationStats>,
    pub impact_context: Option<ImpactContext>,
    pub file_metrics: Vec<(String, FileMetrics)>,
    pub block_on_critical: bool,
}

impl ReviewReport {
    /// Highest severity across verified findings, falling back to the
    /// highest raw-finding severity when no LLM verification ran.
    pub fn overall_severity(&self) -> Option<VerdictSeverity> {
        self.verified_findings.iter().map(|f| f.severity).max()
    }

    pub fn has_critical(&self) -> bool {
        self.overall_severity() == Some(VerdictSeverity::Critical)
    }

    pub fn has_any_issues(&self) -> bool {
        !self.verified_findings.is_empty() || !self.raw_findings.is_empty()
    }

    /// Render a Markdown report: header, overall severity, a findings table,
    /// verifier reasoning, and metrics.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Code Review Report\n\n");

        let severity_label = self
            .overall_severity()
            .map(|s| format!("{s:?}"))
            .unwrap_or_else(|| "Clean".to_string());
        out.push_str(&format!("**Overall severity:** {severity_label}\n\n"));

        if let Some(stats) = &self.verification_stats {
            out.push_str(&format!(
                "Verified {} hypotheses: {} confirmed, {} dismissed, {} orphaned (precision {:.2}).\n\n",
                stats.total,
                stats.confirmed,
                stats.dismissed,
                stats.orphaned,
                stats.precision()
            ));
        }

        out.push_str("## Findings\n\n");
        if self.verified_findings.is_empty() && self.raw_findings.is_empty() {
            out.push_str("No issues found.\n\n");
        } else {
            out.push_str("| severity | category | location | message |\n");
            out.push_str("|---|---|---|---|\n");
            for f in &self.verified_findings {
                out.push_str(&format!(
                    "| {:?} | {:?} | {}:{} | {} |\n",
                    f.severity, f.hypothesis.category, f.hypothesis.file, f.hypothesis.line, f.hypothesis.message
                ));
            }
            for f in &self.raw_findings {
                out.push_str(&format!(
                    "| {:?} | {:?} | {}:{} | {} |\n",
                    f.severity, f.category, f.file, f.line, f.message
                ));
            }
            out.push('\n');
        }

        if self.verified_findings.iter().any(|f| f.fix.is_some()) {
            out.push_str("## Suggested fixes\n\n");
            for f in &self.verified_findings {
                if let Some(fix) = &f.fix {
                    out.push_str(&format!(
                        "- **{}:{}** — {}\n",
                        f.hypothesis.file, f.hypothesis.line, fix
                    ));
                }
            }
            out.push('\n');
        }

        if let Some(impact) = &self.impact_context {
            out.push_str("## Impact analysis\n\n");
            out.push_str(&format!("{}\n\n", impact.summary()));
        }

        if !self.file_metrics.is_empty() {
            out.push_str("## Metrics\n\n");
            out.push_str("| file | lines | functions | max complexity | avg complexity | max nesting |\n");
            out.push_str("|---|---|---|---|---|---|\n");
            for (file, m) in &self.file_metrics {
                out.push_str(&format!(
                    "| {file} | {} | {} | {} | {:.1} | {} |\n",
                    m.total_lines, m.function_count, m.cyclomatic_max, m.cyclomatic_avg, m.max_nesting
                ));
            }
            out.push('\n');
        }

        out
    }

    pub fn exit_code(&self) -> ExitCode {
        if !self.has_any_issues() {
            ExitCode::Clean
        } else if self.block_on_critical && self.has_critical() {
            ExitCode::Blocked
        } else {
            ExitCode::IssuesFound
        }
    }
}

/// Process exit code for a completed review run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitCode {
    /// 0 — no issues.
    Clean,
    /// 1 — issues found, none blocking.
    IssuesFound,
    /// 2 — a critical finding with `block_on_critical` set.
    Blocked,
    /// 3 — the review itself failed to complete.
    InternalError,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        match self {
            ExitCode::Clean => 0,
            ExitCode::IssuesFound => 1,
            ExitCode::Blocked => 2,
            ExitCode::InternalError => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypothesis::{Category, Hypothesis, HypothesisType};

    fn finding(severity: VerdictSeverity) -> VerifiedFinding {
        VerifiedFinding {
            hypothesis: Hypothesis {
                kind: HypothesisType::SqlInjection,
                file: "a.go".into(),
                line: 1,
                variable: None,
                category: Category::Security,
                rule_id: "r".into(),
                confidence: 0.9,
                logic_trace: "t".into(),
                message: "m".into(),
            },
            severity,
            reasoning: "r".into(),
            fix: None,
        }
    }

    #[test]
    fn clean_report_exits_zero() {
        let report = ReviewReport::default();
        assert_eq!(report.exit_code().as_i32(), 0);
    }

    #[test]
    fn critical_with_block_flag_exits_blocked() {
        let mut report = ReviewReport {
            block_on_critical: true,
            ..Default::default()
        };
        report.verified_findings.push(finding(VerdictSeverity::Critical));
        assert_eq!(report.exit_code(), ExitCode::Blocked);
    }

    #[test]
    fn critical_without_block_flag_exits_issues_found() {
        let mut report = ReviewReport {
            block_on_critical: false,
            ..Default::default()
        };
        report.verified_findings.push(finding(VerdictSeverity::Critical));
        assert_eq!(report.exit_code(), ExitCode::IssuesFound);
    }

    #[test]
    fn markdown_includes_findings_table() {
        let mut report = ReviewReport::default();
        report.verified_findings.push(finding(VerdictSeverity::Warning));
        let md = report.to_markdown();
        assert!(md.contains("a.go:1"));
    }
}
