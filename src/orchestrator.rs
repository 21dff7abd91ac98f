//! Wires every collaborator into the seven-step review pipeline: pre-flight,
//! world update, hypothesis generation, impact context, verification,
//! suppression/autopoiesis, and emit.
//!
//! Every step tolerates an absent optional collaborator — no LLM client
//! skips verification, `use_neuro_symbolic = false` skips hypothesis
//! generation and impact context entirely — rather than failing the run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::ReviewConfig;
use crate::error::Result;
use crate::fact::{Fact, Value};
use crate::hypothesis::generate_hypotheses;
use crate::impact::{build_impact_context, ImpactContext, ModifiedFunction};
use crate::kernel::Kernel;
use crate::learning_store::LearningStore;
use crate::llm::{verify_hypotheses, LLMClient, VerifierConfig};
use crate::metrics::{cyclomatic_complexity, file_metrics};
use crate::output::ReviewReport;
use crate::rules::{self, DEFAULT_RULES_TEXT};
use crate::scanner::{scan_file, Severity as ScanSeverity};
use crate::suppression::{apply_suppression, record_clean_file, record_finding_patterns};
use crate::task::{ReviewKind, ReviewTask};
use crate::vcs::{is_ignored, Vcs};

/// Cyclomatic complexity above which a function gets a `complexity_warning`
/// base fact (McCabe's own "needs a second look" zone).
const COMPLEXITY_WARNING_THRESHOLD: u32 = 10;

/// Everything the orchestrator needs beyond the task and config. All fields
/// beyond `kernel` and `vcs` are optional collaborators the pipeline
/// degrades gracefully without.
pub struct Collaborators<'a> {
    pub vcs: &'a dyn Vcs,
    pub kernel: &'a Kernel,
    pub llm_client: Option<Arc<dyn LLMClient>>,
    pub learning_store: Option<&'a dyn LearningStore>,
}

/// Run pre-flight checks (external build/lint). Never aborts the pipeline:
/// a real implementation would shell out to the project's own build/lint
/// tooling and attach any output as an informational note, but a failure
/// here is never fatal to the review itself.
async fn run_preflight(vcs: &dyn Vcs, files: &[String]) {
    for file in files {
        if vcs.read_file(file).await.is_err() {
            tracing::warn!(file, "pre-flight could not read file; continuing anyway");
        }
    }
}

/// Detect rough function boundaries by scanning for common definition
/// keywords, then closing the body via brace depth. Good enough for metrics
/// and for probing which file regions a diff touched; not a real parser.
fn detect_functions(contents: &str) -> Vec<(String, u32, u32)> {
    let lines: Vec<&str> = contents.lines().collect();
    let mut functions = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim_start();
        let is_def = trimmed.starts_with("func ")
            || trimmed.starts_with("fn ")
            || trimmed.starts_with("pub fn ")
            || trimmed.starts_with("def ")
            || trimmed.starts_with("function ");
        if is_def {
            let name = trimmed
                .split(|c: char| c == '(' || c.is_whitespace())
                .nth(1)
                .unwrap_or("anonymous")
                .to_string();
            let mut depth = 0i32;
            let mut seen_brace = false;
            let mut end = i;
            for (offset, line) in lines[i..].iter().enumerate() {
                for c in line.chars() {
                    match c {
                        '{' => {
                            depth += 1;
                            seen_brace = true;
                        }
                        '}' => depth -= 1,
                        _ => {}
                    }
                }
                if seen_brace && depth <= 0 {
                    end = i + offset;
                    break;
                }
                end = i + offset;
            }
            functions.push((name, (i + 1) as u32, (end + 1) as u32));
            i = end + 1;
        } else {
            i += 1;
        }
    }
    functions
}

/// Cheap substring probes for the data-flow facts named in the world-update
/// step: a file "has" a behavior if a characteristic token appears anywhere
/// in its contents. Deliberately approximate — a true data-flow analysis is
/// out of scope for the pattern layer.
fn probe_data_flow_facts(file: &str, body: &str) -> Vec<Fact> {
    let probes: &[(&str, &[&str])] = &[
        ("has_nil_check", &["!= nil", "== nil", "is not None", "is None"]),
        ("has_error_handling", &["if err != nil", "except ", "catch ", ".catch("]),
        ("has_mutex_protection", &["Mutex", "Lock()", "mutex.lock", "synchronized"]),
        ("has_defer", &["defer ", "finally:", "finally {"]),
        ("respects_context", &["ctx context.Context", "ctx.Done()", "context.Context"]),
    ];
    probes
        .iter()
        .filter(|(_, needles)| needles.iter().any(|n| body.contains(n)))
        .map(|(predicate, _)| {
            Fact::new(
                *predicate,
                vec![Value::Str(file.to_string()), Value::Atom("/true".into())],
            )
        })
        .collect()
}

/// Extract the set of file paths touched by a unified diff's `+++ b/...`
/// headers.
fn changed_files_from_diff(diff_text: &str) -> Vec<String> {
    diff_text
        .lines()
        .filter_map(|line| line.strip_prefix("+++ b/"))
        .filter(|p| *p != "/dev/null")
        .map(str::to_string)
        .collect()
}

/// Load a rule set into the kernel: `config.custom_rules_path` when set,
/// falling back to [`DEFAULT_RULES_TEXT`] if it can't be read, otherwise the
/// default ruleset directly. A parse or load failure is logged and leaves
/// hypothesis generation degraded (no rules loaded) rather than aborting
/// the run.
async fn load_ruleset(kernel: &Kernel, config: &ReviewConfig) {
    let text = match &config.custom_rules_path {
        Some(path) => match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(
                    path,
                    error = %err,
                    "could not read custom_rules_path; falling back to the default rule set"
                );
                DEFAULT_RULES_TEXT.to_string()
            }
        },
        None => DEFAULT_RULES_TEXT.to_string(),
    };

    match rules::parse_rule_file(&text) {
        Ok(parsed) => {
            if let Err(err) = rules::load_into_kernel(kernel, parsed).await {
                tracing::warn!(error = %err, "failed to load parsed rule set into the kernel");
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to parse rule file; hypothesis generation may be degraded");
        }
    }
}

fn file_stem(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string()
}

/// Cheap import/require/include substring probe linking files under review:
/// a line that looks like an import statement and mentions another reviewed
/// file's stem counts as a dependency link. Approximate, in the same spirit
/// as [`probe_data_flow_facts`] and [`detect_functions`] — a true module
/// resolver is out of scope for the pattern layer.
fn detect_dependency_links(
    files: &[String],
    file_contents: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let stems: Vec<(String, String)> = files
        .iter()
        .map(|f| (file_stem(f), f.clone()))
        .filter(|(stem, _)| !stem.is_empty())
        .collect();

    let mut links = Vec::new();
    for file in files {
        let Some(contents) = file_contents.get(file) else {
            continue;
        };
        for line in contents.lines() {
            let trimmed = line.trim_start();
            let is_import = trimmed.starts_with("import ")
                || trimmed.starts_with("from ")
                || trimmed.starts_with("require(")
                || trimmed.contains("require(")
                || trimmed.starts_with("#include")
                || trimmed.starts_with("use ");
            if !is_import {
                continue;
            }
            for (stem, target_file) in &stems {
                if target_file != file && trimmed.contains(stem.as_str()) {
                    links.push((file.clone(), target_file.clone()));
                }
            }
        }
    }
    links.sort();
    links.dedup();
    links
}

/// Assert the `churn_rate`/`complexity_warning`/`git_history`/
/// `dependency_link` base facts the default rule set's architecture
/// hypotheses derive from. `churn_rate` only fires for diff-touched files —
/// outside a diff-driven review there's no churn signal available.
async fn assert_architecture_signals(
    kernel: &Kernel,
    files: &[String],
    file_contents: &HashMap<String, String>,
    changed_files: &HashSet<String>,
) {
    for file in files {
        let Some(contents) = file_contents.get(file) else {
            continue;
        };
        let is_changed = changed_files.contains(file);
        let _ = kernel
            .assert(Fact::new(
                "git_history",
                vec![
                    Value::Str(file.clone()),
                    Value::Atom(if is_changed { "/unstable" } else { "/stable" }.into()),
                ],
            ))
            .await;

        for (name, start, end) in detect_functions(contents) {
            let body: Vec<&str> = contents
                .lines()
                .skip(start as usize - 1)
                .take((end - start + 1) as usize)
                .collect();
            let complexity = cyclomatic_complexity(&body);
            if complexity > COMPLEXITY_WARNING_THRESHOLD {
                let _ = kernel
                    .assert(Fact::new(
                        "complexity_warning",
                        vec![
                            Value::Str(file.clone()),
                            Value::Int(start as i64),
                            Value::Str(name),
                            Value::Atom("/true".into()),
                        ],
                    ))
                    .await;
            }
            if is_changed {
                let _ = kernel
                    .assert(Fact::new(
                        "churn_rate",
                        vec![
                            Value::Str(file.clone()),
                            Value::Int(start as i64),
                            Value::Atom("/high".into()),
                        ],
                    ))
                    .await;
            }
        }
    }

    for (from_file, to_file) in detect_dependency_links(files, file_contents) {
        let _ = kernel
            .assert(Fact::new(
                "dependency_link",
                vec![Value::Str(from_file), Value::Str(to_file)],
            ))
            .await;
    }
}

/// Resolve the task into a concrete file list, honoring ignore patterns and
/// the max-file-size cutoff, and reading each file's content once.
async fn gather_files(
    vcs: &dyn Vcs,
    task: &ReviewTask,
    config: &ReviewConfig,
) -> Result<(Vec<String>, HashMap<String, String>, Option<String>)> {
    let mut files = task.files.clone();
    let mut diff_text = None;

    if task.kind == ReviewKind::Diff {
        let diff_ref = task.diff_ref.as_deref().unwrap_or("HEAD");
        let text = vcs.diff(diff_ref).await?;
        files = changed_files_from_diff(&text);
        diff_text = Some(text);
    }

    files.retain(|f| !is_ignored(f, &config.ignore_patterns));

    let mut contents = HashMap::new();
    for file in &files {
        match vcs.read_file(file).await {
            Ok(body) => {
                if body.len() as u64 <= config.max_file_size {
                    contents.insert(file.clone(), body);
                } else {
                    tracing::warn!(file, size = body.len(), "skipping file over max_file_size");
                }
            }
            Err(err) => tracing::warn!(file, error = %err, "could not read file"),
        }
    }
    files.retain(|f| contents.contains_key(f));

    Ok((files, contents, diff_text))
}

/// Run the full seven-step review pipeline for one task.
pub async fn run_review(
    task: ReviewTask,
    collaborators: Collaborators<'_>,
    config: &ReviewConfig,
) -> Result<ReviewReport> {
    let Collaborators {
        vcs,
        kernel,
        llm_client,
        learning_store,
    } = collaborators;

    // Step 1: pre-flight.
    run_preflight(vcs, &task.files).await;

    // Step 2: world update.
    let (files, file_contents, diff_text) = gather_files(vcs, &task, config).await?;

    for (file, contents) in &file_contents {
        let is_test = file.contains("test") || file.contains("spec");
        let lang = crate::scanner::Language::detect(file);
        let _ = kernel
            .assert(Fact::new(
                "file_topology",
                vec![
                    Value::Str(file.clone()),
                    Value::Str(format!("{:x}", simple_hash(contents))),
                    Value::Str(format!("{lang:?}").to_lowercase()),
                    Value::Int(0),
                    Value::Atom(if is_test { "/true" } else { "/false" }.into()),
                ],
            ))
            .await;

        for fact in probe_data_flow_facts(file, contents) {
            let _ = kernel.assert(fact).await;
        }
    }

    let mut modified_functions = Vec::new();
    if let Some(diff_text) = &diff_text {
        for file in changed_files_from_diff(diff_text) {
            if let Some(contents) = file_contents.get(&file) {
                for (name, start, end) in detect_functions(contents) {
                    let body = contents
                        .lines()
                        .skip(start as usize - 1)
                        .take((end - start + 1) as usize)
                        .collect::<Vec<_>>()
                        .join("\n");
                    modified_functions.push(ModifiedFunction {
                        name,
                        file: file.clone(),
                        start_line: start,
                        end_line: end,
                        body: Some(body),
                    });
                }
            }
        }
    }

    // Pattern scan runs regardless of the neuro-symbolic path.
    let mut raw_findings = Vec::new();
    for file in &files {
        if let Some(contents) = file_contents.get(file) {
            raw_findings.extend(scan_file(file, contents));
        }
    }

    // Step 3+4: hypothesis generation and impact context (only with
    // use_neuro_symbolic enabled; impact only when something was modified).
    let mut hypotheses = Vec::new();
    let mut incomplete_predicates = Vec::new();
    let mut impact_context: Option<ImpactContext> = None;
    if config.use_neuro_symbolic {
        load_ruleset(kernel, config).await;
        let changed_files: HashSet<String> = diff_text
            .as_deref()
            .map(changed_files_from_diff)
            .unwrap_or_default()
            .into_iter()
            .collect();
        assert_architecture_signals(kernel, &files, &file_contents, &changed_files).await;

        let report = generate_hypotheses(kernel, config.min_confidence, config.max_hypotheses).await;
        hypotheses = report.hypotheses;
        incomplete_predicates = report.incomplete_predicates;

        if !modified_functions.is_empty() {
            let ctx = build_impact_context(
                kernel,
                &modified_functions,
                &file_contents,
                config.impact_depth_limit,
                crate::impact::DEFAULT_MAX_IMPACTED_CALLERS,
            )
            .await;
            impact_context = Some(ctx);
        }
    }
    if !incomplete_predicates.is_empty() {
        tracing::warn!(?incomplete_predicates, "some hypothesis queries did not converge");
    }

    // Step 5: verification.
    let (verified_findings, verification_stats) = if let Some(client) = llm_client {
        if hypotheses.is_empty() {
            (Vec::new(), None)
        } else {
            let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
            let (findings, stats) = verify_hypotheses(
                kernel,
                client,
                hypotheses,
                &file_contents,
                &VerifierConfig {
                    batch_size: config.batch_size,
                    ..VerifierConfig::default()
                },
                &cancel_rx,
            )
            .await;
            (findings, Some(stats))
        }
    } else {
        (Vec::new(), None)
    };

    // Step 6: suppression and autopoiesis.
    let raw_findings = apply_suppression(kernel, raw_findings).await?;
    if let Some(store) = learning_store {
        record_finding_patterns(store, kernel, &raw_findings).await?;
        for file in &files {
            let has_findings = raw_findings.iter().any(|f| &f.file == file)
                || verified_findings.iter().any(|f| f.hypothesis.file == *file);
            if !has_findings {
                record_clean_file(store, kernel, file).await?;
            }
        }
    }

    // Step 7: emit.
    let mut metrics = Vec::new();
    if config.include_metrics {
        for file in &files {
            if let Some(contents) = file_contents.get(file) {
                let functions = detect_functions(contents);
                let (file_m, _fn_m) =
                    file_metrics(crate::scanner::Language::detect(file), contents, &functions);
                metrics.push((file.clone(), file_m));
            }
        }
    }

    let mut raw_findings = if let Some(filter) = &config.severity_filter {
        filter_by_severity(raw_findings, filter)
    } else {
        raw_findings
    };
    raw_findings.truncate(config.max_findings);

    Ok(ReviewReport {
        raw_findings,
        verified_findings,
        verification_stats,
        impact_context,
        file_metrics: metrics,
        block_on_critical: config.block_on_critical,
    })
}

fn filter_by_severity(
    findings: Vec<crate::scanner::RawFinding>,
    min_severity: &str,
) -> Vec<crate::scanner::RawFinding> {
    let min = match min_severity.to_ascii_lowercase().as_str() {
        "info" => ScanSeverity::Info,
        "low" => ScanSeverity::Low,
        "medium" => ScanSeverity::Medium,
        "high" => ScanSeverity::High,
        "critical" => ScanSeverity::Critical,
        _ => ScanSeverity::Info,
    };
    findings.into_iter().filter(|f| f.severity >= min).collect()
}

/// A cheap, non-cryptographic content hash for `file_topology`'s `hash`
/// position; identity over content is all that predicate needs.
fn simple_hash(s: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::parse_task;
    use async_trait::async_trait;
    use std::collections::HashMap as Map;

    struct FakeVcs {
        files: Map<String, String>,
        diff: String,
    }

    #[async_trait]
    impl Vcs for FakeVcs {
        async fn read_file(&self, path: &str) -> Result<String> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| crate::error::ReviewError::file_unreadable(path, "not found"))
        }
        async fn diff(&self, _git_ref: &str) -> Result<String> {
            Ok(self.diff.clone())
        }
        async fn glob(&self, _pattern: &str) -> Result<Vec<String>> {
            Ok(self.files.keys().cloned().collect())
        }
    }

    #[tokio::test]
    async fn pattern_scan_runs_without_neuro_symbolic() {
        let mut files = Map::new();
        files.insert(
            "a.py".to_string(),
            "apiKey = \"sk_live_abcdefghijklmnop1234\"\n".to_string(),
        );
        let vcs = FakeVcs { files, diff: String::new() };
        let kernel = Kernel::new();
        let task = parse_task("review file:a.py").unwrap();
        let config = ReviewConfig::new().with_use_neuro_symbolic(false);
        let report = run_review(
            task,
            Collaborators {
                vcs: &vcs,
                kernel: &kernel,
                llm_client: None,
                learning_store: None,
            },
            &config,
        )
        .await
        .unwrap();
        assert!(!report.raw_findings.is_empty());
        assert!(report.verification_stats.is_none());
    }

    #[tokio::test]
    async fn clean_file_produces_clean_report() {
        let mut files = Map::new();
        files.insert("b.py".to_string(), "x = 1\n".to_string());
        let vcs = FakeVcs { files, diff: String::new() };
        let kernel = Kernel::new();
        let task = parse_task("review file:b.py").unwrap();
        let config = ReviewConfig::new();
        let report = run_review(
            task,
            Collaborators {
                vcs: &vcs,
                kernel: &kernel,
                llm_client: None,
                learning_store: None,
            },
            &config,
        )
        .await
        .unwrap();
        assert_eq!(report.exit_code().as_i32(), 0);
    }

    #[tokio::test]
    async fn diff_review_derives_hero_risk_for_a_changed_complex_function() {
        let conditions: String = (0..12)
            .map(|i| format!("  if x == {i} {{ y += 1 }}\n"))
            .collect();
        let contents = format!("func risky() {{\n{conditions}}}\n");

        let mut files = Map::new();
        files.insert("r.go".to_string(), contents);
        let vcs = FakeVcs {
            files,
            diff: "--- a/r.go\n+++ b/r.go\n@@ -1,3 +1,3 @@\n+x\n".to_string(),
        };
        let kernel = Kernel::new();
        let task = parse_task("diff diff:HEAD").unwrap();
        let config = ReviewConfig::new();
        run_review(
            task,
            Collaborators {
                vcs: &vcs,
                kernel: &kernel,
                llm_client: None,
                learning_store: None,
            },
            &config,
        )
        .await
        .unwrap();

        let hero_risk = kernel.query_best_effort("hero_risk").await;
        assert_eq!(hero_risk.len(), 1);
    }

    #[test]
    fn detect_functions_finds_go_style_bodies() {
        let src = "func foo() {\n  bar()\n}\n\nfunc baz() {\n  qux()\n}\n";
        let functions = detect_functions(src);
        assert_eq!(functions.len(), 2);
        assert_eq!(functions[0].0, "foo");
    }
}
