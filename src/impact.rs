//! Bounded k-hop caller-graph impact context, sized to fit an LLM prompt
//! without exploding it.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::fact::{Fact, Value};
use crate::kernel::Kernel;

pub const DEFAULT_DEPTH_LIMIT: u32 = 3;
pub const DEFAULT_MAX_IMPACTED_CALLERS: usize = 10;
const MAX_BODY_LINES: usize = 50;

/// A function changed in the reviewed diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedFunction {
    pub name: String,
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    pub body: Option<String>,
}

/// A caller discovered within `depth_limit` hops of a modified function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactedCaller {
    pub name: String,
    pub file: String,
    pub body: String,
    pub depth: u32,
    pub priority: u32,
}

/// The bounded context handed to the verifier for a set of modified
/// functions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactContext {
    pub modified_functions: Vec<ModifiedFunction>,
    pub impacted_callers: Vec<ImpactedCaller>,
    pub affected_files: Vec<String>,
    pub max_depth: u32,
}

impl ImpactContext {
    /// A one-line, log-friendly summary of this context's shape.
    pub fn summary(&self) -> String {
        format!(
            "{} modified function(s), {} impacted caller(s) across {} file(s), max depth {}",
            self.modified_functions.len(),
            self.impacted_callers.len(),
            self.affected_files.len(),
            self.max_depth
        )
    }
}

fn priority_score(atom: &Value) -> u32 {
    let text = match atom {
        Value::Atom(a) => a.as_str(),
        Value::Str(s) => s.as_str(),
        Value::Int(_) => return 50,
    };
    if text.contains("high") || text.contains("critical") {
        100
    } else if text.contains("medium") || text.contains("normal") {
        50
    } else if text.contains("low") {
        25
    } else {
        50
    }
}

/// Find the 1-based line a named function starts on, mirroring
/// `orchestrator.rs`'s `detect_functions` def-keyword scan. Falls back to
/// line 1 (the whole file) when the name can't be located, which is what
/// callers got unconditionally before this lookup existed.
fn locate_function_start(contents: &str, name: &str) -> u32 {
    let prefixes = [
        format!("func {name}("),
        format!("fn {name}("),
        format!("pub fn {name}("),
        format!("def {name}("),
        format!("function {name}("),
    ];
    for (i, line) in contents.lines().enumerate() {
        let trimmed = line.trim_start();
        if prefixes.iter().any(|p| trimmed.starts_with(p.as_str())) {
            return (i + 1) as u32;
        }
    }
    1
}

/// Pull a function's body out of `contents` by a brace-depth regex fallback,
/// truncating to [`MAX_BODY_LINES`] with a `// ... (truncated)` suffix.
pub fn extract_body_fallback(contents: &str, start_line: u32) -> String {
    let lines: Vec<&str> = contents.lines().collect();
    let start_idx = (start_line as usize).saturating_sub(1);
    if start_idx >= lines.len() {
        return String::new();
    }
    let mut depth = 0i32;
    let mut seen_brace = false;
    let mut end_idx = lines.len() - 1;
    for (offset, line) in lines[start_idx..].iter().enumerate() {
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
            end_idx = start_idx + offset;
            break;
        }
    }
    let body_lines = &lines[start_idx..=end_idx];
    if body_lines.len() > MAX_BODY_LINES {
        let mut truncated: Vec<&str> = body_lines[..MAX_BODY_LINES].to_vec();
        let joined = truncated.join("\n");
        truncated.clear();
        format!("{joined}\n// ... (truncated)")
    } else {
        body_lines.join("\n")
    }
}

/// Build the impact context for a set of modified functions.
///
/// Asserts `modified_function` facts into the kernel, then queries caller
/// predicates in priority order: `context_priority_file`,
/// `relevant_context_file`, `code_calls` (fallback). File contents are
/// looked up in `file_contents` purely for body extraction; a missing entry
/// yields an empty body rather than failing the whole pass.
pub async fn build_impact_context(
    kernel: &Kernel,
    modified_functions: &[ModifiedFunction],
    file_contents: &HashMap<String, String>,
    depth_limit: u32,
    max_impacted_callers: usize,
) -> ImpactContext {
    if modified_functions.is_empty() {
        return ImpactContext::default();
    }

    for m in modified_functions {
        let _ = kernel
            .assert(Fact::new(
                "modified_function",
                vec![
                    Value::Str(m.name.clone()),
                    Value::Str(m.file.clone()),
                    Value::Int(m.start_line as i64),
                    Value::Int(m.end_line as i64),
                ],
            ))
            .await;
    }

    // (name, file) -> (priority, depth)
    let mut callers: HashMap<(String, String), (u32, u32)> = HashMap::new();

    for predicate in ["context_priority_file", "relevant_context_file", "code_calls"] {
        let facts = kernel.query_best_effort(predicate).await;
        for fact in facts {
            if fact.args.len() < 2 {
                continue;
            }
            let name = match &fact.args[0] {
                Value::Str(s) | Value::Atom(s) => s.clone(),
                Value::Int(i) => i.to_string(),
            };
            let file = match &fact.args[1] {
                Value::Str(s) | Value::Atom(s) => s.clone(),
                Value::Int(i) => i.to_string(),
            };
            let priority = fact.args.get(2).map(priority_score).unwrap_or(50);
            let depth = fact
                .args
                .get(3)
                .and_then(|v| match v {
                    Value::Int(i) => Some(*i as u32),
                    _ => None,
                })
                .unwrap_or(1)
                .min(depth_limit);
            if depth > depth_limit {
                continue;
            }
            let key = (name, file);
            callers
                .entry(key)
                .and_modify(|(p, d)| {
                    if priority > *p {
                        *p = priority;
                    }
                    if depth < *d {
                        *d = depth;
                    }
                })
                .or_insert((priority, depth));
        }
    }

    let mut impacted: Vec<ImpactedCaller> = callers
        .into_iter()
        .map(|((name, file), (priority, depth))| {
            let body = file_contents
                .get(&file)
                .map(|contents| extract_body_fallback(contents, locate_function_start(contents, &name)))
                .unwrap_or_default();
            ImpactedCaller {
                name,
                file,
                body,
                depth,
                priority,
            }
        })
        .collect();

    impacted.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.depth.cmp(&b.depth)));
    impacted.truncate(max_impacted_callers);

    let mut affected: HashSet<String> = modified_functions.iter().map(|m| m.file.clone()).collect();
    for c in &impacted {
        affected.insert(c.file.clone());
    }
    let mut affected_files: Vec<String> = affected.into_iter().collect();
    affected_files.sort();

    let max_depth = impacted.iter().map(|c| c.depth).max().unwrap_or(0);

    ImpactContext {
        modified_functions: modified_functions.to_vec(),
        impacted_callers: impacted,
        affected_files,
        max_depth,
    }
}

/// Build a [`Term`]/[`Fact`] priority atom for tests and rule files.
pub fn priority_atom(label: &str) -> Value {
    Value::Atom(format!("/{label}"))
}
