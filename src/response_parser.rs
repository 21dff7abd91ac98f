//! Extracts a verdict JSON array out of whatever prose/Markdown mixture the
//! LLM emits.
//!
//! Extraction order: a fenced ` ```json ` block, a fenced ` ``` ` block
//! whose content looks like JSON, or a raw balanced `[...]`/`{...}`
//! substring found by scanning bracket depth (ignoring brackets inside
//! string literals). A bare object is wrapped into a one-element array.

use crate::error::{Result, ReviewError};
use crate::llm::Verdict;

fn find_fenced_block<'a>(text: &'a str, lang_hint: Option<&str>) -> Option<&'a str> {
    let fence = "```";
    let mut search_from = 0;
    while let Some(start) = text[search_from..].find(fence) {
        let abs_start = search_from + start + fence.len();
        let after_fence = &text[abs_start..];
        let newline = after_fence.find('\n').unwrap_or(after_fence.len());
        let tag = after_fence[..newline].trim();
        let content_start = abs_start + newline + 1;
        if let Some(end_rel) = text[content_start..].find(fence) {
            let content = &text[content_start..content_start + end_rel];
            let matches_hint = match lang_hint {
                Some(hint) => tag.eq_ignore_ascii_case(hint),
                None => true,
            };
            if matches_hint && looks_like_json(content.trim()) {
                return Some(content.trim());
            }
            search_from = content_start + end_rel + fence.len();
        } else {
            break;
        }
    }
    None
}

fn looks_like_json(s: &str) -> bool {
    s.starts_with('[') || s.starts_with('{')
}

/// Scan for the first balanced `[...]` or `{...}` substring, tracking
/// bracket depth and ignoring brackets inside string literals.
fn find_balanced_json(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'[' || b == b'{' {
            if let Some(end) = scan_balanced(text, i) {
                return Some(&text[i..=end]);
            }
        }
    }
    None
}

fn scan_balanced(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let open = bytes[start];
    let close = if open == b'[' { b']' } else { b'}' };
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth -= 1;
                if depth == 0 && b == close {
                    return Some(i);
                }
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Extract the JSON substring from a raw LLM response, trying each
/// strategy in order.
pub fn extract_json(text: &str) -> Result<String> {
    if let Some(block) = find_fenced_block(text, Some("json")) {
        return Ok(block.to_string());
    }
    if let Some(block) = find_fenced_block(text, None) {
        return Ok(block.to_string());
    }
    if let Some(raw) = find_balanced_json(text) {
        return Ok(raw.to_string());
    }
    Err(ReviewError::ParseFailure(
        "no JSON object or array found in response".to_string(),
    ))
}

/// Parse a verdict array out of a raw LLM response, tolerating a bare
/// single-object response by wrapping it in a one-element array.
pub fn parse_verdict_array(text: &str) -> Result<Vec<Verdict>> {
    let json = extract_json(text)?;
    let value: serde_json::Value = serde_json::from_str(&json)?;
    let array = match value {
        serde_json::Value::Array(items) => items,
        obj @ serde_json::Value::Object(_) => vec![obj],
        _ => {
            return Err(ReviewError::ParseFailure(
                "verdict JSON was neither an array nor an object".to_string(),
            ))
        }
    };
    let mut verdicts = Vec::with_capacity(array.len());
    for mut item in array {
        normalize_decision_field(&mut item);
        let verdict: Verdict = serde_json::from_value(item)?;
        verdicts.push(verdict);
    }
    Ok(verdicts)
}

/// Lower-case the `decision` field and coerce anything that isn't exactly
/// `confirmed`/`dismissed` to `dismissed` (§4.8: "coerce invalid decisions
/// to Dismissed with a warning").
fn normalize_decision_field(item: &mut serde_json::Value) {
    let Some(obj) = item.as_object_mut() else {
        return;
    };
    let normalized = obj
        .get("decision")
        .and_then(|v| v.as_str())
        .map(|s| s.to_ascii_lowercase())
        .map(|s| {
            if s == "confirmed" || s == "dismissed" {
                s
            } else {
                tracing::warn!(decision = %s, "coercing unrecognized verdict decision to dismissed");
                "dismissed".to_string()
            }
        })
        .unwrap_or_else(|| "dismissed".to_string());
    obj.insert(
        "decision".to_string(),
        serde_json::Value::String(normalized),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_VERDICT: &str = r#"[{"hypothesis_index":0,"hypothesis_type":"UnsafeDeref","file":"a.go","line":10,"decision":"confirmed","reasoning":"r","confidence":0.9,"fix":null,"false_positive":false,"pattern_note":null,"alternative_risk":null}]"#;

    #[test]
    fn extracts_fenced_json_block() {
        let text = format!("Here is my answer:\n```json\n{SAMPLE_VERDICT}\n```\nThanks!");
        let verdicts = parse_verdict_array(&text).unwrap();
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].file, "a.go");
    }

    #[test]
    fn extracts_raw_balanced_array_in_prose() {
        let text = format!("My verdicts are {SAMPLE_VERDICT} and that's final.");
        let verdicts = parse_verdict_array(&text).unwrap();
        assert_eq!(verdicts.len(), 1);
    }

    #[test]
    fn wraps_bare_object_into_array() {
        let obj = r#"{"hypothesis_index":0,"hypothesis_type":"UnsafeDeref","file":"a.go","line":10,"decision":"confirmed","reasoning":"r","confidence":0.9,"fix":null,"false_positive":false,"pattern_note":null,"alternative_risk":null}"#;
        let verdicts = parse_verdict_array(obj).unwrap();
        assert_eq!(verdicts.len(), 1);
    }

    #[test]
    fn brackets_inside_strings_do_not_confuse_depth_tracking() {
        let text = format!(
            r#"prefix {{"reasoning": "looks like [ this ]"}} {SAMPLE_VERDICT} suffix"#
        );
        // the first balanced object found is the decoy; extraction should
        // at least not panic and should find *a* JSON value.
        assert!(extract_json(&text).is_ok());
    }

    #[test]
    fn errors_when_no_json_present() {
        let err = parse_verdict_array("I cannot find any issues, everything looks fine.");
        assert!(err.is_err());
    }
}
