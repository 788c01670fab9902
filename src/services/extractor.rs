//! Output parameter extraction.
//!
//! Agents reply with free text that often embeds a JSON object. The
//! extractor locates the first object substring, parses it leniently, and
//! copies declared top-level scalar fields into the execution context.
//! It never fails: unparseable output and missing fields are skipped.

use std::collections::HashMap;

/// Locate and parse the first JSON object substring in `text`.
///
/// The scan is brace-balanced and string-aware, so braces inside string
/// literals do not terminate the candidate early.
pub fn first_json_object(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..=start + offset];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Copy declared output parameters from agent output into the context.
///
/// Only top-level scalars (string, number, boolean) are copied; nested
/// objects and arrays are ignored. Existing context keys are overwritten.
pub fn extract_output_params(
    output: &str,
    params: &[String],
    context: &mut HashMap<String, serde_json::Value>,
) {
    if params.is_empty() {
        return;
    }
    let Some(serde_json::Value::Object(fields)) = first_json_object(output) else {
        return;
    };

    for name in params {
        match fields.get(name) {
            Some(value @ (serde_json::Value::String(_)
            | serde_json::Value::Number(_)
            | serde_json::Value::Bool(_))) => {
                context.insert(name.clone(), value.clone());
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracts_declared_scalars() {
        let mut context = HashMap::new();
        extract_output_params(
            r#"Here you go: {"title": "Intro", "pages": 12, "draft": false, "tags": ["a"]}"#,
            &["title".to_string(), "pages".to_string(), "draft".to_string(), "tags".to_string()],
            &mut context,
        );
        assert_eq!(context["title"], json!("Intro"));
        assert_eq!(context["pages"], json!(12));
        assert_eq!(context["draft"], json!(false));
        assert!(!context.contains_key("tags"), "arrays are ignored");
    }

    #[test]
    fn test_missing_params_are_skipped_silently() {
        let mut context = HashMap::new();
        extract_output_params(
            r#"{"present": "yes"}"#,
            &["present".to_string(), "absent".to_string()],
            &mut context,
        );
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn test_existing_keys_are_overwritten() {
        let mut context = HashMap::new();
        context.insert("status".to_string(), json!("old"));
        extract_output_params(r#"{"status": "new"}"#, &["status".to_string()], &mut context);
        assert_eq!(context["status"], json!("new"));
    }

    #[test]
    fn test_non_json_output_is_a_no_op() {
        let mut context = HashMap::new();
        extract_output_params("no json here", &["x".to_string()], &mut context);
        assert!(context.is_empty());
    }

    #[test]
    fn test_first_object_wins_and_braces_in_strings_are_skipped() {
        let value = first_json_object(r#"noise {"a": "has } brace"} {"b": 2}"#).unwrap();
        assert_eq!(value, json!({"a": "has } brace"}));
    }

    #[test]
    fn test_unbalanced_braces_yield_none() {
        assert!(first_json_object("{ not closed").is_none());
    }
}
