//! Template resolution for prompts, payloads, and plan arguments.
//!
//! Replaces `{identifier}` placeholders from the execution context in a
//! single pass; substituted text is never re-scanned. Unknown identifiers
//! stay literal so prompts can legitimately contain braces.

use std::collections::HashMap;

/// Resolve `{identifier}` placeholders in `template` from `context`.
///
/// Identifier characters are alphanumeric plus `_`. A `{...}` span that is
/// empty, contains other characters, or names an absent key is left as-is.
pub fn resolve(template: &str, context: &HashMap<String, serde_json::Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = find_placeholder_end(bytes, i + 1) {
                let name = &template[i + 1..end];
                if let Some(value) = context.get(name) {
                    out.push_str(&stringify(value));
                    i = end + 1;
                    continue;
                }
            }
        }
        // Not a placeholder start; copy the raw character.
        let ch_len = utf8_len(bytes[i]);
        out.push_str(&template[i..i + ch_len]);
        i += ch_len;
    }

    out
}

/// Index of the closing `}` if the span from `start` is a well-formed,
/// non-empty identifier.
fn find_placeholder_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'}' => return if i > start { Some(i) } else { None },
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' => i += 1,
            _ => return None,
        }
    }
    None
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}

/// Canonical textual form of a context value: strings bare, numbers in
/// decimal, booleans `true`/`false`, lists and maps as compact JSON.
pub fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_resolves_known_identifiers() {
        let context = ctx(&[("topic", json!("rust")), ("count", json!(3))]);
        assert_eq!(
            resolve("write {count} posts about {topic}", &context),
            "write 3 posts about rust"
        );
    }

    #[test]
    fn test_unknown_identifiers_stay_literal() {
        let context = ctx(&[("a", json!("x"))]);
        assert_eq!(resolve("{a} and {missing}", &context), "x and {missing}");
    }

    #[test]
    fn test_malformed_braces_stay_literal() {
        let context = ctx(&[("a", json!("x"))]);
        assert_eq!(resolve("{} {a b} {unclosed", &context), "{} {a b} {unclosed");
    }

    #[test]
    fn test_no_recursive_substitution() {
        let context = ctx(&[("a", json!("{b}")), ("b", json!("nope"))]);
        assert_eq!(resolve("{a}", &context), "{b}");
    }

    #[test]
    fn test_value_stringification() {
        assert_eq!(stringify(&json!(true)), "true");
        assert_eq!(stringify(&json!(2.5)), "2.5");
        assert_eq!(stringify(&json!(["a", 1])), "[\"a\",1]");
        assert_eq!(stringify(&json!(null)), "");
    }

    #[test]
    fn test_multibyte_text_survives() {
        let context = ctx(&[("name", json!("héllo"))]);
        assert_eq!(resolve("→ {name} ←", &context), "→ héllo ←");
    }
}
