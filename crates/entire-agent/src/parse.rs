use serde_json::Value;

/// Parse a hook's stdin payload. Blank input yields `None`.
pub(crate) fn parse_payload(raw: &[u8]) -> anyhow::Result<Option<Value>> {
    if raw.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }
    let val: Value = serde_json::from_slice(raw)?;
    if !val.is_object() {
        anyhow::bail!("hook payload is not a JSON object");
    }
    Ok(Some(val))
}

/// Look up a field by its snake_case name, falling back to camelCase.
/// Agents disagree on casing, and some of them change it between releases.
pub(crate) fn get_field<'a>(v: &'a Value, snake_key: &str) -> Option<&'a Value> {
    v.get(snake_key)
        .or_else(|| v.get(snake_to_camel(snake_key)))
        .filter(|x| !x.is_null())
}

/// String field (snake or camel case), empty when absent.
pub(crate) fn get_str(v: &Value, snake_key: &str) -> String {
    get_field(v, snake_key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

/// Non-empty string field as `Option`.
pub(crate) fn get_opt_str(v: &Value, snake_key: &str) -> Option<String> {
    Some(get_str(v, snake_key)).filter(|s| !s.is_empty())
}

pub(crate) fn snake_to_camel(s: &str) -> String {
    let mut result = String::new();
    let mut capitalize_next = false;
    for ch in s.chars() {
        if ch == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            result.extend(ch.to_uppercase());
            capitalize_next = false;
        } else {
            result.push(ch);
        }
    }
    result
}

/// Text of a message `content` that is either a string or an array of
/// `{"type":"text","text":...}` blocks.
pub(crate) fn content_text(content: &Value) -> String {
    if let Some(s) = content.as_str() {
        return s.to_string();
    }
    content
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snake_to_camel_converts_correctly() {
        assert_eq!(snake_to_camel("hook_event_name"), "hookEventName");
        assert_eq!(snake_to_camel("session_id"), "sessionId");
        assert_eq!(snake_to_camel("tool_use_id"), "toolUseId");
        assert_eq!(snake_to_camel("cwd"), "cwd");
    }

    #[test]
    fn get_str_accepts_both_casings() {
        let v = json!({"session_id": "a", "transcriptPath": "/t.jsonl", "prompt": null});
        assert_eq!(get_str(&v, "session_id"), "a");
        assert_eq!(get_str(&v, "transcript_path"), "/t.jsonl");
        assert_eq!(get_str(&v, "prompt"), "");
        assert_eq!(get_opt_str(&v, "missing"), None);
    }

    #[test]
    fn payload_parsing() {
        assert!(parse_payload(b"  \n").unwrap().is_none());
        assert!(parse_payload(b"[1,2]").is_err());
        assert!(parse_payload(b"{oops").is_err());
        assert!(parse_payload(br#"{"a":1}"#).unwrap().is_some());
    }

    #[test]
    fn content_text_handles_blocks() {
        assert_eq!(content_text(&json!("plain")), "plain");
        assert_eq!(
            content_text(&json!([
                {"type": "text", "text": "one"},
                {"type": "tool_result", "content": "skip"},
                {"type": "text", "text": "two"}
            ])),
            "one\ntwo"
        );
        assert_eq!(content_text(&json!(42)), "");
    }
}
