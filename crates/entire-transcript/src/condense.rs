use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    User,
    Assistant,
    Tool,
}

/// One entry of the condensed transcript stored with a checkpoint: user
/// prompts, assistant text, and tool calls with the files they touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondensedEntry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

impl CondensedEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::User,
            text: text.into(),
            tool_name: None,
            files: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Assistant,
            text: text.into(),
            tool_name: None,
            files: Vec::new(),
        }
    }

    pub fn tool(name: impl Into<String>, detail: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            kind: EntryKind::Tool,
            text: detail.into(),
            tool_name: Some(name.into()),
            files,
        }
    }
}

/// Encode entries as JSONL (one entry per line, trailing newline).
pub fn encode_condensed(entries: &[CondensedEntry]) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    for entry in entries {
        serde_json::to_writer(&mut out, entry)?;
        out.push(b'\n');
    }
    Ok(out)
}

pub fn decode_condensed(bytes: &[u8]) -> Result<Vec<CondensedEntry>, serde_json::Error> {
    bytes
        .split(|&b| b == b'\n')
        .filter(|l| !l.iter().all(|b| b.is_ascii_whitespace()))
        .map(serde_json::from_slice)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_preserves_order() {
        let entries = vec![
            CondensedEntry::user("add a flag"),
            CondensedEntry::tool("Edit", "src/main.rs", vec!["src/main.rs".into()]),
            CondensedEntry::assistant("Done."),
        ];
        let bytes = encode_condensed(&entries).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.starts_with(r#"{"type":"user","text":"add a flag"}"#));
        assert_eq!(decode_condensed(&bytes).unwrap(), entries);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_condensed(b"{\"type\":\"user\"}\nnope\n").is_err());
        assert!(decode_condensed(b"").unwrap().is_empty());
    }
}
