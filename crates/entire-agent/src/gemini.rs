//! Gemini CLI adapter: a single JSON session document with a `messages`
//! array.

use std::collections::HashSet;

use entire_core::{Event, EventType, TokenUsage};
use entire_transcript::{ChunkError, CondensedEntry, TranscriptFormat};
use serde_json::Value;

use crate::parse::{content_text, get_opt_str, get_str, parse_payload};
use crate::{Agent, TokenCalculator, TranscriptAnalyzer};

const MESSAGES_FIELD: &str = "messages";

const FILE_WRITE_TOOLS: &[&str] = &["write_file", "replace", "edit"];

#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiAgent;

impl GeminiAgent {
    pub fn new() -> Self {
        Self
    }

    fn format() -> TranscriptFormat {
        TranscriptFormat::message_array(MESSAGES_FIELD)
    }
}

impl Agent for GeminiAgent {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn agent_type(&self) -> &'static str {
        "Gemini CLI"
    }

    fn parse_hook_event(&self, hook_name: &str, raw_input: &[u8]) -> anyhow::Result<Option<Event>> {
        let event_type = match hook_name {
            "SessionStart" | "session-start" => EventType::SessionStart,
            "BeforeAgent" | "before-agent" => EventType::TurnStart,
            "AfterAgent" | "after-agent" => EventType::TurnEnd,
            "PreCompress" | "pre-compress" => EventType::Compaction,
            "SessionEnd" | "session-end" => EventType::SessionEnd,
            _ => return Ok(None),
        };
        let Some(payload) = parse_payload(raw_input)? else {
            return Ok(None);
        };
        let session_id = get_str(&payload, "session_id");
        if session_id.is_empty() {
            anyhow::bail!("{hook_name} payload has no session_id");
        }
        let mut ev = Event::new(event_type, session_id)
            .with_session_ref(get_str(&payload, "transcript_path"));
        if event_type == EventType::TurnStart {
            ev.prompt = get_str(&payload, "prompt");
        }
        if event_type == EventType::SessionStart {
            ev.previous_session_id = get_opt_str(&payload, "previous_session_id");
        }
        Ok(Some(ev))
    }

    fn transcript_format(&self) -> TranscriptFormat {
        Self::format()
    }

    fn protected_dirs(&self) -> Vec<String> {
        vec![".gemini".to_string()]
    }

    fn as_transcript_analyzer(&self) -> Option<&dyn TranscriptAnalyzer> {
        Some(self)
    }

    fn as_token_calculator(&self) -> Option<&dyn TokenCalculator> {
        Some(self)
    }
}

fn message_type(msg: &Value) -> &str {
    msg.get("type").and_then(Value::as_str).unwrap_or("")
}

fn tool_calls(msg: &Value) -> impl Iterator<Item = &Value> {
    msg.get("toolCalls")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn tool_file(call: &Value) -> Option<String> {
    let name = call.get("name").and_then(Value::as_str)?;
    if !FILE_WRITE_TOOLS.contains(&name) {
        return None;
    }
    let args = call.get("args")?;
    args.get("file_path")
        .or_else(|| args.get("path"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl TranscriptAnalyzer for GeminiAgent {
    fn modified_files(&self, transcript: &[u8], start: usize) -> Result<Vec<String>, ChunkError> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for (_, msg) in Self::format().records_from(transcript, start)? {
            if message_type(&msg) != "gemini" {
                continue;
            }
            for file in tool_calls(&msg).filter_map(tool_file) {
                if seen.insert(file.clone()) {
                    files.push(file);
                }
            }
        }
        Ok(files)
    }

    fn condense(&self, transcript: &[u8], start: usize) -> Result<Vec<CondensedEntry>, ChunkError> {
        let mut out = Vec::new();
        for (_, msg) in Self::format().records_from(transcript, start)? {
            let text = msg.get("content").map(content_text).unwrap_or_default();
            let text = text.trim();
            match message_type(&msg) {
                "user" if !text.is_empty() => out.push(CondensedEntry::user(text)),
                "gemini" => {
                    if !text.is_empty() {
                        out.push(CondensedEntry::assistant(text));
                    }
                    for call in tool_calls(&msg) {
                        let name = call.get("name").and_then(Value::as_str).unwrap_or("tool");
                        let detail = call
                            .get("args")
                            .and_then(|a| a.get("description").or_else(|| a.get("command")))
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        out.push(CondensedEntry::tool(
                            name,
                            detail,
                            tool_file(call).into_iter().collect(),
                        ));
                    }
                }
                _ => {}
            }
        }
        Ok(out)
    }
}

impl TokenCalculator for GeminiAgent {
    fn token_usage(&self, transcript: &[u8], start: usize) -> Result<TokenUsage, ChunkError> {
        let mut usage = TokenUsage::default();
        for (_, msg) in Self::format().records_from(transcript, start)? {
            if message_type(&msg) != "gemini" {
                continue;
            }
            let Some(tokens) = msg.get("tokens") else {
                continue;
            };
            let count = |key: &str| tokens.get(key).and_then(Value::as_u64).unwrap_or(0);
            usage.input_tokens += count("input");
            usage.output_tokens += count("output");
            usage.cache_read_tokens += count("cached");
            usage.api_call_count += 1;
        }
        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "sessionId": "g1",
            "projectHash": "abc",
            "messages": [
                {"id": "1", "type": "user", "content": "rename the module"},
                {"id": "2", "type": "gemini", "content": "Renaming.",
                 "toolCalls": [
                    {"name": "read_file", "args": {"file_path": "/r/a.rs"}},
                    {"name": "replace", "args": {"file_path": "/r/a.rs"}},
                    {"name": "write_file", "args": {"file_path": "/r/b.rs"}}
                 ],
                 "tokens": {"input": 100, "output": 20, "cached": 40, "total": 160}},
                {"id": "3", "type": "user", "content": "thanks"},
                {"id": "4", "type": "gemini", "content": "Done.",
                 "tokens": {"input": 50, "output": 5, "cached": 0}}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn maps_gemini_hooks() {
        let agent = GeminiAgent::new();
        let raw = br#"{"session_id":"g1","transcript_path":"/t/g1.json","prompt":"hi"}"#;
        let ev = agent.parse_hook_event("BeforeAgent", raw).unwrap().unwrap();
        assert_eq!(ev.event_type, EventType::TurnStart);
        assert_eq!(ev.prompt, "hi");
        let ev = agent.parse_hook_event("AfterAgent", raw).unwrap().unwrap();
        assert_eq!(ev.event_type, EventType::TurnEnd);
        assert!(ev.prompt.is_empty());
        let ev = agent.parse_hook_event("PreCompress", raw).unwrap().unwrap();
        assert_eq!(ev.event_type, EventType::Compaction);
        assert!(agent.parse_hook_event("BeforeTool", raw).unwrap().is_none());
    }

    #[test]
    fn analyzes_message_array() {
        let agent = GeminiAgent::new();
        let t = session();
        assert_eq!(
            agent.modified_files(&t, 0).unwrap(),
            vec!["/r/a.rs".to_string(), "/r/b.rs".to_string()]
        );
        assert!(agent.modified_files(&t, 2).unwrap().is_empty());

        let entries = agent.condense(&t, 0).unwrap();
        assert_eq!(entries.len(), 7);
        assert_eq!(entries[0], CondensedEntry::user("rename the module"));
        assert_eq!(entries[2].tool_name.as_deref(), Some("read_file"));
        assert!(entries[2].files.is_empty());
        assert_eq!(entries[3].files, vec!["/r/a.rs".to_string()]);
    }

    #[test]
    fn sums_tokens_from_watermark() {
        let agent = GeminiAgent::new();
        let all = agent.token_usage(&session(), 0).unwrap();
        assert_eq!(all.input_tokens, 150);
        assert_eq!(all.output_tokens, 25);
        assert_eq!(all.cache_read_tokens, 40);
        assert_eq!(all.api_call_count, 2);
        let tail = agent.token_usage(&session(), 2).unwrap();
        assert_eq!(tail.input_tokens, 50);
    }

    #[test]
    fn chunks_via_message_array_codec() {
        let agent = GeminiAgent::new();
        let t = session();
        let format = agent.transcript_format();
        let chunks = format.chunk(&t, 400).unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(format.reassemble(&chunks).unwrap(), t);
    }
}
