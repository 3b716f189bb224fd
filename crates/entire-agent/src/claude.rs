//! Claude Code adapter: JSONL transcripts, hooks configured in
//! `.claude/settings.json`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use entire_core::{Event, EventType, TokenUsage};
use entire_transcript::{ChunkError, CondensedEntry, TranscriptFormat};
use serde_json::Value;

use crate::parse::{content_text, get_field, get_opt_str, get_str, parse_payload};
use crate::{claude_hooks, Agent, HookInstaller, TokenCalculator, TranscriptAnalyzer};

/// Tools whose input names a file the agent writes.
const FILE_WRITE_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];

/// Tool that spawns a subagent.
const SUBAGENT_TOOL: &str = "Task";

const TODO_TOOL: &str = "TodoWrite";

/// Metadata key for the subagent's own transcript path on `SubagentEnd`.
pub const SUBAGENT_TRANSCRIPT_KEY: &str = "subagent_transcript";

#[derive(Debug, Default, Clone, Copy)]
pub struct ClaudeCodeAgent;

impl ClaudeCodeAgent {
    pub fn new() -> Self {
        Self
    }
}

impl Agent for ClaudeCodeAgent {
    fn name(&self) -> &'static str {
        "claude-code"
    }

    fn agent_type(&self) -> &'static str {
        "Claude Code"
    }

    fn parse_hook_event(&self, hook_name: &str, raw_input: &[u8]) -> anyhow::Result<Option<Event>> {
        let Some(payload) = parse_payload(raw_input)? else {
            return Ok(None);
        };
        let session_id = get_str(&payload, "session_id");
        if session_id.is_empty() {
            anyhow::bail!("{hook_name} payload has no session_id");
        }
        let transcript = get_str(&payload, "transcript_path");

        let event_type = match normalize_hook_name(hook_name).as_str() {
            "sessionstart" => EventType::SessionStart,
            "userpromptsubmit" => EventType::TurnStart,
            "stop" => EventType::TurnEnd,
            "precompact" => EventType::Compaction,
            "sessionend" => EventType::SessionEnd,
            "pretooluse" | "posttooluse" => {
                if get_str(&payload, "tool_name") != SUBAGENT_TOOL {
                    return Ok(None);
                }
                if normalize_hook_name(hook_name) == "pretooluse" {
                    EventType::SubagentStart
                } else {
                    EventType::SubagentEnd
                }
            }
            _ => return Ok(None),
        };

        let mut ev = Event::new(event_type, session_id).with_session_ref(transcript);
        match event_type {
            EventType::TurnStart => {
                ev.prompt = get_str(&payload, "prompt");
            }
            EventType::SessionStart => {
                ev.previous_session_id = get_opt_str(&payload, "previous_session_id");
                if let Some(source) = get_opt_str(&payload, "source") {
                    ev.metadata.insert("source".into(), source);
                }
            }
            EventType::SubagentStart | EventType::SubagentEnd => {
                ev.tool_use_id = get_opt_str(&payload, "tool_use_id");
                ev.tool_input = get_field(&payload, "tool_input").cloned();
                if event_type == EventType::SubagentEnd {
                    ev.subagent_id = get_field(&payload, "tool_response")
                        .and_then(|r| get_opt_str(r, "agent_id"));
                    if let Some(path) = ev
                        .subagent_id
                        .as_deref()
                        .and_then(|id| subagent_transcript_path(&ev.session_ref, &ev.session_id, id))
                    {
                        ev.metadata.insert(
                            SUBAGENT_TRANSCRIPT_KEY.into(),
                            path.to_string_lossy().to_string(),
                        );
                    }
                }
            }
            _ => {}
        }
        Ok(Some(ev))
    }

    fn transcript_format(&self) -> TranscriptFormat {
        TranscriptFormat::Jsonl
    }

    fn protected_dirs(&self) -> Vec<String> {
        vec![".claude".to_string()]
    }

    fn as_transcript_analyzer(&self) -> Option<&dyn TranscriptAnalyzer> {
        Some(self)
    }

    fn as_token_calculator(&self) -> Option<&dyn TokenCalculator> {
        Some(self)
    }

    fn as_hook_installer(&self) -> Option<&dyn HookInstaller> {
        Some(self)
    }
}

/// `PostToolUse`, `post-tool-use` and `post_tool_use` all name the same hook.
fn normalize_hook_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Claude writes subagent transcripts next to the parent session:
/// `<dir>/<session>/subagents/agent-<id>.jsonl`.
fn subagent_transcript_path(parent_ref: &str, session_id: &str, agent_id: &str) -> Option<PathBuf> {
    let dir = Path::new(parent_ref).parent()?;
    let path = dir
        .join(session_id)
        .join("subagents")
        .join(format!("agent-{agent_id}.jsonl"));
    path.is_file().then_some(path)
}

fn message_of(record: &Value) -> Option<&Value> {
    record.get("message")
}

fn record_type(record: &Value) -> &str {
    record.get("type").and_then(Value::as_str).unwrap_or("")
}

/// `tool_use` blocks of an assistant record.
fn tool_uses(record: &Value) -> impl Iterator<Item = &Value> {
    message_of(record)
        .filter(|_| record_type(record) == "assistant")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
}

fn tool_file(block: &Value) -> Option<String> {
    let name = block.get("name").and_then(Value::as_str)?;
    if !FILE_WRITE_TOOLS.contains(&name) {
        return None;
    }
    let input = block.get("input")?;
    input
        .get("file_path")
        .or_else(|| input.get("notebook_path"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A user record that only carries tool results is not a prompt.
fn user_prompt(record: &Value) -> Option<String> {
    if record_type(record) != "user" {
        return None;
    }
    let content = message_of(record)?.get("content")?;
    let text = content_text(content);
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl TranscriptAnalyzer for ClaudeCodeAgent {
    fn modified_files(&self, transcript: &[u8], start: usize) -> Result<Vec<String>, ChunkError> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for (_, record) in TranscriptFormat::Jsonl.records_from(transcript, start)? {
            for file in tool_uses(&record).filter_map(tool_file) {
                if seen.insert(file.clone()) {
                    files.push(file);
                }
            }
        }
        Ok(files)
    }

    fn condense(&self, transcript: &[u8], start: usize) -> Result<Vec<CondensedEntry>, ChunkError> {
        let mut out = Vec::new();
        for (_, record) in TranscriptFormat::Jsonl.records_from(transcript, start)? {
            if let Some(prompt) = user_prompt(&record) {
                out.push(CondensedEntry::user(prompt));
                continue;
            }
            if record_type(&record) != "assistant" {
                continue;
            }
            let text = message_of(&record)
                .and_then(|m| m.get("content"))
                .map(content_text)
                .unwrap_or_default();
            if !text.trim().is_empty() {
                out.push(CondensedEntry::assistant(text.trim()));
            }
            for block in tool_uses(&record) {
                let name = block.get("name").and_then(Value::as_str).unwrap_or("tool");
                let detail = block
                    .get("input")
                    .and_then(|i| {
                        i.get("description")
                            .or_else(|| i.get("command"))
                            .or_else(|| i.get("file_path"))
                    })
                    .and_then(Value::as_str)
                    .unwrap_or("");
                out.push(CondensedEntry::tool(
                    name,
                    detail,
                    tool_file(block).into_iter().collect(),
                ));
            }
        }
        Ok(out)
    }

    fn current_todo(&self, transcript: &[u8], start: usize) -> Option<String> {
        let records = TranscriptFormat::Jsonl.records_from(transcript, start).ok()?;
        let last = records
            .iter()
            .flat_map(|(_, r)| tool_uses(r))
            .filter(|b| b.get("name").and_then(Value::as_str) == Some(TODO_TOOL))
            .last()?;
        entire_transcript::current_todo(last.get("input")?)
    }
}

impl TokenCalculator for ClaudeCodeAgent {
    /// Streaming writes one record per content block with the same message
    /// id and usage, so each message id is counted once.
    fn token_usage(&self, transcript: &[u8], start: usize) -> Result<TokenUsage, ChunkError> {
        let mut seen = HashSet::new();
        let mut usage = TokenUsage::default();
        for (_, record) in TranscriptFormat::Jsonl.records_from(transcript, start)? {
            if record_type(&record) != "assistant" {
                continue;
            }
            let Some(msg) = message_of(&record) else {
                continue;
            };
            let Some(u) = msg.get("usage") else {
                continue;
            };
            let id = msg.get("id").and_then(Value::as_str).unwrap_or("");
            if !id.is_empty() && !seen.insert(id.to_string()) {
                continue;
            }
            let count = |key: &str| u.get(key).and_then(Value::as_u64).unwrap_or(0);
            usage.input_tokens += count("input_tokens");
            usage.cache_creation_tokens += count("cache_creation_input_tokens");
            usage.cache_read_tokens += count("cache_read_input_tokens");
            usage.output_tokens += count("output_tokens");
            usage.api_call_count += 1;
        }
        Ok(usage)
    }
}

impl HookInstaller for ClaudeCodeAgent {
    fn install_hooks(&self, repo_root: &Path, command: &str) -> anyhow::Result<usize> {
        claude_hooks::install(repo_root, command)
    }

    fn uninstall_hooks(&self, repo_root: &Path) -> anyhow::Result<()> {
        claude_hooks::uninstall(repo_root)
    }

    fn hooks_installed(&self, repo_root: &Path) -> bool {
        claude_hooks::is_installed(repo_root)
    }
}
