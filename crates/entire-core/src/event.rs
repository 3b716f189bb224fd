use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Normalized lifecycle occurrences produced by agent adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    SessionStart,
    TurnStart,
    TurnEnd,
    Compaction,
    SessionEnd,
    SubagentStart,
    SubagentEnd,
}

impl EventType {
    /// Events after which the transcript may be condensed into a checkpoint.
    pub fn is_turn_boundary(&self) -> bool {
        matches!(self, EventType::TurnEnd | EventType::Compaction)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SessionStart => "SessionStart",
            EventType::TurnStart => "TurnStart",
            EventType::TurnEnd => "TurnEnd",
            EventType::Compaction => "Compaction",
            EventType::SessionEnd => "SessionEnd",
            EventType::SubagentStart => "SubagentStart",
            EventType::SubagentEnd => "SubagentEnd",
        }
    }
}

/// One normalized hook invocation. Produced once by an adapter, consumed once
/// by the strategy engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_session_id: Option<String>,
    /// Opaque pointer to the native transcript (a path for file-backed agents).
    #[serde(default)]
    pub session_ref: String,
    /// User prompt, set on `TurnStart`.
    #[serde(default)]
    pub prompt: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Event {
    pub fn new(event_type: EventType, session_id: impl Into<String>) -> Self {
        Self {
            event_type,
            session_id: session_id.into(),
            previous_session_id: None,
            session_ref: String::new(),
            prompt: String::new(),
            timestamp: OffsetDateTime::now_utc(),
            tool_use_id: None,
            subagent_id: None,
            tool_input: None,
            response_message: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_session_ref(mut self, session_ref: impl Into<String>) -> Self {
        self.session_ref = session_ref.into();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Key under which a subagent's own state record is stored.
    /// The tool use id is preferred: agents report it on both the start and
    /// the end hook, while the subagent id is often only known at the end.
    pub fn subagent_key(&self) -> Option<String> {
        let sub = self
            .tool_use_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.subagent_id.as_deref().filter(|s| !s.is_empty()))?;
        Some(format!("{}--{}", self.session_id, sub))
    }
}
