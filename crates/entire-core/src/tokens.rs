use serde::{Deserialize, Serialize};

/// Token accounting for a session, with subagent usage nested one level down
/// per generation of subagents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    /// Number of model calls. Not a token count.
    #[serde(default)]
    pub api_call_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_tokens: Option<Box<TokenUsage>>,
}

impl TokenUsage {
    /// Tokens recorded at this level only.
    pub fn own_tokens(&self) -> u64 {
        self.input_tokens + self.cache_creation_tokens + self.cache_read_tokens + self.output_tokens
    }

    /// Tokens across this level and every nested subagent level.
    pub fn total_tokens(&self) -> u64 {
        self.own_tokens()
            + self
                .subagent_tokens
                .as_ref()
                .map(|s| s.total_tokens())
                .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens() == 0 && self.api_call_count == 0
    }

    /// Accumulate `other` into `self`, level by level.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.output_tokens += other.output_tokens;
        self.api_call_count += other.api_call_count;
        if let Some(theirs) = &other.subagent_tokens {
            self.subagent_tokens
                .get_or_insert_with(Default::default)
                .add(theirs);
        }
    }

    /// Fold a subagent's usage (including its own nested subagents) one level down.
    pub fn add_subagent(&mut self, sub: &TokenUsage) {
        self.subagent_tokens
            .get_or_insert_with(Default::default)
            .add(sub);
    }
}
