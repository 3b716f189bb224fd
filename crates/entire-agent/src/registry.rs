use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{Agent, ClaudeCodeAgent, GeminiAgent};

/// Directories no rewind may touch regardless of which agents are registered.
const ALWAYS_PROTECTED: &[&str] = &[".git", ".entire"];

/// Name → adapter lookup, built once at startup and passed to whoever needs it.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<&'static str, Arc<dyn Agent>>,
}

impl AgentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every adapter shipped in this crate.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(ClaudeCodeAgent::new()));
        reg.register(Arc::new(GeminiAgent::new()));
        reg
    }

    /// Add an adapter, replacing one registered under the same name.
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.name(), agent);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    /// Look up by the agent type recorded in session state.
    pub fn get_by_type(&self, agent_type: &str) -> Option<Arc<dyn Agent>> {
        self.agents
            .values()
            .find(|a| a.agent_type() == agent_type)
            .cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.agents.keys().copied().collect()
    }

    /// Union of every adapter's protected directories plus the tool's own.
    pub fn protected_dirs(&self) -> Vec<String> {
        let mut dirs: Vec<String> = ALWAYS_PROTECTED.iter().map(|d| d.to_string()).collect();
        for agent in self.agents.values() {
            for dir in agent.protected_dirs() {
                let dir = dir.trim_end_matches('/').to_string();
                if !dir.is_empty() && !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
        dirs
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.names())
            .finish()
    }
}
