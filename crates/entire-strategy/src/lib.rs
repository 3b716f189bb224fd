//! Session lifecycle and commit strategies.
//!
//! [`Engine`] consumes normalized agent events and git hook invocations,
//! keeps per-session state current, and decides when a checkpoint is
//! captured. Which commits carry a checkpoint is up to the configured
//! [`CommitStrategy`].

mod auto;
mod commit;
mod condense;
mod lifecycle;
mod manual;
mod strategy;

#[cfg(test)]
mod test_support;

pub use auto::AutoCommitStrategy;
pub use commit::{CommitContext, COMMIT_SOURCES_SKIPPED};
pub use lifecycle::Engine;
pub use manual::ManualCommitStrategy;
pub use strategy::{strategy_for, CommitStrategy};

use std::path::Path;
use std::sync::Arc;

use entire_agent::{Agent, AgentRegistry};
use entire_checkpoint::{CheckpointStore, Git, RewindEngine};
use entire_store::{SessionState, SessionStore};

/// Everything a strategy touches in one repository.
#[derive(Debug, Clone)]
pub struct Repo {
    git: Git,
    sessions: SessionStore,
    checkpoints: CheckpointStore,
    registry: AgentRegistry,
}

impl Repo {
    pub fn new(
        git: Git,
        sessions: SessionStore,
        checkpoints: CheckpointStore,
        registry: AgentRegistry,
    ) -> Self {
        Self {
            git,
            sessions,
            checkpoints,
            registry,
        }
    }

    /// Session state under the git common dir, checkpoints on the default ref.
    pub fn open(git: Git, registry: AgentRegistry) -> anyhow::Result<Self> {
        let sessions = SessionStore::new(entire_store::sessions_dir(&git.common_dir()?));
        let checkpoints = CheckpointStore::new(git.clone());
        Ok(Self::new(git, sessions, checkpoints, registry))
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Adapter that produced `state`, looked up by its recorded agent type.
    pub fn agent_for(&self, state: &SessionState) -> Option<Arc<dyn Agent>> {
        self.registry.get_by_type(&state.agent_type)
    }

    pub fn rewind_engine(&self) -> RewindEngine {
        RewindEngine::new(self.checkpoints.clone(), self.registry.protected_dirs())
    }

    /// Sessions recorded for this worktree. Records without a worktree match
    /// every worktree.
    pub fn sessions_here(&self) -> anyhow::Result<Vec<SessionState>> {
        Ok(self
            .sessions
            .list()?
            .into_iter()
            .filter(|s| self.is_this_worktree(s))
            .collect())
    }

    fn is_this_worktree(&self, state: &SessionState) -> bool {
        if state.worktree_path.is_empty() {
            return true;
        }
        let recorded = Path::new(&state.worktree_path);
        let here = self.git.workdir();
        if recorded == here {
            return true;
        }
        match (recorded.canonicalize(), here.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    /// Read the session's transcript. A transcript that does not exist yet is
    /// `None`, not an error.
    pub fn transcript(&self, agent: &dyn Agent, session_ref: &str) -> anyhow::Result<Option<Vec<u8>>> {
        if let Err(e) = agent.prepare_transcript(session_ref) {
            if e.is_absent() {
                return Ok(None);
            }
            tracing::warn!(session_ref, error = %e, "transcript preparation failed, reading as is");
        }
        match agent.read_transcript(session_ref) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.is_absent() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Agent-reported paths as repo-relative paths; outside paths are dropped.
    pub(crate) fn relative_paths(&self, paths: Vec<String>) -> Vec<String> {
        paths
            .iter()
            .filter_map(|p| entire_agent::repo_relative(p, self.git.workdir()))
            .collect()
    }
}
