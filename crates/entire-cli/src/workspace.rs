use std::path::Path;

use anyhow::Context;
use entire_agent::AgentRegistry;
use entire_checkpoint::{CheckpointStore, Git};
use entire_store::{sessions_dir, EntirePaths, SessionStore};
use entire_strategy::{Engine, Repo};

use crate::settings::Settings;

/// The repository a command runs in, with its settings resolved.
pub struct Workspace {
    pub git: Git,
    pub paths: EntirePaths,
    pub settings: Settings,
    pub registry: AgentRegistry,
}

impl Workspace {
    pub fn discover(cwd: &Path) -> anyhow::Result<Self> {
        let git = Git::discover(cwd).context("not inside a git repository")?;
        let paths = EntirePaths::discover(git.workdir());
        let settings = Settings::load(&paths)?;
        Ok(Self {
            git,
            paths,
            settings,
            registry: AgentRegistry::builtin(),
        })
    }

    pub fn engine(&self) -> anyhow::Result<Engine> {
        let sessions = SessionStore::new(sessions_dir(&self.git.common_dir()?));
        let checkpoints = CheckpointStore::new(self.git.clone())
            .with_max_chunk_bytes(self.settings.max_chunk_bytes());
        let repo = Repo::new(self.git.clone(), sessions, checkpoints, self.registry.clone());
        Ok(Engine::new(repo, self.settings.strategy))
    }

    pub fn require_enabled(&self) -> anyhow::Result<()> {
        if !self.settings.enabled {
            anyhow::bail!("Entire is not enabled in this repository. Run `entire enable` first.");
        }
        Ok(())
    }
}
