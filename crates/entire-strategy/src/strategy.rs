use entire_agent::Agent;
use entire_checkpoint::Snapshot;
use entire_core::{CheckpointId, Event, StrategyKind};
use entire_store::SessionState;

use crate::commit::{self, CommitContext};
use crate::{AutoCommitStrategy, ManualCommitStrategy, Repo};

/// When checkpoints are captured and which commits point at them.
pub trait CommitStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Called on `TurnEnd` and `Compaction`, after the turn's modified files
    /// have been merged into `state.files_touched`. Returns the permanent
    /// checkpoint written, if any.
    fn on_turn_boundary(
        &self,
        repo: &Repo,
        agent: &dyn Agent,
        state: &mut SessionState,
        event: &Event,
    ) -> anyhow::Result<Option<CheckpointId>>;

    /// Files a commit's checkpoint should record, or `None` when the commit
    /// must not carry a trailer for this session.
    fn on_commit(
        &self,
        repo: &Repo,
        commit: &CommitContext,
        state: &SessionState,
    ) -> anyhow::Result<Option<Vec<String>>> {
        commit::evaluate(repo, commit, state)
    }

    /// Called when a subagent finishes with `files` modified.
    fn on_subagent_end(
        &self,
        _repo: &Repo,
        _parent: &SessionState,
        _files: &[String],
        _subject: &str,
    ) -> anyhow::Result<Option<Snapshot>> {
        Ok(None)
    }
}

pub fn strategy_for(kind: StrategyKind) -> Box<dyn CommitStrategy> {
    match kind {
        StrategyKind::ManualCommit => Box::new(ManualCommitStrategy),
        StrategyKind::AutoCommit => Box::new(AutoCommitStrategy),
    }
}
