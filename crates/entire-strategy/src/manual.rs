use entire_agent::Agent;
use entire_checkpoint::{write_snapshot, SnapshotRequest};
use entire_core::{CheckpointId, Event, StrategyKind};
use entire_store::SessionState;

use crate::condense::{session_files, turn_subject};
use crate::{CommitStrategy, Repo};

/// The user's commits are the checkpoints. Turn boundaries only record a
/// temporary snapshot on the shadow ref so the turn can be rewound before
/// anything is committed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualCommitStrategy;

impl CommitStrategy for ManualCommitStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ManualCommit
    }

    fn on_turn_boundary(
        &self,
        repo: &Repo,
        _agent: &dyn Agent,
        state: &mut SessionState,
        event: &Event,
    ) -> anyhow::Result<Option<CheckpointId>> {
        let files = session_files(repo, state)?;
        if files.is_empty() || state.base_commit.is_empty() {
            return Ok(None);
        }
        let subject = turn_subject(state);
        let snapshot = write_snapshot(
            repo.git(),
            &SnapshotRequest {
                base_commit: &state.base_commit,
                session_id: &state.session_id,
                files: &files,
                subject: &subject,
                checkpoint_id: None,
            },
        )?;
        tracing::debug!(
            session_id = %state.session_id,
            event = event.event_type.as_str(),
            commit = %snapshot.commit,
            created = snapshot.created,
            "temporary snapshot"
        );
        Ok(None)
    }
}
