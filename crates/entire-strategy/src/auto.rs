use entire_agent::Agent;
use entire_checkpoint::{write_snapshot, Snapshot, SnapshotRequest};
use entire_core::{CheckpointId, Event, StrategyKind};
use entire_store::SessionState;

use crate::condense::{condense, session_files, turn_subject, CondenseRequest};
use crate::{CommitStrategy, Repo};

/// Every turn boundary with file changes becomes a permanent checkpoint,
/// committed to the shadow ref of the current `HEAD`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoCommitStrategy;

impl CommitStrategy for AutoCommitStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AutoCommit
    }

    fn on_turn_boundary(
        &self,
        repo: &Repo,
        agent: &dyn Agent,
        state: &mut SessionState,
        event: &Event,
    ) -> anyhow::Result<Option<CheckpointId>> {
        if let Some(head) = repo.git().head()? {
            if head != state.base_commit {
                tracing::debug!(session_id = %state.session_id, base = %head, "session rebased onto HEAD");
                state.base_commit = head;
            }
        }
        let files = session_files(repo, state)?;
        if files.is_empty() || state.base_commit.is_empty() {
            return Ok(None);
        }

        let id = CheckpointId::generate();
        let subject = turn_subject(state);
        let snapshot = write_snapshot(
            repo.git(),
            &SnapshotRequest {
                base_commit: &state.base_commit,
                session_id: &state.session_id,
                files: &files,
                subject: &subject,
                checkpoint_id: Some(&id),
            },
        )?;
        condense(
            repo,
            Some(agent),
            state,
            CondenseRequest {
                checkpoint_id: id.clone(),
                snapshot_commit: &snapshot.commit,
                files,
                strategy: StrategyKind::AutoCommit,
            },
        )?;
        state.files_touched.clear();
        tracing::debug!(
            session_id = %state.session_id,
            checkpoint_id = %id,
            event = event.event_type.as_str(),
            "turn committed"
        );
        Ok(Some(id))
    }

    fn on_subagent_end(
        &self,
        repo: &Repo,
        parent: &SessionState,
        files: &[String],
        subject: &str,
    ) -> anyhow::Result<Option<Snapshot>> {
        if files.is_empty() || parent.base_commit.is_empty() {
            return Ok(None);
        }
        let snapshot = write_snapshot(
            repo.git(),
            &SnapshotRequest {
                base_commit: &parent.base_commit,
                session_id: &parent.session_id,
                files,
                subject,
                checkpoint_id: None,
            },
        )?;
        Ok(Some(snapshot))
    }
}
