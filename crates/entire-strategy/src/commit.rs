//! Git commit hooks.
//!
//! `prepare-commit-msg` decides whether the commit carries a checkpoint
//! trailer and remembers the decision on the session, `commit-msg` keeps a
//! trailer from turning an empty message into a commit, and `post-commit`
//! condenses the checkpoint once the commit exists.

use std::fs;
use std::path::Path;

use anyhow::Context;
use entire_checkpoint::delete_shadow_ref;
use entire_core::{
    append_trailer, is_trailer_only, parse_checkpoint_trailer, strip_trailer, CheckpointId,
    CHECKPOINT_TRAILER,
};
use entire_store::{PendingCheckpoint, SessionState};

use crate::condense::{condense, session_files, CondenseRequest};
use crate::{CommitStrategy, Repo};

/// `prepare-commit-msg` sources that never get a trailer.
pub const COMMIT_SOURCES_SKIPPED: &[&str] = &["merge", "squash"];

/// What is known about a commit while its message is being prepared.
#[derive(Debug, Clone, Default)]
pub struct CommitContext {
    /// A terminal is attached, so a person is likely committing.
    pub interactive: bool,
    pub staged_files: Vec<String>,
    /// Source argument git passes to `prepare-commit-msg`.
    pub source: Option<String>,
}

/// Shared trailer decision for one session.
///
/// An active session committing without a terminal is the agent itself and
/// always qualifies. Otherwise at least one staged file must be either
/// modified in the transcript since the watermark or already tracked in the
/// session's `files_touched` (its own or its subagents'). Tracked files count
/// so that work recorded before the watermark still links to the commit
/// that finally lands it.
pub(crate) fn evaluate(
    repo: &Repo,
    commit: &CommitContext,
    state: &SessionState,
) -> anyhow::Result<Option<Vec<String>>> {
    let staged = &commit.staged_files;
    if staged.is_empty() {
        return Ok(None);
    }
    let tracked = session_files(repo, state)?;

    if state.is_active() && !commit.interactive {
        tracing::debug!(session_id = %state.session_id, "agent commit during an active turn");
        return Ok(Some(checkpoint_files(&tracked, &[], staged)));
    }

    let Some(agent) = repo.agent_for(state) else {
        tracing::debug!(session_id = %state.session_id, agent_type = %state.agent_type, "no adapter for session");
        return Ok(None);
    };
    let Some(transcript) = repo.transcript(agent.as_ref(), &state.transcript_ref)? else {
        tracing::debug!(session_id = %state.session_id, "no transcript, commit left alone");
        return Ok(None);
    };
    let Some(analyzer) = agent.as_transcript_analyzer() else {
        return Ok(None);
    };
    let modified = repo.relative_paths(
        analyzer.modified_files(&transcript, state.checkpoint_transcript_start)?,
    );

    let overlaps = modified
        .iter()
        .chain(tracked.iter())
        .any(|f| staged.contains(f));
    if !overlaps {
        tracing::debug!(session_id = %state.session_id, "commit does not touch agent files");
        return Ok(None);
    }
    Ok(Some(checkpoint_files(&tracked, &modified, staged)))
}

/// Staged files stand in when the session has nothing tracked yet.
fn checkpoint_files(tracked: &[String], modified: &[String], staged: &[String]) -> Vec<String> {
    if tracked.is_empty() {
        return staged.to_vec();
    }
    let mut files = tracked.to_vec();
    for f in modified {
        if !files.contains(f) {
            files.push(f.clone());
        }
    }
    files
}

fn read_message(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading commit message {}", path.display()))
}

fn write_message(path: &Path, message: &str) -> anyhow::Result<()> {
    fs::write(path, message).with_context(|| format!("writing commit message {}", path.display()))
}

/// Attach a checkpoint trailer when a session in this worktree qualifies.
/// The most recently active qualifying session wins.
pub(crate) fn prepare_commit_msg(
    repo: &Repo,
    strategy: &dyn CommitStrategy,
    msg_file: &Path,
    source: Option<&str>,
    interactive: bool,
) -> anyhow::Result<Option<CheckpointId>> {
    if source.is_some_and(|s| COMMIT_SOURCES_SKIPPED.contains(&s)) {
        tracing::debug!(source, "skipping trailer for this commit source");
        return Ok(None);
    }
    let message = read_message(msg_file)?;
    let existing = parse_checkpoint_trailer(&message);
    if let Some(id) = &existing {
        if repo.checkpoints().exists(id)? {
            tracing::debug!(checkpoint_id = %id, "message already points at a stored checkpoint");
            return Ok(None);
        }
    }

    let commit = CommitContext {
        interactive,
        staged_files: repo.git().staged_files()?,
        source: source.map(str::to_string),
    };
    let mut candidates: Vec<SessionState> = repo
        .sessions_here()?
        .into_iter()
        .filter(|s| !s.is_subagent())
        .collect();
    candidates.sort_by(|a, b| b.last_interaction_time.cmp(&a.last_interaction_time));

    for mut state in candidates {
        let Some(files) = strategy.on_commit(repo, &commit, &state)? else {
            continue;
        };
        let id = match &existing {
            Some(id) => id.clone(),
            None => {
                let id = CheckpointId::generate();
                write_message(msg_file, &append_trailer(&message, CHECKPOINT_TRAILER, id.as_str()))?;
                id
            }
        };
        state.pending_checkpoint = Some(PendingCheckpoint {
            checkpoint_id: id.clone(),
            files,
        });
        repo.sessions().save(&state)?;
        tracing::info!(session_id = %state.session_id, checkpoint_id = %id, "trailer attached");
        return Ok(Some(id));
    }
    Ok(None)
}

/// Drop a trailer that is all the message holds, so git aborts the commit
/// as empty instead of committing the trailer as its message.
pub(crate) fn commit_msg(msg_file: &Path) -> anyhow::Result<bool> {
    let message = read_message(msg_file)?;
    if parse_checkpoint_trailer(&message).is_none() || !is_trailer_only(&message) {
        return Ok(false);
    }
    write_message(msg_file, &strip_trailer(&message, CHECKPOINT_TRAILER))?;
    tracing::debug!("stripped trailer from empty commit message");
    Ok(true)
}

/// Condense the checkpoint `HEAD` points at and move the session onto `HEAD`.
///
/// Pending decisions that did not make it into the commit (trailer removed
/// in the editor, commit aborted earlier) are discarded.
pub(crate) fn post_commit(
    repo: &Repo,
    strategy: &dyn CommitStrategy,
) -> anyhow::Result<Option<CheckpointId>> {
    let Some(head) = repo.git().head()? else {
        return Ok(None);
    };
    let commit = repo.git().commit_info(&head)?;
    let trailer = parse_checkpoint_trailer(&commit.message);

    let mut condensed: Option<CheckpointId> = None;
    for mut state in repo.sessions_here()? {
        let Some(pending) = state.pending_checkpoint.take() else {
            continue;
        };
        if trailer.as_ref() != Some(&pending.checkpoint_id) || condensed.is_some() {
            tracing::debug!(
                session_id = %state.session_id,
                checkpoint_id = %pending.checkpoint_id,
                "discarding pending checkpoint not in HEAD"
            );
            repo.sessions().save(&state)?;
            continue;
        }

        let agent = repo.agent_for(&state);
        let old_base = state.base_commit.clone();
        condense(
            repo,
            agent.as_deref(),
            &mut state,
            CondenseRequest {
                checkpoint_id: pending.checkpoint_id.clone(),
                snapshot_commit: &head,
                files: pending.files,
                strategy: strategy.kind(),
            },
        )?;
        state.files_touched.clear();
        state.base_commit = head.clone();
        repo.sessions().save(&state)?;
        release_shadow_ref(repo, &old_base, &head)?;
        condensed = Some(pending.checkpoint_id);
    }
    Ok(condensed)
}

/// Delete the shadow ref of `old_base` unless another session still builds on it.
fn release_shadow_ref(repo: &Repo, old_base: &str, head: &str) -> anyhow::Result<()> {
    if old_base.is_empty() || old_base == head {
        return Ok(());
    }
    let still_used = repo
        .sessions()
        .list()?
        .iter()
        .any(|s| s.base_commit == old_base);
    if !still_used {
        delete_shadow_ref(repo.git(), old_base)?;
        tracing::debug!(base = %old_base, "shadow ref released");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use entire_core::{trailer_value, EventType, StrategyKind};
    use entire_store::SessionPhase;

    #[test]
    fn checkpoint_files_fall_back_to_staged() {
        let staged = vec!["a".to_string(), "b".to_string()];
        assert_eq!(checkpoint_files(&[], &["a".into()], &staged), staged);
        assert_eq!(
            checkpoint_files(&["c".into()], &["a".into(), "c".into()], &staged),
            vec!["c".to_string(), "a".to_string()]
        );
    }

    #[test]
    fn overlapping_commit_gets_trailer_and_unrelated_one_does_not() {
        let fx = Fixture::new(StrategyKind::ManualCommit);
        fx.start_turn("s1", "add a");
        fx.write("src/a.rs", "fn a() {}\n");
        fx.append_transcript("s1", &[user("add a"), write_tool("m1", &fx.abs("src/a.rs"))]);
        fx.emit(EventType::TurnEnd, "s1");

        fx.write("notes.txt", "mine\n");
        fx.stage(&["notes.txt"]);
        let msg = fx.message_file("Notes\n");
        assert!(fx.engine.prepare_commit_msg(&msg, Some("message"), true).unwrap().is_none());
        assert!(!fs::read_to_string(&msg).unwrap().contains(CHECKPOINT_TRAILER));
        fx.commit(&msg);
        assert!(fx.engine.post_commit().unwrap().is_none());

        fx.stage(&["src/a.rs"]);
        let msg = fx.message_file("Add a\n");
        let id = fx.engine.prepare_commit_msg(&msg, Some("message"), true).unwrap().unwrap();
        let text = fs::read_to_string(&msg).unwrap();
        assert_eq!(trailer_value(&text, CHECKPOINT_TRAILER).as_deref(), Some(id.as_str()));

        let head = fx.commit(&msg);
        assert_eq!(fx.engine.post_commit().unwrap(), Some(id.clone()));

        let meta = fx.repo().checkpoints().read_metadata(&id).unwrap();
        assert_eq!(meta.files_touched, vec!["src/a.rs".to_string()]);
        assert_eq!(meta.snapshot_commit, head);
        assert_eq!(meta.strategy, StrategyKind::ManualCommit);
        assert_eq!(meta.transcript_start, 0);
        assert_eq!(meta.transcript_end, 2);

        let state = fx.state("s1");
        assert!(state.files_touched.is_empty());
        assert!(state.pending_checkpoint.is_none());
        assert_eq!(state.base_commit, head);
        assert_eq!(state.checkpoint_transcript_start, 2);
        assert_eq!(state.last_checkpoint_id, Some(id));
    }

    #[test]
    fn tracked_file_overlap_qualifies_without_new_transcript_edits() {
        let fx = Fixture::new(StrategyKind::ManualCommit);
        fx.start_turn("s1", "add a");
        fx.write("src/a.rs", "fn a() {}\n");
        fx.append_transcript("s1", &[user("add a"), write_tool("m1", &fx.abs("src/a.rs"))]);
        fx.emit(EventType::TurnEnd, "s1");

        let mut state = fx.state("s1");
        state.advance_transcript_start(2);
        fx.repo().sessions().save(&state).unwrap();

        fx.stage(&["src/a.rs"]);
        let msg = fx.message_file("Add a\n");
        let id = fx.engine.prepare_commit_msg(&msg, Some("message"), true).unwrap();
        assert!(id.is_some());
        assert_eq!(
            fx.state("s1").pending_checkpoint.unwrap().files,
            vec!["src/a.rs".to_string()]
        );
    }

    #[test]
    fn active_agent_commit_without_terminal_always_gets_trailer() {
        let fx = Fixture::new(StrategyKind::ManualCommit);
        fx.start_turn("s1", "commit it");
        fx.append_transcript("s1", &[user("commit it")]);
        fx.write("other.txt", "x\n");
        fx.stage(&["other.txt"]);

        let msg = fx.message_file("Interactive\n");
        assert!(fx.engine.prepare_commit_msg(&msg, None, true).unwrap().is_none());

        let msg = fx.message_file("Agent commit\n");
        let id = fx.engine.prepare_commit_msg(&msg, None, false).unwrap();
        assert!(id.is_some());
        let state = fx.state("s1");
        assert_eq!(state.phase, SessionPhase::Active);
        assert_eq!(
            state.pending_checkpoint.unwrap().files,
            vec!["other.txt".to_string()]
        );
    }

    #[test]
    fn empty_files_touched_records_exactly_the_staged_files() {
        let fx = Fixture::new(StrategyKind::ManualCommit);
        fx.start_turn("s1", "write a");
        fx.write("src/a.rs", "fn a() {}\n");
        fx.write("b.txt", "user file\n");
        fx.append_transcript("s1", &[user("write a"), write_tool("m1", &fx.abs("src/a.rs"))]);
        assert!(fx.state("s1").files_touched.is_empty());

        fx.stage(&["src/a.rs", "b.txt"]);
        let staged = fx.repo().git().staged_files().unwrap();
        let msg = fx.message_file("Both\n");
        let id = fx.engine.prepare_commit_msg(&msg, None, true).unwrap().unwrap();
        fx.commit(&msg);
        fx.engine.post_commit().unwrap();

        let meta = fx.repo().checkpoints().read_metadata(&id).unwrap();
        assert_eq!(meta.files_touched, staged);
    }

    #[test]
    fn missing_transcript_means_no_trailer() {
        let fx = Fixture::new(StrategyKind::ManualCommit);
        fx.emit(EventType::SessionStart, "s1");
        let mut state = fx.state("s1");
        state.add_files_touched(["a.txt"]);
        fx.repo().sessions().save(&state).unwrap();

        fx.write("a.txt", "x\n");
        fx.stage(&["a.txt"]);
        let msg = fx.message_file("No evidence\n");
        assert!(fx.engine.prepare_commit_msg(&msg, None, true).unwrap().is_none());
    }

    #[test]
    fn most_recent_qualifying_session_wins() {
        let fx = Fixture::new(StrategyKind::ManualCommit);
        for (sid, msg_id) in [("older", "m1"), ("newer", "m2")] {
            fx.start_turn(sid, "edit a");
            fx.append_transcript(sid, &[user("edit a"), write_tool(msg_id, &fx.abs("a.txt"))]);
            fx.emit(EventType::TurnEnd, sid);
        }
        let mut older = fx.state("older");
        older.last_interaction_time = Some(entire_core::now_utc() - time::Duration::minutes(5));
        fx.repo().sessions().save(&older).unwrap();

        fx.write("a.txt", "x\n");
        fx.stage(&["a.txt"]);
        let msg = fx.message_file("Edit a\n");
        let id = fx.engine.prepare_commit_msg(&msg, None, true).unwrap().unwrap();
        assert_eq!(fx.state("newer").pending_checkpoint.unwrap().checkpoint_id, id);
        assert!(fx.state("older").pending_checkpoint.is_none());
    }

    #[test]
    fn merge_and_squash_are_skipped_and_existing_trailer_is_kept() {
        let fx = Fixture::new(StrategyKind::ManualCommit);
        fx.start_turn("s1", "go");
        fx.write("a.txt", "x\n");
        fx.stage(&["a.txt"]);

        let msg = fx.message_file("Merge branch\n");
        assert!(fx.engine.prepare_commit_msg(&msg, Some("merge"), false).unwrap().is_none());
        assert!(fx.engine.prepare_commit_msg(&msg, Some("squash"), false).unwrap().is_none());

        let msg = fx.message_file("Mine\n\nEntire-Checkpoint: 0123456789ab\n");
        let id = fx.engine.prepare_commit_msg(&msg, None, false).unwrap().unwrap();
        assert_eq!(id.as_str(), "0123456789ab");
        let text = fs::read_to_string(&msg).unwrap();
        assert_eq!(text.matches(CHECKPOINT_TRAILER).count(), 1);
    }

    #[test]
    fn trailer_only_message_is_emptied() {
        let fx = Fixture::new(StrategyKind::ManualCommit);
        let msg = fx.message_file("\n\nEntire-Checkpoint: 0123456789ab\n# Please enter a message\n");
        assert!(commit_msg(&msg).unwrap());
        let text = fs::read_to_string(&msg).unwrap();
        assert!(!text.contains(CHECKPOINT_TRAILER));

        let msg = fx.message_file("Real subject\n\nEntire-Checkpoint: 0123456789ab\n");
        assert!(!commit_msg(&msg).unwrap());
    }

    #[test]
    fn pending_checkpoint_missing_from_head_is_discarded() {
        let fx = Fixture::new(StrategyKind::ManualCommit);
        fx.start_turn("s1", "edit a");
        fx.write("a.txt", "x\n");
        fx.append_transcript("s1", &[user("edit a"), write_tool("m1", &fx.abs("a.txt"))]);
        fx.stage(&["a.txt"]);
        let msg = fx.message_file("Edit a\n");
        let id = fx.engine.prepare_commit_msg(&msg, None, true).unwrap().unwrap();

        // The user deleted the trailer in the editor.
        fs::write(&msg, "Edit a\n").unwrap();
        fx.commit(&msg);
        assert!(fx.engine.post_commit().unwrap().is_none());
        assert!(fx.state("s1").pending_checkpoint.is_none());
        assert!(!fx.repo().checkpoints().exists(&id).unwrap());
    }
}
