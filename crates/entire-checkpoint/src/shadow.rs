//! Shadow snapshots: commits recording the agent's working-tree state on a
//! per-base ref, so temporary rewind points exist before the user commits.

use std::path::Path;

use entire_core::trailer::{format_trailer, CHECKPOINT_TRAILER, SESSION_TRAILER};
use entire_core::CheckpointId;

use crate::git::{file_mode, Git, TreeEdit};
use crate::{backoff, CheckpointError, MAX_REF_ATTEMPTS};

pub const SHADOW_REF_PREFIX: &str = "refs/entire/shadow/";

/// Hex characters of the base commit kept in the shadow ref name.
const BASE_PREFIX_LEN: usize = 12;

/// Shadow ref for snapshots taken on top of `base_commit`.
pub fn shadow_ref_name(base_commit: &str) -> String {
    let end = base_commit.len().min(BASE_PREFIX_LEN);
    format!("{SHADOW_REF_PREFIX}{}", &base_commit[..end])
}

#[derive(Debug, Clone)]
pub struct SnapshotRequest<'a> {
    pub base_commit: &'a str,
    pub session_id: &'a str,
    /// Repo-relative paths to record as they are in the working tree now.
    pub files: &'a [String],
    pub subject: &'a str,
    /// Set when the snapshot backs a permanent checkpoint.
    pub checkpoint_id: Option<&'a CheckpointId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub commit: String,
    /// `false` when nothing changed and the existing tip was reused.
    pub created: bool,
}

/// Working-tree state of `files` as tree edits. Missing files become removals.
fn working_tree_edits(git: &Git, files: &[String]) -> Result<Vec<TreeEdit>, CheckpointError> {
    let mut edits = Vec::with_capacity(files.len());
    for path in files {
        let full = git.workdir().join(path);
        match full.symlink_metadata() {
            Ok(meta) if meta.is_dir() => continue,
            Ok(_) => {
                let mode = file_mode(&full).map_err(|source| io_err(&full, source))?;
                let oid = if mode == "120000" {
                    let target = std::fs::read_link(&full).map_err(|source| io_err(&full, source))?;
                    git.hash_object(target.to_string_lossy().as_bytes())?
                } else {
                    git.hash_file(&full)?
                };
                edits.push(TreeEdit::Upsert {
                    path: path.clone(),
                    mode: mode.to_string(),
                    oid,
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                edits.push(TreeEdit::Remove { path: path.clone() });
            }
            Err(source) => return Err(io_err(&full, source)),
        }
    }
    Ok(edits)
}

fn io_err(path: &Path, source: std::io::Error) -> CheckpointError {
    CheckpointError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn snapshot_message(req: &SnapshotRequest<'_>) -> String {
    let subject = req.subject.lines().next().unwrap_or("").trim();
    let subject = if subject.is_empty() { "Agent snapshot" } else { subject };
    let mut msg = format!("{subject}\n\n{}\n", format_trailer(SESSION_TRAILER, req.session_id));
    if let Some(id) = req.checkpoint_id {
        msg.push_str(&format_trailer(CHECKPOINT_TRAILER, id.as_str()));
        msg.push('\n');
    }
    msg
}

/// Record `req.files` on the shadow ref for `req.base_commit`.
///
/// The first snapshot is parented on the base commit, later ones on the
/// previous snapshot. A lost race re-reads the tip and rebuilds on it.
pub fn write_snapshot(git: &Git, req: &SnapshotRequest<'_>) -> Result<Snapshot, CheckpointError> {
    let ref_name = shadow_ref_name(req.base_commit);
    let edits = working_tree_edits(git, req.files)?;
    let message = snapshot_message(req);

    for attempt in 1..=MAX_REF_ATTEMPTS {
        let tip = git.ref_tip(&ref_name)?;
        let parent = tip.as_deref().unwrap_or(req.base_commit);
        let parent_tree = git.tree_of(parent)?;
        let tree = git.build_tree(Some(&parent_tree), &edits)?;

        if tree == parent_tree && req.checkpoint_id.is_none() {
            if let Some(tip) = &tip {
                tracing::debug!(ref_name = %ref_name, "snapshot unchanged, reusing tip");
                return Ok(Snapshot {
                    commit: tip.clone(),
                    created: false,
                });
            }
        }

        let commit = git.commit_tree(&tree, &[parent], &message)?;
        if git.update_ref(&ref_name, &commit, tip.as_deref())? {
            tracing::debug!(
                ref_name = %ref_name,
                commit = %commit,
                session_id = req.session_id,
                "shadow snapshot"
            );
            return Ok(Snapshot {
                commit,
                created: true,
            });
        }
        tracing::debug!(ref_name = %ref_name, attempt, "shadow ref moved, retrying");
        backoff(attempt);
    }
    Err(CheckpointError::CasExhausted {
        ref_name,
        attempts: MAX_REF_ATTEMPTS,
    })
}

/// Every shadow ref as `(ref name, tip, base prefix)`.
pub fn list_shadow_refs(git: &Git) -> Result<Vec<(String, String, String)>, CheckpointError> {
    Ok(git
        .refs_with_prefix(SHADOW_REF_PREFIX)?
        .into_iter()
        .filter_map(|(name, tip)| {
            let base = name.strip_prefix(SHADOW_REF_PREFIX)?.to_string();
            Some((name, tip, base))
        })
        .collect())
}

/// Drop the shadow ref for `base_commit`, if any.
pub fn delete_shadow_ref(git: &Git, base_commit: &str) -> Result<(), CheckpointError> {
    let name = shadow_ref_name(base_commit);
    if git.ref_tip(&name)?.is_some() {
        git.delete_ref(&name)?;
    }
    Ok(())
}
