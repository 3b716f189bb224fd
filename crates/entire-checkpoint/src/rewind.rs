//! Rewind: list restore targets reachable from `HEAD` and put the working
//! tree back to one of them.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::Path;

use entire_core::trailer::{parse_checkpoint_trailer, trailer_value, SESSION_TRAILER};
use serde::Serialize;
use time::OffsetDateTime;

use crate::git::{ChangeStatus, CommitInfo, Git, GitError, TreeEntry};
use crate::shadow::list_shadow_refs;
use crate::storage::CheckpointStore;
use crate::{is_protected, CheckpointError};

/// Shortest commit or checkpoint id prefix accepted as a rewind target.
const MIN_PREFIX_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    /// Backed by a permanent checkpoint on the metadata ref.
    Checkpoint,
    /// A shadow snapshot not (yet) condensed into a checkpoint.
    Temporary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl From<ChangeStatus> for ChangeKind {
    fn from(s: ChangeStatus) -> Self {
        match s {
            ChangeStatus::Added => ChangeKind::Added,
            ChangeStatus::Modified => ChangeKind::Modified,
            ChangeStatus::Deleted => ChangeKind::Deleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDelta {
    pub path: String,
    pub change: ChangeKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct RewindPoint {
    /// Checkpoint id, or the snapshot commit for temporary points.
    pub id: String,
    pub kind: PointKind,
    /// Commit whose tree holds the file contents to restore.
    pub commit: String,
    pub session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Subject line of the commit.
    pub message: String,
    pub files_touched: Vec<String>,
    /// Changes relative to the commit's parent.
    pub deltas: Vec<FileDelta>,
}

impl RewindPoint {
    fn paths(&self) -> impl Iterator<Item = &String> {
        self.files_touched
            .iter()
            .chain(self.deltas.iter().map(|d| &d.path))
    }
}

#[derive(Debug, Clone)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.error)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewindReport {
    pub restored: Vec<String>,
    pub deleted: Vec<String>,
    /// Candidates left alone because they are under a protected directory.
    pub skipped: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RewindError {
    #[error("no rewind point matches {0:?}")]
    UnknownPoint(String),
    #[error("{0:?} matches more than one rewind point")]
    Ambiguous(String),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(
        "rewind incomplete, {} file(s) could not be restored: {}",
        .failures.len(),
        join_failures(.failures)
    )]
    Partial {
        failures: Vec<FileFailure>,
        report: RewindReport,
    },
}

fn join_failures(failures: &[FileFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct RewindEngine {
    store: CheckpointStore,
    protected: Vec<String>,
}

impl RewindEngine {
    /// `protected` are repo-relative directories rewind never modifies.
    pub fn new(store: CheckpointStore, protected: Vec<String>) -> Self {
        Self { store, protected }
    }

    fn git(&self) -> &Git {
        self.store.git()
    }

    /// Rewind points reachable from `HEAD`, newest first.
    pub fn list_rewind_points(&self) -> Result<Vec<RewindPoint>, RewindError> {
        let git = self.git();
        let Some(head) = git.head()? else {
            return Ok(Vec::new());
        };
        let mut points = Vec::new();
        let mut seen = HashSet::new();

        for (ref_name, tip, base) in list_shadow_refs(git)? {
            let Some(base) = git.resolve_commit(&base)? else {
                tracing::debug!(ref_name = %ref_name, "shadow ref base no longer resolves");
                continue;
            };
            if !git.is_ancestor(&base, &head)? {
                continue;
            }
            for commit in git.log(&format!("{base}..{tip}"), &[])? {
                let point = self.shadow_point(&commit)?;
                if seen.insert(point.id.clone()) {
                    points.push(point);
                }
            }
        }

        for commit in git.log("HEAD", &["--grep=^Entire-Checkpoint: "])? {
            let Some(id) = parse_checkpoint_trailer(&commit.message) else {
                continue;
            };
            if seen.contains(id.as_str()) {
                continue;
            }
            let meta = match self.store.read_metadata(&id) {
                Ok(meta) => meta,
                Err(CheckpointError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            let snapshot = if meta.snapshot_commit.is_empty() {
                commit.clone()
            } else {
                git.commit_info(&meta.snapshot_commit)?
            };
            seen.insert(id.to_string());
            points.push(RewindPoint {
                id: id.to_string(),
                kind: PointKind::Checkpoint,
                deltas: deltas(git, &snapshot)?,
                commit: snapshot.oid,
                session_id: meta.session_id,
                created_at: commit.time,
                message: subject(&commit.message),
                files_touched: meta.files_touched,
            });
        }

        points.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(points)
    }

    fn shadow_point(&self, commit: &CommitInfo) -> Result<RewindPoint, RewindError> {
        let deltas = deltas(self.git(), commit)?;
        let session_id = trailer_value(&commit.message, SESSION_TRAILER).unwrap_or_default();
        let checkpoint = match parse_checkpoint_trailer(&commit.message) {
            Some(id) => match self.store.read_metadata(&id) {
                Ok(meta) => Some((id, meta)),
                Err(CheckpointError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            },
            None => None,
        };
        let (id, kind, files_touched) = match checkpoint {
            Some((id, meta)) => (id.to_string(), PointKind::Checkpoint, meta.files_touched),
            None => (
                commit.oid.clone(),
                PointKind::Temporary,
                deltas.iter().map(|d| d.path.clone()).collect(),
            ),
        };
        Ok(RewindPoint {
            id,
            kind,
            commit: commit.oid.clone(),
            session_id,
            created_at: commit.time,
            message: subject(&commit.message),
            files_touched,
            deltas,
        })
    }

    /// Restore the working tree to `target` (checkpoint id or snapshot
    /// commit, full or abbreviated).
    ///
    /// Every path the target, any newer point, or `live_files` mentions is
    /// set to its state in the target: written if present there, deleted if
    /// not. Paths under protected directories are skipped. All files are
    /// attempted; failures are collected and reported together.
    pub fn rewind(&self, target: &str, live_files: &[String]) -> Result<RewindReport, RewindError> {
        let points = self.list_rewind_points()?;
        let idx = find_point(&points, target)?;
        let point = &points[idx];

        let mut candidates: BTreeSet<String> = point.paths().cloned().collect();
        for newer in &points[..idx] {
            candidates.extend(newer.paths().cloned());
        }
        candidates.extend(live_files.iter().cloned());

        let mut report = RewindReport::default();
        let mut paths = Vec::new();
        for path in candidates {
            if is_protected(&path, &self.protected) {
                report.skipped.push(path);
            } else {
                paths.push(path);
            }
        }

        let git = self.git();
        let entries: HashMap<String, TreeEntry> = if paths.is_empty() {
            HashMap::new()
        } else {
            git.ls_tree(&point.commit, &paths)?
                .into_iter()
                .map(|e| (e.path.clone(), e))
                .collect()
        };

        let mut failures = Vec::new();
        for path in paths {
            let full = git.workdir().join(&path);
            let outcome = match entries.get(&path) {
                Some(entry) => restore_file(git, &full, entry).map(|_| true),
                None => remove_file(&full),
            };
            match outcome {
                Ok(true) if entries.contains_key(&path) => report.restored.push(path),
                Ok(true) => report.deleted.push(path),
                Ok(false) => {}
                Err(error) => failures.push(FileFailure { path, error }),
            }
        }

        tracing::info!(
            target_id = %point.id,
            restored = report.restored.len(),
            deleted = report.deleted.len(),
            failed = failures.len(),
            "rewind"
        );
        if failures.is_empty() {
            Ok(report)
        } else {
            Err(RewindError::Partial { failures, report })
        }
    }
}

fn deltas(git: &Git, commit: &CommitInfo) -> Result<Vec<FileDelta>, GitError> {
    Ok(git
        .diff_tree(commit)?
        .into_iter()
        .map(|(status, path)| FileDelta {
            path,
            change: status.into(),
        })
        .collect())
}

fn subject(message: &str) -> String {
    message.lines().next().unwrap_or("").trim().to_string()
}

fn find_point(points: &[RewindPoint], target: &str) -> Result<usize, RewindError> {
    let target = target.trim();
    if let Some(i) = points.iter().position(|p| p.id == target || p.commit == target) {
        return Ok(i);
    }
    if target.len() < MIN_PREFIX_LEN {
        return Err(RewindError::UnknownPoint(target.to_string()));
    }
    let matches: Vec<usize> = points
        .iter()
        .enumerate()
        .filter(|(_, p)| p.id.starts_with(target) || p.commit.starts_with(target))
        .map(|(i, _)| i)
        .collect();
    match matches.as_slice() {
        [i] => Ok(*i),
        [] => Err(RewindError::UnknownPoint(target.to_string())),
        _ => Err(RewindError::Ambiguous(target.to_string())),
    }
}

fn restore_file(git: &Git, full: &Path, entry: &TreeEntry) -> Result<(), String> {
    let data = git.cat_blob(&entry.oid).map_err(|e| e.to_string())?;
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    if full.symlink_metadata().is_ok_and(|m| m.is_dir()) {
        return Err("a directory is in the way".to_string());
    }
    if entry.mode == "120000" {
        return restore_symlink(full, &data);
    }
    if full.symlink_metadata().is_ok_and(|m| m.file_type().is_symlink()) {
        std::fs::remove_file(full).map_err(|e| e.to_string())?;
    }
    std::fs::write(full, &data).map_err(|e| e.to_string())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if entry.mode == "100755" { 0o755 } else { 0o644 };
        std::fs::set_permissions(full, std::fs::Permissions::from_mode(mode))
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

#[cfg(unix)]
fn restore_symlink(full: &Path, target: &[u8]) -> Result<(), String> {
    use std::os::unix::ffi::OsStrExt;
    if full.symlink_metadata().is_ok() {
        std::fs::remove_file(full).map_err(|e| e.to_string())?;
    }
    std::os::unix::fs::symlink(std::ffi::OsStr::from_bytes(target), full).map_err(|e| e.to_string())
}

#[cfg(not(unix))]
fn restore_symlink(full: &Path, target: &[u8]) -> Result<(), String> {
    std::fs::write(full, target).map_err(|e| e.to_string())
}

/// `Ok(true)` if a file was removed, `Ok(false)` if there was nothing to remove.
fn remove_file(full: &Path) -> Result<bool, String> {
    match full.symlink_metadata() {
        Ok(meta) if meta.is_dir() => Ok(false),
        Ok(_) => std::fs::remove_file(full)
            .map(|_| true)
            .map_err(|e| e.to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::test_support::*;
    use crate::shadow::{write_snapshot, SnapshotRequest};
    use crate::storage::CheckpointPayload;
    use entire_core::{
        content_sha256, now_utc, CheckpointId, CheckpointMetadata, StrategyKind,
        METADATA_SCHEMA_VERSION,
    };
    use entire_transcript::TranscriptFormat;

    fn snapshot(git: &Git, base: &str, files: &[&str], id: Option<&CheckpointId>) -> String {
        let files: Vec<String> = files.iter().map(|s| s.to_string()).collect();
        write_snapshot(
            git,
            &SnapshotRequest {
                base_commit: base,
                session_id: "sess-1",
                files: &files,
                subject: "turn",
                checkpoint_id: id,
            },
        )
        .unwrap()
        .commit
    }

    fn store_checkpoint(store: &CheckpointStore, id: &CheckpointId, commit: &str, files: &[&str]) {
        store
            .write(&CheckpointPayload {
                metadata: CheckpointMetadata {
                    schema_version: METADATA_SCHEMA_VERSION,
                    checkpoint_id: id.clone(),
                    session_id: "sess-1".into(),
                    agent_type: "Claude Code".into(),
                    strategy: StrategyKind::AutoCommit,
                    created_at: now_utc(),
                    files_touched: files.iter().map(|s| s.to_string()).collect(),
                    snapshot_commit: commit.to_string(),
                    base_commit: String::new(),
                    checkpoints_count: 1,
                    transcript_format: TranscriptFormat::Jsonl.label(),
                    transcript_start: 0,
                    transcript_end: 0,
                    transcript_sha256: content_sha256(b""),
                    token_usage: None,
                },
                transcript: Vec::new(),
                condensed: Vec::new(),
                prompts: String::new(),
                summary: None,
            })
            .unwrap();
    }

    fn engine(git: &Git) -> RewindEngine {
        RewindEngine::new(
            CheckpointStore::new(git.clone()),
            vec![".claude".into(), ".git".into(), ".entire".into()],
        )
    }

    /// P1 (temporary) -> P2 (checkpoint) -> P3 (temporary) on one base.
    fn three_points() -> (tempfile::TempDir, Git, String, CheckpointId) {
        let (tmp, git) = init_repo();
        let base = git.head().unwrap().unwrap();
        write(&git, "a.txt", "v1\n");
        let p1 = snapshot(&git, &base, &["a.txt"], None);

        write(&git, "a.txt", "v2\n");
        write(&git, "b.txt", "new in p2\n");
        write(&git, ".claude/settings.json", "{}\n");
        let id = CheckpointId::parse("c0ffee000001").unwrap();
        let p2 = snapshot(&git, &base, &["a.txt", "b.txt", ".claude/settings.json"], Some(&id));
        store_checkpoint(&CheckpointStore::new(git.clone()), &id, &p2, &["a.txt", "b.txt"]);

        write(&git, "a.txt", "v3\n");
        write(&git, "c.txt", "new in p3\n");
        write(&git, ".claude/settings.json", "{\"changed\":true}\n");
        snapshot(&git, &base, &["a.txt", "c.txt", ".claude/settings.json"], None);
        (tmp, git, p1, id)
    }

    #[test]
    fn lists_points_newest_first_with_deltas() {
        let (_tmp, git, p1, id) = three_points();
        let points = engine(&git).list_rewind_points().unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].kind, PointKind::Temporary);
        assert_eq!(points[1].id, id.to_string());
        assert_eq!(points[1].kind, PointKind::Checkpoint);
        assert_eq!(points[1].files_touched, vec!["a.txt", "b.txt"]);
        assert_eq!(points[2].id, p1);
        assert_eq!(
            points[2].deltas,
            vec![FileDelta {
                path: "a.txt".into(),
                change: ChangeKind::Added
            }]
        );
        assert!(points[0].deltas.contains(&FileDelta {
            path: "c.txt".into(),
            change: ChangeKind::Added
        }));
        assert!(points.iter().all(|p| p.session_id == "sess-1"));
    }

    #[test]
    fn rewind_restores_and_removes_but_skips_protected() {
        let (_tmp, git, p1, _) = three_points();
        let report = engine(&git).rewind(&p1[..10], &[]).unwrap();

        assert_eq!(read(&git, "a.txt").as_deref(), Some("v1\n"));
        assert_eq!(read(&git, "b.txt"), None);
        assert_eq!(read(&git, "c.txt"), None);
        assert_eq!(read(&git, "README").as_deref(), Some("hi\n"));
        assert_eq!(
            read(&git, ".claude/settings.json").as_deref(),
            Some("{\"changed\":true}\n")
        );
        assert_eq!(report.restored, vec!["a.txt"]);
        assert_eq!(report.deleted, vec!["b.txt", "c.txt"]);
        assert_eq!(report.skipped, vec![".claude/settings.json"]);
    }

    #[test]
    fn rewind_to_checkpoint_id_and_live_files() {
        let (_tmp, git, _, id) = three_points();
        write(&git, "scratch.txt", "agent made this after the last snapshot\n");
        engine(&git)
            .rewind(id.as_str(), &["scratch.txt".to_string()])
            .unwrap();
        assert_eq!(read(&git, "a.txt").as_deref(), Some("v2\n"));
        assert_eq!(read(&git, "b.txt").as_deref(), Some("new in p2\n"));
        assert_eq!(read(&git, "c.txt"), None);
        assert_eq!(read(&git, "scratch.txt"), None);
    }

    #[test]
    fn rewind_reports_each_failed_file() {
        let (_tmp, git) = init_repo();
        let base = git.head().unwrap().unwrap();
        write(&git, "a.txt", "v1\n");
        write(&git, "blocker/x.txt", "x\n");
        let p1 = snapshot(&git, &base, &["a.txt", "blocker/x.txt"], None);

        write(&git, "a.txt", "v2\n");
        std::fs::remove_dir_all(git.workdir().join("blocker")).unwrap();
        write(&git, "blocker", "now a file\n");

        let err = engine(&git).rewind(&p1, &[]).unwrap_err();
        match err {
            RewindError::Partial { failures, report } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].path, "blocker/x.txt");
                assert_eq!(report.restored, vec!["a.txt"]);
            }
            other => panic!("expected partial failure, got {other}"),
        }
        // Everything else was still attempted.
        assert_eq!(read(&git, "a.txt").as_deref(), Some("v1\n"));
    }

    #[test]
    fn unknown_and_short_targets() {
        let (_tmp, git, _, _) = three_points();
        let engine = engine(&git);
        assert!(matches!(
            engine.rewind("deadbeefdead", &[]),
            Err(RewindError::UnknownPoint(_))
        ));
        assert!(matches!(engine.rewind("c0f", &[]), Err(RewindError::UnknownPoint(_))));
    }

    #[test]
    fn checkpoint_trailers_on_user_commits_are_points() {
        let (_tmp, git) = init_repo();
        write(&git, "a.txt", "committed\n");
        let id = CheckpointId::parse("abcabcabcabc").unwrap();
        let commit = commit_all(&git, &format!("Add a\n\nEntire-Checkpoint: {id}"));
        store_checkpoint(&CheckpointStore::new(git.clone()), &id, &commit, &["a.txt"]);

        let points = engine(&git).list_rewind_points().unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].commit, commit);
        assert_eq!(points[0].message, "Add a");

        write(&git, "a.txt", "edited later\n");
        engine(&git).rewind(id.as_str(), &[]).unwrap();
        assert_eq!(read(&git, "a.txt").as_deref(), Some("committed\n"));
    }
}
