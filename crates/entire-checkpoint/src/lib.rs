//! Git-backed checkpoint storage, shadow snapshots and rewind.
//!
//! Everything lives under `refs/entire/`: permanent checkpoints on a single
//! metadata ref, per-base shadow refs for working-tree snapshots. Neither is
//! ever checked out, and both are only advanced with compare-and-swap.

pub mod git;
pub mod rewind;
pub mod shadow;
pub mod storage;

pub use git::{ChangeStatus, CommitInfo, Git, GitError, TreeEdit, TreeEntry};
pub use rewind::{
    ChangeKind, FileDelta, FileFailure, PointKind, RewindEngine, RewindError, RewindPoint,
    RewindReport,
};
pub use shadow::{
    delete_shadow_ref, list_shadow_refs, shadow_ref_name, write_snapshot, Snapshot, SnapshotRequest,
    SHADOW_REF_PREFIX,
};
pub use storage::{CheckpointPayload, CheckpointStore, CheckpointSummary, CHECKPOINTS_REF};

use entire_core::IdError;
use entire_transcript::ChunkError;

/// Attempts at a compare-and-swap ref update before giving up.
pub const MAX_REF_ATTEMPTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint {0} not found")]
    NotFound(String),
    #[error("checkpoint {id} is malformed: {reason}")]
    Malformed { id: String, reason: String },
    #[error("gave up updating {ref_name} after {attempts} concurrent updates")]
    CasExhausted { ref_name: String, attempts: usize },
    #[error(transparent)]
    InvalidId(#[from] IdError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Short pause before retrying a lost compare-and-swap, growing per attempt.
pub(crate) fn backoff(attempt: usize) {
    let jitter: u64 = rand::random::<u64>() % 5;
    std::thread::sleep(std::time::Duration::from_millis(attempt as u64 * 5 + jitter));
}

/// Repo-relative path under one of `protected` directories.
pub fn is_protected(path: &str, protected: &[String]) -> bool {
    protected.iter().any(|dir| {
        let dir = dir.trim_end_matches('/');
        !dir.is_empty() && (path == dir || path.starts_with(&format!("{dir}/")))
    })
}
