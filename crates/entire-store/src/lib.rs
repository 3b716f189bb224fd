pub mod session;

pub use session::{PendingCheckpoint, SessionPhase, SessionState, SessionStore, STALE_SESSION_SECS};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Directory (inside the git common dir) holding one state file per session.
pub const SESSIONS_DIR_NAME: &str = "entire-sessions";

/// All well-known paths under `.entire/` in a repository.
#[derive(Debug, Clone)]
pub struct EntirePaths {
    pub root: PathBuf,
    pub entire_dir: PathBuf,
    pub settings_json: PathBuf,
    pub settings_local_json: PathBuf,
    pub tmp_dir: PathBuf,
}

impl EntirePaths {
    /// Derive all paths from a repo root. Pure computation, no I/O.
    pub fn discover(repo_root: impl Into<PathBuf>) -> Self {
        let root = repo_root.into();
        let entire_dir = root.join(".entire");
        Self {
            settings_json: entire_dir.join("settings.json"),
            settings_local_json: entire_dir.join("settings.local.json"),
            tmp_dir: entire_dir.join("tmp"),
            entire_dir,
            root,
        }
    }

    /// Create the `.entire/` layout. Idempotent.
    pub fn ensure_layout(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.tmp_dir)?;
        let gitignore = self.entire_dir.join(".gitignore");
        if !gitignore.exists() {
            write_atomic(&gitignore, b"tmp/\nsettings.local.json\n")?;
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.entire_dir.is_dir()
    }

    /// Walk up from `start` looking for a directory containing `.entire/`.
    pub fn find_root(start: &Path) -> Option<PathBuf> {
        let mut cur = start.to_path_buf();
        loop {
            if cur.join(".entire").is_dir() {
                return Some(cur);
            }
            if !cur.pop() {
                return None;
            }
        }
    }
}

/// Session state directory for a repository, given its git common dir.
/// Living under `.git/` keeps state out of the working tree and shared by
/// every worktree of the repository.
pub fn sessions_dir(git_common_dir: &Path) -> PathBuf {
    git_common_dir.join(SESSIONS_DIR_NAME)
}

/// Atomic write: write to temp file in same dir, then rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("no parent dir for {}", path.display()))?;
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}
