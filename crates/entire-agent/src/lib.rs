//! Agent adapter boundary.
//!
//! An adapter turns an agent's native hook payloads into [`Event`]s, reads
//! that agent's transcript, and names the [`TranscriptFormat`] that chunks
//! it. Optional behaviors are separate capability traits an adapter exposes
//! through the `as_*` queries on [`Agent`].

pub mod claude;
pub mod gemini;

mod claude_hooks;
mod parse;
mod registry;

pub use claude::ClaudeCodeAgent;
pub use gemini::GeminiAgent;
pub use registry::AgentRegistry;

use entire_core::{Event, TokenUsage};
use entire_transcript::{ChunkError, CondensedEntry, TranscriptFormat};
use std::io::ErrorKind;
use std::path::{Component, Path};

#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("session has no transcript reference")]
    NoReference,
    /// Not written yet. Some agents export lazily or asynchronously.
    #[error("transcript not found at {0}")]
    NotFound(String),
    #[error("failed to read transcript {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to prepare transcript: {0}")]
    Prepare(String),
}

impl TranscriptError {
    /// Missing transcripts mean "no evidence yet", not a failure.
    pub fn is_absent(&self) -> bool {
        matches!(self, TranscriptError::NoReference | TranscriptError::NotFound(_))
    }
}

pub trait Agent: Send + Sync {
    /// Registry key and CLI name, e.g. `claude-code`.
    fn name(&self) -> &'static str;

    /// Human-facing agent type recorded in session state and checkpoints.
    fn agent_type(&self) -> &'static str;

    /// Translate one native hook invocation. `Ok(None)` for hooks that carry
    /// no lifecycle meaning.
    fn parse_hook_event(&self, hook_name: &str, raw_input: &[u8]) -> anyhow::Result<Option<Event>>;

    fn transcript_format(&self) -> TranscriptFormat;

    /// Directories (repo-relative) that rewind must never modify.
    fn protected_dirs(&self) -> Vec<String>;

    /// Called before [`read_transcript`](Self::read_transcript) for agents
    /// whose transcript is flushed lazily.
    fn prepare_transcript(&self, _session_ref: &str) -> Result<(), TranscriptError> {
        Ok(())
    }

    fn read_transcript(&self, session_ref: &str) -> Result<Vec<u8>, TranscriptError> {
        read_transcript_file(session_ref)
    }

    fn as_transcript_analyzer(&self) -> Option<&dyn TranscriptAnalyzer> {
        None
    }

    fn as_token_calculator(&self) -> Option<&dyn TokenCalculator> {
        None
    }

    fn as_hook_installer(&self) -> Option<&dyn HookInstaller> {
        None
    }
}

/// Reads structure out of an agent's native transcript, starting at a
/// watermark position.
pub trait TranscriptAnalyzer {
    /// Paths the agent wrote or edited, as recorded (often absolute).
    fn modified_files(&self, transcript: &[u8], start: usize) -> Result<Vec<String>, ChunkError>;

    fn condense(&self, transcript: &[u8], start: usize) -> Result<Vec<CondensedEntry>, ChunkError>;

    /// Current todo from the latest todo-list update at or after `start`.
    fn current_todo(&self, _transcript: &[u8], _start: usize) -> Option<String> {
        None
    }
}

pub trait TokenCalculator {
    fn token_usage(&self, transcript: &[u8], start: usize) -> Result<TokenUsage, ChunkError>;
}

pub trait HookInstaller {
    /// Install hooks invoking `command`; returns how many hook entries were written.
    fn install_hooks(&self, repo_root: &Path, command: &str) -> anyhow::Result<usize>;
    fn uninstall_hooks(&self, repo_root: &Path) -> anyhow::Result<()>;
    fn hooks_installed(&self, repo_root: &Path) -> bool;
}

/// Read a file-backed transcript, mapping a missing file to `NotFound`.
pub fn read_transcript_file(session_ref: &str) -> Result<Vec<u8>, TranscriptError> {
    if session_ref.is_empty() {
        return Err(TranscriptError::NoReference);
    }
    std::fs::read(session_ref).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            TranscriptError::NotFound(session_ref.to_string())
        } else {
            TranscriptError::Io {
                path: session_ref.to_string(),
                source: e,
            }
        }
    })
}

/// Normalize a path reported by an agent to a repo-relative, forward-slash
/// path. Paths outside the repository yield `None`.
pub fn repo_relative(path: &str, repo_root: &Path) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    let p = Path::new(path);
    let rel = if p.is_absolute() {
        match p.strip_prefix(repo_root) {
            Ok(r) => r.to_path_buf(),
            Err(_) => {
                let canon_root = repo_root.canonicalize().ok()?;
                let canon_parent = p.parent()?.canonicalize().ok()?;
                canon_parent
                    .join(p.file_name()?)
                    .strip_prefix(&canon_root)
                    .ok()?
                    .to_path_buf()
            }
        }
    } else {
        p.to_path_buf()
    };
    let mut parts = Vec::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(s) => parts.push(s.to_string_lossy().to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
