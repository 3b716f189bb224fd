//! Permanent checkpoints on the metadata ref.
//!
//! Layout, one immutable directory per checkpoint:
//!
//! ```text
//! ab/cdef01234567/metadata.json
//! ab/cdef01234567/full.jsonl        (full.jsonl.001, ... when chunked)
//! ab/cdef01234567/condensed.jsonl   (condensed.jsonl.001, ...)
//! ab/cdef01234567/prompt.txt
//! ab/cdef01234567/summary.json
//! ```

use std::collections::BTreeMap;

use entire_core::trailer::{format_trailer, SESSION_TRAILER, STRATEGY_TRAILER};
use entire_core::{content_sha256, CheckpointId, CheckpointMetadata};
use entire_transcript::{decode_condensed, encode_condensed, CondensedEntry, TranscriptFormat};
use serde::{Deserialize, Serialize};

use crate::git::{Git, TreeEdit};
use crate::{backoff, CheckpointError, MAX_REF_ATTEMPTS};

pub const CHECKPOINTS_REF: &str = "refs/entire/checkpoints/v1";

const METADATA_FILE: &str = "metadata.json";
const CONDENSED_FILE: &str = "condensed.jsonl";
const PROMPT_FILE: &str = "prompt.txt";
const SUMMARY_FILE: &str = "summary.json";

/// Human summary of a checkpoint, produced by an external summarizer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub intent: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub open_items: Vec<String>,
}

/// Everything stored for one checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointPayload {
    pub metadata: CheckpointMetadata,
    /// The agent's native transcript, in `metadata.transcript_format`.
    pub transcript: Vec<u8>,
    pub condensed: Vec<CondensedEntry>,
    /// Prompts of the turns this checkpoint covers, newline separated.
    pub prompts: String,
    pub summary: Option<CheckpointSummary>,
}

/// `base`, `base.001`, `base.002`, ...
fn chunk_file_name(base: &str, index: usize) -> String {
    if index == 0 {
        base.to_string()
    } else {
        format!("{base}.{index:03}")
    }
}

fn chunk_index(name: &str, base: &str) -> Option<usize> {
    if name == base {
        return Some(0);
    }
    name.strip_prefix(base)?
        .strip_prefix('.')?
        .parse::<usize>()
        .ok()
        .filter(|i| *i > 0)
}

fn transcript_format(metadata: &CheckpointMetadata) -> Result<TranscriptFormat, CheckpointError> {
    if metadata.transcript_format.is_empty() {
        return Ok(TranscriptFormat::Jsonl);
    }
    TranscriptFormat::from_label(&metadata.transcript_format).ok_or_else(|| {
        CheckpointError::Malformed {
            id: metadata.checkpoint_id.to_string(),
            reason: format!("unknown transcript format {:?}", metadata.transcript_format),
        }
    })
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    git: Git,
    ref_name: String,
    max_chunk_bytes: usize,
}

impl CheckpointStore {
    pub fn new(git: Git) -> Self {
        Self {
            git,
            ref_name: CHECKPOINTS_REF.to_string(),
            max_chunk_bytes: entire_transcript::max_chunk_bytes(),
        }
    }

    pub fn with_max_chunk_bytes(mut self, max: usize) -> Self {
        self.max_chunk_bytes = max;
        self
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    pub fn ref_name(&self) -> &str {
        &self.ref_name
    }

    /// Store a checkpoint. Writing an id that already exists is a no-op, so a
    /// retried hook never duplicates or overwrites a checkpoint.
    pub fn write(&self, payload: &CheckpointPayload) -> Result<(), CheckpointError> {
        let meta = &payload.metadata;
        let id = &meta.checkpoint_id;
        let edits = self.payload_edits(payload)?;
        let message = format!(
            "Checkpoint: {id}\n\n{}\n{}\n",
            format_trailer(SESSION_TRAILER, &meta.session_id),
            format_trailer(STRATEGY_TRAILER, meta.strategy.as_str()),
        );

        for attempt in 1..=MAX_REF_ATTEMPTS {
            let tip = self.git.ref_tip(&self.ref_name)?;
            let base_tree = match &tip {
                Some(tip) => {
                    if self.exists_at(tip, id)? {
                        tracing::debug!(checkpoint_id = %id, "checkpoint already stored");
                        return Ok(());
                    }
                    Some(self.git.tree_of(tip)?)
                }
                None => None,
            };
            let tree = self.git.build_tree(base_tree.as_deref(), &edits)?;
            let parents: Vec<&str> = tip.as_deref().into_iter().collect();
            let commit = self.git.commit_tree(&tree, &parents, &message)?;
            if self.git.update_ref(&self.ref_name, &commit, tip.as_deref())? {
                tracing::info!(
                    checkpoint_id = %id,
                    session_id = %meta.session_id,
                    ref_name = %self.ref_name,
                    "checkpoint written"
                );
                return Ok(());
            }
            tracing::debug!(checkpoint_id = %id, attempt, "metadata ref moved, retrying");
            backoff(attempt);
        }
        Err(CheckpointError::CasExhausted {
            ref_name: self.ref_name.clone(),
            attempts: MAX_REF_ATTEMPTS,
        })
    }

    /// Blobs for every file of the checkpoint. Hashed once, reused across retries.
    fn payload_edits(&self, payload: &CheckpointPayload) -> Result<Vec<TreeEdit>, CheckpointError> {
        let meta = &payload.metadata;
        let dir = meta.checkpoint_id.shard_path();
        let format = transcript_format(meta)?;
        let mut files: Vec<(String, Vec<u8>)> = Vec::new();

        files.push((METADATA_FILE.to_string(), serde_json::to_vec_pretty(meta)?));
        for (i, chunk) in format
            .chunk(&payload.transcript, self.max_chunk_bytes)?
            .into_iter()
            .enumerate()
        {
            files.push((chunk_file_name(format.file_name(), i), chunk));
        }
        let condensed = encode_condensed(&payload.condensed)?;
        for (i, chunk) in TranscriptFormat::Jsonl
            .chunk(&condensed, self.max_chunk_bytes)?
            .into_iter()
            .enumerate()
        {
            files.push((chunk_file_name(CONDENSED_FILE, i), chunk));
        }
        if !payload.prompts.is_empty() {
            files.push((PROMPT_FILE.to_string(), payload.prompts.as_bytes().to_vec()));
        }
        if let Some(summary) = &payload.summary {
            files.push((SUMMARY_FILE.to_string(), serde_json::to_vec_pretty(summary)?));
        }

        files
            .into_iter()
            .map(|(name, data)| {
                Ok(TreeEdit::Upsert {
                    path: format!("{dir}/{name}"),
                    mode: "100644".to_string(),
                    oid: self.git.hash_object(&data)?,
                })
            })
            .collect()
    }

    fn exists_at(&self, tip: &str, id: &CheckpointId) -> Result<bool, CheckpointError> {
        let path = format!("{}/{METADATA_FILE}", id.shard_path());
        Ok(!self.git.ls_tree(tip, &[path])?.is_empty())
    }

    pub fn exists(&self, id: &CheckpointId) -> Result<bool, CheckpointError> {
        match self.git.ref_tip(&self.ref_name)? {
            Some(tip) => self.exists_at(&tip, id),
            None => Ok(false),
        }
    }

    /// File name → blob id for one checkpoint directory.
    fn files_of(&self, id: &CheckpointId) -> Result<BTreeMap<String, String>, CheckpointError> {
        let not_found = || CheckpointError::NotFound(id.to_string());
        let tip = self.git.ref_tip(&self.ref_name)?.ok_or_else(not_found)?;
        let dir = id.shard_path();
        let prefix = format!("{dir}/");
        let files: BTreeMap<String, String> = self
            .git
            .ls_tree(&tip, &[dir])?
            .into_iter()
            .filter_map(|e| Some((e.path.strip_prefix(&prefix)?.to_string(), e.oid)))
            .collect();
        if !files.contains_key(METADATA_FILE) {
            return Err(not_found());
        }
        Ok(files)
    }

    fn parse_metadata(&self, id: &CheckpointId, oid: &str) -> Result<CheckpointMetadata, CheckpointError> {
        let bytes = self.git.cat_blob(oid)?;
        let meta: CheckpointMetadata =
            serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Malformed {
                id: id.to_string(),
                reason: format!("metadata.json: {e}"),
            })?;
        if &meta.checkpoint_id != id {
            return Err(CheckpointError::Malformed {
                id: id.to_string(),
                reason: format!("metadata names checkpoint {}", meta.checkpoint_id),
            });
        }
        Ok(meta)
    }

    pub fn read_metadata(&self, id: &CheckpointId) -> Result<CheckpointMetadata, CheckpointError> {
        let files = self.files_of(id)?;
        self.parse_metadata(id, &files[METADATA_FILE])
    }

    /// Reassemble the chunks named `base`, `base.001`, ... in order.
    fn read_chunks(
        &self,
        id: &CheckpointId,
        files: &BTreeMap<String, String>,
        base: &str,
    ) -> Result<Vec<Vec<u8>>, CheckpointError> {
        let mut indexed: Vec<(usize, &String)> = files
            .iter()
            .filter_map(|(name, oid)| chunk_index(name, base).map(|i| (i, oid)))
            .collect();
        indexed.sort_by_key(|(i, _)| *i);
        if indexed.iter().enumerate().any(|(pos, (i, _))| pos != *i) {
            return Err(CheckpointError::Malformed {
                id: id.to_string(),
                reason: format!("{base} chunks are not contiguous"),
            });
        }
        indexed
            .into_iter()
            .map(|(_, oid)| Ok(self.git.cat_blob(oid)?))
            .collect()
    }

    pub fn read(&self, id: &CheckpointId) -> Result<CheckpointPayload, CheckpointError> {
        let files = self.files_of(id)?;
        let metadata = self.parse_metadata(id, &files[METADATA_FILE])?;
        let malformed = |reason: String| CheckpointError::Malformed {
            id: id.to_string(),
            reason,
        };

        let format = transcript_format(&metadata)?;
        let chunks = self.read_chunks(id, &files, format.file_name())?;
        let transcript = format.reassemble(&chunks)?;
        if !metadata.transcript_sha256.is_empty()
            && content_sha256(&transcript) != metadata.transcript_sha256
        {
            return Err(malformed("transcript does not match its recorded hash".into()));
        }

        let condensed_chunks = self.read_chunks(id, &files, CONDENSED_FILE)?;
        let condensed_bytes = TranscriptFormat::Jsonl.reassemble(&condensed_chunks)?;
        let condensed = decode_condensed(&condensed_bytes)
            .map_err(|e| malformed(format!("condensed transcript: {e}")))?;

        let prompts = match files.get(PROMPT_FILE) {
            Some(oid) => String::from_utf8_lossy(&self.git.cat_blob(oid)?).to_string(),
            None => String::new(),
        };
        let summary = match files.get(SUMMARY_FILE) {
            Some(oid) => Some(
                serde_json::from_slice(&self.git.cat_blob(oid)?)
                    .map_err(|e| malformed(format!("summary.json: {e}")))?,
            ),
            None => None,
        };

        Ok(CheckpointPayload {
            metadata,
            transcript,
            condensed,
            prompts,
            summary,
        })
    }

    /// Ids of every stored checkpoint, sorted.
    pub fn list(&self) -> Result<Vec<CheckpointId>, CheckpointError> {
        let Some(tip) = self.git.ref_tip(&self.ref_name)? else {
            return Ok(Vec::new());
        };
        let mut ids: Vec<CheckpointId> = self
            .git
            .ls_tree(&tip, &[])?
            .into_iter()
            .filter_map(|e| {
                let mut parts = e.path.split('/');
                match (parts.next(), parts.next(), parts.next(), parts.next()) {
                    (Some(a), Some(b), Some(METADATA_FILE), None) => {
                        CheckpointId::parse(&format!("{a}{b}")).ok()
                    }
                    _ => None,
                }
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Metadata of every checkpoint, newest first.
    pub fn list_metadata(&self) -> Result<Vec<CheckpointMetadata>, CheckpointError> {
        let mut all = Vec::new();
        for id in self.list()? {
            match self.read_metadata(&id) {
                Ok(meta) => all.push(meta),
                Err(e) => tracing::warn!(checkpoint_id = %id, error = %e, "skipping unreadable checkpoint"),
            }
        }
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}
