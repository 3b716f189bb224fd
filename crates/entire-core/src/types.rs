use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

use crate::tokens::TokenUsage;

/// Current schema version written into checkpoint metadata.
pub const METADATA_SCHEMA_VERSION: u32 = 1;

/// Number of hex characters in a checkpoint id.
pub const CHECKPOINT_ID_LEN: usize = 12;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdError {
    #[error("checkpoint id must be {CHECKPOINT_ID_LEN} lowercase hex characters, got {0:?}")]
    Invalid(String),
}

/// Opaque checkpoint identifier: 12 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CheckpointId(String);

impl CheckpointId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        let bytes: [u8; CHECKPOINT_ID_LEN / 2] = rand::random();
        Self(hex::encode(bytes))
    }

    pub fn parse(s: &str) -> Result<Self, IdError> {
        let s = s.trim();
        let valid = s.len() == CHECKPOINT_ID_LEN
            && s
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(IdError::Invalid(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sharded directory of this checkpoint on the metadata ref: `ab/cdef01234567`.
    pub fn shard_path(&self) -> String {
        format!("{}/{}", &self.0[..2], &self.0[2..])
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CheckpointId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CheckpointId> for String {
    fn from(id: CheckpointId) -> Self {
        id.0
    }
}

impl FromStr for CheckpointId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// How checkpoints are materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// The user's own commits are the unit of checkpointing.
    #[default]
    ManualCommit,
    /// Every turn boundary is committed to a shadow ref.
    AutoCommit,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::ManualCommit => "manual-commit",
            StrategyKind::AutoCommit => "auto-commit",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "manual-commit" | "manual" => Ok(StrategyKind::ManualCommit),
            "auto-commit" | "auto" => Ok(StrategyKind::AutoCommit),
            other => Err(format!(
                "unknown strategy {other:?} (expected manual-commit or auto-commit)"
            )),
        }
    }
}

/// `metadata.json` stored next to every checkpoint's transcript chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    #[serde(default)]
    pub schema_version: u32,
    pub checkpoint_id: CheckpointId,
    pub session_id: String,
    pub agent_type: String,
    pub strategy: StrategyKind,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub files_touched: Vec<String>,
    /// Commit whose tree holds the file contents of this checkpoint.
    pub snapshot_commit: String,
    #[serde(default)]
    pub base_commit: String,
    #[serde(default)]
    pub checkpoints_count: u32,
    /// Transcript format the `full.*` chunk files are encoded in.
    #[serde(default)]
    pub transcript_format: String,
    /// Watermark the condensed transcript starts at.
    #[serde(default)]
    pub transcript_start: usize,
    /// Watermark after this checkpoint.
    #[serde(default)]
    pub transcript_end: usize,
    #[serde(default)]
    pub transcript_sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

/// Lowercase hex SHA-256 of transcript bytes.
pub fn content_sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub fn format_rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_valid() {
        for _ in 0..32 {
            let id = CheckpointId::generate();
            assert_eq!(id.as_str().len(), CHECKPOINT_ID_LEN);
            assert_eq!(CheckpointId::parse(id.as_str()).unwrap(), id);
        }
    }

    #[test]
    fn parse_rejects_bad_ids() {
        assert!(CheckpointId::parse("").is_err());
        assert!(CheckpointId::parse("abc").is_err());
        assert!(CheckpointId::parse("ABCDEF012345").is_err());
        assert!(CheckpointId::parse("zzzzzzzzzzzz").is_err());
        assert!(CheckpointId::parse("abcdef0123456").is_err());
        assert!(CheckpointId::parse(" abcdef012345\n").is_ok());
    }

    #[test]
    fn shard_path_splits_prefix() {
        let id = CheckpointId::parse("a1b2c3d4e5f6").unwrap();
        assert_eq!(id.shard_path(), "a1/b2c3d4e5f6");
    }

    #[test]
    fn id_serde_validates() {
        let id: CheckpointId = serde_json::from_str("\"0123456789ab\"").unwrap();
        assert_eq!(id.to_string(), "0123456789ab");
        assert!(serde_json::from_str::<CheckpointId>("\"nope\"").is_err());
    }

    #[test]
    fn strategy_kind_round_trips_names() {
        assert_eq!(
            "auto-commit".parse::<StrategyKind>().unwrap(),
            StrategyKind::AutoCommit
        );
        assert_eq!(
            "manual".parse::<StrategyKind>().unwrap(),
            StrategyKind::ManualCommit
        );
        assert!("yolo".parse::<StrategyKind>().is_err());
        assert_eq!(
            serde_json::to_string(&StrategyKind::AutoCommit).unwrap(),
            "\"auto-commit\""
        );
    }

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            content_sha256(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
