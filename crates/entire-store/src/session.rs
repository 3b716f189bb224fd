//! Per-session lifecycle state.
//!
//! One JSON file per session id under the sessions dir, so a main session and
//! its subagents never write the same file. Records are replaced atomically,
//! migrated from older field names on load, and evicted lazily once stale.

use entire_core::{CheckpointId, TokenUsage};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};

/// Sessions idle for longer than this are evicted on the next load or list.
pub const STALE_SESSION_SECS: i64 = 14 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Idle,
    /// A turn has started and not yet ended.
    Active,
    Ended,
}

/// Checkpoint chosen by `prepare-commit-msg`, condensed by `post-commit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCheckpoint {
    pub checkpoint_id: CheckpointId,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    #[serde(default)]
    pub worktree_path: String,
    #[serde(default)]
    pub base_commit: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_interaction_time: Option<OffsetDateTime>,
    #[serde(default)]
    pub first_prompt: String,
    #[serde(default)]
    pub agent_type: String,
    #[serde(default)]
    pub phase: SessionPhase,
    #[serde(default)]
    pub token_usage: TokenUsage,
    /// Transcript position (lines or messages) already condensed into a checkpoint.
    #[serde(default)]
    pub checkpoint_transcript_start: usize,
    #[serde(default)]
    pub step_count: u32,
    /// Ordered set of repo-relative paths touched since the last checkpoint.
    #[serde(default)]
    pub files_touched: Vec<String>,
    #[serde(default)]
    pub transcript_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub turn_prompts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_checkpoint: Option<PendingCheckpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint_id: Option<CheckpointId>,

    // Deprecated aliases of `checkpoint_transcript_start`, read for old records.
    /// Turn-scoped offset written by older versions.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub condensed_transcript_lines: usize,
    /// Session-scoped offset written by older versions.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub transcript_lines_at_start: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            session_id: session_id.into(),
            worktree_path: String::new(),
            base_commit: String::new(),
            started_at: now,
            ended_at: None,
            last_interaction_time: Some(now),
            first_prompt: String::new(),
            agent_type: String::new(),
            phase: SessionPhase::Idle,
            token_usage: TokenUsage::default(),
            checkpoint_transcript_start: 0,
            step_count: 0,
            files_touched: Vec::new(),
            transcript_ref: String::new(),
            previous_session_id: None,
            parent_session_id: None,
            turn_prompts: Vec::new(),
            pending_checkpoint: None,
            last_checkpoint_id: None,
            condensed_transcript_lines: 0,
            transcript_lines_at_start: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    pub fn is_subagent(&self) -> bool {
        self.parent_session_id.is_some()
    }

    /// Stale once the last interaction is at least `threshold` old.
    /// Records without an interaction time never expire.
    pub fn is_stale(&self, now: OffsetDateTime, threshold: Duration) -> bool {
        match self.last_interaction_time {
            Some(last) => now - last >= threshold,
            None => false,
        }
    }

    /// Insert paths keeping first-seen order and uniqueness.
    pub fn add_files_touched<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for p in paths {
            let p = p.as_ref();
            if !p.is_empty() && !self.files_touched.iter().any(|f| f == p) {
                self.files_touched.push(p.to_string());
            }
        }
    }

    /// Move the watermark forward. Never moves it back.
    pub fn advance_transcript_start(&mut self, position: usize) {
        if position > self.checkpoint_transcript_start {
            self.checkpoint_transcript_start = position;
        }
    }

    pub fn touch(&mut self, now: OffsetDateTime) {
        self.last_interaction_time = Some(now);
    }

    /// Fold deprecated offset fields into `checkpoint_transcript_start`.
    /// The current field wins when set; otherwise the turn-scoped alias wins
    /// over the session-scoped one. Returns true when anything changed.
    pub fn migrate_deprecated_fields(&mut self) -> bool {
        let had_deprecated =
            self.condensed_transcript_lines != 0 || self.transcript_lines_at_start != 0;
        if self.checkpoint_transcript_start == 0 {
            if self.condensed_transcript_lines > 0 {
                self.checkpoint_transcript_start = self.condensed_transcript_lines;
            } else if self.transcript_lines_at_start > 0 {
                self.checkpoint_transcript_start = self.transcript_lines_at_start;
            }
        }
        self.condensed_transcript_lines = 0;
        self.transcript_lines_at_start = 0;
        had_deprecated
    }
}

/// Session state files under a single directory, one per session id.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
    stale_after: Duration,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let secs = std::env::var("ENTIRE_STALE_SESSION_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(STALE_SESSION_SECS);
        Self {
            dir: dir.into(),
            stale_after: Duration::seconds(secs),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for `session_id`. Bytes outside `[A-Za-z0-9._-]` are
    /// percent-encoded, so distinct ids never share a file.
    fn path_for(&self, session_id: &str) -> PathBuf {
        let mut name = String::with_capacity(session_id.len() + 5);
        for b in session_id.bytes() {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.') {
                name.push(char::from(b));
            } else {
                name.push_str(&format!("%{b:02X}"));
            }
        }
        name.push_str(".json");
        self.dir.join(name)
    }

    pub fn save(&self, state: &SessionState) -> anyhow::Result<()> {
        if state.session_id.is_empty() {
            anyhow::bail!("refusing to save session state without a session id");
        }
        let data = serde_json::to_string_pretty(state)?;
        crate::write_atomic(&self.path_for(&state.session_id), data.as_bytes())
    }

    /// Load a session. Missing, malformed, and stale records all come back as
    /// `None`; stale ones are deleted on the way.
    pub fn load(&self, session_id: &str) -> anyhow::Result<Option<SessionState>> {
        if session_id.is_empty() {
            return Ok(None);
        }
        let path = self.path_for(session_id);
        let content = match fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(self.decode(&path, &content, OffsetDateTime::now_utc()))
    }

    /// Undecodable bytes and records filed under another session's name are
    /// both malformed.
    fn decode(&self, path: &Path, content: &[u8], now: OffsetDateTime) -> Option<SessionState> {
        let mut state: SessionState = match serde_json::from_slice(content) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring malformed session state");
                return None;
            }
        };
        if self.path_for(&state.session_id) != path {
            tracing::warn!(
                path = %path.display(),
                session_id = %state.session_id,
                "ignoring session state stored under another id"
            );
            return None;
        }
        if state.is_stale(now, self.stale_after) {
            tracing::info!(session_id = %state.session_id, "evicting stale session state");
            if let Err(e) = fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove stale session state");
            }
            return None;
        }
        state.migrate_deprecated_fields();
        Some(state)
    }

    /// All live sessions, oldest first. Stale records are deleted.
    pub fn list(&self) -> anyhow::Result<Vec<SessionState>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let now = OffsetDateTime::now_utc();
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(content) = fs::read(&path) else {
                continue;
            };
            if let Some(state) = self.decode(&path, &content, now) {
                out.push(state);
            }
        }
        out.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(out)
    }

    pub fn delete(&self, session_id: &str) -> anyhow::Result<()> {
        match fs::remove_file(self.path_for(session_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Subagent records spawned by `parent_id`.
    pub fn subagents_of(&self, parent_id: &str) -> anyhow::Result<Vec<SessionState>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|s| s.parent_session_id.as_deref() == Some(parent_id))
            .collect())
    }

    /// The session's own usage with every subagent's usage nested beneath it.
    pub fn aggregated_token_usage(&self, state: &SessionState) -> anyhow::Result<TokenUsage> {
        let mut usage = state.token_usage.clone();
        for sub in self.subagents_of(&state.session_id)? {
            let sub_usage = self.aggregated_token_usage(&sub)?;
            if !sub_usage.is_empty() {
                usage.add_subagent(&sub_usage);
            }
        }
        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path().join("sessions"))
            .with_stale_after(Duration::seconds(STALE_SESSION_SECS));
        (tmp, store)
    }

    #[test]
    fn save_load_delete() {
        let (_tmp, store) = store();
        let mut s = SessionState::new("sess-1", OffsetDateTime::now_utc());
        s.agent_type = "Claude Code".into();
        s.add_files_touched(["src/a.rs", "src/b.rs", "src/a.rs"]);
        store.save(&s).unwrap();

        let loaded = store.load("sess-1").unwrap().unwrap();
        assert_eq!(loaded.files_touched, vec!["src/a.rs", "src/b.rs"]);
        assert_eq!(loaded.agent_type, "Claude Code");

        store.delete("sess-1").unwrap();
        assert!(store.load("sess-1").unwrap().is_none());
        store.delete("sess-1").unwrap();
    }

    #[test]
    fn missing_and_malformed_are_none() {
        let (_tmp, store) = store();
        assert!(store.load("nope").unwrap().is_none());
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join("broken.json"), "{not json").unwrap();
        assert!(store.load("broken").unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn staleness_boundary() {
        let (_tmp, store) = store();
        let now = OffsetDateTime::now_utc();

        let mut fresh = SessionState::new("fresh", now);
        fresh.last_interaction_time =
            Some(now - Duration::seconds(STALE_SESSION_SECS) + Duration::hours(1));
        store.save(&fresh).unwrap();

        let mut old = SessionState::new("old", now);
        old.last_interaction_time = Some(now - Duration::weeks(2));
        store.save(&old).unwrap();

        let mut timeless = SessionState::new("timeless", now - Duration::weeks(52));
        timeless.last_interaction_time = None;
        store.save(&timeless).unwrap();

        assert!(store.load("fresh").unwrap().is_some());
        assert!(store.load("old").unwrap().is_none());
        assert!(!store.dir().join("old.json").exists());
        assert!(store.load("timeless").unwrap().is_some());
    }

    #[test]
    fn list_evicts_stale_records() {
        let (_tmp, store) = store();
        let now = OffsetDateTime::now_utc();
        store.save(&SessionState::new("a", now)).unwrap();
        let mut old = SessionState::new("b", now);
        old.last_interaction_time = Some(now - Duration::weeks(3));
        store.save(&old).unwrap();

        let ids: Vec<String> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids, vec!["a"]);
        assert!(!store.dir().join("b.json").exists());
    }

    fn write_raw(store: &SessionStore, id: &str, extra: &str) {
        fs::create_dir_all(store.dir()).unwrap();
        let now = time::format_description::well_known::Rfc3339;
        let ts = OffsetDateTime::now_utc().format(&now).unwrap();
        let json = format!(
            r#"{{"session_id":"{id}","started_at":"{ts}","last_interaction_time":"{ts}"{extra}}}"#
        );
        fs::write(store.dir().join(format!("{id}.json")), json).unwrap();
    }

    #[test]
    fn migration_precedence() {
        let (_tmp, store) = store();
        write_raw(&store, "cur", r#","checkpoint_transcript_start":9,"condensed_transcript_lines":4,"transcript_lines_at_start":2"#);
        write_raw(&store, "turn", r#","condensed_transcript_lines":4,"transcript_lines_at_start":2"#);
        write_raw(&store, "sess", r#","transcript_lines_at_start":2"#);

        let cur = store.load("cur").unwrap().unwrap();
        assert_eq!(cur.checkpoint_transcript_start, 9);
        let turn = store.load("turn").unwrap().unwrap();
        assert_eq!(turn.checkpoint_transcript_start, 4);
        let sess = store.load("sess").unwrap().unwrap();
        assert_eq!(sess.checkpoint_transcript_start, 2);
        for s in [&cur, &turn, &sess] {
            assert_eq!(s.condensed_transcript_lines, 0);
            assert_eq!(s.transcript_lines_at_start, 0);
        }
    }

    #[test]
    fn migration_is_idempotent_across_save() {
        let (_tmp, store) = store();
        write_raw(&store, "m", r#","condensed_transcript_lines":12"#);

        let first = store.load("m").unwrap().unwrap();
        store.save(&first).unwrap();
        let raw = fs::read_to_string(store.dir().join("m.json")).unwrap();
        assert!(!raw.contains("condensed_transcript_lines"));

        let second = store.load("m").unwrap().unwrap();
        assert_eq!(first.checkpoint_transcript_start, 12);
        assert_eq!(second.checkpoint_transcript_start, 12);
        assert_eq!(second.condensed_transcript_lines, 0);
        assert_eq!(second.transcript_lines_at_start, 0);
    }

    #[test]
    fn watermark_is_monotonic() {
        let mut s = SessionState::new("w", OffsetDateTime::now_utc());
        for pos in [3, 10, 7, 10, 0, 15] {
            let before = s.checkpoint_transcript_start;
            s.advance_transcript_start(pos);
            assert!(s.checkpoint_transcript_start >= before);
        }
        assert_eq!(s.checkpoint_transcript_start, 15);
    }

    #[test]
    fn session_ids_are_encoded_into_file_names() {
        let (_tmp, store) = store();
        let s = SessionState::new("../escape/attempt", OffsetDateTime::now_utc());
        store.save(&s).unwrap();
        assert!(store.dir().join("..%2Fescape%2Fattempt.json").exists());
        assert_eq!(
            store.load("../escape/attempt").unwrap().unwrap().session_id,
            "../escape/attempt"
        );
    }

    #[test]
    fn similar_ids_do_not_collide() {
        let (_tmp, store) = store();
        let now = OffsetDateTime::now_utc();
        let mut slash = SessionState::new("a/b", now);
        slash.first_prompt = "slash".into();
        let mut underscore = SessionState::new("a_b", now);
        underscore.first_prompt = "underscore".into();
        let mut percent = SessionState::new("a%2Fb", now);
        percent.first_prompt = "percent".into();
        for s in [&slash, &underscore, &percent] {
            store.save(s).unwrap();
        }

        assert_eq!(store.load("a/b").unwrap().unwrap().first_prompt, "slash");
        assert_eq!(store.load("a_b").unwrap().unwrap().first_prompt, "underscore");
        assert_eq!(store.load("a%2Fb").unwrap().unwrap().first_prompt, "percent");
        assert_eq!(store.list().unwrap().len(), 3);
    }

    #[test]
    fn record_filed_under_another_id_is_ignored() {
        let (_tmp, store) = store();
        store
            .save(&SessionState::new("real", OffsetDateTime::now_utc()))
            .unwrap();
        fs::copy(store.dir().join("real.json"), store.dir().join("impostor.json")).unwrap();

        assert!(store.load("impostor").unwrap().is_none());
        let ids: Vec<String> = store.list().unwrap().into_iter().map(|s| s.session_id).collect();
        assert_eq!(ids, vec!["real"]);
    }

    #[test]
    fn invalid_utf8_record_is_no_session() {
        let (_tmp, store) = store();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join("bad.json"), b"{\"session_id\":\"bad\xff\xfe\"}").unwrap();
        assert!(store.load("bad").unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn aggregates_subagent_tokens_at_read_time() {
        let (_tmp, store) = store();
        let now = OffsetDateTime::now_utc();
        let mut parent = SessionState::new("p", now);
        parent.token_usage.input_tokens = 100;
        store.save(&parent).unwrap();

        let mut child = SessionState::new("p--a", now);
        child.parent_session_id = Some("p".into());
        child.token_usage.output_tokens = 40;
        child.token_usage.api_call_count = 2;
        store.save(&child).unwrap();

        let mut grandchild = SessionState::new("p--a--b", now);
        grandchild.parent_session_id = Some("p--a".into());
        grandchild.token_usage.input_tokens = 5;
        store.save(&grandchild).unwrap();

        let usage = store.aggregated_token_usage(&parent).unwrap();
        assert_eq!(usage.total_tokens(), 145);
        let sub = usage.subagent_tokens.as_ref().unwrap();
        assert_eq!(sub.output_tokens, 40);
        assert_eq!(sub.subagent_tokens.as_ref().unwrap().input_tokens, 5);
    }
}
