use std::path::{Path, PathBuf};
use std::sync::Arc;

use entire_agent::{Agent, AgentRegistry, ClaudeCodeAgent};
use entire_checkpoint::Git;
use entire_core::{CheckpointId, Event, EventType, StrategyKind};
use entire_store::SessionState;
use serde_json::{json, Value};

use crate::{Engine, Repo};

/// A throwaway repository with one commit, an engine over it, and a
/// separate directory for Claude-style transcripts.
pub struct Fixture {
    _repo_dir: tempfile::TempDir,
    transcripts: tempfile::TempDir,
    pub engine: Engine,
    pub agent: Arc<dyn Agent>,
}

impl Fixture {
    pub fn new(kind: StrategyKind) -> Self {
        let repo_dir = tempfile::tempdir().unwrap();
        let git = Git::new(repo_dir.path());
        git.run(&["init", "-q", "-b", "main"]).unwrap();
        git.run(&["config", "user.email", "test@test.com"]).unwrap();
        git.run(&["config", "user.name", "Test"]).unwrap();
        git.run(&["config", "commit.gpgsign", "false"]).unwrap();
        std::fs::write(repo_dir.path().join("README"), "hi\n").unwrap();
        git.run(&["add", "-A"]).unwrap();
        git.run(&["commit", "-q", "-m", "init"]).unwrap();

        let repo = Repo::open(git, AgentRegistry::builtin()).unwrap();
        Self {
            _repo_dir: repo_dir,
            transcripts: tempfile::tempdir().unwrap(),
            engine: Engine::new(repo, kind),
            agent: Arc::new(ClaudeCodeAgent::new()),
        }
    }

    pub fn repo(&self) -> &Repo {
        self.engine.repo()
    }

    pub fn abs(&self, path: &str) -> String {
        self.repo().git().workdir().join(path).to_string_lossy().into_owned()
    }

    pub fn write(&self, path: &str, content: &str) {
        let full = self.repo().git().workdir().join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }

    pub fn read(&self, path: &str) -> Option<String> {
        std::fs::read_to_string(self.repo().git().workdir().join(path)).ok()
    }

    pub fn stage(&self, paths: &[&str]) {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.repo().git().run(&args).unwrap();
    }

    pub fn message_file(&self, message: &str) -> PathBuf {
        let path = self.transcripts.path().join("COMMIT_EDITMSG");
        std::fs::write(&path, message).unwrap();
        path
    }

    /// `git commit -F <msg_file>` without hooks; returns the new HEAD.
    pub fn commit(&self, msg_file: &Path) -> String {
        let file = msg_file.to_string_lossy().into_owned();
        self.repo()
            .git()
            .run(&["commit", "-q", "--no-verify", "-F", &file])
            .unwrap();
        self.repo().git().head().unwrap().unwrap()
    }

    pub fn transcripts_dir(&self) -> &Path {
        self.transcripts.path()
    }

    pub fn transcript_path(&self, session: &str) -> String {
        self.transcripts
            .path()
            .join(format!("{session}.jsonl"))
            .to_string_lossy()
            .into_owned()
    }

    pub fn append_transcript(&self, session: &str, records: &[Value]) {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.transcript_path(session))
            .unwrap();
        file.write_all(&jsonl(records)).unwrap();
    }

    pub fn event(&self, event_type: EventType, session: &str) -> Event {
        Event::new(event_type, session).with_session_ref(self.transcript_path(session))
    }

    pub fn emit(&self, event_type: EventType, session: &str) -> Option<CheckpointId> {
        let ev = self.event(event_type, session);
        self.engine.handle_event(self.agent.as_ref(), &ev).unwrap()
    }

    pub fn start_turn(&self, session: &str, prompt: &str) {
        if self.repo().sessions().load(session).unwrap().is_none() {
            self.emit(EventType::SessionStart, session);
        }
        let ev = self.event(EventType::TurnStart, session).with_prompt(prompt);
        self.engine.handle_event(self.agent.as_ref(), &ev).unwrap();
    }

    pub fn state(&self, session: &str) -> SessionState {
        self.repo().sessions().load(session).unwrap().unwrap()
    }
}

pub fn jsonl(records: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for r in records {
        out.extend_from_slice(serde_json::to_string(r).unwrap().as_bytes());
        out.push(b'\n');
    }
    out
}

pub fn user(text: &str) -> Value {
    json!({"type": "user", "message": {"role": "user", "content": text}})
}

/// An assistant message that writes `file_path` with the Write tool.
pub fn write_tool(message_id: &str, file_path: &str) -> Value {
    json!({
        "type": "assistant",
        "message": {
            "id": message_id,
            "role": "assistant",
            "content": [
                {"type": "tool_use", "name": "Write", "input": {"file_path": file_path, "content": "..."}}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }
    })
}
