//! Session lifecycle: normalized events in, session state and checkpoints out.

use std::path::Path;

use entire_agent::claude::SUBAGENT_TRANSCRIPT_KEY;
use entire_agent::Agent;
use entire_checkpoint::{RewindError, RewindPoint, RewindReport};
use entire_core::{CheckpointId, Event, EventType, StrategyKind};
use entire_store::{SessionPhase, SessionState};
use serde_json::Value;
use time::OffsetDateTime;

use crate::condense::session_files;
use crate::{commit, strategy_for, CommitStrategy, Repo};

pub struct Engine {
    repo: Repo,
    strategy: Box<dyn CommitStrategy>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("repo", &self.repo)
            .field("strategy", &self.strategy.kind())
            .finish()
    }
}

impl Engine {
    pub fn new(repo: Repo, kind: StrategyKind) -> Self {
        Self::with_strategy(repo, strategy_for(kind))
    }

    pub fn with_strategy(repo: Repo, strategy: Box<dyn CommitStrategy>) -> Self {
        Self { repo, strategy }
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy.kind()
    }

    // ── Agent events ──

    /// Apply one lifecycle event. Returns the permanent checkpoint written,
    /// if the event produced one.
    pub fn handle_event(
        &self,
        agent: &dyn Agent,
        event: &Event,
    ) -> anyhow::Result<Option<CheckpointId>> {
        tracing::debug!(
            event = event.event_type.as_str(),
            session_id = %event.session_id,
            agent = agent.name(),
            "lifecycle event"
        );
        match event.event_type {
            EventType::SessionStart => self.session_start(agent, event).map(|_| None),
            EventType::TurnStart => self.turn_start(agent, event).map(|_| None),
            EventType::TurnEnd | EventType::Compaction => self.turn_boundary(agent, event),
            EventType::SessionEnd => self.session_end(event).map(|_| None),
            EventType::SubagentStart => self.subagent_start(agent, event).map(|_| None),
            EventType::SubagentEnd => self.subagent_end(agent, event).map(|_| None),
        }
    }

    fn new_state(
        &self,
        agent: &dyn Agent,
        session_id: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<SessionState> {
        let mut state = SessionState::new(session_id, now);
        state.agent_type = agent.agent_type().to_string();
        state.worktree_path = self.repo.git().workdir().to_string_lossy().into_owned();
        state.base_commit = self.repo.git().head()?.unwrap_or_default();
        Ok(state)
    }

    /// Hooks may be installed mid-session, so any event can be the first one seen.
    fn load_or_create(&self, agent: &dyn Agent, event: &Event) -> anyhow::Result<SessionState> {
        let mut state = match self.repo.sessions().load(&event.session_id)? {
            Some(state) => state,
            None => self.new_state(agent, &event.session_id, event.timestamp)?,
        };
        if !event.session_ref.is_empty() {
            state.transcript_ref = event.session_ref.clone();
        }
        Ok(state)
    }

    fn session_start(&self, agent: &dyn Agent, event: &Event) -> anyhow::Result<()> {
        let mut state = self.load_or_create(agent, event)?;
        if state.phase == SessionPhase::Ended {
            state.phase = SessionPhase::Idle;
            state.ended_at = None;
        }

        if let Some(prev_id) = event
            .previous_session_id
            .as_deref()
            .filter(|p| !p.is_empty() && *p != event.session_id)
        {
            state.previous_session_id = Some(prev_id.to_string());
            if let Some(prev) = self.repo.sessions().load(prev_id)? {
                // The new transcript starts from scratch; everything else carries over.
                state.add_files_touched(&prev.files_touched);
                state.turn_prompts.extend(prev.turn_prompts);
                state.token_usage.add(&prev.token_usage);
                if !prev.base_commit.is_empty() {
                    state.base_commit = prev.base_commit;
                }
                if state.first_prompt.is_empty() {
                    state.first_prompt = prev.first_prompt;
                }
                if state.pending_checkpoint.is_none() {
                    state.pending_checkpoint = prev.pending_checkpoint;
                }
                self.repo.sessions().delete(prev_id)?;
                tracing::info!(session_id = %state.session_id, previous = prev_id, "session continued");
            }
        }

        state.touch(event.timestamp);
        self.repo.sessions().save(&state)
    }

    fn turn_start(&self, agent: &dyn Agent, event: &Event) -> anyhow::Result<()> {
        let mut state = self.load_or_create(agent, event)?;
        state.phase = SessionPhase::Active;
        state.ended_at = None;

        let prompt = event.prompt.trim();
        if !prompt.is_empty() {
            if state.first_prompt.is_empty() {
                state.first_prompt = prompt.to_string();
            }
            state.turn_prompts.push(prompt.to_string());
        }

        // Nothing open yet: snapshot against whatever the user has committed since.
        if state.files_touched.is_empty() && state.pending_checkpoint.is_none() {
            if let Some(head) = self.repo.git().head()? {
                state.base_commit = head;
            }
        }

        state.touch(event.timestamp);
        self.repo.sessions().save(&state)
    }

    fn turn_boundary(
        &self,
        agent: &dyn Agent,
        event: &Event,
    ) -> anyhow::Result<Option<CheckpointId>> {
        let mut state = self.load_or_create(agent, event)?;

        if let Some(transcript) = self.repo.transcript(agent, &state.transcript_ref)? {
            if let Some(analyzer) = agent.as_transcript_analyzer() {
                let files = self.repo.relative_paths(
                    analyzer.modified_files(&transcript, state.checkpoint_transcript_start)?,
                );
                state.add_files_touched(&files);
            }
        }

        let checkpoint = self
            .strategy
            .on_turn_boundary(&self.repo, agent, &mut state, event)?;

        if event.event_type == EventType::TurnEnd {
            state.phase = SessionPhase::Idle;
        }
        state.touch(event.timestamp);
        self.repo.sessions().save(&state)?;
        Ok(checkpoint)
    }

    fn session_end(&self, event: &Event) -> anyhow::Result<()> {
        let Some(mut state) = self.repo.sessions().load(&event.session_id)? else {
            return Ok(());
        };
        state.phase = SessionPhase::Ended;
        state.ended_at = Some(event.timestamp);
        state.touch(event.timestamp);
        self.repo.sessions().save(&state)
    }

    fn subagent_state(
        &self,
        agent: &dyn Agent,
        key: &str,
        parent: &SessionState,
        now: OffsetDateTime,
    ) -> anyhow::Result<SessionState> {
        if let Some(state) = self.repo.sessions().load(key)? {
            return Ok(state);
        }
        let mut state = SessionState::new(key, now);
        state.agent_type = agent.agent_type().to_string();
        state.worktree_path = parent.worktree_path.clone();
        state.base_commit = parent.base_commit.clone();
        state.parent_session_id = Some(parent.session_id.clone());
        Ok(state)
    }

    fn subagent_start(&self, agent: &dyn Agent, event: &Event) -> anyhow::Result<()> {
        let Some(key) = event.subagent_key() else {
            tracing::debug!(session_id = %event.session_id, "subagent start without correlation id");
            return Ok(());
        };
        let mut parent = self.load_or_create(agent, event)?;
        let mut sub = self.subagent_state(agent, &key, &parent, event.timestamp)?;
        sub.phase = SessionPhase::Active;
        if let Some(desc) = tool_description(event) {
            sub.first_prompt = desc;
        }
        sub.touch(event.timestamp);
        self.repo.sessions().save(&sub)?;

        parent.touch(event.timestamp);
        self.repo.sessions().save(&parent)
    }

    fn subagent_end(&self, agent: &dyn Agent, event: &Event) -> anyhow::Result<()> {
        let Some(key) = event.subagent_key() else {
            tracing::debug!(session_id = %event.session_id, "subagent end without correlation id");
            return Ok(());
        };
        let mut parent = self.load_or_create(agent, event)?;
        let mut sub = self.subagent_state(agent, &key, &parent, event.timestamp)?;
        if let Some(path) = event.metadata.get(SUBAGENT_TRANSCRIPT_KEY) {
            sub.transcript_ref = path.clone();
        }

        if let Some(transcript) = self.repo.transcript(agent, &sub.transcript_ref)? {
            if let Some(analyzer) = agent.as_transcript_analyzer() {
                let files = self
                    .repo
                    .relative_paths(analyzer.modified_files(&transcript, 0)?);
                sub.add_files_touched(&files);
            }
            if let Some(calc) = agent.as_token_calculator() {
                sub.token_usage = calc.token_usage(&transcript, 0)?;
            }
        }
        sub.phase = SessionPhase::Ended;
        sub.ended_at = Some(event.timestamp);
        sub.touch(event.timestamp);
        self.repo.sessions().save(&sub)?;

        if !sub.files_touched.is_empty() {
            let subject = self.subagent_subject(agent, &parent, event);
            if let Some(snapshot) =
                self.strategy
                    .on_subagent_end(&self.repo, &parent, &sub.files_touched, &subject)?
            {
                tracing::debug!(
                    session_id = %parent.session_id,
                    subagent = %key,
                    commit = %snapshot.commit,
                    "subagent snapshot"
                );
            }
        }

        parent.touch(event.timestamp);
        self.repo.sessions().save(&parent)
    }

    /// The parent's current todo item, else the task description.
    fn subagent_subject(&self, agent: &dyn Agent, parent: &SessionState, event: &Event) -> String {
        let todo = agent.as_transcript_analyzer().and_then(|analyzer| {
            let transcript = self
                .repo
                .transcript(agent, &parent.transcript_ref)
                .ok()
                .flatten()?;
            analyzer.current_todo(&transcript, 0)
        });
        todo.or_else(|| tool_description(event).map(|d| format!("Subagent: {d}")))
            .unwrap_or_else(|| "Subagent finished".to_string())
    }

    // ── Git hooks ──

    pub fn prepare_commit_msg(
        &self,
        msg_file: &Path,
        source: Option<&str>,
        interactive: bool,
    ) -> anyhow::Result<Option<CheckpointId>> {
        commit::prepare_commit_msg(&self.repo, self.strategy.as_ref(), msg_file, source, interactive)
    }

    pub fn commit_msg(&self, msg_file: &Path) -> anyhow::Result<bool> {
        commit::commit_msg(msg_file)
    }

    pub fn post_commit(&self) -> anyhow::Result<Option<CheckpointId>> {
        commit::post_commit(&self.repo, self.strategy.as_ref())
    }

    // ── Rewind ──

    pub fn rewind_points(&self) -> Result<Vec<RewindPoint>, RewindError> {
        self.repo.rewind_engine().list_rewind_points()
    }

    /// Restore the working tree to `target`. Files sessions are still
    /// working on count as changed since every point.
    pub fn rewind(&self, target: &str) -> anyhow::Result<RewindReport> {
        let mut live = Vec::new();
        for state in self.repo.sessions_here()? {
            for f in session_files(&self.repo, &state)? {
                if !live.contains(&f) {
                    live.push(f);
                }
            }
        }
        Ok(self.repo.rewind_engine().rewind(target, &live)?)
    }
}

fn tool_description(event: &Event) -> Option<String> {
    let input = event.tool_input.as_ref()?;
    input
        .get("description")
        .or_else(|| input.get("prompt"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
