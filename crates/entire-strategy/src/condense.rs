//! Turning a session's open work into a permanent checkpoint.

use anyhow::Context;
use entire_agent::Agent;
use entire_checkpoint::CheckpointPayload;
use entire_core::{
    content_sha256, now_utc, CheckpointId, CheckpointMetadata, StrategyKind, TokenUsage,
    METADATA_SCHEMA_VERSION,
};
use entire_store::{SessionPhase, SessionState};
use entire_transcript::TranscriptFormat;

use crate::Repo;

pub(crate) struct CondenseRequest<'a> {
    pub checkpoint_id: CheckpointId,
    /// Commit whose tree holds the checkpointed file contents.
    pub snapshot_commit: &'a str,
    pub files: Vec<String>,
    pub strategy: StrategyKind,
}

/// Files the session touched plus those of its subagents, first-seen order.
pub(crate) fn session_files(repo: &Repo, state: &SessionState) -> anyhow::Result<Vec<String>> {
    let mut files = state.files_touched.clone();
    for sub in repo.sessions().subagents_of(&state.session_id)? {
        for f in sub.files_touched {
            if !files.contains(&f) {
                files.push(f);
            }
        }
    }
    Ok(files)
}

/// First line of the latest prompt, used as a snapshot subject.
pub(crate) fn turn_subject(state: &SessionState) -> String {
    let prompt = state
        .turn_prompts
        .last()
        .map(String::as_str)
        .unwrap_or(&state.first_prompt);
    let line = prompt.lines().next().unwrap_or("").trim();
    let mut subject: String = line.chars().take(72).collect();
    if subject.len() < line.len() {
        subject.push_str("...");
    }
    subject
}

/// Write a checkpoint covering the transcript from the session's watermark to
/// its current end, then move the watermark there.
///
/// Finished subagents are folded in: their usage is nested under the
/// checkpoint's token usage and their records are dropped.
pub(crate) fn condense(
    repo: &Repo,
    agent: Option<&dyn Agent>,
    state: &mut SessionState,
    req: CondenseRequest<'_>,
) -> anyhow::Result<CheckpointMetadata> {
    let transcript = match agent {
        Some(agent) => repo.transcript(agent, &state.transcript_ref)?,
        None => None,
    }
    .unwrap_or_default();
    let format = agent
        .map(|a| a.transcript_format())
        .unwrap_or(TranscriptFormat::Jsonl);

    let end = format
        .position(&transcript)
        .context("counting transcript records")?;
    // A replaced transcript can be shorter than the watermark.
    let start = state.checkpoint_transcript_start.min(end);

    let (condensed, mut usage) = match agent {
        Some(agent) => {
            let condensed = match agent.as_transcript_analyzer() {
                Some(a) => a.condense(&transcript, start)?,
                None => Vec::new(),
            };
            let usage = match agent.as_token_calculator() {
                Some(c) => c.token_usage(&transcript, start)?,
                None => TokenUsage::default(),
            };
            (condensed, usage)
        }
        None => (Vec::new(), TokenUsage::default()),
    };
    let own_usage = usage.clone();

    let subagents = repo.sessions().subagents_of(&state.session_id)?;
    for sub in &subagents {
        let sub_usage = repo.sessions().aggregated_token_usage(sub)?;
        if !sub_usage.is_empty() {
            usage.add_subagent(&sub_usage);
        }
    }

    let mut prompts = state.turn_prompts.join("\n");
    if !prompts.is_empty() {
        prompts.push('\n');
    }

    let metadata = CheckpointMetadata {
        schema_version: METADATA_SCHEMA_VERSION,
        checkpoint_id: req.checkpoint_id.clone(),
        session_id: state.session_id.clone(),
        agent_type: state.agent_type.clone(),
        strategy: req.strategy,
        created_at: now_utc(),
        files_touched: req.files,
        snapshot_commit: req.snapshot_commit.to_string(),
        base_commit: state.base_commit.clone(),
        checkpoints_count: state.step_count + 1,
        transcript_format: format.label(),
        transcript_start: start,
        transcript_end: end,
        transcript_sha256: content_sha256(&transcript),
        token_usage: (!usage.is_empty()).then(|| usage.clone()),
    };
    repo.checkpoints().write(&CheckpointPayload {
        metadata: metadata.clone(),
        transcript,
        condensed,
        prompts,
        summary: None,
    })?;

    state.advance_transcript_start(end);
    state.step_count += 1;
    state.turn_prompts.clear();
    state.last_checkpoint_id = Some(req.checkpoint_id);
    state.token_usage.add(&own_usage);
    if let Some(nested) = &usage.subagent_tokens {
        state.token_usage.add_subagent(nested);
    }
    for sub in subagents.iter().filter(|s| s.phase == SessionPhase::Ended) {
        repo.sessions().delete(&sub.session_id)?;
    }

    tracing::info!(
        checkpoint_id = %metadata.checkpoint_id,
        session_id = %state.session_id,
        transcript_start = start,
        transcript_end = end,
        files = metadata.files_touched.len(),
        "checkpoint condensed"
    );
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_is_first_line_of_latest_prompt() {
        let mut state = SessionState::new("s", now_utc());
        state.first_prompt = "first".into();
        assert_eq!(turn_subject(&state), "first");
        state.turn_prompts = vec!["one".into(), "fix the parser\nthen tests".into()];
        assert_eq!(turn_subject(&state), "fix the parser");
        state.turn_prompts = vec!["x".repeat(100)];
        assert_eq!(turn_subject(&state), format!("{}...", "x".repeat(72)));
    }
}
