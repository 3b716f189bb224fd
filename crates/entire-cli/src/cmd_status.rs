use std::path::Path;

use entire_store::SessionPhase;

use crate::githooks;
use crate::workspace::Workspace;

/// `entire status`
pub fn execute(cwd: &Path) -> anyhow::Result<()> {
    let ws = Workspace::discover(cwd)?;
    let enabled = if ws.settings.enabled { "enabled" } else { "disabled" };
    println!("Entire {enabled} ({})", ws.settings.strategy);

    let git_hooks = if githooks::is_installed(&ws.git) { "installed" } else { "missing" };
    println!("  git hooks     {git_hooks}");
    if let Some(agent) = ws.registry.get(&ws.settings.agent) {
        if let Some(installer) = agent.as_hook_installer() {
            let state = if installer.hooks_installed(ws.git.workdir()) {
                "installed"
            } else {
                "missing"
            };
            println!("  agent hooks   {state} ({})", agent.agent_type());
        }
    }

    let engine = ws.engine()?;
    let repo = engine.repo();
    let sessions: Vec<_> = repo
        .sessions_here()?
        .into_iter()
        .filter(|s| !s.is_subagent())
        .collect();
    if sessions.is_empty() {
        println!("No sessions.");
    } else {
        println!("Sessions:");
        for s in &sessions {
            let usage = repo.sessions().aggregated_token_usage(s)?;
            let phase = match s.phase {
                SessionPhase::Idle => "idle",
                SessionPhase::Active => "active",
                SessionPhase::Ended => "ended",
            };
            println!(
                "  {}  {phase:<6}  {}  {} files  {} tokens  {} checkpoints",
                s.session_id,
                s.agent_type,
                s.files_touched.len(),
                usage.total_tokens(),
                s.step_count
            );
            if !s.first_prompt.is_empty() {
                let prompt: String = s.first_prompt.chars().take(60).collect();
                println!("      {prompt}");
            }
        }
    }

    println!("Checkpoints: {}", repo.checkpoints().list()?.len());
    Ok(())
}
