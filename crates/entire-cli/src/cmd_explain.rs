use std::io::Write;
use std::path::Path;

use entire_core::CheckpointId;
use entire_transcript::EntryKind;

use crate::workspace::Workspace;

/// `entire explain <id> [--json] [--transcript]`
pub fn execute(cwd: &Path, id: &str, json: bool, transcript: bool) -> anyhow::Result<()> {
    let id = CheckpointId::parse(id)?;
    let ws = Workspace::discover(cwd)?;
    let engine = ws.engine()?;
    let payload = engine.repo().checkpoints().read(&id)?;

    if transcript {
        std::io::stdout().write_all(&payload.transcript)?;
        return Ok(());
    }
    let meta = &payload.metadata;
    if json {
        println!("{}", serde_json::to_string_pretty(meta)?);
        return Ok(());
    }

    println!("Checkpoint {}", meta.checkpoint_id);
    println!("  session    {}", meta.session_id);
    println!("  agent      {}", meta.agent_type);
    println!("  strategy   {}", meta.strategy);
    println!("  created    {}", entire_core::format_rfc3339(meta.created_at));
    println!("  commit     {}", meta.snapshot_commit);
    println!(
        "  transcript {} records {}..{}",
        meta.transcript_format, meta.transcript_start, meta.transcript_end
    );
    if let Some(usage) = &meta.token_usage {
        println!(
            "  tokens     {} ({} API calls)",
            usage.total_tokens(),
            usage.api_call_count
        );
    }
    println!("  files:");
    for f in &meta.files_touched {
        println!("    {f}");
    }

    if let Some(summary) = &payload.summary {
        println!();
        println!("Intent:  {}", summary.intent);
        println!("Outcome: {}", summary.outcome);
        for item in &summary.open_items {
            println!("  - {item}");
        }
    }

    if !payload.condensed.is_empty() {
        println!();
        for entry in &payload.condensed {
            match entry.kind {
                EntryKind::User => println!("> {}", entry.text),
                EntryKind::Assistant => println!("{}", entry.text),
                EntryKind::Tool => println!(
                    "  [{}] {}",
                    entry.tool_name.as_deref().unwrap_or("tool"),
                    entry.text
                ),
            }
        }
    }
    Ok(())
}
