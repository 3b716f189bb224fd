//! Hook entrypoints. Nothing here may fail the host: agent hooks and git
//! hooks log their errors and exit 0.

use std::io::Read;
use std::path::Path;

use anyhow::anyhow;

use crate::workspace::Workspace;

/// `entire hook <agent> <hook>`: read the payload from stdin and apply it.
pub fn agent_hook(cwd: &Path, agent_name: &str, hook_name: &str) -> anyhow::Result<()> {
    let mut stdin = Vec::new();
    if let Err(e) = std::io::stdin().read_to_end(&mut stdin) {
        debug_log(&format!("STDIN READ ERROR: {e}"));
        return Ok(());
    }
    debug_log(&format!(
        "{agent_name} {hook_name} STDIN({} bytes): {}",
        stdin.len(),
        String::from_utf8_lossy(&stdin[..stdin.len().min(200)])
    ));
    guarded(hook_name, || dispatch_agent_hook(cwd, agent_name, hook_name, &stdin))
}

fn dispatch_agent_hook(
    cwd: &Path,
    agent_name: &str,
    hook_name: &str,
    stdin: &[u8],
) -> anyhow::Result<()> {
    let ws = Workspace::discover(cwd)?;
    if !ws.settings.enabled {
        return Ok(());
    }
    let agent = ws
        .registry
        .get(agent_name)
        .ok_or_else(|| anyhow!("unknown agent {agent_name:?}"))?;
    let Some(event) = agent.parse_hook_event(hook_name, stdin)? else {
        debug_log(&format!("{hook_name}: no lifecycle event"));
        return Ok(());
    };
    let engine = ws.engine()?;
    if let Some(id) = engine.handle_event(agent.as_ref(), &event)? {
        debug_log(&format!("{hook_name}: checkpoint {id}"));
    }
    Ok(())
}

/// `entire git-hook prepare-commit-msg <file> [source]`
pub fn prepare_commit_msg(cwd: &Path, msg_file: &Path, source: Option<&str>) -> anyhow::Result<()> {
    guarded("prepare-commit-msg", || {
        let ws = Workspace::discover(cwd)?;
        if !ws.settings.enabled {
            return Ok(());
        }
        let interactive = is_interactive();
        if let Some(id) = ws.engine()?.prepare_commit_msg(msg_file, source, interactive)? {
            debug_log(&format!("prepare-commit-msg: trailer {id} (interactive={interactive})"));
        }
        Ok(())
    })
}

/// `entire git-hook commit-msg <file>`
pub fn commit_msg(cwd: &Path, msg_file: &Path) -> anyhow::Result<()> {
    guarded("commit-msg", || {
        let ws = Workspace::discover(cwd)?;
        if !ws.settings.enabled {
            return Ok(());
        }
        ws.engine()?.commit_msg(msg_file)?;
        Ok(())
    })
}

/// `entire git-hook post-commit`
pub fn post_commit(cwd: &Path) -> anyhow::Result<()> {
    guarded("post-commit", || {
        let ws = Workspace::discover(cwd)?;
        if !ws.settings.enabled {
            return Ok(());
        }
        if let Some(id) = ws.engine()?.post_commit()? {
            debug_log(&format!("post-commit: checkpoint {id}"));
        }
        Ok(())
    })
}

fn guarded(hook: &str, f: impl FnOnce() -> anyhow::Result<()>) -> anyhow::Result<()> {
    if let Err(e) = f() {
        debug_log(&format!("{hook} ERROR: {e:#}"));
        tracing::warn!(hook, error = %format!("{e:#}"), "hook failed");
    }
    Ok(())
}

/// A controlling terminal means a person is at the keyboard.
fn is_interactive() -> bool {
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/tty")
        .is_ok()
}

fn debug_log(msg: &str) {
    if std::env::var_os("ENTIRE_DEBUG").is_none() {
        return;
    }
    use std::io::Write;
    let log_path = std::env::temp_dir().join("entire-hook-debug.log");
    if let Ok(mut f) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        let ts = entire_core::format_rfc3339(entire_core::now_utc());
        let _ = writeln!(f, "[{ts}] {msg}");
    }
}
