use std::path::Path;

use anyhow::anyhow;
use entire_core::StrategyKind;
use serde_json::Value;

use crate::githooks;
use crate::settings::{read_config, write_config};
use crate::workspace::Workspace;

/// Command the installed hooks invoke.
const PROGRAM: &str = "entire";

/// `entire enable [--strategy] [--agent]`
pub fn enable(cwd: &Path, strategy: Option<StrategyKind>, agent: Option<&str>) -> anyhow::Result<()> {
    let ws = Workspace::discover(cwd)?;
    ws.paths.ensure_layout()?;

    let agent_name = agent.unwrap_or(ws.settings.agent.as_str()).to_string();
    let agent = ws.registry.get(&agent_name).ok_or_else(|| {
        anyhow!(
            "unknown agent {agent_name:?} (known: {})",
            ws.registry.names().join(", ")
        )
    })?;
    let strategy = strategy.unwrap_or(ws.settings.strategy);

    let mut config = read_config(&ws.paths.settings_json)?;
    config.insert("enabled".into(), Value::Bool(true));
    config.insert("strategy".into(), Value::String(strategy.as_str().into()));
    config.insert("agent".into(), Value::String(agent_name.clone()));
    write_config(&ws.paths.settings_json, &config)?;

    let git_hooks = githooks::install(&ws.git, PROGRAM)?;
    let agent_hooks = match agent.as_hook_installer() {
        Some(installer) => installer.install_hooks(ws.git.workdir(), PROGRAM)?,
        None => 0,
    };

    println!("Entire enabled ({strategy})");
    println!("  {git_hooks} git hooks installed");
    println!("  {agent_hooks} {} hooks installed", agent.agent_type());
    Ok(())
}

/// `entire disable`: stop capturing and remove every hook we installed.
/// Checkpoints already stored are kept.
pub fn disable(cwd: &Path) -> anyhow::Result<()> {
    let ws = Workspace::discover(cwd)?;
    if ws.paths.is_initialized() {
        let mut config = read_config(&ws.paths.settings_json)?;
        config.insert("enabled".into(), Value::Bool(false));
        write_config(&ws.paths.settings_json, &config)?;
    }

    githooks::uninstall(&ws.git)?;
    for name in ws.registry.names() {
        let Some(agent) = ws.registry.get(name) else {
            continue;
        };
        if let Some(installer) = agent.as_hook_installer() {
            if installer.hooks_installed(ws.git.workdir()) {
                installer.uninstall_hooks(ws.git.workdir())?;
                println!("  removed {} hooks", agent.agent_type());
            }
        }
    }
    println!("Entire disabled");
    Ok(())
}
