use clap::Subcommand;
use std::path::Path;

use crate::settings::{parse_value, read_config, write_config};
use crate::workspace::Workspace;

// ── CLI Schema ──

#[derive(Subcommand)]
pub enum ConfigCmd {
    /// Set a setting in .entire/settings.json
    Set {
        /// Setting key (e.g. strategy)
        key: String,
        /// Setting value (true/false/number/string)
        value: String,
        /// Write to settings.local.json instead
        #[arg(long)]
        local: bool,
    },
    /// Get a setting
    Get {
        /// Setting key
        key: String,
    },
    /// List all settings
    List,
}

// ── Dispatch ──

pub fn run(cmd: ConfigCmd, cwd: &Path) -> anyhow::Result<()> {
    let ws = Workspace::discover(cwd)?;
    if !ws.paths.is_initialized() {
        anyhow::bail!("No .entire/ directory found. Run `entire enable` first.");
    }
    match cmd {
        ConfigCmd::Set { key, value, local } => set(&ws, &key, &value, local),
        ConfigCmd::Get { key } => get(&ws, &key),
        ConfigCmd::List => list(&ws),
    }
}

// ── Command Implementations ──

/// `entire config set <key> <value>`
fn set(ws: &Workspace, key: &str, value: &str, local: bool) -> anyhow::Result<()> {
    if key == "strategy" {
        value
            .parse::<entire_core::StrategyKind>()
            .map_err(anyhow::Error::msg)?;
    }
    let path = if local {
        &ws.paths.settings_local_json
    } else {
        &ws.paths.settings_json
    };
    let mut config = read_config(path)?;
    config.insert(key.to_string(), parse_value(value));
    write_config(path, &config)?;
    println!("{key} = {value}");
    Ok(())
}

/// `entire config get <key>`: the effective value, local overrides applied.
fn get(ws: &Workspace, key: &str) -> anyhow::Result<()> {
    let mut config = read_config(&ws.paths.settings_json)?;
    config.extend(read_config(&ws.paths.settings_local_json)?);
    match config.get(key) {
        Some(val) => println!("{val}"),
        None => println!("(not set)"),
    }
    Ok(())
}

/// `entire config list`
fn list(ws: &Workspace) -> anyhow::Result<()> {
    let mut config = read_config(&ws.paths.settings_json)?;
    config.extend(read_config(&ws.paths.settings_local_json)?);
    if config.is_empty() {
        println!("(no settings)");
    } else {
        for (k, v) in &config {
            println!("{k} = {v}");
        }
    }
    Ok(())
}
