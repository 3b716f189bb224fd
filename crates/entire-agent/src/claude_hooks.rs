use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

/// Claude hook event name, CLI hook argument, tool matcher.
const HOOKS: &[(&str, &str, &str)] = &[
    ("SessionStart", "session-start", ""),
    ("UserPromptSubmit", "user-prompt-submit", ""),
    ("Stop", "stop", ""),
    ("PreCompact", "pre-compact", ""),
    ("SessionEnd", "session-end", ""),
    ("PreToolUse", "pre-tool-use", "Task"),
    ("PostToolUse", "post-tool-use", "Task"),
];

/// Substring identifying commands we installed.
const OUR_MARKER: &str = " hook claude-code ";

fn settings_path(repo_root: &Path) -> PathBuf {
    repo_root.join(".claude").join("settings.json")
}

fn is_ours(cmd: &str) -> bool {
    format!("{cmd} ").contains(OUR_MARKER)
}

/// Check whether a matcher group runs one of our hook commands.
fn group_is_ours(group: &Value) -> bool {
    group
        .get("hooks")
        .and_then(Value::as_array)
        .is_some_and(|hooks| {
            hooks.iter().any(|h| {
                h.get("command")
                    .and_then(Value::as_str)
                    .is_some_and(is_ours)
            })
        })
}

fn read_settings(path: &Path) -> anyhow::Result<Value> {
    if !path.exists() {
        return Ok(json!({}));
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(json!({}));
    }
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("{} is not valid JSON: {e}", path.display()))?;
    if !value.is_object() {
        anyhow::bail!("{} is not a JSON object", path.display());
    }
    Ok(value)
}

fn write_settings(path: &Path, settings: &Value) -> anyhow::Result<()> {
    let mut output = serde_json::to_string_pretty(settings)?;
    output.push('\n');
    entire_store::write_atomic(path, output.as_bytes())
}

/// Merge our matcher groups into `.claude/settings.json`, replacing any
/// previous ones and keeping everyone else's.
pub(crate) fn install(repo_root: &Path, command: &str) -> anyhow::Result<usize> {
    let path = settings_path(repo_root);
    let mut settings = read_settings(&path)?;

    let hooks_obj = settings
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("settings is not an object"))?
        .entry("hooks")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("hooks is not an object"))?;

    for (event_name, hook_arg, matcher) in HOOKS {
        let ours = json!({
            "matcher": matcher,
            "hooks": [{
                "type": "command",
                "command": format!("{command} hook claude-code {hook_arg}")
            }]
        });
        let mut groups: Vec<Value> = hooks_obj
            .get(*event_name)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|g| !group_is_ours(g))
            .collect();
        groups.push(ours);
        hooks_obj.insert(event_name.to_string(), Value::Array(groups));
    }

    write_settings(&path, &settings)?;
    tracing::info!(path = %path.display(), "installed Claude Code hooks");
    Ok(HOOKS.len())
}

/// Remove our matcher groups. Events left without groups are dropped.
pub(crate) fn uninstall(repo_root: &Path) -> anyhow::Result<()> {
    let path = settings_path(repo_root);
    if !path.exists() {
        return Ok(());
    }
    let mut settings = read_settings(&path)?;

    let Some(hooks) = settings.get_mut("hooks").and_then(Value::as_object_mut) else {
        return Ok(());
    };
    for (event_name, _, _) in HOOKS {
        let Some(arr) = hooks.get(*event_name).and_then(Value::as_array).cloned() else {
            continue;
        };
        let kept: Vec<Value> = arr.into_iter().filter(|g| !group_is_ours(g)).collect();
        if kept.is_empty() {
            hooks.remove(*event_name);
        } else {
            hooks.insert(event_name.to_string(), Value::Array(kept));
        }
    }
    let hooks_empty = hooks.is_empty();
    if hooks_empty {
        if let Some(obj) = settings.as_object_mut() {
            obj.remove("hooks");
        }
    }

    write_settings(&path, &settings)?;
    tracing::info!(path = %path.display(), "removed Claude Code hooks");
    Ok(())
}

pub(crate) fn is_installed(repo_root: &Path) -> bool {
    let Ok(settings) = read_settings(&settings_path(repo_root)) else {
        return false;
    };
    settings
        .get("hooks")
        .and_then(|h| h.get("Stop"))
        .and_then(Value::as_array)
        .is_some_and(|groups| groups.iter().any(group_is_ours))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_preserves_foreign_hooks() {
        let tmp = tempfile::tempdir().unwrap();
        let path = settings_path(tmp.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            r#"{"model":"opus","hooks":{"Stop":[{"matcher":"","hooks":[{"type":"command","command":"notify-send done"}]}]}}"#,
        )
        .unwrap();

        assert!(!is_installed(tmp.path()));
        assert_eq!(install(tmp.path(), "entire").unwrap(), HOOKS.len());
        assert!(is_installed(tmp.path()));

        let settings: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(settings["model"], "opus");
        let stop = settings["hooks"]["Stop"].as_array().unwrap();
        assert_eq!(stop.len(), 2);
        assert_eq!(stop[0]["hooks"][0]["command"], "notify-send done");
        assert_eq!(stop[1]["hooks"][0]["command"], "entire hook claude-code stop");
        assert_eq!(settings["hooks"]["PreToolUse"][0]["matcher"], "Task");
    }

    #[test]
    fn install_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        install(tmp.path(), "entire").unwrap();
        install(tmp.path(), "/usr/local/bin/entire").unwrap();
        let settings = read_settings(&settings_path(tmp.path())).unwrap();
        let groups = settings["hooks"]["SessionStart"].as_array().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups[0]["hooks"][0]["command"],
            "/usr/local/bin/entire hook claude-code session-start"
        );
    }

    #[test]
    fn uninstall_removes_only_ours() {
        let tmp = tempfile::tempdir().unwrap();
        let path = settings_path(tmp.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            r#"{"hooks":{"Stop":[{"matcher":"","hooks":[{"type":"command","command":"notify-send done"}]}]}}"#,
        )
        .unwrap();
        install(tmp.path(), "entire").unwrap();
        uninstall(tmp.path()).unwrap();

        assert!(!is_installed(tmp.path()));
        let settings = read_settings(&path).unwrap();
        let hooks = settings["hooks"].as_object().unwrap();
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks["Stop"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn uninstall_drops_empty_hooks_table() {
        let tmp = tempfile::tempdir().unwrap();
        install(tmp.path(), "entire").unwrap();
        uninstall(tmp.path()).unwrap();
        let settings = read_settings(&settings_path(tmp.path())).unwrap();
        assert!(settings.get("hooks").is_none());
        uninstall(tempfile::tempdir().unwrap().path()).unwrap();
    }
}
