//! `.entire/settings.json`, overlaid by `settings.local.json` and the
//! environment.

use std::path::Path;

use anyhow::Context;
use entire_core::StrategyKind;
use entire_store::EntirePaths;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_AGENT: &str = "claude-code";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub enabled: bool,
    pub strategy: StrategyKind,
    pub agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chunk_bytes: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: StrategyKind::default(),
            agent: DEFAULT_AGENT.to_string(),
            max_chunk_bytes: None,
        }
    }
}

impl Settings {
    pub fn load(paths: &EntirePaths) -> anyhow::Result<Self> {
        let mut merged = read_config(&paths.settings_json)?;
        for (k, v) in read_config(&paths.settings_local_json)? {
            merged.insert(k, v);
        }
        let mut settings: Settings = serde_json::from_value(Value::Object(merged))
            .with_context(|| format!("invalid settings in {}", paths.entire_dir.display()))?;
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = var("ENTIRE_STRATEGY").filter(|v| !v.is_empty()) {
            self.strategy = v.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(v) = var("ENTIRE_MAX_CHUNK_BYTES").filter(|v| !v.is_empty()) {
            let n: usize = v
                .parse()
                .with_context(|| format!("ENTIRE_MAX_CHUNK_BYTES={v} is not a byte count"))?;
            self.max_chunk_bytes = Some(n);
        }
        Ok(())
    }

    pub fn max_chunk_bytes(&self) -> usize {
        self.max_chunk_bytes
            .filter(|n| *n > 0)
            .unwrap_or_else(entire_transcript::max_chunk_bytes)
    }
}

/// A settings file as a JSON object. Missing file is an empty map.
pub fn read_config(path: &Path) -> anyhow::Result<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let content = std::fs::read_to_string(path)?;
    let val: Value = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    match val {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

pub fn write_config(path: &Path, config: &Map<String, Value>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    entire_store::write_atomic(path, json.as_bytes())
}

/// Parse a command-line value into a JSON value (bool, number, string).
pub fn parse_value(s: &str) -> Value {
    match s {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(n) = s.parse::<i64>() {
                Value::Number(n.into())
            } else if let Ok(f) = s.parse::<f64>() {
                serde_json::json!(f)
            } else {
                Value::String(s.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_settings_override_project_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = EntirePaths::discover(tmp.path());
        paths.ensure_layout().unwrap();
        std::fs::write(
            &paths.settings_json,
            r#"{"enabled": true, "strategy": "auto-commit", "agent": "gemini"}"#,
        )
        .unwrap();
        std::fs::write(&paths.settings_local_json, r#"{"strategy": "manual-commit"}"#).unwrap();

        let mut merged = read_config(&paths.settings_json).unwrap();
        merged.extend(read_config(&paths.settings_local_json).unwrap());
        let settings: Settings = serde_json::from_value(Value::Object(merged)).unwrap();
        assert!(settings.enabled);
        assert_eq!(settings.strategy, StrategyKind::ManualCommit);
        assert_eq!(settings.agent, "gemini");
    }

    #[test]
    fn missing_files_give_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = EntirePaths::discover(tmp.path());
        let settings: Settings =
            serde_json::from_value(Value::Object(read_config(&paths.settings_json).unwrap()))
                .unwrap();
        assert_eq!(settings, Settings::default());
        assert!(!settings.enabled);
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = Settings::default();
        settings
            .apply_env(|k| match k {
                "ENTIRE_STRATEGY" => Some("auto".into()),
                "ENTIRE_MAX_CHUNK_BYTES" => Some("4096".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(settings.strategy, StrategyKind::AutoCommit);
        assert_eq!(settings.max_chunk_bytes(), 4096);

        let err = settings.apply_env(|k| (k == "ENTIRE_STRATEGY").then(|| "yolo".into()));
        assert!(err.is_err());
    }

    #[test]
    fn parse_value_types() {
        assert_eq!(parse_value("true"), Value::Bool(true));
        assert_eq!(parse_value("42"), serde_json::json!(42));
        assert_eq!(parse_value("auto-commit"), Value::String("auto-commit".into()));
    }
}
