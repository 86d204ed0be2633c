//! Per-shell settings: the configuration store mutated by `aiset`, the
//! user-defined system-prompt fragments and the user-defined tool registry.
//! Everything here is owned by a shell instance so several shells can
//! coexist in one process.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

use crate::error::ShellError;
use crate::util;

pub const CONFIG_OPENAI_API_KEY: &str = "openai.api_key";
pub const CONFIG_OPENAI_MODEL: &str = "openai.model";
pub const CONFIG_OPENAI_BASE_URL: &str = "openai.base_url";
pub const CONFIG_MAX_ITERATIONS: &str = "max_iter";
pub const CONFIG_MAX_HISTORY: &str = "max_history";

/// The closed set of known keys, in display order.
pub const CONFIG_KEYS: &[&str] = &[
    CONFIG_OPENAI_API_KEY,
    CONFIG_OPENAI_MODEL,
    CONFIG_OPENAI_BASE_URL,
    CONFIG_MAX_ITERATIONS,
    CONFIG_MAX_HISTORY,
];

const DEFAULT_SYSTEM_PROMPT: &str = "You are a smart assistant running on a UNIX-like shell.";

fn default_value(name: &str) -> Option<&'static str> {
    match name {
        CONFIG_OPENAI_MODEL => Some("gpt-4o-mini"),
        CONFIG_OPENAI_BASE_URL => Some("https://api.openai.com/v1"),
        CONFIG_MAX_ITERATIONS => Some("6"),
        CONFIG_MAX_HISTORY => Some("10"),
        _ => None,
    }
}

/// A user-defined tool exposed to the model as `TOOL_<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedTool {
    pub name: String,
    pub usage: String,
    pub entrypoint: String,
}

#[derive(Default)]
pub struct Settings {
    values: RwLock<HashMap<String, String>>,
    prompts: RwLock<String>,
    tools: RwLock<BTreeMap<String, DefinedTool>>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configured value, falling back to the compiled-in default, then "".
    pub fn get(&self, name: &str) -> String {
        if let Some(value) = util::read(&self.values).get(name) {
            return value.clone();
        }
        default_value(name).unwrap_or("").to_string()
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).parse().ok()
    }

    pub fn set(&self, name: &str, value: &str) {
        util::write(&self.values)
            .insert(name.to_string(), value.to_string());
    }

    /// Defaults merged with explicit overrides, sorted by key.
    pub fn all(&self) -> BTreeMap<String, String> {
        let mut acc = BTreeMap::new();
        for key in CONFIG_KEYS {
            if let Some(v) = default_value(key) {
                acc.insert(key.to_string(), v.to_string());
            }
        }
        for (k, v) in util::read(&self.values).iter() {
            acc.insert(k.clone(), v.clone());
        }
        acc
    }

    pub fn add_system_prompt(&self, prompt: &str) {
        let mut prompts = util::write(&self.prompts);
        prompts.push_str(prompt);
        prompts.push_str("\n\n");
    }

    pub fn clear_system_prompts(&self) {
        util::write(&self.prompts).clear();
    }

    /// Accumulated prompt fragments, or the stock default when none defined.
    pub fn system_prompts(&self) -> String {
        let prompts = util::read(&self.prompts);
        if prompts.is_empty() {
            DEFAULT_SYSTEM_PROMPT.to_string()
        } else {
            prompts.clone()
        }
    }

    /// Register a tool under the snake-cased basename of its entrypoint.
    /// The entrypoint must exist; duplicate names are rejected.
    pub fn add_tool(&self, usage: &str, entrypoint: &str) -> Result<(), ShellError> {
        std::fs::metadata(entrypoint)?;

        let base = Path::new(entrypoint)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = util::to_snake_case(&base);

        let mut tools = util::write(&self.tools);
        if tools.contains_key(&name) {
            return Err(ShellError::ToolExists {
                entrypoint: entrypoint.to_string(),
                name,
            });
        }
        tools.insert(
            name.clone(),
            DefinedTool {
                name,
                usage: usage.to_string(),
                entrypoint: entrypoint.to_string(),
            },
        );
        Ok(())
    }

    pub fn clear_tools(&self) {
        util::write(&self.tools).clear();
    }

    pub fn tool(&self, name: &str) -> Option<DefinedTool> {
        util::read(&self.tools).get(name).cloned()
    }

    /// All defined tools in stable (name) order.
    pub fn tools(&self) -> Vec<DefinedTool> {
        util::read(&self.tools).values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_falls_back_to_defaults() {
        let settings = Settings::new();
        assert_eq!(settings.get(CONFIG_OPENAI_MODEL), "gpt-4o-mini");
        assert_eq!(settings.get(CONFIG_MAX_ITERATIONS), "6");
        assert_eq!(settings.get("nonsense"), "");

        settings.set(CONFIG_OPENAI_MODEL, "gpt-4o");
        assert_eq!(settings.get(CONFIG_OPENAI_MODEL), "gpt-4o");
    }

    #[test]
    fn all_merges_defaults_and_overrides() {
        let settings = Settings::new();
        settings.set(CONFIG_MAX_HISTORY, "3");
        let all = settings.all();
        assert_eq!(all.get(CONFIG_MAX_HISTORY).unwrap(), "3");
        assert_eq!(all.get(CONFIG_OPENAI_BASE_URL).unwrap(), "https://api.openai.com/v1");
    }

    #[test]
    fn prompts_accumulate_and_reset() {
        let settings = Settings::new();
        assert!(settings.system_prompts().contains("smart assistant"));

        settings.add_system_prompt("Always answer in French.");
        settings.add_system_prompt("Be terse.");
        let prompts = settings.system_prompts();
        assert!(prompts.contains("French"));
        assert!(prompts.contains("terse"));

        settings.clear_system_prompts();
        assert!(settings.system_prompts().contains("smart assistant"));
    }

    #[test]
    fn tools_are_keyed_by_snake_cased_basename() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("My-Tool.sh");
        std::fs::write(&entry, b"#!/bin/sh\n").unwrap();

        let settings = Settings::new();
        settings.add_tool("greets", entry.to_str().unwrap()).unwrap();

        let tool = settings.tool("my_tool_sh").unwrap();
        assert_eq!(tool.usage, "greets");

        let err = settings.add_tool("again", entry.to_str().unwrap());
        assert!(matches!(err, Err(ShellError::ToolExists { .. })));

        assert!(settings.add_tool("x", "/no/such/file").is_err());

        settings.clear_tools();
        assert!(settings.tools().is_empty());
    }

    #[test]
    fn settings_are_per_instance() {
        let a = Settings::new();
        let b = Settings::new();
        a.set(CONFIG_MAX_HISTORY, "1");
        assert_eq!(b.get(CONFIG_MAX_HISTORY), "10");
    }
}
