//! Path completion on the trailing fragment of the line: handles `~`, `.`,
//! `..`, absolute and relative paths, hides dotfiles unless the prefix asks
//! for them, and marks directories (and symlinks resolving to directories)
//! with a trailing `/`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::shell::plugin::ShellPlugin;
use crate::shell::Shell;
use crate::util;

#[derive(Default)]
pub struct PathCompletePlugin;

impl PathCompletePlugin {
    pub fn new() -> Self {
        PathCompletePlugin
    }

    fn complete_fragment(fragment: &str, shell: &Arc<Shell>) -> Vec<String> {
        let state = shell.state();

        let (mut dir, mut prefix) = match fragment.rfind('/') {
            Some(i) => (fragment[..=i].to_string(), fragment[i + 1..].to_string()),
            None => (String::new(), fragment.to_string()),
        };

        if dir.is_empty() {
            if prefix == "." {
                dir = ".".to_string();
            } else if prefix == ".." || prefix.starts_with('~') {
                dir = prefix.clone();
                prefix = String::new();
            } else {
                dir = ".".to_string();
            }
        }

        let home = state.home().clone();
        if dir == "~" {
            return vec![
                "~/".to_string(),
                format!("~{}", state.username()),
            ];
        }

        let lookup_dir = if dir == "." {
            shell.dir()
        } else if let Some(rest) = dir.strip_prefix('~') {
            home.join(rest.trim_start_matches('/'))
        } else if Path::new(&dir).is_absolute() {
            PathBuf::from(&dir)
        } else {
            shell.dir().join(&dir)
        };

        let Ok(entries) = std::fs::read_dir(&lookup_dir) else {
            return Vec::new();
        };

        let mut completions = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();

            // Hidden files stay hidden unless the prefix asks for them.
            if name.starts_with('.') && !prefix.starts_with('.') {
                continue;
            }
            if !name.to_lowercase().starts_with(&prefix.to_lowercase()) {
                continue;
            }

            let mut completion = name.clone();
            let file_type = entry.file_type();
            let is_dir = match file_type {
                Ok(t) if t.is_dir() => true,
                Ok(t) if t.is_symlink() => std::fs::metadata(lookup_dir.join(&name))
                    .map(|m| m.is_dir())
                    .unwrap_or(false),
                _ => false,
            };
            if is_dir {
                completion.push('/');
            }

            if dir == "." {
                completions.push(completion);
            } else if dir.ends_with('/') {
                completions.push(format!("{dir}{completion}"));
            } else {
                completions.push(format!("{dir}/{completion}"));
            }
        }

        completions.sort();
        completions
    }
}

#[async_trait::async_trait]
impl ShellPlugin for PathCompletePlugin {
    fn id(&self) -> &'static str {
        "path-autocomplete"
    }

    fn auto_complete(&self, line: &str, pos: usize, shell: &Arc<Shell>) -> Vec<String> {
        let (fragment, _rest) = util::last_fragment(line, pos);
        if fragment.is_empty() {
            return Vec::new();
        }
        Self::complete_fragment(fragment, shell)
            .into_iter()
            .filter(|c| c.to_lowercase().starts_with(&fragment.to_lowercase()))
            .collect()
    }
}
