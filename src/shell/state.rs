//! Shared shell state: routing mode and the currently running top-level
//! execution. Read from the PTY copier threads and the signal dispatcher,
//! hence the locks.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use super::execution::CommandExecution;
use crate::util;

/// How a plain command is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellMode {
    /// Try the shell first; fall through to the AI on "not found".
    Auto,
    /// Always a shell command.
    User,
    /// Always an AI query.
    Ai,
}

impl std::fmt::Display for ShellMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShellMode::Auto => write!(f, "AUTO"),
            ShellMode::User => write!(f, "USER"),
            ShellMode::Ai => write!(f, "AI"),
        }
    }
}

pub struct ShellState {
    os: &'static str,
    arch: &'static str,
    username: String,
    home: PathBuf,
    mode: RwLock<ShellMode>,
    current: RwLock<Option<Arc<CommandExecution>>>,
}

impl ShellState {
    pub fn new() -> Self {
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));

        ShellState {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            username,
            home,
            mode: RwLock::new(ShellMode::Auto),
            current: RwLock::new(None),
        }
    }

    pub fn os(&self) -> &'static str {
        self.os
    }

    pub fn arch(&self) -> &'static str {
        self.arch
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn home(&self) -> &PathBuf {
        &self.home
    }

    pub fn mode(&self) -> ShellMode {
        *util::read(&self.mode)
    }

    pub fn set_mode(&self, mode: ShellMode) {
        *util::write(&self.mode) = mode;
    }

    pub fn current_execution(&self) -> Option<Arc<CommandExecution>> {
        util::read(&self.current).clone()
    }

    pub fn set_current_execution(&self, ce: Option<Arc<CommandExecution>>) {
        *util::write(&self.current) = ce;
    }
}

impl Default for ShellState {
    fn default() -> Self {
        Self::new()
    }
}
