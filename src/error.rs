use crate::llm::LlmError;

/// Shell-level error type. Exit statuses travel as a dedicated variant so the
/// exec-handler chain can distinguish "command failed with N" from real
/// faults, the same way the interpreter hook reports them.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("syntax error: {0}")]
    Parse(String),

    /// Non-zero exit status of a command.
    #[error("exit status {0}")]
    Exit(i32),

    /// The current command execution was cancelled (SIGINT or shutdown).
    #[error("interrupted")]
    Cancelled,

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("no executor claimed the command")]
    NoExecutor,

    #[error("{0}: tool not found")]
    ToolNotFound(String),

    #[error("{entrypoint}: tool {name} already defined")]
    ToolExists { entrypoint: String, name: String },
}

impl ShellError {
    /// Exit status this error maps to when a command finishes with it.
    pub fn exit_status(&self) -> i32 {
        match self {
            ShellError::Exit(n) => *n,
            ShellError::Cancelled => 130,
            _ => 1,
        }
    }

    /// "Command not found" as reported by the default exec handler.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ShellError::Exit(127))
    }
}
