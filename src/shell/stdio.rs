//! File-descriptor backed I/O handles handed to commands. The shell-default
//! handles carry two faces: a spawnable descriptor (the capture slave, so
//! child processes keep TTY semantics and their output is mirrored) and a
//! synchronous writer used for in-process text, which writes the real stream
//! and the current execution's capture buffer in one step.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use super::state::ShellState;
use crate::util;

#[derive(Clone)]
pub struct InputHandle {
    file: Arc<File>,
    shell_default: bool,
}

impl InputHandle {
    pub fn new(file: Arc<File>, shell_default: bool) -> Self {
        InputHandle {
            file,
            shell_default,
        }
    }

    pub fn is_shell_default(&self) -> bool {
        self.shell_default
    }

    pub fn to_stdio(&self) -> std::io::Result<Stdio> {
        Ok(Stdio::from(self.file.try_clone()?))
    }
}

#[derive(Clone)]
enum WriterKind {
    /// Write the real stream and the current execution's buffer together.
    Dual {
        real: Arc<File>,
        state: Arc<ShellState>,
    },
    /// Write straight to the descriptor (redirect targets, pipes).
    Plain,
}

#[derive(Clone)]
pub struct OutputHandle {
    /// Descriptor children of this command inherit.
    spawn: Arc<File>,
    writer: WriterKind,
    shell_default: bool,
}

impl OutputHandle {
    /// The shell-default handle: children write into `capture_slave`, while
    /// in-process text goes to the real stream and the capture buffer.
    pub fn shell_default(
        real: Arc<File>,
        capture_slave: Arc<File>,
        state: Arc<ShellState>,
    ) -> Self {
        OutputHandle {
            spawn: capture_slave,
            writer: WriterKind::Dual { real, state },
            shell_default: true,
        }
    }

    /// A plain handle over one file: redirect target or pipe end.
    pub fn plain(file: Arc<File>) -> Self {
        OutputHandle {
            spawn: file,
            writer: WriterKind::Plain,
            shell_default: false,
        }
    }

    pub fn is_shell_default(&self) -> bool {
        self.shell_default
    }

    pub fn is_terminal(&self) -> bool {
        match &self.writer {
            WriterKind::Dual { real, .. } => util::is_terminal(real),
            WriterKind::Plain => util::is_terminal(&self.spawn),
        }
    }

    pub fn to_stdio(&self) -> std::io::Result<Stdio> {
        Ok(Stdio::from(self.spawn.try_clone()?))
    }

    pub fn write_all(&self, bytes: &[u8]) -> std::io::Result<()> {
        match &self.writer {
            WriterKind::Dual { real, state } => {
                let mut writer: &File = real;
                writer.write_all(bytes)?;
                writer.flush()?;
                if let Some(ce) = state.current_execution() {
                    if !ce.terminated() {
                        ce.write_buffer(bytes);
                    }
                }
                Ok(())
            }
            WriterKind::Plain => {
                let mut writer: &File = &self.spawn;
                writer.write_all(bytes)?;
                writer.flush()
            }
        }
    }

    pub fn write_str(&self, text: &str) -> std::io::Result<()> {
        self.write_all(text.as_bytes())
    }
}

/// Per-command execution context supplied by the runner.
#[derive(Clone)]
pub struct HandlerCtx {
    pub stdin: InputHandle,
    pub stdout: OutputHandle,
    pub stderr: OutputHandle,
    pub dir: PathBuf,
    pub env: Vec<(String, String)>,
}
