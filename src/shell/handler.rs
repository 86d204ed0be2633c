//! The exec-handler chain and the default external-process handler.
//!
//! Every non-builtin command the runner dispatches lands in
//! [`Shell::exec_command`]: a `SubCommandExecution` is built, the modifier
//! callback (tool-call re-entry) is applied, then every plugin sees
//! `before_execute`, plugins are polled in order until one claims the
//! command, and every plugin sees `after_execute`. The recorded error maps
//! to the command's exit status.

use std::process::ExitStatus;
use std::sync::Arc;

use super::execution::{CommandExecution, SubCommandExecution};
use super::state::ShellMode;
use super::stdio::HandlerCtx;
use super::Shell;
use crate::error::ShellError;
use crate::interp::{ExecHost, ExecIo, Modifier};
use crate::util;

#[async_trait::async_trait]
impl ExecHost for Arc<Shell> {
    fn default_io(&self) -> ExecIo {
        ExecIo {
            stdin: self.default_stdin(),
            stdout: self.default_stdout(),
            stderr: self.default_stderr(),
        }
    }

    async fn exec(
        &self,
        ce: &Arc<CommandExecution>,
        argv: Vec<String>,
        ctx: HandlerCtx,
        modifier: Option<Modifier>,
    ) -> Result<i32, ShellError> {
        self.exec_command(ce, argv, ctx, modifier).await
    }
}

impl Shell {
    pub(crate) async fn exec_command(
        &self,
        ce: &Arc<CommandExecution>,
        argv: Vec<String>,
        ctx: HandlerCtx,
        modifier: Option<Modifier>,
    ) -> Result<i32, ShellError> {
        let me = self.arc();
        let sce = SubCommandExecution::new(ce.clone(), self.state().mode(), argv, ctx);

        if let Some(modifier) = &modifier {
            modifier(&sce);
        }

        let plugins = self.plugins();

        for plugin in &plugins {
            plugin.before_execute(ce, &sce, &me).await?;
        }

        let mut done = false;
        for plugin in &plugins {
            if let Some(result) = plugin.execute(ce, &sce, &me).await {
                if let Err(err) = result {
                    sce.set_error(err);
                }
                done = true;
                break;
            }
        }
        if !done {
            sce.set_error(ShellError::NoExecutor);
        }

        for plugin in &plugins {
            plugin.after_execute(ce, &sce, &me).await?;
        }

        sce.with_error(|err| match err {
            None => Ok(0),
            Some(ShellError::Cancelled) => Err(ShellError::Cancelled),
            Some(err) => Ok(err.exit_status()),
        })
    }
}

impl SubCommandExecution {
    /// Spawn the command as an external process with the sub-command's
    /// env/cwd/stdio and wait for it. Cancellation delivers SIGINT, then
    /// SIGKILL after the shell's kill timeout. Not-found and spawn failures
    /// exit 127 and stay silent under `Auto` so the AI fallback can take
    /// over.
    pub async fn default_exec_handler(&self, shell: &Arc<Shell>) -> Result<(), ShellError> {
        let argv = self.fields();
        let Some(name) = argv.first() else {
            return Ok(());
        };
        let ctx = self.ctx();

        let path_env = ctx
            .env
            .iter()
            .find(|(key, _)| key == "PATH")
            .map(|(_, value)| value.clone())
            .unwrap_or_default();

        let Some(path) = util::look_path(name, &ctx.dir, &path_env) else {
            if self.mode() != ShellMode::Auto {
                let _ = self
                    .stderr()
                    .write_str(&format!("{name}: command not found\n"));
            }
            return Err(ShellError::Exit(127));
        };

        let mut cmd = tokio::process::Command::new(&path);
        cmd.args(&argv[1..])
            .env_clear()
            .envs(ctx.env.iter().map(|(k, v)| (k.clone(), v.clone())))
            .current_dir(&ctx.dir)
            .stdin(ctx.stdin.to_stdio()?)
            .stdout(ctx.stdout.to_stdio()?)
            .stderr(ctx.stderr.to_stdio()?);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                // did not start
                if self.mode() != ShellMode::Auto {
                    let _ = self.stderr().write_str(&format!("{name}: {err}\n"));
                }
                return Err(ShellError::Exit(127));
            }
        };

        let token = self.ce().token().clone();
        let status = tokio::select! {
            status = child.wait() => status?,
            _ = token.cancelled() => {
                signal_cascade(&mut child, shell.kill_timeout()).await?
            }
        };

        // Let the mirrored output land in the capture buffer before anyone
        // reads it as answer text.
        shell.settle_captures().await;

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                if token.is_cancelled() {
                    return Err(ShellError::Cancelled);
                }
                return Err(ShellError::Exit(128 + signal));
            }
        }

        match status.code() {
            Some(0) | None => Ok(()),
            Some(code) => Err(ShellError::Exit(code)),
        }
    }
}

/// SIGINT, a grace period, then SIGKILL.
async fn signal_cascade(
    child: &mut tokio::process::Child,
    grace: std::time::Duration,
) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGINT);
        }
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            return status;
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    let _ = child.start_kill();
    child.wait().await
}
