//! The shell itself: owns the standard streams and their capture channels,
//! the plugin chain, the routing state and the interpreter. The read loop
//! rendezvouses with a dedicated reader thread (line editor or buffered
//! reads), feeds the incremental parser, and evaluates each completed line
//! as one `CommandExecution`.

pub mod capture;
pub mod completer;
pub mod execution;
pub mod handler;
pub mod plugin;
pub mod state;
pub mod stdio;

#[cfg(test)]
mod tests;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::ShellError;
use crate::interp::{self, ast, Modifier, ParseStatus, Parser, Runner, ShellEnv};
use crate::util;

use capture::Capture;
use completer::EditorHelper;
use execution::CommandExecution;
use plugin::{Prompt, ShellPlugin};
use state::{ShellMode, ShellState};
use stdio::{InputHandle, OutputHandle};

pub const DEFAULT_FILE_NAME: &str = "aish";
pub const RC_FILE_NAME: &str = ".aishrc";
pub const HISTORY_FILE_NAME: &str = ".aish_history";

struct ReadRequest {
    plain: String,
    colored: String,
}

enum ReadReply {
    Line(String),
    Interrupted,
    Eof,
    Failed(String),
}

pub struct Shell {
    me: Weak<Shell>,

    stdin: Arc<File>,

    capture_out: Option<Capture>,
    capture_err: Option<Capture>,
    default_stdin: InputHandle,
    default_stdout: OutputHandle,
    default_stderr: OutputHandle,

    plugins: RwLock<Vec<Arc<dyn ShellPlugin>>>,
    state: Arc<ShellState>,
    settings: Arc<Settings>,
    runner: Runner,

    kill_timeout: Duration,
    file_name: String,
    absolute_file_name: Option<PathBuf>,
    load_rc: bool,
    exit: AtomicBool,
    shutdown: CancellationToken,
}

pub struct ShellBuilder {
    stdin: Option<File>,
    stdout: Option<File>,
    stderr: Option<File>,
    environ: Vec<(String, String)>,
    params: Vec<String>,
    file_name: Option<String>,
    absolute_file_name: Option<PathBuf>,
    load_rc: bool,
    kill_timeout: Duration,
}

impl ShellBuilder {
    pub fn stdio(mut self, stdin: File, stdout: File, stderr: File) -> Self {
        self.stdin = Some(stdin);
        self.stdout = Some(stdout);
        self.stderr = Some(stderr);
        self
    }

    pub fn environ(mut self, environ: Vec<(String, String)>) -> Self {
        self.environ = environ;
        self
    }

    pub fn params(mut self, params: Vec<String>) -> Self {
        self.params = params;
        self
    }

    pub fn file_name(mut self, name: impl Into<String>, absolute: Option<PathBuf>) -> Self {
        self.file_name = Some(name.into());
        self.absolute_file_name = absolute;
        self
    }

    /// Whether `~/.aishrc` and `./.aishrc` are evaluated at startup.
    pub fn load_rc(mut self, load_rc: bool) -> Self {
        self.load_rc = load_rc;
        self
    }

    pub fn kill_timeout(mut self, timeout: Duration) -> Self {
        self.kill_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Arc<Shell>, ShellError> {
        let stdin = Arc::new(match self.stdin {
            Some(file) => file,
            None => util::dup_stdio(0)?,
        });
        let stdout = Arc::new(match self.stdout {
            Some(file) => file,
            None => util::dup_stdio(1)?,
        });
        let stderr = Arc::new(match self.stderr {
            Some(file) => file,
            None => util::dup_stdio(2)?,
        });

        let state = Arc::new(ShellState::new());

        let (capture_out, default_stdout) = match Capture::open(stdout.clone(), state.clone()) {
            Ok(capture) => {
                let slave = capture.slave();
                (
                    Some(capture),
                    OutputHandle::shell_default(stdout.clone(), slave, state.clone()),
                )
            }
            Err(err) => {
                log::warn!("stdout capture unavailable, falling back to the real stream: {err}");
                (
                    None,
                    OutputHandle::shell_default(stdout.clone(), stdout.clone(), state.clone()),
                )
            }
        };
        let (capture_err, default_stderr) = match Capture::open(stderr.clone(), state.clone()) {
            Ok(capture) => {
                let slave = capture.slave();
                (
                    Some(capture),
                    OutputHandle::shell_default(stderr.clone(), slave, state.clone()),
                )
            }
            Err(err) => {
                log::warn!("stderr capture unavailable, falling back to the real stream: {err}");
                (
                    None,
                    OutputHandle::shell_default(stderr.clone(), stderr.clone(), state.clone()),
                )
            }
        };

        let file_name = self.file_name.unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());

        let mut environ: Vec<(String, String)> = std::env::vars().collect();
        environ.extend(self.environ);

        let dir = std::env::current_dir()?;
        let runner = Runner::new(ShellEnv::new(dir, environ, self.params, file_name.clone()));

        let default_stdin = InputHandle::new(stdin.clone(), true);

        Ok(Arc::new_cyclic(|me| Shell {
            me: me.clone(),
            default_stdin,
            stdin,
            capture_out,
            capture_err,
            default_stdout,
            default_stderr,
            plugins: RwLock::new(Vec::new()),
            state,
            settings: Arc::new(Settings::new()),
            runner,
            kill_timeout: self.kill_timeout,
            file_name,
            absolute_file_name: self.absolute_file_name,
            load_rc: self.load_rc,
            exit: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }))
    }
}

impl Shell {
    pub fn builder() -> ShellBuilder {
        ShellBuilder {
            stdin: None,
            stdout: None,
            stderr: None,
            environ: Vec::new(),
            params: Vec::new(),
            file_name: None,
            absolute_file_name: None,
            load_rc: true,
            kill_timeout: Duration::from_secs(2),
        }
    }

    /// The owning `Arc`; the weak self-reference is set at construction and
    /// outlives every `&self`.
    pub(crate) fn arc(&self) -> Arc<Shell> {
        self.me.upgrade().expect("shell self-reference")
    }

    pub fn use_plugins(&self, plugins: Vec<Arc<dyn ShellPlugin>>) -> Result<(), ShellError> {
        let shell = self.arc();
        for plugin in plugins {
            plugin.install(&shell)?;
            util::write(&self.plugins).push(plugin);
        }
        Ok(())
    }

    pub fn plugins(&self) -> Vec<Arc<dyn ShellPlugin>> {
        util::read(&self.plugins).clone()
    }

    pub fn state(&self) -> &Arc<ShellState> {
        &self.state
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    pub fn kill_timeout(&self) -> Duration {
        self.kill_timeout
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn absolute_file_name(&self) -> Option<&PathBuf> {
        self.absolute_file_name.as_ref()
    }

    pub fn dir(&self) -> PathBuf {
        self.runner.dir()
    }

    pub fn default_stdin(&self) -> InputHandle {
        self.default_stdin.clone()
    }

    pub fn default_stdout(&self) -> OutputHandle {
        self.default_stdout.clone()
    }

    pub fn default_stderr(&self) -> OutputHandle {
        self.default_stderr.clone()
    }

    /// Exit status requested by the `exit` builtin, if it ran.
    pub fn exit_status(&self) -> Option<i32> {
        self.runner.exited()
    }

    pub fn print_error(&self, out: &OutputHandle, err: &ShellError) {
        let _ = out.write_str(&format!("{}: {err}\n", self.file_name));
    }

    /// Resolve a name against the working directory and PATH.
    pub fn look_path(&self, name: &str) -> Option<PathBuf> {
        util::look_path(name, &self.runner.dir(), &self.runner.var("PATH"))
    }

    pub fn find_executable_names(&self) -> Vec<String> {
        util::find_executable_names(&self.runner.var("PATH"))
    }

    /// Drain in-flight mirrored output into the capture buffer.
    pub async fn settle_captures(&self) {
        if let Some(capture) = &self.capture_out {
            capture.settle().await;
        }
        if let Some(capture) = &self.capture_err {
            capture.settle().await;
        }
    }

    fn inherit_capture_sizes(&self) {
        #[cfg(unix)]
        {
            use std::os::fd::AsRawFd;
            let fd = self.stdin.as_raw_fd();
            if let Some(capture) = &self.capture_out {
                capture.inherit_size(fd);
            }
            if let Some(capture) = &self.capture_err {
                capture.inherit_size(fd);
            }
        }
    }

    /// Evaluate rc files, then the shell's input, until EOF or `exit`.
    pub async fn start(&self) -> Result<(), ShellError> {
        let interactive = util::is_terminal(&self.stdin);
        if interactive {
            self.spawn_signal_tasks();
        }

        if self.load_rc {
            let home = self.state.home().clone();
            self.read_rc_file(&home).await;
            if let Ok(wd) = std::env::current_dir() {
                self.read_rc_file(&wd).await;
            }
        }

        let result = self.readlines(self.stdin.clone(), interactive).await;
        self.shutdown.cancel();
        result
    }

    async fn read_rc_file(&self, dir: &Path) {
        let path = dir.join(RC_FILE_NAME);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    self.print_error(&self.default_stderr(), &err.into());
                }
                return;
            }
        };
        log::debug!("evaluating rc file {}", path.display());
        if let Err(err) = self.readlines(Arc::new(file), false).await {
            self.print_error(&self.default_stderr(), &err);
        }
    }

    /// The main loop: one `CommandExecution` per input line (plus its
    /// continuations), rendezvousing with the reader thread.
    async fn readlines(&self, input: Arc<File>, interactive: bool) -> Result<(), ShellError> {
        let me = self.arc();

        let (start_tx, start_rx) = mpsc::channel::<ReadRequest>(1);
        let (reply_tx, mut reply_rx) = mpsc::channel::<ReadReply>(1);

        {
            let shell = me.clone();
            std::thread::spawn(move || {
                if interactive {
                    shell.interactive_read_loop(start_rx, reply_tx);
                } else {
                    plain_read_loop(input, start_rx, reply_tx);
                }
            });
        }

        let mut eof = false;
        while !eof {
            if self.exit.load(Ordering::Relaxed) {
                break;
            }

            let ce = Arc::new(CommandExecution::new(self.shutdown.child_token(), interactive));
            let mut parser = Parser::new();
            let mut file: Option<ast::File> = None;
            let mut parse_error: Option<String> = None;
            let mut interrupted = false;

            loop {
                let prompt = self.prompt_for(&ce);
                let request = ReadRequest {
                    plain: prompt.plain,
                    colored: prompt.colored,
                };
                if start_tx.send(request).await.is_err() {
                    eof = true;
                    break;
                }

                let reply = tokio::select! {
                    _ = ce.token().cancelled() => {
                        interrupted = true;
                        break;
                    }
                    reply = reply_rx.recv() => reply,
                };

                match reply {
                    None | Some(ReadReply::Eof) => {
                        eof = true;
                        break;
                    }
                    Some(ReadReply::Interrupted) => {
                        ce.cancel();
                        interrupted = true;
                        break;
                    }
                    Some(ReadReply::Failed(msg)) => {
                        let _ = self
                            .default_stderr
                            .write_str(&format!("{}: {msg}\n", self.file_name));
                        break;
                    }
                    Some(ReadReply::Line(line)) => {
                        match parser.feed(&format!("{line}\n")) {
                            ParseStatus::Complete(parsed) => {
                                ce.set_incomplete(false);
                                file = Some(parsed);
                                break;
                            }
                            ParseStatus::Incomplete => ce.set_incomplete(true),
                            ParseStatus::Error(msg) => {
                                parse_error = Some(msg);
                                break;
                            }
                        }
                    }
                }
            }

            if interrupted {
                continue;
            }

            if let Some(msg) = parse_error {
                if self.state.mode() == ShellMode::User {
                    let _ = self
                        .default_stderr
                        .write_str(&format!("{}: syntax error: {msg}\n", self.file_name));
                    continue;
                }
                // Outside User mode, retry the raw input as a one-word
                // command so it reaches the AI as a plain query.
                let source = parser.source().trim_end_matches('\n').to_string();
                if source.trim().is_empty() {
                    continue;
                }
                file = Some(ast::File::quoted_command(&source));
            }

            let Some(file) = file else { continue };

            self.state.set_current_execution(Some(ce.clone()));
            for plugin in self.plugins() {
                plugin.prepare_execution(&ce, &me);
            }

            if let Err(err) = self.eval_file(&ce, &file, None).await {
                self.print_error(&self.default_stderr(), &err);
            }

            for plugin in self.plugins() {
                if let Err(err) = plugin.end(&ce, &me).await {
                    self.print_error(&self.default_stderr(), &err);
                }
            }
            ce.set_terminated();
            self.state.set_current_execution(None);
        }

        Ok(())
    }

    /// Evaluate source text through the normal pipeline; used by tool-call
    /// re-entry, with the modifier applied to every sub-command created.
    pub async fn eval(
        &self,
        ce: &Arc<CommandExecution>,
        code: &str,
        modifier: Option<Modifier>,
    ) -> Result<i32, ShellError> {
        if code.trim().is_empty() {
            return Ok(0);
        }
        let file = interp::parse(code)?;
        self.eval_file(ce, &file, modifier).await
    }

    pub(crate) async fn eval_file(
        &self,
        ce: &Arc<CommandExecution>,
        file: &ast::File,
        modifier: Option<Modifier>,
    ) -> Result<i32, ShellError> {
        let me = self.arc();
        let status = self.runner.run(&me, ce, file, modifier).await?;
        if self.runner.exited().is_some() {
            self.exit.store(true, Ordering::Relaxed);
        }
        Ok(status)
    }

    fn prompt_for(&self, ce: &CommandExecution) -> Prompt {
        let me = self.arc();
        for plugin in self.plugins() {
            if let Some(prompt) = plugin.generate_prompt(ce, &me) {
                return prompt;
            }
        }
        Prompt::default()
    }

    fn spawn_signal_tasks(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let weak = self.me.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                let Ok(mut sigint) = signal(SignalKind::interrupt()) else {
                    return;
                };
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        received = sigint.recv() => {
                            if received.is_none() {
                                break;
                            }
                            let Some(shell) = weak.upgrade() else { break };
                            if let Some(ce) = shell.state.current_execution() {
                                ce.cancel();
                            }
                        }
                    }
                }
            });

            let weak = self.me.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                let Ok(mut sigwinch) = signal(SignalKind::window_change()) else {
                    return;
                };
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        received = sigwinch.recv() => {
                            if received.is_none() {
                                break;
                            }
                            let Some(shell) = weak.upgrade() else { break };
                            shell.inherit_capture_sizes();
                        }
                    }
                }
            });
        }
    }

    /// Reader thread body for interactive shells: owns the line editor.
    fn interactive_read_loop(
        self: Arc<Self>,
        mut start_rx: mpsc::Receiver<ReadRequest>,
        reply_tx: mpsc::Sender<ReadReply>,
    ) {
        use rustyline::error::ReadlineError;
        use rustyline::history::FileHistory;
        use rustyline::{CompletionType, Config, Editor};

        let config = Config::builder()
            .completion_type(CompletionType::List)
            .build();
        let mut editor: Editor<EditorHelper, FileHistory> = match Editor::with_config(config) {
            Ok(editor) => editor,
            Err(err) => {
                let _ = reply_tx.blocking_send(ReadReply::Failed(err.to_string()));
                return;
            }
        };
        editor.set_helper(Some(EditorHelper::new(self.clone())));

        let history_path = self.state.home().join(HISTORY_FILE_NAME);
        let _ = editor.load_history(&history_path);

        while let Some(request) = start_rx.blocking_recv() {
            if let Some(helper) = editor.helper_mut() {
                helper.colored_prompt = request.colored;
            }

            let reply = loop {
                match editor.readline(&request.plain) {
                    Ok(line) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let _ = editor.add_history_entry(line.as_str());
                        let _ = editor.save_history(&history_path);
                        break ReadReply::Line(line);
                    }
                    Err(ReadlineError::Interrupted) => break ReadReply::Interrupted,
                    Err(ReadlineError::Eof) => break ReadReply::Eof,
                    Err(err) => break ReadReply::Failed(err.to_string()),
                }
            };

            let stop = matches!(reply, ReadReply::Eof | ReadReply::Failed(_));
            if reply_tx.blocking_send(reply).is_err() || stop {
                return;
            }
        }
    }
}

/// Reader thread body for scripts, rc files and piped input.
fn plain_read_loop(
    input: Arc<File>,
    mut start_rx: mpsc::Receiver<ReadRequest>,
    reply_tx: mpsc::Sender<ReadReply>,
) {
    let file = match input.try_clone() {
        Ok(file) => file,
        Err(err) => {
            let _ = reply_tx.blocking_send(ReadReply::Failed(err.to_string()));
            return;
        }
    };
    let mut reader = BufReader::new(file);

    while start_rx.blocking_recv().is_some() {
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => {
                    let _ = reply_tx.blocking_send(ReadReply::Eof);
                    return;
                }
                Ok(_) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let line = line.trim_end_matches('\n').to_string();
                    if reply_tx.blocking_send(ReadReply::Line(line)).is_err() {
                        return;
                    }
                    break;
                }
                Err(err) => {
                    let _ = reply_tx.blocking_send(ReadReply::Failed(err.to_string()));
                    return;
                }
            }
        }
    }
}
