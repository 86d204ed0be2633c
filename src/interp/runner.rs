//! AST walker. Executes statements sequentially, connects pipelines with
//! OS pipes, runs the interpreter builtins itself, and hands every other
//! simple command to the [`ExecHost`] hook, which is where the plugin chain
//! lives. The modifier callback is threaded through explicitly so tool-call
//! re-entry can adjust every sub-command the nested run creates.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use super::ast::{AndOrOp, Command, File, Pipeline, RedirOp, SimpleCommand, Stmt, Word};
use super::expand::{expand_word, expand_words};
use super::parser;
use crate::error::ShellError;
use crate::shell::capture::os_pipe;
use crate::shell::execution::{CommandExecution, SubCommandExecution};
use crate::shell::stdio::{HandlerCtx, InputHandle, OutputHandle};
use crate::util;

/// Builtins executed by the runner itself, without an exec-handler
/// round-trip. Also feeds command completion.
pub const BUILTIN_NAMES: &[&str] = &[
    ":", "true", "false", "exit", "cd", "pwd", "echo", "printf", "export", "unset", "shift",
    "break", "continue", "source", ".",
];

/// Callback applied to every sub-command a nested run creates.
pub type Modifier = Arc<dyn Fn(&Arc<SubCommandExecution>) + Send + Sync>;

/// Default streams for a run plus the per-command overrides.
#[derive(Clone)]
pub struct ExecIo {
    pub stdin: InputHandle,
    pub stdout: OutputHandle,
    pub stderr: OutputHandle,
}

/// The exec-handler hook: claims every non-builtin simple command.
#[async_trait::async_trait]
pub trait ExecHost: Send + Sync {
    fn default_io(&self) -> ExecIo;

    async fn exec(
        &self,
        ce: &Arc<CommandExecution>,
        argv: Vec<String>,
        ctx: HandlerCtx,
        modifier: Option<Modifier>,
    ) -> Result<i32, ShellError>;
}

/// Interpreter environment: variables, working directory, positional
/// parameters and the last exit status.
#[derive(Clone)]
pub struct ShellEnv {
    pub vars: HashMap<String, String>,
    pub dir: PathBuf,
    pub home: PathBuf,
    pub params: Vec<String>,
    pub last_status: i32,
    pub exited: Option<i32>,
    pub shell_name: String,
}

impl ShellEnv {
    pub fn new(
        dir: PathBuf,
        vars: Vec<(String, String)>,
        params: Vec<String>,
        shell_name: String,
    ) -> Self {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let home = vars
            .get("HOME")
            .map(PathBuf::from)
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("/"));

        ShellEnv {
            vars,
            dir,
            home,
            params,
            last_status: 0,
            exited: None,
            shell_name,
        }
    }

    /// Parameter lookup: named variables, positionals, and the specials
    /// `?`, `#`, `@`, `*`, `0`.
    pub fn param(&self, name: &str) -> String {
        match name {
            "?" => return self.last_status.to_string(),
            "#" => return self.params.len().to_string(),
            "@" | "*" => return self.params.join(" "),
            "0" => return self.shell_name.clone(),
            _ => {}
        }
        if name.chars().all(|c| c.is_ascii_digit()) {
            let n: usize = name.parse().unwrap_or(0);
            if n >= 1 {
                return self.params.get(n - 1).cloned().unwrap_or_default();
            }
            return String::new();
        }
        self.vars.get(name).cloned().unwrap_or_default()
    }

    /// Environment passed to child processes.
    pub fn environ(&self) -> Vec<(String, String)> {
        self.vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

enum Flow {
    Normal(i32),
    Break(u32),
    Continue(u32),
    Exit,
}

pub struct Runner {
    env: Mutex<ShellEnv>,
}

impl Runner {
    pub fn new(env: ShellEnv) -> Self {
        Runner {
            env: Mutex::new(env),
        }
    }

    pub fn dir(&self) -> PathBuf {
        util::lock(&self.env).dir.clone()
    }

    pub fn var(&self, name: &str) -> String {
        util::lock(&self.env).param(name)
    }

    pub fn last_status(&self) -> i32 {
        util::lock(&self.env).last_status
    }

    /// Set when the `exit` builtin ran; carries its status.
    pub fn exited(&self) -> Option<i32> {
        util::lock(&self.env).exited
    }

    fn snapshot(&self) -> ShellEnv {
        util::lock(&self.env).clone()
    }

    fn set_status(&self, status: i32) {
        util::lock(&self.env).last_status = status;
    }

    /// Run a parsed file to completion. Returns the status of the last
    /// command; errors abort the whole run.
    pub async fn run(
        &self,
        host: &dyn ExecHost,
        ce: &Arc<CommandExecution>,
        file: &File,
        modifier: Option<Modifier>,
    ) -> Result<i32, ShellError> {
        let io = host.default_io();
        match self.run_stmts(host, ce, &file.stmts, &io, modifier).await? {
            Flow::Normal(status) => Ok(status),
            Flow::Exit => Ok(self.exited().unwrap_or(0)),
            Flow::Break(_) | Flow::Continue(_) => Ok(self.last_status()),
        }
    }

    fn run_stmts<'a>(
        &'a self,
        host: &'a dyn ExecHost,
        ce: &'a Arc<CommandExecution>,
        stmts: &'a [Stmt],
        io: &'a ExecIo,
        modifier: Option<Modifier>,
    ) -> BoxFuture<'a, Result<Flow, ShellError>> {
        Box::pin(async move {
            let mut last = Flow::Normal(self.last_status());
            for stmt in stmts {
                if ce.cancelled() {
                    return Err(ShellError::Cancelled);
                }
                match self.run_stmt(host, ce, stmt, io, modifier.clone()).await? {
                    Flow::Normal(status) => last = Flow::Normal(status),
                    other => return Ok(other),
                }
            }
            Ok(last)
        })
    }

    async fn run_stmt(
        &self,
        host: &dyn ExecHost,
        ce: &Arc<CommandExecution>,
        stmt: &Stmt,
        io: &ExecIo,
        modifier: Option<Modifier>,
    ) -> Result<Flow, ShellError> {
        let flow = self
            .run_pipeline(host, ce, &stmt.first, io, modifier.clone())
            .await?;
        let Flow::Normal(mut status) = flow else {
            return Ok(flow);
        };

        for (op, pipeline) in &stmt.rest {
            let wanted_success = matches!(op, AndOrOp::And);
            if wanted_success != (status == 0) {
                continue;
            }
            match self
                .run_pipeline(host, ce, pipeline, io, modifier.clone())
                .await?
            {
                Flow::Normal(s) => status = s,
                other => return Ok(other),
            }
        }

        Ok(Flow::Normal(status))
    }

    async fn run_pipeline(
        &self,
        host: &dyn ExecHost,
        ce: &Arc<CommandExecution>,
        pipeline: &Pipeline,
        io: &ExecIo,
        modifier: Option<Modifier>,
    ) -> Result<Flow, ShellError> {
        if pipeline.commands.len() == 1 {
            let flow = self
                .run_command(host, ce, &pipeline.commands[0], io.clone(), modifier)
                .await?;
            if let Flow::Normal(status) = flow {
                self.set_status(status);
            }
            return Ok(flow);
        }

        // Connect the stages with pipes and run them concurrently; each
        // stage's write end must drop with the stage so EOF propagates.
        let n = pipeline.commands.len();
        let mut stages = Vec::with_capacity(n);
        let mut prev_read: Option<Arc<std::fs::File>> = None;

        for (i, cmd) in pipeline.commands.iter().enumerate() {
            let mut stage_io = io.clone();
            if let Some(read) = prev_read.take() {
                stage_io.stdin = InputHandle::new(read, false);
            }
            if i < n - 1 {
                let (read, write) = os_pipe()?;
                stage_io.stdout = OutputHandle::plain(Arc::new(write));
                prev_read = Some(Arc::new(read));
            }
            stages.push(self.run_command(host, ce, cmd, stage_io, modifier.clone()));
        }

        let results = futures::future::join_all(stages).await;

        let mut status = 0;
        for result in results {
            match result? {
                Flow::Normal(s) => status = s,
                other => return Ok(other),
            }
        }
        self.set_status(status);
        Ok(Flow::Normal(status))
    }

    fn run_command<'a>(
        &'a self,
        host: &'a dyn ExecHost,
        ce: &'a Arc<CommandExecution>,
        cmd: &'a Command,
        io: ExecIo,
        modifier: Option<Modifier>,
    ) -> BoxFuture<'a, Result<Flow, ShellError>> {
        Box::pin(async move {
            match cmd {
                Command::Simple(simple) => self.run_simple(host, ce, simple, io, modifier).await,
                Command::If {
                    cond,
                    then,
                    elifs,
                    r#else,
                } => {
                    match self.run_stmts(host, ce, cond, &io, modifier.clone()).await? {
                        Flow::Normal(0) => {
                            return self.run_stmts(host, ce, then, &io, modifier).await
                        }
                        Flow::Normal(_) => {}
                        other => return Ok(other),
                    }
                    for (cond, body) in elifs {
                        match self.run_stmts(host, ce, cond, &io, modifier.clone()).await? {
                            Flow::Normal(0) => {
                                return self.run_stmts(host, ce, body, &io, modifier).await
                            }
                            Flow::Normal(_) => {}
                            other => return Ok(other),
                        }
                    }
                    if let Some(body) = r#else {
                        return self.run_stmts(host, ce, body, &io, modifier).await;
                    }
                    self.set_status(0);
                    Ok(Flow::Normal(0))
                }
                Command::For { var, items, body } => {
                    let env = self.snapshot();
                    let values = expand_words(items, &env);
                    let mut status = 0;

                    'outer: for value in values {
                        if ce.cancelled() {
                            return Err(ShellError::Cancelled);
                        }
                        util::lock(&self.env).vars.insert(var.clone(), value);
                        match self.run_stmts(host, ce, body, &io, modifier.clone()).await? {
                            Flow::Normal(s) => status = s,
                            Flow::Break(_) => break 'outer,
                            Flow::Continue(_) => continue,
                            Flow::Exit => return Ok(Flow::Exit),
                        }
                    }
                    Ok(Flow::Normal(status))
                }
                Command::While { cond, body } => {
                    let mut status = 0;
                    loop {
                        if ce.cancelled() {
                            return Err(ShellError::Cancelled);
                        }
                        match self.run_stmts(host, ce, cond, &io, modifier.clone()).await? {
                            Flow::Normal(0) => {}
                            Flow::Normal(_) => break,
                            other => return Ok(other),
                        }
                        match self.run_stmts(host, ce, body, &io, modifier.clone()).await? {
                            Flow::Normal(s) => status = s,
                            Flow::Break(_) => break,
                            Flow::Continue(_) => continue,
                            Flow::Exit => return Ok(Flow::Exit),
                        }
                    }
                    Ok(Flow::Normal(status))
                }
            }
        })
    }

    async fn run_simple(
        &self,
        host: &dyn ExecHost,
        ce: &Arc<CommandExecution>,
        simple: &SimpleCommand,
        io: ExecIo,
        modifier: Option<Modifier>,
    ) -> Result<Flow, ShellError> {
        let env = self.snapshot();

        let argv = expand_words(&simple.words, &env);
        let assigns: Vec<(String, String)> = simple
            .assigns
            .iter()
            .map(|(name, value)| (name.clone(), expand_word(value, &env)))
            .collect();

        let io = match self.apply_redirects(simple, &env, io) {
            Ok(io) => io,
            Err(err) => {
                // Redirection failure skips the command, like sh.
                self.report(&err, &host.default_io().stderr);
                self.set_status(1);
                return Ok(Flow::Normal(1));
            }
        };

        if argv.is_empty() {
            let mut env = util::lock(&self.env);
            for (name, value) in assigns {
                env.vars.insert(name, value);
            }
            env.last_status = 0;
            return Ok(Flow::Normal(0));
        }

        if BUILTIN_NAMES.contains(&argv[0].as_str()) {
            let flow = self.run_builtin(host, ce, &argv, &io, modifier).await?;
            if let Flow::Normal(status) = flow {
                self.set_status(status);
            }
            return Ok(flow);
        }

        let mut child_env = env.environ();
        child_env.extend(assigns);

        let ctx = HandlerCtx {
            stdin: io.stdin,
            stdout: io.stdout,
            stderr: io.stderr,
            dir: env.dir.clone(),
            env: child_env,
        };

        let status = host.exec(ce, argv, ctx, modifier).await?;
        self.set_status(status);
        Ok(Flow::Normal(status))
    }

    fn apply_redirects(
        &self,
        simple: &SimpleCommand,
        env: &ShellEnv,
        mut io: ExecIo,
    ) -> Result<ExecIo, ShellError> {
        for redirect in &simple.redirects {
            let target = |word: &Option<Word>| -> Option<PathBuf> {
                word.as_ref().map(|w| {
                    let path = expand_word(w, env);
                    let path = PathBuf::from(path);
                    if path.is_absolute() {
                        path
                    } else {
                        env.dir.join(path)
                    }
                })
            };

            match redirect.op {
                RedirOp::Out | RedirOp::Append | RedirOp::ErrOut => {
                    let Some(path) = target(&redirect.target) else {
                        continue;
                    };
                    let file = OpenOptions::new()
                        .write(true)
                        .create(true)
                        .append(redirect.op == RedirOp::Append)
                        .truncate(redirect.op != RedirOp::Append)
                        .open(&path)?;
                    let handle = OutputHandle::plain(Arc::new(file));
                    if redirect.op == RedirOp::ErrOut {
                        io.stderr = handle;
                    } else {
                        io.stdout = handle;
                    }
                }
                RedirOp::In => {
                    let Some(path) = target(&redirect.target) else {
                        continue;
                    };
                    let file = std::fs::File::open(&path)?;
                    io.stdin = InputHandle::new(Arc::new(file), false);
                }
                RedirOp::ErrToOut => {
                    io.stderr = io.stdout.clone();
                }
            }
        }
        Ok(io)
    }

    fn report(&self, err: &ShellError, stderr: &OutputHandle) {
        let _ = stderr.write_str(&format!("{err}\n"));
    }

    fn run_builtin<'a>(
        &'a self,
        host: &'a dyn ExecHost,
        ce: &'a Arc<CommandExecution>,
        argv: &'a [String],
        io: &'a ExecIo,
        modifier: Option<Modifier>,
    ) -> BoxFuture<'a, Result<Flow, ShellError>> {
        Box::pin(async move {
            let name = argv[0].as_str();
            let args = &argv[1..];

            let status = match name {
                ":" | "true" => 0,
                "false" => 1,
                "echo" => {
                    let (newline, args) = match args.first().map(String::as_str) {
                        Some("-n") => (false, &args[1..]),
                        _ => (true, args),
                    };
                    let mut text = args.join(" ");
                    if newline {
                        text.push('\n');
                    }
                    match io.stdout.write_str(&text) {
                        Ok(()) => 0,
                        Err(_) => 1,
                    }
                }
                "printf" => {
                    let Some(format) = args.first() else {
                        self.report_msg("printf: missing format", &io.stderr);
                        return Ok(Flow::Normal(1));
                    };
                    let text = format_printf(format, &args[1..]);
                    match io.stdout.write_str(&text) {
                        Ok(()) => 0,
                        Err(_) => 1,
                    }
                }
                "pwd" => {
                    let dir = self.dir();
                    match io.stdout.write_str(&format!("{}\n", dir.display())) {
                        Ok(()) => 0,
                        Err(_) => 1,
                    }
                }
                "cd" => self.builtin_cd(args, io),
                "export" => {
                    let mut env = util::lock(&self.env);
                    for arg in args {
                        match arg.split_once('=') {
                            Some((name, value)) => {
                                env.vars.insert(name.to_string(), value.to_string());
                            }
                            None => {
                                // Exporting an unset name defines it empty.
                                env.vars.entry(arg.clone()).or_default();
                            }
                        }
                    }
                    0
                }
                "unset" => {
                    let mut env = util::lock(&self.env);
                    for arg in args {
                        env.vars.remove(arg);
                    }
                    0
                }
                "shift" => {
                    let n: usize = args
                        .first()
                        .and_then(|a| a.parse().ok())
                        .unwrap_or(1);
                    let mut env = util::lock(&self.env);
                    let n = n.min(env.params.len());
                    env.params.drain(..n);
                    0
                }
                "exit" => {
                    let code = args
                        .first()
                        .and_then(|a| a.parse().ok())
                        .unwrap_or_else(|| self.last_status());
                    util::lock(&self.env).exited = Some(code);
                    return Ok(Flow::Exit);
                }
                "break" => {
                    let n = args.first().and_then(|a| a.parse().ok()).unwrap_or(1);
                    return Ok(Flow::Break(n));
                }
                "continue" => {
                    let n = args.first().and_then(|a| a.parse().ok()).unwrap_or(1);
                    return Ok(Flow::Continue(n));
                }
                "source" | "." => {
                    let Some(file) = args.first() else {
                        self.report_msg("source: filename argument required", &io.stderr);
                        return Ok(Flow::Normal(1));
                    };
                    let env = self.snapshot();
                    let path = util::look_path(file, &env.dir, &env.param("PATH"));
                    let Some(path) = path else {
                        self.report_msg(&format!("source: {file}: no such file"), &io.stderr);
                        return Ok(Flow::Normal(1));
                    };
                    let src = match std::fs::read_to_string(&path) {
                        Ok(src) => src,
                        Err(e) => {
                            self.report_msg(&format!("source: {file}: {e}"), &io.stderr);
                            return Ok(Flow::Normal(1));
                        }
                    };
                    match parser::parse(&src) {
                        Ok(file) => {
                            return self.run_stmts(host, ce, &file.stmts, io, modifier).await
                        }
                        Err(e) => {
                            self.report(&e, &io.stderr);
                            return Ok(Flow::Normal(1));
                        }
                    }
                }
                _ => unreachable!("not a builtin: {name}"),
            };

            Ok(Flow::Normal(status))
        })
    }

    fn builtin_cd(&self, args: &[String], io: &ExecIo) -> i32 {
        let mut env = util::lock(&self.env);
        let target = match args.first() {
            Some(dir) => {
                let path = PathBuf::from(dir);
                if path.is_absolute() {
                    path
                } else {
                    env.dir.join(path)
                }
            }
            None => env.home.clone(),
        };

        match target.canonicalize() {
            Ok(path) if path.is_dir() => {
                env.vars
                    .insert("PWD".to_string(), path.to_string_lossy().to_string());
                env.dir = path;
                0
            }
            Ok(path) => {
                drop(env);
                self.report_msg(&format!("cd: {}: not a directory", path.display()), &io.stderr);
                1
            }
            Err(e) => {
                drop(env);
                self.report_msg(
                    &format!("cd: {}: {e}", target.display()),
                    &io.stderr,
                );
                1
            }
        }
    }

    fn report_msg(&self, msg: &str, stderr: &OutputHandle) {
        let _ = stderr.write_str(&format!("{msg}\n"));
    }
}

/// Minimal printf: `%s`/`%d` consume arguments, `%%` escapes, backslash
/// escapes for `\n`, `\t` and `\\`.
fn format_printf(format: &str, args: &[String]) -> String {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '%' => match chars.next() {
                Some('s') => out.push_str(args.next().map(String::as_str).unwrap_or("")),
                Some('d') => {
                    let n: i64 = args
                        .next()
                        .and_then(|a| a.parse().ok())
                        .unwrap_or(0);
                    out.push_str(&n.to_string());
                }
                Some('%') => out.push('%'),
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
                None => out.push('%'),
            },
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            _ => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printf_substitutes_arguments() {
        assert_eq!(
            format_printf("%s=%d\\n", &["a".to_string(), "7".to_string()]),
            "a=7\n"
        );
        assert_eq!(format_printf("100%%", &[]), "100%");
    }

    #[test]
    fn param_lookup_covers_specials() {
        let mut env = ShellEnv::new(
            PathBuf::from("/"),
            vec![("X".to_string(), "1".to_string())],
            vec!["a".to_string(), "b".to_string()],
            "aish".to_string(),
        );
        env.last_status = 3;
        assert_eq!(env.param("X"), "1");
        assert_eq!(env.param("?"), "3");
        assert_eq!(env.param("#"), "2");
        assert_eq!(env.param("@"), "a b");
        assert_eq!(env.param("2"), "b");
        assert_eq!(env.param("3"), "");
        assert_eq!(env.param("0"), "aish");
        assert_eq!(env.param("NOPE"), "");
    }
}
