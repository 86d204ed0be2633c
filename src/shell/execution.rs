//! Execution state: one `CommandExecution` per input line, one
//! `SubCommandExecution` per command the runner dispatches (including
//! commands spawned transitively by tool calls), and the `AiExecution`
//! question/answer tree linking them into conversation history.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio_util::sync::CancellationToken;

use super::state::ShellMode;
use super::stdio::{HandlerCtx, InputHandle, OutputHandle};
use crate::error::ShellError;
use crate::llm::ToolCall;
use crate::util;

/// One assistant answer: plain text, or the result of a tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantAnswer {
    pub text: String,
    pub tool_call: Option<ToolCall>,
}

/// A question/answer node. Roots hold the user's raw input line; children
/// are created when a tool call re-enters execution.
#[derive(Default)]
pub struct AiExecution {
    parent: RwLock<Option<Arc<AiExecution>>>,
    under_tool_call: RwLock<Option<ToolCall>>,
    question: RwLock<String>,
    answers: RwLock<Vec<AssistantAnswer>>,
}

impl AiExecution {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_root(&self) -> bool {
        util::read(&self.parent).is_none()
    }

    pub fn set_parent(&self, parent: Arc<AiExecution>) {
        *util::write(&self.parent) = Some(parent);
    }

    pub fn question(&self) -> String {
        util::read(&self.question).clone()
    }

    pub fn set_question(&self, question: impl Into<String>) {
        *util::write(&self.question) = question.into();
    }

    pub fn under_tool_call(&self) -> Option<ToolCall> {
        util::read(&self.under_tool_call).clone()
    }

    pub fn set_under_tool_call(&self, tool_call: Option<ToolCall>) {
        *util::write(&self.under_tool_call) = tool_call;
    }

    pub fn answers(&self) -> Vec<AssistantAnswer> {
        util::read(&self.answers).clone()
    }

    pub fn push_answer(&self, answer: AssistantAnswer) {
        util::write(&self.answers).push(answer);
    }

    /// The node and its ancestors, leaf first.
    pub fn trace(self: Arc<Self>) -> Vec<Arc<AiExecution>> {
        let mut trace = Vec::new();
        let mut cursor = Some(self);
        while let Some(node) = cursor {
            cursor = util::read(&node.parent).clone();
            trace.push(node);
        }
        trace
    }
}

/// State for one top-level input line.
pub struct CommandExecution {
    token: CancellationToken,
    buf: Mutex<Vec<u8>>,
    incomplete: AtomicBool,
    terminated: AtomicBool,
    interactive: bool,
    qa: Mutex<Vec<Arc<AiExecution>>>,
}

impl CommandExecution {
    pub fn new(token: CancellationToken, interactive: bool) -> Self {
        CommandExecution {
            token,
            buf: Mutex::new(Vec::new()),
            incomplete: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            interactive,
            qa: Mutex::new(Vec::new()),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn interactive(&self) -> bool {
        self.interactive
    }

    pub fn color_supported(&self) -> bool {
        self.interactive && util::color_supported()
    }

    pub fn incomplete(&self) -> bool {
        self.incomplete.load(Ordering::Relaxed)
    }

    pub fn set_incomplete(&self, incomplete: bool) {
        self.incomplete.store(incomplete, Ordering::Relaxed);
    }

    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::Relaxed)
    }

    pub fn set_terminated(&self) {
        self.terminated.store(true, Ordering::Relaxed);
    }

    pub fn write_buffer(&self, bytes: &[u8]) {
        util::lock(&self.buf).extend_from_slice(bytes);
    }

    pub fn reset_buffer(&self) {
        util::lock(&self.buf).clear();
    }

    /// The captured output as model-visible text: UTF-8 (lossy), ANSI
    /// escapes stripped, trimmed.
    pub fn answer_text(&self) -> String {
        let raw = String::from_utf8_lossy(&util::lock(&self.buf)).to_string();
        util::strip_ansi(&raw).trim().to_string()
    }

    pub fn append_qa(&self, qa: Arc<AiExecution>) {
        util::lock(&self.qa).push(qa);
    }

    pub fn qa(&self) -> Vec<Arc<AiExecution>> {
        util::lock(&self.qa).clone()
    }
}

/// State for one command invocation within a `CommandExecution`.
pub struct SubCommandExecution {
    ce: Arc<CommandExecution>,
    mode: RwLock<ShellMode>,
    fields: RwLock<Vec<String>>,
    ctx: RwLock<HandlerCtx>,
    error: Mutex<Option<ShellError>>,
    qa: Arc<AiExecution>,
    parent: RwLock<Option<Arc<SubCommandExecution>>>,
    interactive: bool,

    initial_stdout: OutputHandle,
    initial_stderr: OutputHandle,
}

impl SubCommandExecution {
    pub fn new(
        ce: Arc<CommandExecution>,
        mode: ShellMode,
        fields: Vec<String>,
        ctx: HandlerCtx,
    ) -> Arc<Self> {
        let interactive = ctx.stdout.is_terminal();
        Arc::new(SubCommandExecution {
            ce,
            mode: RwLock::new(mode),
            fields: RwLock::new(fields),
            initial_stdout: ctx.stdout.clone(),
            initial_stderr: ctx.stderr.clone(),
            ctx: RwLock::new(ctx),
            error: Mutex::new(None),
            qa: AiExecution::new(),
            parent: RwLock::new(None),
            interactive,
        })
    }

    pub fn ce(&self) -> &Arc<CommandExecution> {
        &self.ce
    }

    pub fn fields(&self) -> Vec<String> {
        util::read(&self.fields).clone()
    }

    pub fn set_fields(&self, fields: Vec<String>) {
        *util::write(&self.fields) = fields;
    }

    pub fn cmd(&self) -> String {
        util::read(&self.fields)
            .first()
            .cloned()
            .unwrap_or_default()
    }

    pub fn mode(&self) -> ShellMode {
        *util::read(&self.mode)
    }

    pub fn set_mode(&self, mode: ShellMode) {
        *util::write(&self.mode) = mode;
    }

    pub fn qa(&self) -> &Arc<AiExecution> {
        &self.qa
    }

    pub fn ctx(&self) -> HandlerCtx {
        util::read(&self.ctx).clone()
    }

    pub fn set_error(&self, err: ShellError) {
        *util::lock(&self.error) = Some(err);
    }

    pub fn take_error(&self) -> Option<ShellError> {
        util::lock(&self.error).take()
    }

    /// Run `f` against the recorded error, if any.
    pub fn with_error<T>(&self, f: impl FnOnce(Option<&ShellError>) -> T) -> T {
        f(util::lock(&self.error).as_ref())
    }

    pub fn interactive(&self) -> bool {
        self.interactive
    }

    pub fn color_supported(&self) -> bool {
        self.interactive && util::color_supported()
    }

    /// Stream visible to both the user and the model.
    pub fn stdout(&self) -> OutputHandle {
        if self.ce.terminated() {
            return self.initial_stdout.clone();
        }
        util::read(&self.ctx).stdout.clone()
    }

    /// Error stream visible to both the user and the model.
    pub fn stderr(&self) -> OutputHandle {
        if self.ce.terminated() {
            return self.initial_stderr.clone();
        }
        util::read(&self.ctx).stderr.clone()
    }

    pub fn stdin(&self) -> InputHandle {
        util::read(&self.ctx).stdin.clone()
    }

    /// Write text visible only to the model (the capture buffer).
    pub fn stdai(&self, text: &str) {
        self.ce.write_buffer(text.as_bytes());
    }

    /// Adopt `parent` for tool-call recursion: re-parent the QA node and,
    /// for every stream still at the shell default, inline the parent's so
    /// nested pipelines keep flowing into the same capture.
    pub fn inherit(&self, parent: &Arc<SubCommandExecution>) {
        *util::write(&self.parent) = Some(parent.clone());
        self.qa.set_parent(parent.qa.clone());

        let parent_ctx = parent.ctx();
        let mut ctx = util::write(&self.ctx);
        if ctx.stdin.is_shell_default() {
            ctx.stdin = parent_ctx.stdin.clone();
        }
        if ctx.stdout.is_shell_default() {
            ctx.stdout = parent_ctx.stdout.clone();
        }
        if ctx.stderr.is_shell_default() {
            ctx.stderr = parent_ctx.stderr.clone();
        }
    }

    pub fn parent(&self) -> Option<Arc<SubCommandExecution>> {
        util::read(&self.parent).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_walks_leaf_to_root() {
        let root = AiExecution::new();
        root.set_question("root");
        let child = AiExecution::new();
        child.set_parent(root.clone());
        let grandchild = AiExecution::new();
        grandchild.set_parent(child.clone());

        let trace = grandchild.clone().trace();
        assert_eq!(trace.len(), 3);
        assert!(Arc::ptr_eq(&trace[2], &root));
        assert!(!grandchild.is_root());
        assert!(root.is_root());
    }

    #[test]
    fn answer_text_strips_ansi_and_trims() {
        let ce = CommandExecution::new(CancellationToken::new(), false);
        ce.write_buffer(b"  \x1b[90mhello\x1b[0m \n");
        assert_eq!(ce.answer_text(), "hello");

        ce.reset_buffer();
        assert_eq!(ce.answer_text(), "");
    }

    #[test]
    fn cancellation_tokens_cascade_from_parent() {
        let parent = CancellationToken::new();
        let ce = CommandExecution::new(parent.child_token(), false);
        assert!(!ce.cancelled());
        parent.cancel();
        assert!(ce.cancelled());
    }
}
