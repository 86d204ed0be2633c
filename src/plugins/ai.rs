//! The AI plugin. Routes commands by mode (shell first, AI fallback, or AI
//! directly), drives the streaming chat completion with a bounded tool-call
//! loop, re-enters the runner for `EXECUTE`/`TOOL_*` calls, and maintains
//! the bounded conversation history assembled from QA traces.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use super::extension;
use crate::config::{
    CONFIG_MAX_HISTORY, CONFIG_MAX_ITERATIONS, CONFIG_OPENAI_API_KEY, CONFIG_OPENAI_BASE_URL,
    CONFIG_OPENAI_MODEL,
};
use crate::error::ShellError;
use crate::llm::{
    ChatClient, ChatEvent, ChatRequest, Message, OpenAiClient, ToolCall, ToolDefinition,
};
use crate::shell::execution::{AiExecution, AssistantAnswer, CommandExecution, SubCommandExecution};
use crate::shell::plugin::ShellPlugin;
use crate::shell::state::ShellMode;
use crate::shell::{Shell, DEFAULT_FILE_NAME};
use crate::util::{self, color};

pub const TOOL_EXECUTE: &str = "EXECUTE";
pub const TOOL_USER_PREFIX: &str = "TOOL_";

#[derive(Deserialize)]
struct ExecuteToolParams {
    #[serde(default)]
    code: String,
}

#[derive(Deserialize)]
struct UserToolParams {
    #[serde(default)]
    args: Vec<String>,
}

pub struct AiPlugin {
    client: Arc<dyn ChatClient>,
    history: Mutex<Vec<Arc<AiExecution>>>,
    history_limit: AtomicUsize,
    iteration_limit: AtomicUsize,
}

impl Default for AiPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl AiPlugin {
    pub fn new() -> Self {
        Self::with_client(Arc::new(OpenAiClient::new()))
    }

    pub fn with_client(client: Arc<dyn ChatClient>) -> Self {
        AiPlugin {
            client,
            history: Mutex::new(Vec::new()),
            history_limit: AtomicUsize::new(10),
            iteration_limit: AtomicUsize::new(6),
        }
    }

    pub fn history(&self) -> Vec<Arc<AiExecution>> {
        util::lock(&self.history).clone()
    }

    fn sync_limits(&self, shell: &Shell) {
        let settings = shell.settings();
        if let Some(limit) = settings.get_int(CONFIG_MAX_HISTORY) {
            self.history_limit
                .store(limit.max(0) as usize, Ordering::Relaxed);
        }
        if let Some(limit) = settings.get_int(CONFIG_MAX_ITERATIONS) {
            self.iteration_limit
                .store(limit.max(1) as usize, Ordering::Relaxed);
        }
    }

    /// One full AI exchange: stream, print, handle tool calls, repeat up to
    /// the iteration limit.
    async fn run_ai_query(
        &self,
        ce: &Arc<CommandExecution>,
        sce: &Arc<SubCommandExecution>,
        shell: &Arc<Shell>,
    ) -> Result<(), ShellError> {
        let qa = sce.qa().clone();
        let limit = self.iteration_limit.load(Ordering::Relaxed).max(1);
        let mut iter = 0;

        loop {
            if ce.cancelled() {
                return Err(ShellError::Cancelled);
            }

            let settings = shell.settings();
            let request = ChatRequest {
                model: settings.get(CONFIG_OPENAI_MODEL),
                api_key: settings.get(CONFIG_OPENAI_API_KEY),
                base_url: settings.get(CONFIG_OPENAI_BASE_URL),
                messages: self.retrieve_messages(ce, shell, Some(&qa)),
                tools: self.retrieve_tool_definitions(shell),
            };

            let mut stream = self.client.stream_chat(request).await?;

            let stdout = sce.stdout();
            let color_on = sce.color_supported();
            if color_on {
                let _ = stdout.write_str(color::GRAY);
            }

            let mut leading_space = true;
            let mut has_text = false;
            let mut tool_calls: Vec<ToolCall> = Vec::new();

            let stream_result: Result<(), ShellError> = loop {
                let event = tokio::select! {
                    _ = ce.token().cancelled() => break Err(ShellError::Cancelled),
                    event = stream.next() => event,
                };
                match event {
                    None => break Ok(()),
                    Some(Err(err)) => break Err(err.into()),
                    Some(Ok(ChatEvent::Content(text))) => {
                        let text = if leading_space {
                            let trimmed = text.trim_start();
                            if trimmed.is_empty() {
                                continue;
                            }
                            trimmed.to_string()
                        } else {
                            text
                        };
                        leading_space = false;
                        has_text = true;
                        let _ = stdout.write_str(&text);
                    }
                    Some(Ok(ChatEvent::Completed { tool_calls: calls })) => {
                        tool_calls = calls;
                        break Ok(());
                    }
                }
            };

            if color_on {
                let _ = stdout.write_str(color::RESET);
            }
            if has_text {
                let _ = stdout.write_str("\n");
            }

            stream_result?;

            let Some(tool_call) = tool_calls.into_iter().next() else {
                break;
            };

            // Flush any leading answer text so the buffer is clean before
            // the tool call runs.
            let answer_text = ce.answer_text();
            if !answer_text.is_empty() {
                qa.push_answer(AssistantAnswer {
                    text: answer_text,
                    tool_call: None,
                });
                ce.reset_buffer();
            }

            if let Err(err) = self.handle_tool_call(ce, sce, &tool_call, shell).await {
                let text = ce.answer_text();
                let text = if text.is_empty() {
                    format!("Error: {err}")
                } else {
                    text
                };
                qa.push_answer(AssistantAnswer {
                    text,
                    tool_call: Some(tool_call.clone()),
                });
            }
            ce.reset_buffer();

            iter += 1;
            if iter >= limit {
                break;
            }
        }

        Ok(())
    }

    async fn handle_tool_call(
        &self,
        ce: &Arc<CommandExecution>,
        sce: &Arc<SubCommandExecution>,
        tool_call: &ToolCall,
        shell: &Arc<Shell>,
    ) -> Result<(), ShellError> {
        let name = tool_call.name.as_str();

        if name == TOOL_EXECUTE {
            let params: ExecuteToolParams = serde_json::from_str(&tool_call.arguments)?;
            let code = params.code.trim().to_string();
            if code.is_empty() {
                return Ok(());
            }

            self.announce(sce, "use", &code);
            // The announcement itself is mirrored into the buffer; clear it
            // so the captured answer is the tool's output alone.
            ce.reset_buffer();
            log::debug!("tool call EXECUTE: {code}");
            return self.eval_tool_call(&code, ce, sce, tool_call, shell).await;
        }

        if let Some(tool_name) = name.strip_prefix(TOOL_USER_PREFIX) {
            let Some(tool) = shell.settings().tool(tool_name) else {
                return Err(ShellError::ToolNotFound(tool_name.to_string()));
            };
            let params: UserToolParams = serde_json::from_str(&tool_call.arguments)?;

            let mut fields = vec![tool.entrypoint.clone()];
            fields.extend(params.args);
            let stmt = util::combine_fields(&fields)?;

            self.announce(sce, "use tool", &stmt);
            ce.reset_buffer();
            log::debug!("tool call {name}: {stmt}");
            return self.eval_tool_call(&stmt, ce, sce, tool_call, shell).await;
        }

        Err(ShellError::ToolNotFound(name.to_string()))
    }

    fn announce(&self, sce: &SubCommandExecution, label: &str, stmt: &str) {
        let stdout = sce.stdout();
        let _ = if sce.color_supported() {
            stdout.write_str(&format!(
                "{}{label}:{} {}{}{}{}\n\n",
                color::BLUE,
                color::RESET,
                color::UNDERLINE,
                color::BLUE,
                stmt,
                color::RESET
            ))
        } else {
            stdout.write_str(&format!("{label}: {stmt}\n\n"))
        };
    }

    /// Re-enter the runner on model-provided code. Every sub-command the
    /// nested run creates is marked as tool-initiated: it inherits this
    /// command's I/O and QA parentage and runs under `User` mode so it can
    /// never recurse back into the AI.
    async fn eval_tool_call(
        &self,
        code: &str,
        ce: &Arc<CommandExecution>,
        sce: &Arc<SubCommandExecution>,
        tool_call: &ToolCall,
        shell: &Arc<Shell>,
    ) -> Result<(), ShellError> {
        if code.is_empty() {
            return Ok(());
        }

        let ran_sub_command = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let modifier: crate::interp::Modifier = {
            let parent = sce.clone();
            let tool_call = tool_call.clone();
            let ran_sub_command = ran_sub_command.clone();
            Arc::new(move |child: &Arc<SubCommandExecution>| {
                ran_sub_command.store(true, Ordering::Relaxed);
                child.inherit(&parent);
                child.set_mode(ShellMode::User);
                child.qa().set_under_tool_call(Some(tool_call.clone()));
            })
        };

        shell.eval(ce, code, Some(modifier)).await?;

        // No sub-command fired: the code was pure builtins, so synthesize
        // the answer from whatever the builtins wrote.
        if !ran_sub_command.load(Ordering::Relaxed) {
            let text = ce.answer_text();
            let answer = if text.is_empty() {
                fallback_answer(None, Some(tool_call.clone()))
            } else {
                AssistantAnswer {
                    text,
                    tool_call: Some(tool_call.clone()),
                }
            };
            sce.qa().push_answer(answer);
        }

        Ok(())
    }

    fn retrieve_messages(
        &self,
        ce: &Arc<CommandExecution>,
        shell: &Arc<Shell>,
        extra: Option<&Arc<AiExecution>>,
    ) -> Vec<Message> {
        let mut messages = Vec::new();
        messages.push(Message::system(self.generate_system_prompt(shell)));

        let mut push_qa = |qa: &Arc<AiExecution>| {
            messages.push(Message::user(qa.question()));
            for answer in qa.answers() {
                match answer.tool_call {
                    Some(tool_call) => {
                        let id = tool_call.id.clone();
                        messages.push(Message::assistant_tool_call(tool_call));
                        messages.push(Message::tool(answer.text, id));
                    }
                    None => {
                        if !answer.text.is_empty() {
                            messages.push(Message::assistant(answer.text));
                        }
                    }
                }
            }
        };

        for qa in self.history() {
            push_qa(&qa);
        }
        for qa in ce.qa() {
            push_qa(&qa);
        }
        if let Some(qa) = extra {
            push_qa(qa);
        }

        messages
    }

    fn retrieve_tool_definitions(&self, shell: &Arc<Shell>) -> Vec<ToolDefinition> {
        let mut tools = vec![ToolDefinition {
            name: TOOL_EXECUTE.to_string(),
            description: "Execute code in parameter, which means you will do: `source [code]`"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "The code to execute"
                    }
                },
                "required": ["code"]
            }),
        }];

        for tool in shell.settings().tools() {
            let usage = if tool.usage.is_empty() {
                "none".to_string()
            } else {
                tool.usage.clone()
            };
            tools.push(ToolDefinition {
                name: format!("{TOOL_USER_PREFIX}{}", tool.name),
                description: format!("Execute {}, usage: {usage}", tool.entrypoint),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "args": {
                            "type": "array",
                            "items": { "type": "string" }
                        }
                    }
                }),
            });
        }

        tools
    }

    fn generate_system_prompt(&self, shell: &Arc<Shell>) -> String {
        let state = shell.state();
        let prompt = shell.settings().system_prompts();

        let cmd = if shell.file_name() == DEFAULT_FILE_NAME {
            DEFAULT_FILE_NAME.to_string()
        } else {
            format!("{DEFAULT_FILE_NAME} {}", shell.file_name())
        };

        format!(
            "{prompt}\n\n\
             You live inside `{shell_name}`, an AI-native shell, currently running as `{cmd}`.\n\
             Host: {os}/{arch}\n\
             Working directory: {wd}\n\
             User: {user}\n\n\
             Answer questions briefly; the reply is printed straight into the terminal.\n\
             When an action is needed, call the provided tools to run shell commands on \
             the user's behalf instead of describing them.",
            prompt = prompt.trim_end(),
            shell_name = DEFAULT_FILE_NAME,
            cmd = cmd,
            os = state.os(),
            arch = state.arch(),
            wd = shell.dir().display(),
            user = state.username(),
        )
    }
}

fn fallback_answer(err: Option<&ShellError>, tool_call: Option<ToolCall>) -> AssistantAnswer {
    match err {
        Some(err) => AssistantAnswer {
            text: format!("Error: {err}"),
            tool_call,
        },
        None => AssistantAnswer {
            text: "done".to_string(),
            tool_call,
        },
    }
}

fn format_exit_status(status: i32) -> String {
    match status {
        130 => "Exit status 130: command cancelled by user".to_string(),
        131 => "Exit status 131: segment fault".to_string(),
        _ => format!("Exit status: {status}"),
    }
}

#[async_trait::async_trait]
impl ShellPlugin for AiPlugin {
    fn id(&self) -> &'static str {
        "ai"
    }

    fn install(&self, shell: &Arc<Shell>) -> Result<(), ShellError> {
        self.sync_limits(shell);
        Ok(())
    }

    async fn before_execute(
        &self,
        _ce: &Arc<CommandExecution>,
        sce: &Arc<SubCommandExecution>,
        _shell: &Arc<Shell>,
    ) -> Result<(), ShellError> {
        sce.qa().set_question(sce.fields().join(" ").trim());
        Ok(())
    }

    async fn execute(
        &self,
        ce: &Arc<CommandExecution>,
        sce: &Arc<SubCommandExecution>,
        shell: &Arc<Shell>,
    ) -> Option<Result<(), ShellError>> {
        match sce.mode() {
            ShellMode::User => return Some(sce.default_exec_handler(shell).await),
            ShellMode::Auto => match sce.default_exec_handler(shell).await {
                Ok(()) => return Some(Ok(())),
                Err(err) if !err.is_not_found() => return Some(Err(err)),
                Err(_) => {
                    // not found: fall through to the AI
                }
            },
            ShellMode::Ai => {}
        }

        Some(self.run_ai_query(ce, sce, shell).await)
    }

    async fn after_execute(
        &self,
        ce: &Arc<CommandExecution>,
        sce: &Arc<SubCommandExecution>,
        shell: &Arc<Shell>,
    ) -> Result<(), ShellError> {
        if sce.cmd().eq_ignore_ascii_case("reset") {
            util::lock(&self.history).clear();
            return Ok(());
        }

        // Give mirrored child output time to land before it is read back.
        shell.settle_captures().await;

        sce.with_error(|err| {
            if let Some(err) = err {
                match err {
                    ShellError::Exit(status) => {
                        sce.stdai(&format!("{}\n", format_exit_status(*status)))
                    }
                    ShellError::Cancelled => {
                        sce.stdai(&format!("{}\n", format_exit_status(130)))
                    }
                    other => sce.stdai(&format!("{}: {other}\n", shell.file_name())),
                }
            }
        });

        let qa = sce.qa().clone();
        let tool_call = qa.under_tool_call();
        let trace = qa.clone().trace();

        let answer_text = ce.answer_text();
        let answer = if answer_text.is_empty() {
            sce.with_error(|err| fallback_answer(err, tool_call.clone()))
        } else {
            AssistantAnswer {
                text: answer_text,
                tool_call: tool_call.clone(),
            }
        };
        for node in &trace {
            node.push_answer(answer.clone());
        }
        ce.reset_buffer();

        if qa.is_root() && !extension::excluded_from_history(&sce.cmd()) {
            ce.append_qa(qa);
        }

        Ok(())
    }

    async fn end(&self, ce: &Arc<CommandExecution>, shell: &Arc<Shell>) -> Result<(), ShellError> {
        self.sync_limits(shell);

        let roots = ce.qa();
        if roots.is_empty() {
            return Ok(());
        }

        let limit = self.history_limit.load(Ordering::Relaxed);
        let mut history = util::lock(&self.history);
        if limit == 0 {
            history.clear();
            return Ok(());
        }

        history.extend(roots);
        let len = history.len();
        if len > limit {
            history.drain(..len - limit);
        }
        Ok(())
    }
}
