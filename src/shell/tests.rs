//! End-to-end tests: a real shell over temp-file stdio, driven by scripts,
//! with the chat client stubbed.

use std::fs::File;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::execution::CommandExecution;
use super::state::ShellMode;
use super::Shell;
use crate::llm::mock::MockChatClient;
use crate::llm::Role;
use crate::plugins::{AiPlugin, ExtensionPlugin, PathCompletePlugin, PromptPlugin};
use crate::shell::plugin::ShellPlugin;
use crate::ShellError;

struct TestShell {
    shell: Arc<Shell>,
    ai: Arc<AiPlugin>,
    client: Arc<MockChatClient>,
    dir: TempDir,
}

impl TestShell {
    /// Build a shell whose stdin is `script` and whose stdout/stderr are
    /// temp files. `{DIR}` in the script expands to the shell's temp
    /// directory. Rc files are not loaded.
    fn new(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = script.replace("{DIR}", &dir.path().to_string_lossy());

        let in_path = dir.path().join("in");
        std::fs::write(&in_path, script).unwrap();
        let stdin = File::open(&in_path).unwrap();
        let stdout = File::create(dir.path().join("out")).unwrap();
        let stderr = File::create(dir.path().join("err")).unwrap();

        let shell = Shell::builder()
            .stdio(stdin, stdout, stderr)
            .load_rc(false)
            .build()
            .unwrap();

        let client = Arc::new(MockChatClient::new());
        let ai = Arc::new(AiPlugin::with_client(client.clone()));

        shell
            .use_plugins(vec![
                Arc::new(PromptPlugin::new()) as Arc<dyn ShellPlugin>,
                Arc::new(PathCompletePlugin::new()),
                Arc::new(ExtensionPlugin::new()),
                ai.clone(),
            ])
            .unwrap();

        TestShell {
            shell,
            ai,
            client,
            dir,
        }
    }

    async fn run(&self) {
        self.shell.start().await.unwrap();
    }

    fn stdout(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("out")).unwrap()
    }

    fn stderr(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("err")).unwrap()
    }
}

// Scenario: a not-found command under Auto mode falls through to the AI,
// the streamed text is user-visible and becomes the QA answer.
#[tokio::test]
async fn auto_mode_falls_through_to_ai() {
    let t = TestShell::new("definitely-not-a-command-xyz\n");
    t.client.push_text("no such thing");

    t.run().await;

    assert!(t.stdout().contains("no such thing\n"));
    assert!(!t.stderr().contains("command not found"));

    let history = t.ai.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].question(), "definitely-not-a-command-xyz");
    let answers = history[0].answers();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].text, "no such thing");
    assert!(answers[0].tool_call.is_none());
}

// Scenario: `ai:` routes to the model, an EXECUTE tool call re-enters the
// runner under User mode, and the silent command yields the "done" answer.
#[tokio::test]
async fn execute_tool_call_creates_file_and_done_answer() {
    let t = TestShell::new("cd {DIR}\nai: make a file foo\n");
    t.client
        .push_tool_call("call-1", "EXECUTE", "{\"code\":\"touch foo\"}");

    t.run().await;

    assert!(t.dir.path().join("foo").exists(), "tool call did not run");
    assert!(t.stdout().contains("use: touch foo"));

    let history = t.ai.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].question(), "ai: make a file foo");

    let answers = history[0].answers();
    let tool_answer = answers
        .iter()
        .find(|a| a.tool_call.is_some())
        .expect("tool call answer missing");
    assert_eq!(tool_answer.text, "done");
    assert_eq!(tool_answer.tool_call.as_ref().unwrap().name, "EXECUTE");

    // The follow-up request replayed the tool round on the wire.
    let requests = t.client.requests();
    assert_eq!(requests.len(), 2);
    let replay = &requests[1].messages;
    assert!(replay
        .iter()
        .any(|m| m.role == Role::Assistant && m.tool_calls.is_some()));
    assert!(replay
        .iter()
        .any(|m| m.role == Role::Tool && m.content == "done"));
}

// Scenario: a two-step tool chain followed by a text answer, within the
// iteration limit.
#[tokio::test]
async fn tool_chain_runs_two_rounds_then_text() {
    let t = TestShell::new("ai: list then delete\n");
    t.client
        .push_tool_call("c1", "EXECUTE", "{\"code\":\"echo one\"}");
    t.client
        .push_tool_call("c2", "EXECUTE", "{\"code\":\"echo two\"}");
    t.client.push_text("done");

    t.run().await;

    assert_eq!(t.client.request_count(), 3);

    let history = t.ai.history();
    assert_eq!(history.len(), 1);
    let answers = history[0].answers();
    assert_eq!(answers.len(), 3);
    assert_eq!(answers[0].text, "one");
    assert_eq!(answers[0].tool_call.as_ref().unwrap().id, "c1");
    assert_eq!(answers[1].text, "two");
    assert_eq!(answers[1].tool_call.as_ref().unwrap().id, "c2");
    assert_eq!(answers[2].text, "done");
    assert!(answers[2].tool_call.is_none());
}

// Scenario: a user-defined tool is exposed as TOOL_<name> and its captured
// output becomes the answer.
#[tokio::test]
async fn user_defined_tool_roundtrip() {
    let t = TestShell::new("aitool -u greets /bin/echo\nai: greet alice\n");
    t.client.push_tool_call(
        "c1",
        "TOOL_echo",
        "{\"args\":[\"hello\",\"alice\"]}",
    );

    t.run().await;

    assert!(t.shell.settings().tool("echo").is_some());
    assert!(t.stdout().contains("use tool:"));
    assert!(t.stdout().contains("hello alice"));

    // the aitool meta-command itself stays out of history
    let history = t.ai.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].question(), "ai: greet alice");

    let answers = history[0].answers();
    let tool_answer = answers
        .iter()
        .find(|a| a.tool_call.is_some())
        .expect("tool answer missing");
    assert!(tool_answer.text.contains("hello alice"));

    // tool definitions advertised on the wire
    let requests = t.client.requests();
    assert!(requests[0]
        .tools
        .iter()
        .any(|tool| tool.name == "TOOL_echo"));
}

// Scenario: multi-line continuation through the incremental parser.
#[tokio::test]
async fn incomplete_input_spans_lines() {
    let t = TestShell::new("for i in 1 2 3; do\necho $i; done\n");
    t.run().await;
    assert_eq!(t.stdout(), "1\n2\n3\n");
    assert!(t.ai.history().is_empty());
}

// Scenario: cancelling a running child delivers SIGINT; the 130 diagnostic
// is model-visible but never printed to the user.
#[tokio::test]
async fn cancelled_child_reports_130_to_the_model_only() {
    let t = TestShell::new("");
    let ce = Arc::new(CommandExecution::new(CancellationToken::new(), false));
    t.shell.state().set_current_execution(Some(ce.clone()));

    let shell = t.shell.clone();
    let eval_ce = ce.clone();
    let started = Instant::now();
    let handle =
        tokio::spawn(async move { shell.eval(&eval_ce, "sleep 30", None).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    ce.cancel();
    let result = handle.await.unwrap();

    assert!(matches!(result, Err(ShellError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(10));

    let qa = ce.qa();
    assert_eq!(qa.len(), 1);
    let answers = qa[0].answers();
    assert!(answers[0].text.contains("Exit status 130"));
    assert!(answers[0].text.contains("cancelled by user"));
    assert!(!t.stdout().contains("Exit status 130"));
}

#[tokio::test]
async fn aiset_aiget_roundtrip() {
    let t = TestShell::new("aiset openai.model my-model\naiget openai.model\n");
    t.run().await;
    assert!(t.stdout().contains("\"my-model\"\n"));
    assert!(t.ai.history().is_empty(), "meta-commands must stay out of history");
}

#[tokio::test]
async fn aiprompt_appends_and_resets() {
    let t = TestShell::new("aiprompt \"Always answer in haiku\"\naiprompt\naiprompt reset\naiprompt\n");
    t.run().await;
    let out = t.stdout();
    assert!(out.contains("Always answer in haiku"));
    assert!(out.contains("smart assistant"));
}

// Mode prefixes: with no argument they flip the persistent mode; with an
// argument they override one command only.
#[tokio::test]
async fn mode_prefixes_transient_and_persistent() {
    let t = TestShell::new("user: definitely-not-a-command-xyz\nai:\n");
    t.run().await;

    // the prefixed command ran as a shell command and failed loudly
    assert!(t.stderr().contains("command not found"));
    // no AI request was ever made for it
    assert_eq!(t.client.request_count(), 0);
    // the bare prefix flipped the persistent mode
    assert_eq!(t.shell.state().mode(), ShellMode::Ai);
}

// Mode prefixes compose with extension commands: the rewritten fields go
// through extension dispatch again.
#[tokio::test]
async fn mode_prefix_composes_with_extension_commands() {
    let t = TestShell::new("user: aiset max_history 3\naiget max_history\n");
    t.run().await;
    assert!(t.stdout().contains("\"3\"\n"));
}

#[tokio::test]
async fn max_history_zero_clears_immediately() {
    let t = TestShell::new("aiset max_history 0\nnot-a-command-here-xyz\n");
    t.client.push_text("hello");
    t.run().await;
    assert!(t.ai.history().is_empty());
}

#[tokio::test]
async fn max_iter_one_allows_a_single_tool_round() {
    let t = TestShell::new("aiset max_iter 1\nai: do the thing\n");
    t.client
        .push_tool_call("c1", "EXECUTE", "{\"code\":\"echo once\"}");
    // a second round would pop this and make the count 2
    t.client.push_text("never sent");

    t.run().await;
    assert_eq!(t.client.request_count(), 1);
    assert!(t.stdout().contains("once"));
}

// `reset` clears conversation history whatever else it does.
#[tokio::test]
async fn reset_clears_history() {
    let t = TestShell::new("ai:\nnot-a-command-here-xyz\nreset\n");
    t.client.push_text("first answer");
    t.client.push_text("ignored");
    t.run().await;
    assert!(t.ai.history().is_empty());
}

// Unparseable input outside User mode is retried as a plain query.
#[tokio::test]
async fn syntax_error_falls_back_to_ai_query() {
    let t = TestShell::new("what is (roughly) going on?\n");
    t.client.push_text("an answer");
    t.run().await;

    assert!(t.stdout().contains("an answer"));
    let history = t.ai.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].question(), "what is (roughly) going on?");
}

// In User mode the same input is a syntax error.
#[tokio::test]
async fn syntax_error_surfaces_in_user_mode() {
    let t = TestShell::new("user:\nwhat is (roughly) going on?\n");
    t.run().await;
    assert!(t.stderr().contains("syntax error"));
    assert_eq!(t.client.request_count(), 0);
}

#[tokio::test]
async fn pipelines_connect_stages() {
    let t = TestShell::new("echo hello | tr a-z A-Z\n");
    t.run().await;
    assert!(t.stdout().contains("HELLO"));
}

#[tokio::test]
async fn redirects_write_files_and_exit_status_is_tracked() {
    let t = TestShell::new("cd {DIR}\necho hi > out.txt\nuser:\nmissing-cmd-xyz\necho $?\n");
    t.run().await;

    let redirected = std::fs::read_to_string(t.dir.path().join("out.txt")).unwrap();
    assert_eq!(redirected, "hi\n");
    assert!(!t.stdout().contains("hi\n"), "redirected output must not reach the terminal");
    assert!(t.stdout().contains("127"));
    assert!(t.stderr().contains("command not found"));
}

#[tokio::test]
async fn exit_builtin_stops_the_shell_and_reports_status() {
    let t = TestShell::new("echo before\nexit 3\necho after\n");
    t.run().await;
    assert!(t.stdout().contains("before"));
    assert!(!t.stdout().contains("after"));
    assert_eq!(t.shell.exit_status(), Some(3));
}

#[tokio::test]
async fn rc_files_are_skipped_when_disabled() {
    // nothing to assert beyond "no surprises": the builder honored load_rc
    let t = TestShell::new("echo ok\n");
    t.run().await;
    assert_eq!(t.stdout(), "ok\n");
}

#[tokio::test]
async fn extension_completes_commands_and_config_keys() {
    let t = TestShell::new("");
    let ext = ExtensionPlugin::new();

    let candidates = ext.auto_complete("ais", 3, &t.shell);
    assert!(candidates.contains(&"aiset".to_string()));

    let candidates = ext.auto_complete("aiset openai.m", 14, &t.shell);
    assert!(candidates.contains(&"openai.model".to_string()));

    let candidates = ext.auto_complete("user: ech", 9, &t.shell);
    assert!(candidates.contains(&"echo".to_string()));
}

#[tokio::test]
async fn path_completion_lists_directory_entries() {
    let t = TestShell::new("");
    let plugin = PathCompletePlugin::new();

    let base = t.dir.path().join("files");
    std::fs::create_dir(&base).unwrap();
    std::fs::write(base.join("file1.txt"), b"").unwrap();
    std::fs::write(base.join("file2.txt"), b"").unwrap();
    std::fs::write(base.join(".hidden"), b"").unwrap();
    std::fs::create_dir(base.join("sub")).unwrap();

    let frag = format!("{}/fi", base.to_string_lossy());
    let line = format!("cat {frag}");
    let candidates = plugin.auto_complete(&line, line.len(), &t.shell);
    assert_eq!(candidates.len(), 2);
    assert!(candidates[0].ends_with("file1.txt"));

    // directories get a trailing slash; dotfiles stay hidden
    let frag = format!("{}/", base.to_string_lossy());
    let line = format!("cat {frag}s");
    let candidates = plugin.auto_complete(&line, line.len(), &t.shell);
    assert_eq!(candidates.len(), 1);
    assert!(candidates[0].ends_with("sub/"));

    let line = format!("cat {}/.h", base.to_string_lossy());
    let candidates = plugin.auto_complete(&line, line.len(), &t.shell);
    assert_eq!(candidates.len(), 1);
    assert!(candidates[0].ends_with(".hidden"));
}

#[tokio::test]
async fn prompts_render_mode_directory_and_continuation() {
    let t = TestShell::new("");
    let plugin = PromptPlugin::new();

    let ce = CommandExecution::new(CancellationToken::new(), true);
    let prompt = plugin.generate_prompt(&ce, &t.shell).unwrap();
    assert!(prompt.plain.starts_with("[AUTO] "));
    assert!(prompt.plain.contains("➜"));

    ce.set_incomplete(true);
    let prompt = plugin.generate_prompt(&ce, &t.shell).unwrap();
    assert_eq!(prompt.plain, "> ");

    let ce = CommandExecution::new(CancellationToken::new(), false);
    let prompt = plugin.generate_prompt(&ce, &t.shell).unwrap();
    assert_eq!(prompt.plain, "");
}

// Two shells in one process do not share settings or history.
#[tokio::test]
async fn shells_are_isolated_within_a_process() {
    let a = TestShell::new("aiset max_history 1\n");
    let b = TestShell::new("not-a-command-here-xyz\n");
    b.client.push_text("only b");

    a.run().await;
    b.run().await;

    assert_eq!(a.shell.settings().get("max_history"), "1");
    assert_eq!(b.shell.settings().get("max_history"), "10");
    assert!(a.ai.history().is_empty());
    assert_eq!(b.ai.history().len(), 1);
}
