//! The extension plugin: mode-prefix tokens (`auto:`, `user:`/`::`, `ai:`)
//! and the built-in meta-commands `aiset`, `aiget`, `aiprompt`, `aitool`
//! and `history`. Also provides command-name completion over the meta
//! commands, the interpreter builtins and the executables found on PATH.

use std::sync::{Arc, RwLock};

use clap::Parser as ClapParser;

use crate::config;
use crate::error::ShellError;
use crate::interp::BUILTIN_NAMES;
use crate::shell::execution::{CommandExecution, SubCommandExecution};
use crate::shell::plugin::ShellPlugin;
use crate::shell::state::ShellMode;
use crate::shell::{Shell, HISTORY_FILE_NAME};
use crate::util;

pub const CMD_AUTO_MODE: &str = "auto:";
pub const CMD_AI_MODE: &str = "ai:";
pub const CMD_USER_MODE: &str = "user:";
pub const CMD_USER_MODE_SHORT: &str = "::";
pub const CMD_AISET: &str = "aiset";
pub const CMD_AIGET: &str = "aiget";
pub const CMD_AIPROMPT: &str = "aiprompt";
pub const CMD_AITOOL: &str = "aitool";
pub const CMD_HISTORY: &str = "history";

/// Meta-commands whose QA roots never enter conversation history.
pub fn excluded_from_history(cmd: &str) -> bool {
    matches!(
        cmd,
        CMD_USER_MODE | CMD_USER_MODE_SHORT | CMD_AI_MODE | CMD_AISET | CMD_AIGET | CMD_AIPROMPT
            | CMD_AITOOL | CMD_HISTORY
    )
}

#[derive(clap::Parser)]
#[command(name = CMD_AISET, about = "Set a configuration value", disable_version_flag = true)]
struct AiSetArgs {
    key: String,
    value: String,
}

#[derive(clap::Parser)]
#[command(name = CMD_AIGET, about = "Print configuration", disable_version_flag = true)]
struct AiGetArgs {
    key: Option<String>,
}

#[derive(clap::Parser)]
#[command(
    name = CMD_AIPROMPT,
    about = "Manage user-defined system prompts",
    disable_version_flag = true
)]
struct AiPromptArgs {
    /// Prompt fragments to append; `reset` clears them.
    prompts: Vec<String>,
}

#[derive(clap::Parser)]
#[command(
    name = CMD_AITOOL,
    about = "Manage user-defined AI tools",
    disable_version_flag = true
)]
struct AiToolArgs {
    /// Short text describing usage of this tool
    #[arg(short = 'u', value_name = "USAGE")]
    usage: Option<String>,

    /// Tool entrypoint path, or `clear`
    entrypoint: Option<String>,
}

#[derive(clap::Parser)]
#[command(name = CMD_HISTORY, about = "Print shell history", disable_version_flag = true)]
struct HistoryArgs {
    /// Number of lines to print
    #[arg(default_value_t = 100)]
    count: usize,
}

#[derive(Default)]
pub struct ExtensionPlugin {
    path_commands: Arc<RwLock<Vec<String>>>,
}

impl ExtensionPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// With no argument the prefix flips the shell's default mode; with an
    /// argument it overrides this sub-command only and strips itself from
    /// the fields, so the rewritten command re-enters dispatch.
    fn handle_mode_switch(
        &self,
        sce: &SubCommandExecution,
        shell: &Arc<Shell>,
        mode: ShellMode,
        args: &[String],
    ) -> bool {
        if args.is_empty() {
            shell.state().set_mode(mode);
            true
        } else {
            sce.set_mode(mode);
            sce.set_fields(args.to_vec());
            false
        }
    }

    fn handle_aiset(
        &self,
        sce: &SubCommandExecution,
        shell: &Arc<Shell>,
        args: &[String],
    ) -> Result<(), ShellError> {
        match parse_args::<AiSetArgs>(CMD_AISET, args, sce) {
            Some(parsed) => {
                shell.settings().set(&parsed.key, &parsed.value);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn handle_aiget(
        &self,
        sce: &SubCommandExecution,
        shell: &Arc<Shell>,
        args: &[String],
    ) -> Result<(), ShellError> {
        let Some(parsed) = parse_args::<AiGetArgs>(CMD_AIGET, args, sce) else {
            return Ok(());
        };
        match parsed.key {
            None => {
                let mut out = String::new();
                for (key, value) in shell.settings().all() {
                    out.push_str(&format!("{key}={value}\n"));
                }
                sce.stdout().write_str(&out)?;
            }
            Some(key) => {
                let value = shell.settings().get(&key);
                let encoded = serde_json::to_string(&value)?;
                sce.stdout().write_str(&format!("{encoded}\n"))?;
            }
        }
        Ok(())
    }

    fn handle_aiprompt(
        &self,
        sce: &SubCommandExecution,
        shell: &Arc<Shell>,
        args: &[String],
    ) -> Result<(), ShellError> {
        let Some(parsed) = parse_args::<AiPromptArgs>(CMD_AIPROMPT, args, sce) else {
            return Ok(());
        };
        let settings = shell.settings();
        match parsed.prompts.len() {
            0 => {
                sce.stdout()
                    .write_str(&format!("{}\n", settings.system_prompts()))?;
            }
            1 => {
                let prompt = parsed.prompts[0].trim();
                if prompt == "reset" {
                    settings.clear_system_prompts();
                } else if !prompt.is_empty() {
                    settings.add_system_prompt(prompt);
                }
            }
            _ => {
                for prompt in &parsed.prompts {
                    let prompt = prompt.trim();
                    if !prompt.is_empty() {
                        settings.add_system_prompt(prompt);
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_aitool(
        &self,
        sce: &SubCommandExecution,
        shell: &Arc<Shell>,
        args: &[String],
    ) -> Result<(), ShellError> {
        let Some(parsed) = parse_args::<AiToolArgs>(CMD_AITOOL, args, sce) else {
            return Ok(());
        };
        let settings = shell.settings();

        let Some(entrypoint) = parsed.entrypoint else {
            let mut out = String::from("AI tools:\n\n");
            for tool in settings.tools() {
                out.push_str(&format!("{}\n[usage={}]\n\n", tool.entrypoint, tool.usage));
            }
            sce.stdout().write_str(&out)?;
            return Ok(());
        };

        if entrypoint == "clear" {
            settings.clear_tools();
            return Ok(());
        }

        let Some(path) = shell.look_path(&entrypoint) else {
            return Err(ShellError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{entrypoint}: no such file"),
            )));
        };

        // Registering the currently running tool file would recurse.
        if Some(&path) == shell.absolute_file_name() {
            return Ok(());
        }

        settings.add_tool(
            parsed.usage.as_deref().unwrap_or_default(),
            &path.to_string_lossy(),
        )?;
        Ok(())
    }

    fn handle_history(
        &self,
        sce: &SubCommandExecution,
        shell: &Arc<Shell>,
        args: &[String],
    ) -> Result<(), ShellError> {
        let Some(parsed) = parse_args::<HistoryArgs>(CMD_HISTORY, args, sce) else {
            return Ok(());
        };

        let path = shell.state().home().join(HISTORY_FILE_NAME);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let lines: Vec<&str> = content.lines().collect();
        let skip = lines.len().saturating_sub(parsed.count);
        let mut out = String::new();
        for line in &lines[skip..] {
            out.push_str(line);
            out.push('\n');
        }
        sce.stdout().write_str(&out)?;
        Ok(())
    }
}

/// Parse meta-command argv with clap, printing errors (and help) to the
/// sub-command's stderr. `None` means "handled by printing".
fn parse_args<T: ClapParser>(name: &str, args: &[String], sce: &SubCommandExecution) -> Option<T> {
    let argv = std::iter::once(name.to_string()).chain(args.iter().cloned());
    match T::try_parse_from(argv) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            let _ = sce.stderr().write_str(&err.to_string());
            None
        }
    }
}

#[async_trait::async_trait]
impl ShellPlugin for ExtensionPlugin {
    fn id(&self) -> &'static str {
        "extension"
    }

    fn install(&self, shell: &Arc<Shell>) -> Result<(), ShellError> {
        let shell = shell.clone();
        let path_commands = self.path_commands.clone();
        std::thread::spawn(move || {
            let names = shell.find_executable_names();
            log::debug!("indexed {} PATH executables for completion", names.len());
            *util::write(&path_commands) = names;
        });
        Ok(())
    }

    async fn execute(
        &self,
        _ce: &Arc<CommandExecution>,
        sce: &Arc<SubCommandExecution>,
        shell: &Arc<Shell>,
    ) -> Option<Result<(), ShellError>> {
        let fields = sce.fields();
        let first = fields.first()?.to_lowercase();
        let args = &fields[1..];

        let done = match first.as_str() {
            CMD_AUTO_MODE => self.handle_mode_switch(sce, shell, ShellMode::Auto, args),
            CMD_USER_MODE | CMD_USER_MODE_SHORT => {
                self.handle_mode_switch(sce, shell, ShellMode::User, args)
            }
            CMD_AI_MODE => self.handle_mode_switch(sce, shell, ShellMode::Ai, args),
            _ => false,
        };
        if done {
            return Some(Ok(()));
        }

        // Re-read the fields: a mode prefix may just have rewritten them,
        // and the rewritten command still gets extension dispatch.
        let fields = sce.fields();
        let first = fields.first()?.to_lowercase();
        let args = &fields[1..];

        let result = match first.as_str() {
            CMD_AISET => self.handle_aiset(sce, shell, args),
            CMD_AIGET => self.handle_aiget(sce, shell, args),
            CMD_AIPROMPT => self.handle_aiprompt(sce, shell, args),
            CMD_AITOOL => self.handle_aitool(sce, shell, args),
            CMD_HISTORY => self.handle_history(sce, shell, args),
            _ => return None,
        };

        if let Err(err) = result {
            shell.print_error(&sce.stderr(), &err);
        }
        Some(Ok(()))
    }

    fn auto_complete(&self, line: &str, pos: usize, _shell: &Arc<Shell>) -> Vec<String> {
        let (fragment, rest) = util::last_fragment(line, pos);
        let rest = rest.trim();

        let command_position =
            rest.is_empty() || rest == CMD_USER_MODE || rest == CMD_USER_MODE_SHORT;

        if command_position {
            let mut candidates: Vec<String> = Vec::new();
            for cmd in [
                CMD_AI_MODE,
                CMD_USER_MODE,
                CMD_USER_MODE_SHORT,
                CMD_AUTO_MODE,
                CMD_AISET,
                CMD_AIGET,
                CMD_AIPROMPT,
                CMD_AITOOL,
                CMD_HISTORY,
            ] {
                candidates.push(cmd.to_string());
            }
            for builtin in BUILTIN_NAMES {
                candidates.push(builtin.to_string());
            }
            candidates.extend(util::read(&self.path_commands).iter().cloned());

            candidates.retain(|c| !fragment.is_empty() && c.starts_with(fragment));
            candidates.sort();
            candidates.dedup();
            return candidates;
        }

        if rest == CMD_AISET || rest == CMD_AIGET {
            return config::CONFIG_KEYS
                .iter()
                .filter(|k| k.starts_with(fragment))
                .map(|k| k.to_string())
                .collect();
        }

        Vec::new()
    }
}
