//! Interactive prompt rendering: `[MODE] dirname HH:MM ➜`, with a per-mode
//! icon and color when the terminal supports it, and a bare `> ` while the
//! parser is waiting for continuation lines.

use std::sync::Arc;

use crate::shell::execution::CommandExecution;
use crate::shell::plugin::{Prompt, ShellPlugin};
use crate::shell::state::ShellMode;
use crate::shell::Shell;
use crate::util::color;

const ICON_USER: &str = "🚀";
const ICON_AUTO: &str = "🪄";
const ICON_AI: &str = "💬";
const ICON_ARROW: &str = "➜";

#[derive(Default)]
pub struct PromptPlugin;

impl PromptPlugin {
    pub fn new() -> Self {
        PromptPlugin
    }
}

#[async_trait::async_trait]
impl ShellPlugin for PromptPlugin {
    fn id(&self) -> &'static str {
        "prompt"
    }

    fn generate_prompt(&self, ce: &CommandExecution, shell: &Arc<Shell>) -> Option<Prompt> {
        if !ce.interactive() {
            return Some(Prompt::default());
        }
        if ce.incomplete() {
            return Some(Prompt::plain_only("> "));
        }

        let state = shell.state();
        let mode = state.mode();
        let (mode_icon, mode_text, mode_color) = match mode {
            ShellMode::Auto => (ICON_AUTO, "AUTO", color::PURPLE),
            ShellMode::User => (ICON_USER, "USER", color::GREEN),
            ShellMode::Ai => (ICON_AI, "AI", color::BLUE),
        };

        let time = chrono::Local::now().format("%H:%M").to_string();

        let wd = shell.dir();
        let dir_name = if &wd == state.home() {
            "~".to_string()
        } else {
            wd.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| wd.to_string_lossy().to_string())
        };

        let plain = format!("[{mode_text}] {dir_name} {time} {ICON_ARROW} ");

        if !ce.color_supported() {
            return Some(Prompt::plain_only(plain));
        }

        let colored = [
            format!("{mode_color}{mode_icon} {mode_text}{}", color::RESET),
            format!("{}{}{dir_name}{}", color::CYAN, color::BOLD, color::RESET),
            format!("{}{time}{}", color::GRAY, color::RESET),
            format!("{mode_color}{ICON_ARROW}{} ", color::RESET),
        ]
        .join(" ");

        Some(Prompt { plain, colored })
    }
}
