//! The plugin interface. Every hook has a default no-op body, so a plugin
//! declares only the capabilities it implements: prompt rendering,
//! completion, execution claiming, observation, or the per-line end hook.

use std::sync::Arc;

use super::execution::{CommandExecution, SubCommandExecution};
use super::Shell;
use crate::error::ShellError;

/// A rendered prompt. `plain` is what the line editor measures; `colored`
/// is what it paints (empty means "same as plain").
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    pub plain: String,
    pub colored: String,
}

impl Prompt {
    pub fn plain_only(plain: impl Into<String>) -> Self {
        let plain = plain.into();
        Prompt {
            colored: plain.clone(),
            plain,
        }
    }
}

/// A shell runs many `CommandExecution`s (one per input line), each of which
/// runs many `SubCommandExecution`s (one per dispatched command). Plugins
/// hook both levels.
#[async_trait::async_trait]
pub trait ShellPlugin: Send + Sync {
    fn id(&self) -> &'static str;

    /// Called once when the plugin is registered.
    fn install(&self, _shell: &Arc<Shell>) -> Result<(), ShellError> {
        Ok(())
    }

    /// Completion candidates replacing the trailing fragment of `line`.
    /// The first plugin returning a non-empty list wins.
    fn auto_complete(&self, _line: &str, _pos: usize, _shell: &Arc<Shell>) -> Vec<String> {
        Vec::new()
    }

    /// Prompt for the next line; the first plugin returning one wins.
    fn generate_prompt(&self, _ce: &CommandExecution, _shell: &Arc<Shell>) -> Option<Prompt> {
        None
    }

    /// Called after a line parses, before evaluation starts.
    fn prepare_execution(&self, _ce: &Arc<CommandExecution>, _shell: &Arc<Shell>) {}

    /// Called for every sub-command before the claim phase.
    async fn before_execute(
        &self,
        _ce: &Arc<CommandExecution>,
        _sce: &Arc<SubCommandExecution>,
        _shell: &Arc<Shell>,
    ) -> Result<(), ShellError> {
        Ok(())
    }

    /// Claim phase: `None` declines; `Some(result)` claims the command and
    /// settles it with `result`.
    async fn execute(
        &self,
        _ce: &Arc<CommandExecution>,
        _sce: &Arc<SubCommandExecution>,
        _shell: &Arc<Shell>,
    ) -> Option<Result<(), ShellError>> {
        None
    }

    /// Called for every sub-command after the claim phase, claimed or not.
    async fn after_execute(
        &self,
        _ce: &Arc<CommandExecution>,
        _sce: &Arc<SubCommandExecution>,
        _shell: &Arc<Shell>,
    ) -> Result<(), ShellError> {
        Ok(())
    }

    /// Called when a `CommandExecution` finishes, before it is cleared.
    async fn end(&self, _ce: &Arc<CommandExecution>, _shell: &Arc<Shell>) -> Result<(), ShellError> {
        Ok(())
    }
}
