//! Built-in plugins, in their registration order: prompt rendering, path
//! completion, the extension meta-commands, and the AI query engine.

pub mod ai;
pub mod extension;
pub mod path_complete;
pub mod prompt;

pub use ai::AiPlugin;
pub use extension::ExtensionPlugin;
pub use path_complete::PathCompletePlugin;
pub use prompt::PromptPlugin;
