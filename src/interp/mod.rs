// Shell grammar and interpreter: incremental parser plus an AST runner with
// an exec-handler hook. The runner executes builtins itself; everything else
// goes through the hook and the plugin chain behind it.

pub mod ast;
pub mod expand;
pub mod lexer;
pub mod parser;
pub mod runner;

pub use parser::{parse, ParseStatus, Parser};
pub use runner::{ExecHost, ExecIo, Modifier, Runner, ShellEnv, BUILTIN_NAMES};
