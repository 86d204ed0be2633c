//! rustyline glue: tab completion delegates to the plugin chain (first
//! non-empty result wins) and the prompt highlighter paints the colored
//! prompt the loop computed for this line.

use std::borrow::Cow;
use std::sync::Arc;

use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::Context;

use super::Shell;
use crate::util;

pub struct EditorHelper {
    shell: Arc<Shell>,
    /// Updated by the read loop before every prompt.
    pub colored_prompt: String,
}

impl EditorHelper {
    pub fn new(shell: Arc<Shell>) -> Self {
        EditorHelper {
            shell,
            colored_prompt: String::new(),
        }
    }
}

impl Completer for EditorHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        if line.is_empty() {
            return Ok((0, Vec::new()));
        }

        let start = util::fragment_start(line, pos);
        for plugin in self.shell.plugins() {
            let candidates = plugin.auto_complete(line, pos, &self.shell);
            if !candidates.is_empty() {
                let pairs = candidates
                    .into_iter()
                    .map(|candidate| Pair {
                        display: candidate.clone(),
                        replacement: candidate,
                    })
                    .collect();
                return Ok((start, pairs));
            }
        }

        Ok((pos, Vec::new()))
    }
}

impl Hinter for EditorHelper {
    type Hint = String;
}

impl Validator for EditorHelper {}

impl Highlighter for EditorHelper {
    fn highlight_prompt<'b, 's: 'b, 'p: 'b>(
        &'s self,
        prompt: &'p str,
        default: bool,
    ) -> Cow<'b, str> {
        if default && !self.colored_prompt.is_empty() {
            Cow::Owned(self.colored_prompt.clone())
        } else {
            Cow::Borrowed(prompt)
        }
    }
}

impl rustyline::Helper for EditorHelper {}
