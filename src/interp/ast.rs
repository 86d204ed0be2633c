//! Syntax tree for the shell grammar.

/// One piece of a word; quoting decides how expansion treats it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordPart {
    Lit(String),
    SingleQuoted(String),
    /// Inner parts are `Lit` and `Param`; never splits into fields.
    DoubleQuoted(Vec<WordPart>),
    /// `$NAME`, `${NAME}`, positional or special parameter.
    Param(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub parts: Vec<WordPart>,
}

impl Word {
    pub fn lit(s: impl Into<String>) -> Self {
        Word {
            parts: vec![WordPart::Lit(s.into())],
        }
    }

    /// A word that expands to exactly `s`, shielded from any expansion.
    /// Used to retry unparseable input as a single-argument command.
    pub fn quoted_lit(s: impl Into<String>) -> Self {
        Word {
            parts: vec![WordPart::DoubleQuoted(vec![WordPart::Lit(s.into())])],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirOp {
    /// `> target`
    Out,
    /// `>> target`
    Append,
    /// `< target`
    In,
    /// `2> target`
    ErrOut,
    /// `2>&1`
    ErrToOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub op: RedirOp,
    pub target: Option<Word>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SimpleCommand {
    pub assigns: Vec<(String, Word)>,
    pub words: Vec<Word>,
    pub redirects: Vec<Redirect>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Simple(SimpleCommand),
    If {
        cond: Vec<Stmt>,
        then: Vec<Stmt>,
        elifs: Vec<(Vec<Stmt>, Vec<Stmt>)>,
        r#else: Option<Vec<Stmt>>,
    },
    For {
        var: String,
        items: Vec<Word>,
        body: Vec<Stmt>,
    },
    While {
        cond: Vec<Stmt>,
        body: Vec<Stmt>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AndOrOp {
    And,
    Or,
}

/// An and-or list: `p1 && p2 || p3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub first: Pipeline,
    pub rest: Vec<(AndOrOp, Pipeline)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct File {
    pub stmts: Vec<Stmt>,
}

impl File {
    /// Synthesize `"<input>"` as a one-word command; the fallback used when
    /// input does not parse and the shell retries it as a plain query.
    pub fn quoted_command(input: &str) -> Self {
        File {
            stmts: vec![Stmt {
                first: Pipeline {
                    commands: vec![Command::Simple(SimpleCommand {
                        assigns: Vec::new(),
                        words: vec![Word::quoted_lit(input)],
                        redirects: Vec::new(),
                    })],
                },
                rest: Vec::new(),
            }],
        }
    }
}
