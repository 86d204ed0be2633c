//! Recursive-descent parser with incremental line feeding. The shell loop
//! feeds one line at a time; `Incomplete` means another line may finish the
//! input (continuation prompt), `Error` means it never will.

use super::ast::*;
use super::lexer::{lex, LexError, Operator, Token};
use crate::error::ShellError;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseStatus {
    Complete(File),
    Incomplete,
    Error(String),
}

/// Accumulates source lines across continuation prompts.
#[derive(Default)]
pub struct Parser {
    buf: String,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk (normally one line, newline included) and re-parse the
    /// accumulated source.
    pub fn feed(&mut self, chunk: &str) -> ParseStatus {
        self.buf.push_str(chunk);
        parse_source(&self.buf)
    }

    /// Raw accumulated source, for the retry-as-query fallback.
    pub fn source(&self) -> &str {
        &self.buf
    }
}

/// One-shot parse of a complete source string.
pub fn parse(src: &str) -> Result<File, ShellError> {
    match parse_source(src) {
        ParseStatus::Complete(file) => Ok(file),
        ParseStatus::Incomplete => Err(ShellError::Parse("unexpected end of input".to_string())),
        ParseStatus::Error(msg) => Err(ShellError::Parse(msg)),
    }
}

fn parse_source(src: &str) -> ParseStatus {
    let tokens = match lex(src) {
        Ok(tokens) => tokens,
        Err(LexError::Incomplete) => return ParseStatus::Incomplete,
        Err(LexError::Syntax(msg)) => return ParseStatus::Error(msg),
    };

    let mut parser = TokenParser { tokens, pos: 0 };
    match parser.parse_file() {
        Ok(file) => ParseStatus::Complete(file),
        Err(PErr::Incomplete) => ParseStatus::Incomplete,
        Err(PErr::Syntax(msg)) => ParseStatus::Error(msg),
    }
}

enum PErr {
    Incomplete,
    Syntax(String),
}

const RESERVED: &[&str] = &[
    "if", "then", "elif", "else", "fi", "for", "in", "do", "done", "while",
];

struct TokenParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Some(Token::Newline)) {
            self.pos += 1;
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(Token::Newline) | Some(Token::Op(Operator::Semi))) {
            self.pos += 1;
        }
    }

    /// The keyword a token spells, if it is a bare literal word.
    fn keyword_of(token: &Token) -> Option<&str> {
        if let Token::Word(w) = token {
            if let [WordPart::Lit(s)] = w.parts.as_slice() {
                if RESERVED.contains(&s.as_str()) {
                    return Some(s.as_str());
                }
            }
        }
        None
    }

    fn at_keyword(&self, kw: &str) -> bool {
        self.peek().and_then(Self::keyword_of) == Some(kw)
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), PErr> {
        if self.at_keyword(kw) {
            self.pos += 1;
            Ok(())
        } else {
            match self.peek() {
                None => Err(PErr::Incomplete),
                Some(tok) => Err(PErr::Syntax(format!("expected `{kw}`, found {tok:?}"))),
            }
        }
    }

    fn parse_file(&mut self) -> Result<File, PErr> {
        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            if self.peek().is_none() {
                break;
            }
            stmts.push(self.parse_andor()?);
            match self.peek() {
                None => break,
                Some(Token::Newline) | Some(Token::Op(Operator::Semi)) => {}
                Some(tok) => return Err(PErr::Syntax(format!("unexpected token {tok:?}"))),
            }
        }
        Ok(File { stmts })
    }

    fn parse_andor(&mut self) -> Result<Stmt, PErr> {
        let first = self.parse_pipeline()?;
        let mut rest = Vec::new();

        loop {
            let op = match self.peek() {
                Some(Token::Op(Operator::And)) => AndOrOp::And,
                Some(Token::Op(Operator::Or)) => AndOrOp::Or,
                _ => break,
            };
            self.pos += 1;
            self.skip_newlines();
            rest.push((op, self.parse_pipeline()?));
        }

        Ok(Stmt { first, rest })
    }

    fn parse_pipeline(&mut self) -> Result<Pipeline, PErr> {
        let mut commands = vec![self.parse_command()?];
        while matches!(self.peek(), Some(Token::Op(Operator::Pipe))) {
            self.pos += 1;
            self.skip_newlines();
            commands.push(self.parse_command()?);
        }
        Ok(Pipeline { commands })
    }

    fn parse_command(&mut self) -> Result<Command, PErr> {
        match self.peek() {
            None => Err(PErr::Incomplete),
            Some(tok) => match Self::keyword_of(tok) {
                Some("if") => self.parse_if(),
                Some("for") => self.parse_for(),
                Some("while") => self.parse_while(),
                Some(kw) => Err(PErr::Syntax(format!("unexpected keyword `{kw}`"))),
                None => match tok {
                    Token::Word(_) | Token::Op(Operator::RedirOut)
                    | Token::Op(Operator::RedirAppend)
                    | Token::Op(Operator::RedirIn)
                    | Token::Op(Operator::RedirErrOut)
                    | Token::Op(Operator::RedirErrToOut) => self.parse_simple(),
                    tok => Err(PErr::Syntax(format!("unexpected token {tok:?}"))),
                },
            },
        }
    }

    fn parse_simple(&mut self) -> Result<Command, PErr> {
        let mut cmd = SimpleCommand::default();
        let mut seen_word = false;

        loop {
            match self.peek() {
                Some(Token::Word(w)) => {
                    if !seen_word {
                        if let Some((name, value)) = split_assign(w) {
                            cmd.assigns.push((name, value));
                            self.pos += 1;
                            continue;
                        }
                    }
                    seen_word = true;
                    cmd.words.push(w.clone());
                    self.pos += 1;
                }
                Some(Token::Op(op)) => {
                    let redir = match op {
                        Operator::RedirOut => RedirOp::Out,
                        Operator::RedirAppend => RedirOp::Append,
                        Operator::RedirIn => RedirOp::In,
                        Operator::RedirErrOut => RedirOp::ErrOut,
                        Operator::RedirErrToOut => {
                            self.pos += 1;
                            cmd.redirects.push(Redirect {
                                op: RedirOp::ErrToOut,
                                target: None,
                            });
                            continue;
                        }
                        _ => break,
                    };
                    self.pos += 1;
                    match self.bump() {
                        Some(Token::Word(w)) => {
                            let target = w.clone();
                            cmd.redirects.push(Redirect {
                                op: redir,
                                target: Some(target),
                            });
                        }
                        None => return Err(PErr::Incomplete),
                        Some(tok) => {
                            return Err(PErr::Syntax(format!(
                                "expected redirection target, found {tok:?}"
                            )))
                        }
                    }
                }
                _ => break,
            }
        }

        Ok(Command::Simple(cmd))
    }

    fn parse_if(&mut self) -> Result<Command, PErr> {
        self.expect_keyword("if")?;
        let cond = self.parse_stmts_until(&["then"])?;
        self.expect_keyword("then")?;
        let then = self.parse_stmts_until(&["elif", "else", "fi"])?;

        let mut elifs = Vec::new();
        while self.at_keyword("elif") {
            self.pos += 1;
            let c = self.parse_stmts_until(&["then"])?;
            self.expect_keyword("then")?;
            let t = self.parse_stmts_until(&["elif", "else", "fi"])?;
            elifs.push((c, t));
        }

        let r#else = if self.at_keyword("else") {
            self.pos += 1;
            Some(self.parse_stmts_until(&["fi"])?)
        } else {
            None
        };

        self.expect_keyword("fi")?;
        Ok(Command::If {
            cond,
            then,
            elifs,
            r#else,
        })
    }

    fn parse_for(&mut self) -> Result<Command, PErr> {
        self.expect_keyword("for")?;

        let var = match self.bump() {
            None => return Err(PErr::Incomplete),
            Some(Token::Word(w)) => match w.parts.as_slice() {
                [WordPart::Lit(name)] if is_identifier(name) => name.clone(),
                _ => return Err(PErr::Syntax("invalid for-loop variable".to_string())),
            },
            Some(tok) => {
                return Err(PErr::Syntax(format!(
                    "expected for-loop variable, found {tok:?}"
                )))
            }
        };

        let items = if self.at_keyword("in") {
            self.pos += 1;
            let mut items = Vec::new();
            while let Some(Token::Word(w)) = self.peek() {
                items.push(w.clone());
                self.pos += 1;
            }
            match self.peek() {
                None => return Err(PErr::Incomplete),
                Some(Token::Newline) | Some(Token::Op(Operator::Semi)) => {}
                Some(tok) => {
                    return Err(PErr::Syntax(format!("unexpected token {tok:?} in for-loop")))
                }
            }
            items
        } else {
            // Without `in`, loop over the positional parameters.
            vec![Word {
                parts: vec![WordPart::Param("@".to_string())],
            }]
        };

        self.skip_separators();
        self.expect_keyword("do")?;
        let body = self.parse_stmts_until(&["done"])?;
        self.expect_keyword("done")?;

        Ok(Command::For { var, items, body })
    }

    fn parse_while(&mut self) -> Result<Command, PErr> {
        self.expect_keyword("while")?;
        let cond = self.parse_stmts_until(&["do"])?;
        self.expect_keyword("do")?;
        let body = self.parse_stmts_until(&["done"])?;
        self.expect_keyword("done")?;
        Ok(Command::While { cond, body })
    }

    /// Statements up to (not including) one of the terminator keywords.
    fn parse_stmts_until(&mut self, terminators: &[&str]) -> Result<Vec<Stmt>, PErr> {
        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            match self.peek() {
                None => return Err(PErr::Incomplete),
                Some(tok) => {
                    if let Some(kw) = Self::keyword_of(tok) {
                        if terminators.contains(&kw) {
                            break;
                        }
                    }
                }
            }
            stmts.push(self.parse_andor()?);
            match self.peek() {
                None => return Err(PErr::Incomplete),
                Some(Token::Newline) | Some(Token::Op(Operator::Semi)) => {}
                Some(tok) => {
                    if let Some(kw) = Self::keyword_of(tok) {
                        if terminators.contains(&kw) {
                            break;
                        }
                    }
                    return Err(PErr::Syntax(format!("unexpected token {tok:?}")));
                }
            }
        }
        Ok(stmts)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `NAME=value` prefix detection on a lexed word.
fn split_assign(word: &Word) -> Option<(String, Word)> {
    let WordPart::Lit(first) = word.parts.first()? else {
        return None;
    };
    let eq = first.find('=')?;
    let name = &first[..eq];
    if !is_identifier(name) {
        return None;
    }

    let mut value_parts = Vec::new();
    let rest = &first[eq + 1..];
    if !rest.is_empty() {
        value_parts.push(WordPart::Lit(rest.to_string()));
    }
    value_parts.extend(word.parts.iter().skip(1).cloned());

    Some((name.to_string(), Word { parts: value_parts }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(src: &str) -> File {
        match parse_source(src) {
            ParseStatus::Complete(f) => f,
            other => panic!("expected complete parse, got {other:?}"),
        }
    }

    #[test]
    fn parses_simple_commands() {
        let file = complete("echo hi\n");
        assert_eq!(file.stmts.len(), 1);
        let Command::Simple(cmd) = &file.stmts[0].first.commands[0] else {
            panic!()
        };
        assert_eq!(cmd.words.len(), 2);
    }

    #[test]
    fn parses_sequences_and_andor() {
        let file = complete("true && echo yes || echo no; ls\n");
        assert_eq!(file.stmts.len(), 2);
        assert_eq!(file.stmts[0].rest.len(), 2);
        assert_eq!(file.stmts[0].rest[0].0, AndOrOp::And);
        assert_eq!(file.stmts[0].rest[1].0, AndOrOp::Or);
    }

    #[test]
    fn parses_pipelines() {
        let file = complete("ls | wc -l\n");
        assert_eq!(file.stmts[0].first.commands.len(), 2);
    }

    #[test]
    fn incremental_for_loop() {
        let mut parser = Parser::new();
        assert_eq!(parser.feed("for i in 1 2 3; do\n"), ParseStatus::Incomplete);
        let status = parser.feed("echo $i; done\n");
        let ParseStatus::Complete(file) = status else {
            panic!("expected completion, got {status:?}")
        };
        let Command::For { var, items, body } = &file.stmts[0].first.commands[0] else {
            panic!()
        };
        assert_eq!(var, "i");
        assert_eq!(items.len(), 3);
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn incremental_quote_continuation() {
        let mut parser = Parser::new();
        assert_eq!(parser.feed("echo 'a\n"), ParseStatus::Incomplete);
        assert!(matches!(parser.feed("b'\n"), ParseStatus::Complete(_)));
    }

    #[test]
    fn trailing_operator_is_incomplete() {
        assert_eq!(parse_source("echo hi &&\n"), ParseStatus::Incomplete);
        assert_eq!(parse_source("ls |\n"), ParseStatus::Incomplete);
        assert_eq!(parse_source("if true; then\n"), ParseStatus::Incomplete);
    }

    #[test]
    fn parses_if_with_elif_and_else() {
        let file = complete("if test -f x; then echo a; elif true; then echo b; else echo c; fi\n");
        let Command::If { elifs, r#else, .. } = &file.stmts[0].first.commands[0] else {
            panic!()
        };
        assert_eq!(elifs.len(), 1);
        assert!(r#else.is_some());
    }

    #[test]
    fn parses_while_loop() {
        let file = complete("while false; do echo x; done\n");
        assert!(matches!(
            file.stmts[0].first.commands[0],
            Command::While { .. }
        ));
    }

    #[test]
    fn parses_assignments_and_redirects() {
        let file = complete("FOO=bar cmd arg > out.txt 2>&1\n");
        let Command::Simple(cmd) = &file.stmts[0].first.commands[0] else {
            panic!()
        };
        assert_eq!(cmd.assigns.len(), 1);
        assert_eq!(cmd.assigns[0].0, "FOO");
        assert_eq!(cmd.redirects.len(), 2);
        assert_eq!(cmd.redirects[1].op, RedirOp::ErrToOut);
    }

    #[test]
    fn mode_prefix_words_parse_as_plain_words() {
        let file = complete("user: ls -la\n");
        let Command::Simple(cmd) = &file.stmts[0].first.commands[0] else {
            panic!()
        };
        assert_eq!(cmd.words.len(), 3);
        assert_eq!(cmd.words[0], Word::lit("user:"));

        let file = complete(":: ls\n");
        let Command::Simple(cmd) = &file.stmts[0].first.commands[0] else {
            panic!()
        };
        assert_eq!(cmd.words[0], Word::lit("::"));
    }

    #[test]
    fn syntax_errors_are_final() {
        assert!(matches!(parse_source("ls & ls\n"), ParseStatus::Error(_)));
        assert!(matches!(parse_source("done\n"), ParseStatus::Error(_)));
    }
}
