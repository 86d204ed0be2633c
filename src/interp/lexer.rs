//! Tokenizer for the shell grammar. Distinguishes "more input could complete
//! this" (unterminated quote, trailing line continuation) from real syntax
//! errors, which is what drives multi-line continuation prompts.

use super::ast::{Word, WordPart};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    Semi,
    And,
    Or,
    Pipe,
    RedirOut,
    RedirAppend,
    RedirIn,
    RedirErrOut,
    RedirErrToOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(Word),
    Op(Operator),
    Newline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    /// The source ends inside a construct another line could finish.
    Incomplete,
    Syntax(String),
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

pub fn lex(src: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer {
        chars: src.chars().peekable(),
    };
    let mut tokens = Vec::new();

    loop {
        match lexer.next_token()? {
            Some(tok) => tokens.push(tok),
            None => break,
        }
    }
    Ok(tokens)
}

impl<'a> Lexer<'a> {
    fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        loop {
            match self.chars.peek() {
                None => return Ok(None),
                Some(' ') | Some('\t') => {
                    self.chars.next();
                }
                Some('#') => {
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                Some('\n') => {
                    self.chars.next();
                    return Ok(Some(Token::Newline));
                }
                Some('\\') => {
                    // A backslash-newline continues the line; anything else
                    // starts a word.
                    let mut probe = self.chars.clone();
                    probe.next();
                    match probe.peek() {
                        Some('\n') => {
                            self.chars.next();
                            self.chars.next();
                        }
                        None => return Err(LexError::Incomplete),
                        Some(_) => return self.lex_word().map(Some),
                    }
                }
                Some(';') => {
                    self.chars.next();
                    return Ok(Some(Token::Op(Operator::Semi)));
                }
                Some('&') => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'&') {
                        self.chars.next();
                        return Ok(Some(Token::Op(Operator::And)));
                    }
                    return Err(LexError::Syntax(
                        "background jobs (`&`) are not supported".to_string(),
                    ));
                }
                Some('|') => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'|') {
                        self.chars.next();
                        return Ok(Some(Token::Op(Operator::Or)));
                    }
                    return Ok(Some(Token::Op(Operator::Pipe)));
                }
                Some('>') => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'>') {
                        self.chars.next();
                        return Ok(Some(Token::Op(Operator::RedirAppend)));
                    }
                    return Ok(Some(Token::Op(Operator::RedirOut)));
                }
                Some('<') => {
                    self.chars.next();
                    return Ok(Some(Token::Op(Operator::RedirIn)));
                }
                Some('(') | Some(')') => {
                    return Err(LexError::Syntax(
                        "subshells are not supported".to_string(),
                    ));
                }
                Some('`') => {
                    return Err(LexError::Syntax(
                        "command substitution is not supported".to_string(),
                    ));
                }
                Some('2') => {
                    // `2>` and `2>&1` only when the digit starts its own word.
                    let mut probe = self.chars.clone();
                    probe.next();
                    if probe.peek() == Some(&'>') {
                        self.chars.next();
                        self.chars.next();
                        if self.chars.peek() == Some(&'&') {
                            self.chars.next();
                            if self.chars.peek() == Some(&'1') {
                                self.chars.next();
                                return Ok(Some(Token::Op(Operator::RedirErrToOut)));
                            }
                            return Err(LexError::Syntax(
                                "unsupported redirection after `2>&`".to_string(),
                            ));
                        }
                        return Ok(Some(Token::Op(Operator::RedirErrOut)));
                    }
                    return self.lex_word().map(Some);
                }
                Some(_) => return self.lex_word().map(Some),
            }
        }
    }

    fn lex_word(&mut self) -> Result<Token, LexError> {
        let mut parts: Vec<WordPart> = Vec::new();
        let mut lit = String::new();

        let flush = |lit: &mut String, parts: &mut Vec<WordPart>| {
            if !lit.is_empty() {
                parts.push(WordPart::Lit(std::mem::take(lit)));
            }
        };

        loop {
            let Some(&c) = self.chars.peek() else { break };
            match c {
                ' ' | '\t' | '\n' | ';' | '&' | '|' | '>' | '<' | '(' | ')' | '`' => break,
                '\'' => {
                    self.chars.next();
                    flush(&mut lit, &mut parts);
                    let mut inner = String::new();
                    loop {
                        match self.chars.next() {
                            None => return Err(LexError::Incomplete),
                            Some('\'') => break,
                            Some(ch) => inner.push(ch),
                        }
                    }
                    parts.push(WordPart::SingleQuoted(inner));
                }
                '"' => {
                    self.chars.next();
                    flush(&mut lit, &mut parts);
                    parts.push(self.lex_double_quoted()?);
                }
                '$' => {
                    self.chars.next();
                    match self.lex_param()? {
                        Some(name) => {
                            flush(&mut lit, &mut parts);
                            parts.push(WordPart::Param(name));
                        }
                        None => lit.push('$'),
                    }
                }
                '\\' => {
                    self.chars.next();
                    match self.chars.next() {
                        None => return Err(LexError::Incomplete),
                        Some('\n') => {}
                        Some(ch) => lit.push(ch),
                    }
                }
                _ => {
                    self.chars.next();
                    lit.push(c);
                }
            }
        }

        flush(&mut lit, &mut parts);
        Ok(Token::Word(Word { parts }))
    }

    fn lex_double_quoted(&mut self) -> Result<WordPart, LexError> {
        let mut parts: Vec<WordPart> = Vec::new();
        let mut lit = String::new();

        let flush = |lit: &mut String, parts: &mut Vec<WordPart>| {
            if !lit.is_empty() {
                parts.push(WordPart::Lit(std::mem::take(lit)));
            }
        };

        loop {
            match self.chars.next() {
                None => return Err(LexError::Incomplete),
                Some('"') => break,
                Some('\\') => match self.chars.next() {
                    None => return Err(LexError::Incomplete),
                    Some('\n') => {}
                    Some(ch @ ('"' | '\\' | '$' | '`')) => lit.push(ch),
                    Some(ch) => {
                        lit.push('\\');
                        lit.push(ch);
                    }
                },
                Some('$') => match self.lex_param()? {
                    Some(name) => {
                        flush(&mut lit, &mut parts);
                        parts.push(WordPart::Param(name));
                    }
                    None => lit.push('$'),
                },
                Some(ch) => lit.push(ch),
            }
        }

        flush(&mut lit, &mut parts);
        Ok(WordPart::DoubleQuoted(parts))
    }

    /// Parse what follows a `$`. Returns None when the dollar is literal.
    fn lex_param(&mut self) -> Result<Option<String>, LexError> {
        match self.chars.peek() {
            Some('{') => {
                self.chars.next();
                let mut name = String::new();
                loop {
                    match self.chars.next() {
                        None => return Err(LexError::Incomplete),
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                    }
                }
                if name.is_empty() {
                    return Err(LexError::Syntax("empty parameter `${}`".to_string()));
                }
                Ok(Some(name))
            }
            Some('(') => Err(LexError::Syntax(
                "command substitution is not supported".to_string(),
            )),
            Some(&c) if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&ch) = self.chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        name.push(ch);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                Ok(Some(name))
            }
            Some(&c) if c.is_ascii_digit() => {
                self.chars.next();
                Ok(Some(c.to_string()))
            }
            Some(&c @ ('?' | '#' | '@' | '*')) => {
                self.chars.next();
                Ok(Some(c.to_string()))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(src: &str) -> Vec<Token> {
        lex(src).unwrap()
    }

    #[test]
    fn splits_words_and_operators() {
        let toks = words("echo hi && ls | wc\n");
        assert_eq!(toks.len(), 7);
        assert_eq!(toks[2], Token::Op(Operator::And));
        assert_eq!(toks[4], Token::Op(Operator::Pipe));
        assert_eq!(toks[6], Token::Newline);
    }

    #[test]
    fn quotes_group_and_protect() {
        let toks = words("echo 'a b' \"c $X\"");
        assert_eq!(toks.len(), 3);
        let Token::Word(w) = &toks[1] else { panic!() };
        assert_eq!(w.parts, vec![WordPart::SingleQuoted("a b".into())]);
        let Token::Word(w) = &toks[2] else { panic!() };
        assert_eq!(
            w.parts,
            vec![WordPart::DoubleQuoted(vec![
                WordPart::Lit("c ".into()),
                WordPart::Param("X".into()),
            ])]
        );
    }

    #[test]
    fn unterminated_quote_is_incomplete() {
        assert_eq!(lex("echo 'oops\n"), Err(LexError::Incomplete));
        assert_eq!(lex("echo \"oops\n"), Err(LexError::Incomplete));
        assert_eq!(lex("echo oops\\"), Err(LexError::Incomplete));
    }

    #[test]
    fn params_and_specials() {
        let toks = words("echo $HOME ${10} $? $1x");
        let Token::Word(w) = &toks[1] else { panic!() };
        assert_eq!(w.parts, vec![WordPart::Param("HOME".into())]);
        let Token::Word(w) = &toks[2] else { panic!() };
        assert_eq!(w.parts, vec![WordPart::Param("10".into())]);
        let Token::Word(w) = &toks[3] else { panic!() };
        assert_eq!(w.parts, vec![WordPart::Param("?".into())]);
        // $1x is ${1} then literal x
        let Token::Word(w) = &toks[4] else { panic!() };
        assert_eq!(
            w.parts,
            vec![WordPart::Param("1".into()), WordPart::Lit("x".into())]
        );
    }

    #[test]
    fn stderr_redirects() {
        let toks = words("cmd 2>&1 2> log");
        assert_eq!(toks[1], Token::Op(Operator::RedirErrToOut));
        assert_eq!(toks[2], Token::Op(Operator::RedirErrOut));
    }

    #[test]
    fn word_starting_with_two_is_not_a_redirect() {
        let toks = words("echo 2024");
        assert_eq!(toks.len(), 2);
        let Token::Word(w) = &toks[1] else { panic!() };
        assert_eq!(w.parts, vec![WordPart::Lit("2024".into())]);
    }

    #[test]
    fn comments_are_skipped() {
        let toks = words("echo hi # trailing words\n");
        assert_eq!(toks.len(), 3);
    }

    #[test]
    fn unsupported_syntax_is_an_error() {
        assert!(matches!(lex("(ls)"), Err(LexError::Syntax(_))));
        assert!(matches!(lex("ls &"), Err(LexError::Syntax(_))));
        assert!(matches!(lex("echo `ls`"), Err(LexError::Syntax(_))));
        assert!(matches!(lex("echo $(ls)"), Err(LexError::Syntax(_))));
    }
}
