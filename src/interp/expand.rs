//! Word expansion: tilde, parameters, quoting and field splitting.

use super::ast::{Word, WordPart};
use super::runner::ShellEnv;

/// Expand a list of words into command fields. Unquoted parameter
/// expansions are split on whitespace; quoted material never is.
pub fn expand_words(words: &[Word], env: &ShellEnv) -> Vec<String> {
    let mut fields = Vec::new();
    for word in words {
        expand_into(word, env, &mut fields);
    }
    fields
}

/// Expand a single word into exactly one field (redirect targets,
/// assignment values, the fallback when splitting is not wanted).
pub fn expand_word(word: &Word, env: &ShellEnv) -> String {
    let mut out = String::new();
    for (i, part) in word.parts.iter().enumerate() {
        match part {
            WordPart::Lit(s) => {
                if i == 0 {
                    out.push_str(&tilde(s, env));
                } else {
                    out.push_str(s);
                }
            }
            WordPart::SingleQuoted(s) => out.push_str(s),
            WordPart::DoubleQuoted(parts) => {
                for p in parts {
                    match p {
                        WordPart::Lit(s) => out.push_str(s),
                        WordPart::Param(name) => out.push_str(&env.param(name)),
                        _ => {}
                    }
                }
            }
            WordPart::Param(name) => out.push_str(&env.param(name)),
        }
    }
    out
}

fn expand_into(word: &Word, env: &ShellEnv, fields: &mut Vec<String>) {
    // `current` is the field under construction; None means no field has
    // been started, so an expansion of nothing contributes nothing.
    let mut current: Option<String> = None;

    for (i, part) in word.parts.iter().enumerate() {
        match part {
            WordPart::Lit(s) => {
                let s = if i == 0 { tilde(s, env) } else { s.clone() };
                current.get_or_insert_with(String::new).push_str(&s);
            }
            WordPart::SingleQuoted(s) => {
                current.get_or_insert_with(String::new).push_str(s);
            }
            WordPart::DoubleQuoted(parts) => {
                let joined = parts
                    .iter()
                    .map(|p| match p {
                        WordPart::Lit(s) => s.clone(),
                        WordPart::Param(name) => env.param(name),
                        _ => String::new(),
                    })
                    .collect::<String>();
                current.get_or_insert_with(String::new).push_str(&joined);
            }
            WordPart::Param(name) => {
                let value = env.param(name);
                split_unquoted(&value, &mut current, fields);
            }
        }
    }

    if let Some(field) = current {
        fields.push(field);
    }
}

/// Whitespace-split an unquoted expansion into the field stream.
fn split_unquoted(value: &str, current: &mut Option<String>, fields: &mut Vec<String>) {
    if value.is_empty() {
        return;
    }

    let leading_ws = value.starts_with(|c: char| c.is_whitespace());
    let trailing_ws = value.ends_with(|c: char| c.is_whitespace());
    let mut pieces = value.split_whitespace().peekable();

    if leading_ws {
        if let Some(field) = current.take() {
            fields.push(field);
        }
    }

    while let Some(piece) = pieces.next() {
        let last = pieces.peek().is_none();
        match current.take() {
            Some(mut field) => {
                field.push_str(piece);
                if last && !trailing_ws {
                    *current = Some(field);
                } else {
                    fields.push(field);
                }
            }
            None => {
                if last && !trailing_ws {
                    *current = Some(piece.to_string());
                } else {
                    fields.push(piece.to_string());
                }
            }
        }
    }
}

fn tilde(s: &str, env: &ShellEnv) -> String {
    if s == "~" {
        return env.home.to_string_lossy().to_string();
    }
    if let Some(rest) = s.strip_prefix("~/") {
        return format!("{}/{}", env.home.to_string_lossy(), rest);
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::parser::parse;
    use crate::interp::ast::Command;
    use std::path::PathBuf;

    fn env() -> ShellEnv {
        let mut env = ShellEnv::new(
            PathBuf::from("/tmp"),
            vec![("FOO".to_string(), "bar".to_string())],
            vec!["one".to_string(), "two words".to_string()],
            "aish".to_string(),
        );
        env.home = PathBuf::from("/home/u");
        env.vars
            .insert("SPACED".to_string(), "a b  c".to_string());
        env.last_status = 42;
        env
    }

    fn first_words(src: &str) -> Vec<Word> {
        let file = parse(src).unwrap();
        let Command::Simple(cmd) = &file.stmts[0].first.commands[0] else {
            panic!()
        };
        cmd.words.clone()
    }

    #[test]
    fn expands_parameters() {
        let words = first_words("echo $FOO ${FOO} $? $# $1\n");
        let fields = expand_words(&words, &env());
        assert_eq!(fields, vec!["echo", "bar", "bar", "42", "2", "one"]);
    }

    #[test]
    fn unquoted_expansion_splits_fields() {
        let words = first_words("echo $SPACED\n");
        let fields = expand_words(&words, &env());
        assert_eq!(fields, vec!["echo", "a", "b", "c"]);
    }

    #[test]
    fn quoted_expansion_does_not_split() {
        let words = first_words("echo \"$SPACED\" '$SPACED'\n");
        let fields = expand_words(&words, &env());
        assert_eq!(fields, vec!["echo", "a b  c", "$SPACED"]);
    }

    #[test]
    fn empty_expansion_drops_the_field() {
        let words = first_words("echo $MISSING end\n");
        let fields = expand_words(&words, &env());
        assert_eq!(fields, vec!["echo", "end"]);

        let words = first_words("echo \"$MISSING\"\n");
        let fields = expand_words(&words, &env());
        assert_eq!(fields, vec!["echo", ""]);
    }

    #[test]
    fn adjacent_parts_join_into_one_field() {
        let words = first_words("echo pre$FOO'post'\n");
        let fields = expand_words(&words, &env());
        assert_eq!(fields, vec!["echo", "prebarpost"]);
    }

    #[test]
    fn tilde_expands_at_word_start() {
        let words = first_words("ls ~ ~/docs x~\n");
        let fields = expand_words(&words, &env());
        assert_eq!(fields, vec!["ls", "/home/u", "/home/u/docs", "x~"]);
    }

    #[test]
    fn positional_at_joins_params() {
        let words = first_words("echo $@\n");
        let fields = expand_words(&words, &env());
        // $@ re-splits on whitespace when unquoted
        assert_eq!(fields, vec!["echo", "one", "two", "words"]);
    }
}
