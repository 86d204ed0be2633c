//! Small helpers shared across the shell: PATH resolution, word quoting,
//! ANSI handling and terminal probing.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lock acquisition that recovers from poisoning instead of panicking; a
/// poisoned guard only means some other thread panicked mid-update, and the
/// shell should keep serving the prompt.
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// ANSI escape codes used for prompts and streamed model output.
pub mod color {
    pub const RESET: &str = "\x1b[0m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const PURPLE: &str = "\x1b[35m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";

    pub const BOLD: &str = "\x1b[1m";
    pub const UNDERLINE: &str = "\x1b[4m";
}

pub fn is_terminal(file: &File) -> bool {
    file.is_terminal()
}

/// Whether the terminal advertises color support (TERM / COLORTERM).
pub fn color_supported() -> bool {
    static SUPPORTED: OnceLock<bool> = OnceLock::new();
    *SUPPORTED.get_or_init(|| {
        let term = std::env::var("TERM").unwrap_or_default();
        if term.is_empty() {
            return false;
        }
        let known = ["xterm", "xterm-256color", "screen", "tmux", "rxvt"];
        if known.iter().any(|t| term.contains(t)) {
            return true;
        }
        !std::env::var("COLORTERM").unwrap_or_default().is_empty()
    })
}

/// Remove ANSI escape sequences (CSI and OSC) and carriage returns, leaving
/// the plain text a human would read. Used when captured terminal output is
/// turned into model-visible answer text.
pub fn strip_ansi(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if let Some(&next) = chars.peek() {
                if next == '[' {
                    chars.next();
                    while let Some(&ch) = chars.peek() {
                        chars.next();
                        if ch.is_ascii_alphabetic() || ch == '~' {
                            break;
                        }
                    }
                    continue;
                } else if next == ']' {
                    // OSC sequence, runs until BEL or ST
                    chars.next();
                    while let Some(ch) = chars.next() {
                        if ch == '\x07' {
                            break;
                        }
                        if ch == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                    continue;
                }
            }
        } else if c == '\r' {
            continue;
        }
        result.push(c);
    }

    result
}

/// Join fields into a single statement, JSON-quoting each word so the result
/// survives re-parsing regardless of embedded spaces or quotes.
pub fn combine_fields(fields: &[String]) -> Result<String, serde_json::Error> {
    let mut words = Vec::with_capacity(fields.len());
    for field in fields {
        words.push(serde_json::to_string(field)?);
    }
    Ok(words.join(" "))
}

/// snake_case a file name for use as a tool identifier:
/// "My-Tool.sh" becomes "my_tool_sh".
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_lower = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && prev_lower {
                out.push('_');
            }
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            out.push(c.to_ascii_lowercase());
        } else {
            if !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    out.trim_matches('_').to_string()
}

/// Resolve `file` against the working directory first, then every PATH entry.
/// Absolute paths are returned as-is; relative PATH entries are resolved
/// against the working directory.
pub fn look_path(file: &str, wd: &Path, path_env: &str) -> Option<PathBuf> {
    let candidate = Path::new(file);
    if candidate.is_absolute() {
        return Some(clean_path(candidate));
    }

    let mut dirs: Vec<PathBuf> = vec![wd.to_path_buf()];
    dirs.extend(std::env::split_paths(path_env));

    for dir in dirs {
        let dir = if dir.is_absolute() {
            dir
        } else {
            wd.join(dir)
        };
        let path = dir.join(file);
        if path.exists() {
            return Some(clean_path(&path));
        }
    }
    None
}

fn clean_path(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// All file names found in the absolute PATH entries, deduplicated and
/// sorted. Relative entries are skipped, matching the completer's needs.
pub fn find_executable_names(path_env: &str) -> Vec<String> {
    let mut names = BTreeSet::new();
    for dir in std::env::split_paths(path_env) {
        if !dir.is_absolute() {
            continue;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                names.insert(name);
            }
        }
    }
    names.into_iter().collect()
}

/// Split the edited line at the last whitespace before the cursor, returning
/// (trailing fragment, everything before it). Completers operate on the
/// fragment and return full replacements for it.
pub fn last_fragment(line: &str, pos: usize) -> (&str, &str) {
    let mut pos = pos.min(line.len());
    while pos > 0 && !line.is_char_boundary(pos) {
        pos -= 1;
    }
    let upto = &line[..pos];
    let start = upto
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    (&upto[start..], &upto[..start])
}

/// Byte offset where the trailing fragment begins; mirrors [`last_fragment`]
/// for callers that need the replacement start position.
pub fn fragment_start(line: &str, pos: usize) -> usize {
    let mut pos = pos.min(line.len());
    while pos > 0 && !line.is_char_boundary(pos) {
        pos -= 1;
    }
    let (frag, _) = last_fragment(line, pos);
    pos - frag.len()
}

/// Turn a byte buffer into a readable file descriptor, feeding it from a
/// background thread. Used to run `-c` inline commands through the same
/// stdin-driven pipeline as scripts.
#[cfg(unix)]
pub fn reader_descriptor(content: Vec<u8>) -> std::io::Result<File> {
    use std::io::Write;
    use std::os::fd::{FromRawFd, OwnedFd};

    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let reader = File::from(unsafe { OwnedFd::from_raw_fd(fds[0]) });
    let mut writer = File::from(unsafe { OwnedFd::from_raw_fd(fds[1]) });

    std::thread::spawn(move || {
        let _ = writer.write_all(&content);
    });

    Ok(reader)
}

/// Duplicate one of the process's standard descriptors into an owned file,
/// so the shell can hand it around without ever closing fd 0/1/2.
#[cfg(unix)]
pub fn dup_stdio(fd: i32) -> std::io::Result<File> {
    use std::os::fd::{FromRawFd, OwnedFd};

    let duped = unsafe { libc::dup(fd) };
    if duped < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(File::from(unsafe { OwnedFd::from_raw_fd(duped) }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_ansi_removes_color_codes() {
        assert_eq!(strip_ansi("\x1b[90mhello\x1b[0m"), "hello");
        assert_eq!(strip_ansi("plain"), "plain");
        assert_eq!(strip_ansi("a\r\nb"), "a\nb");
    }

    #[test]
    fn strip_ansi_removes_osc_sequences() {
        assert_eq!(strip_ansi("\x1b]0;title\x07text"), "text");
    }

    #[test]
    fn combine_fields_json_quotes_words() {
        let fields = vec!["/bin/echo".to_string(), "hello world".to_string()];
        assert_eq!(
            combine_fields(&fields).unwrap(),
            "\"/bin/echo\" \"hello world\""
        );
    }

    #[test]
    fn snake_case_tool_names() {
        assert_eq!(to_snake_case("My-Tool.sh"), "my_tool_sh");
        assert_eq!(to_snake_case("echo"), "echo");
        assert_eq!(to_snake_case("HTTPServer"), "httpserver");
        assert_eq!(to_snake_case("myTool"), "my_tool");
    }

    #[test]
    fn last_fragment_splits_at_whitespace() {
        assert_eq!(last_fragment("ls src/ma", 9), ("src/ma", "ls "));
        assert_eq!(last_fragment("ls", 2), ("ls", ""));
        assert_eq!(last_fragment("", 0), ("", ""));
    }

    #[test]
    fn look_path_prefers_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tool"), b"").unwrap();
        let found = look_path("tool", dir.path(), "/nonexistent").unwrap();
        assert_eq!(found, dir.path().join("tool"));
        assert!(look_path("missing", dir.path(), "/nonexistent").is_none());
    }
}
