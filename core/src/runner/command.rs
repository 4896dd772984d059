//! Turns a `CommandLine` into a program plus arguments.
//!
//! Argument vectors run directly unless `shell` is set. Shell strings run
//! through `/bin/sh -c` (`cmd /C` on Windows). Mixing the two forms still
//! works but logs a warning, since quoting rules vary across platforms.

use std::ffi::OsString;

use crate::error::RunError;

use super::types::CommandLine;

#[cfg(unix)]
const SHELL: (&str, &str) = ("/bin/sh", "-c");
#[cfg(windows)]
const SHELL: (&str, &str) = ("cmd", "/C");

/// Resolved program and arguments for the launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub program: OsString,
    pub args: Vec<OsString>,
}

pub fn resolve(cmd: &CommandLine, shell: bool) -> Result<Resolved, RunError> {
    match (cmd, shell) {
        (CommandLine::Argv(argv), false) => Ok(split_program(argv.clone())),
        (CommandLine::Text(s), false) => {
            tracing::warn!(
                command = %s,
                "single string commands may not split as intended across platforms; pass an argument vector or enable shell mode"
            );
            let argv = split_posix(s).map_err(RunError::Config)?;
            Ok(split_program(argv.into_iter().map(OsString::from).collect()))
        }
        (CommandLine::Text(s), true) => Ok(shell_invocation(s)),
        (CommandLine::Argv(argv), true) => {
            tracing::warn!(
                "argument vectors may not quote as intended in shell mode across platforms; pass a command string or disable shell mode"
            );
            let mut parts = Vec::with_capacity(argv.len());
            for arg in argv {
                let s = arg.to_str().ok_or_else(|| {
                    RunError::Config(format!(
                        "non UTF-8 argument cannot be used in shell mode: {}",
                        arg.to_string_lossy()
                    ))
                })?;
                parts.push(shell_escape(s));
            }
            Ok(shell_invocation(&parts.join(" ")))
        }
    }
}

fn split_program(mut argv: Vec<OsString>) -> Resolved {
    if argv.is_empty() {
        return Resolved {
            program: OsString::new(),
            args: vec![],
        };
    }
    let program = argv.remove(0);
    Resolved {
        program,
        args: argv,
    }
}

fn shell_invocation(script: &str) -> Resolved {
    Resolved {
        program: SHELL.0.into(),
        args: vec![SHELL.1.into(), script.into()],
    }
}

/// Escape a string for safe use in a POSIX shell command.
///
/// Wraps the value in single quotes and escapes any embedded single quotes
/// using the `'\''` idiom.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    let plain = |c: char| {
        c.is_ascii_alphanumeric()
            || matches!(c, '-' | '_' | '.' | '/' | '%' | ':' | '=' | '+' | ',' | '@')
    };
    if s.chars().all(plain) {
        return s.to_string();
    }
    let escaped = s.replace('\'', "'\\''");
    format!("'{}'", escaped)
}

/// Split a command string into words using POSIX shell quoting rules.
///
/// Supports single quotes, double quotes (with `\` escaping `"`, `\`, `$`,
/// and a backtick) and bare backslash escapes. No expansion is performed.
pub fn split_posix(s: &str) -> Result<Vec<String>, String> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Blank,
        Word,
        Single,
        Double,
    }

    let mut words = Vec::new();
    let mut cur = String::new();
    let mut state = State::Blank;
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match state {
            State::Blank | State::Word => match c {
                c if c.is_whitespace() => {
                    if state == State::Word {
                        words.push(std::mem::take(&mut cur));
                        state = State::Blank;
                    }
                }
                '\'' => state = State::Single,
                '"' => state = State::Double,
                '\\' => {
                    match chars.next() {
                        Some('\n') => {}
                        Some(next) => cur.push(next),
                        None => return Err("trailing backslash".to_string()),
                    }
                    state = State::Word;
                }
                c => {
                    cur.push(c);
                    state = State::Word;
                }
            },
            State::Single => match c {
                '\'' => state = State::Word,
                c => cur.push(c),
            },
            State::Double => match c {
                '"' => state = State::Word,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`')) => cur.push(next),
                    Some('\n') => {}
                    Some(next) => {
                        cur.push('\\');
                        cur.push(next);
                    }
                    None => return Err("unterminated double quote".to_string()),
                },
                c => cur.push(c),
            },
        }
    }

    match state {
        State::Single => Err("unterminated single quote".to_string()),
        State::Double => Err("unterminated double quote".to_string()),
        State::Word => {
            words.push(cur);
            Ok(words)
        }
        State::Blank => Ok(words),
    }
}
