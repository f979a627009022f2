// src/core/command_expander.rs

//! Quote-aware placeholder expansion for command text.
//!
//! On a POSIX shell a command is lexed into lines and words. Single-quoted
//! spans are kept literal so placeholders meant for the shell itself survive;
//! everything else is expanded. A native interpreter (`cmd.exe`) has no such
//! quoting, so the whole command is expanded at once.

use crate::core::interpolator::expand_text;
use crate::models::EnvMap;
use std::iter::Peekable;
use std::str::Chars;

/// How the target shell treats quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellMode {
    /// `sh`-like: single quotes suppress expansion.
    Posix,
    /// `cmd.exe`-like: quotes carry no expansion semantics.
    Native,
}

/// Substitutes `$<NAME>` placeholders in `command`, deleting those left unresolved.
///
/// In [`ShellMode::Posix`]:
/// - backslash-newline continuations are joined first;
/// - blank lines and comment lines are kept as written, as is each line's indentation;
/// - words are re-joined with a single space;
/// - single-quoted spans are never expanded.
pub fn expand_command(command: &str, env: &EnvMap, mode: ShellMode) -> String {
    match mode {
        ShellMode::Native => expand_text(command, env, true),
        ShellMode::Posix => {
            let joined = command.replace("\\\n", "");
            lex(&joined)
                .iter()
                .map(|line| render(line, env))
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Bare(String),
    /// Includes the surrounding quotes.
    SingleQuoted(String),
    /// Includes the surrounding quotes.
    DoubleQuoted(String),
}

#[derive(Debug, PartialEq, Eq)]
enum Line {
    /// Blank or comment-only line.
    Verbatim(String),
    Words {
        indent: String,
        words: Vec<Vec<Segment>>,
        /// A trailing `# ...`, kept as written.
        comment: Option<String>,
    },
}

type Cursor<'a> = Peekable<Chars<'a>>;

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r')
}

fn take_while(chars: &mut Cursor<'_>, keep: impl Fn(char) -> bool) -> String {
    let mut taken = String::new();
    while let Some(&c) = chars.peek() {
        if !keep(c) {
            break;
        }
        taken.push(c);
        chars.next();
    }
    taken
}

fn lex(text: &str) -> Vec<Line> {
    let mut chars = text.chars().peekable();
    let mut lines = Vec::new();
    while chars.peek().is_some() {
        lines.push(lex_line(&mut chars));
    }
    lines
}

/// Consumes one logical line, including its terminating newline.
/// A quoted span may run over several physical lines.
fn lex_line(chars: &mut Cursor<'_>) -> Line {
    let indent = take_while(chars, |c| c == ' ' || c == '\t');

    match chars.peek() {
        None | Some('\n') => {
            chars.next();
            return Line::Verbatim(indent);
        }
        Some('#') => {
            let comment = take_while(chars, |c| c != '\n');
            chars.next();
            return Line::Verbatim(indent + &comment);
        }
        Some(_) => {}
    }

    let mut words = Vec::new();
    let mut comment = None;
    loop {
        take_while(chars, is_blank);
        match chars.peek() {
            None => break,
            Some('\n') => {
                chars.next();
                break;
            }
            Some('#') => comment = Some(take_while(chars, |c| c != '\n')),
            Some(_) => words.push(lex_word(chars)),
        }
    }

    Line::Words {
        indent,
        words,
        comment,
    }
}

fn lex_word(chars: &mut Cursor<'_>) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut bare = String::new();

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => break,
            c if is_blank(c) => break,
            '\'' => {
                flush(&mut bare, &mut segments);
                segments.push(Segment::SingleQuoted(quoted(chars, '\'')));
            }
            '"' => {
                flush(&mut bare, &mut segments);
                segments.push(Segment::DoubleQuoted(quoted(chars, '"')));
            }
            '\\' => {
                chars.next();
                bare.push('\\');
                if let Some(escaped) = chars.next() {
                    bare.push(escaped);
                }
            }
            _ => {
                chars.next();
                bare.push(c);
            }
        }
    }
    flush(&mut bare, &mut segments);
    segments
}

/// Reads a quoted span starting at the opening `quote`. An unterminated span runs
/// to the end of the text. Backslash escapes are honored inside double quotes only.
fn quoted(chars: &mut Cursor<'_>, quote: char) -> String {
    let mut span = String::new();
    if let Some(open) = chars.next() {
        span.push(open);
    }
    while let Some(c) = chars.next() {
        span.push(c);
        if c == quote {
            break;
        }
        if c == '\\' && quote == '"' {
            if let Some(escaped) = chars.next() {
                span.push(escaped);
            }
        }
    }
    span
}

fn flush(bare: &mut String, segments: &mut Vec<Segment>) {
    if !bare.is_empty() {
        segments.push(Segment::Bare(std::mem::take(bare)));
    }
}

fn render(line: &Line, env: &EnvMap) -> String {
    match line {
        Line::Verbatim(text) => text.clone(),
        Line::Words {
            indent,
            words,
            comment,
        } => {
            let mut parts: Vec<String> = words
                .iter()
                .map(|segments| {
                    segments
                        .iter()
                        .map(|segment| match segment {
                            Segment::SingleQuoted(text) => text.clone(),
                            Segment::Bare(text) | Segment::DoubleQuoted(text) => {
                                expand_text(text, env, true)
                            }
                        })
                        .collect::<String>()
                })
                .collect();
            parts.extend(comment.iter().cloned());
            format!("{}{}", indent, parts.join(" "))
        }
    }
}
