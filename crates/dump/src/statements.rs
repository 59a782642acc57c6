use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use tracing::debug;

use crate::connector::DatabaseConnector;
use crate::sql::Flavor;
use crate::DumpError;

const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    SingleQuote,
    DoubleQuote,
    Backtick,
    LineComment,
    BlockComment,
}

/// Splits SQL text into statements without holding more than one statement in memory.
///
/// Semicolons inside quoted literals, identifiers and comments do not terminate a statement, and
/// a `CREATE TRIGGER` body runs until its closing `END;`. Client directives such as `DELIMITER`
/// are not understood.
pub struct StatementReader<R> {
    reader: R,
    scanner: Scanner,
    done: bool,
}

impl<R: BufRead> StatementReader<R> {
    pub fn new(reader: R, flavor: Flavor) -> Self {
        Self {
            reader,
            scanner: Scanner::new(flavor.backslash_escapes()),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for StatementReader<R> {
    type Item = Result<String, DumpError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let buf = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Some(Err(e.into())),
            };
            if buf.is_empty() {
                self.done = true;
                break;
            }

            let mut consumed = 0;
            let mut complete = false;
            for &byte in buf {
                consumed += 1;
                if self.scanner.feed(byte) {
                    complete = true;
                    break;
                }
            }
            self.reader.consume(consumed);

            if complete {
                match self.scanner.take() {
                    Ok(Some(stmt)) => return Some(Ok(stmt)),
                    Ok(None) => {}
                    Err(e) => return Some(Err(e)),
                }
            }
        }
        self.scanner.take().transpose()
    }
}

struct Scanner {
    backslash_escapes: bool,
    state: State,
    escaped: bool,
    prev: u8,
    current: Vec<u8>,
    // Upper-cased text outside literals and comments, whitespace collapsed.
    code: String,
}

impl Scanner {
    fn new(backslash_escapes: bool) -> Self {
        Self {
            backslash_escapes,
            state: State::Normal,
            escaped: false,
            prev: 0,
            current: Vec::new(),
            code: String::new(),
        }
    }

    /// Consumes one byte; true when it terminated a statement.
    fn feed(&mut self, byte: u8) -> bool {
        self.current.push(byte);
        let prev = std::mem::replace(&mut self.prev, byte);
        match self.state {
            State::Normal => match byte {
                b'\'' => self.open(State::SingleQuote, '\''),
                b'"' => self.open(State::DoubleQuote, '"'),
                b'`' => self.open(State::Backtick, '`'),
                b'-' if prev == b'-' && self.code.ends_with('-') => {
                    self.code.pop();
                    self.state = State::LineComment;
                }
                b'*' if prev == b'/' && self.code.ends_with('/') => {
                    self.code.pop();
                    self.state = State::BlockComment;
                    // "/*/" must not close the comment it just opened.
                    self.prev = 0;
                }
                b';' => {
                    if needs_more(&self.code) {
                        self.code.push(';');
                    } else {
                        return true;
                    }
                }
                b if b.is_ascii_whitespace() => self.push_space(),
                b => self.code.push(char::from(b.to_ascii_uppercase())),
            },
            State::LineComment => {
                if byte == b'\n' {
                    self.state = State::Normal;
                    self.push_space();
                }
            }
            State::BlockComment => {
                if byte == b'/' && prev == b'*' {
                    self.state = State::Normal;
                    self.push_space();
                }
            }
            State::SingleQuote | State::DoubleQuote => {
                let closing = if self.state == State::SingleQuote { b'\'' } else { b'"' };
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' && self.backslash_escapes {
                    self.escaped = true;
                } else if byte == closing {
                    self.state = State::Normal;
                }
            }
            State::Backtick => {
                if byte == b'`' {
                    self.state = State::Normal;
                }
            }
        }
        false
    }

    fn open(&mut self, state: State, quote: char) {
        self.state = state;
        self.code.push(quote);
    }

    fn push_space(&mut self) {
        if !self.code.is_empty() && !self.code.ends_with(' ') {
            self.code.push(' ');
        }
    }

    /// Returns the buffered statement, or `None` when it held only whitespace and comments.
    fn take(&mut self) -> Result<Option<String>, DumpError> {
        let raw = std::mem::take(&mut self.current);
        let has_code = !self.code.trim().is_empty();
        self.code.clear();
        self.state = State::Normal;
        self.escaped = false;
        self.prev = 0;

        if !has_code {
            return Ok(None);
        }
        let text = String::from_utf8(raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(text.trim().to_owned()))
    }
}

fn needs_more(code: &str) -> bool {
    let code = code.trim();
    let is_trigger = ["CREATE TRIGGER", "CREATE TEMP TRIGGER", "CREATE TEMPORARY TRIGGER"]
        .iter()
        .any(|head| code.starts_with(head));
    is_trigger && !ends_with_keyword(code, "END")
}

fn ends_with_keyword(code: &str, keyword: &str) -> bool {
    match code.strip_suffix(keyword) {
        Some(rest) => rest
            .chars()
            .last()
            .map_or(true, |c| !(c.is_ascii_alphanumeric() || c == '_')),
        None => false,
    }
}

/// Executes every statement of a dump file in order; returns how many ran.
pub fn replay_file(conn: &dyn DatabaseConnector, path: &Path, flavor: Flavor) -> Result<u64, DumpError> {
    let reader = StatementReader::new(BufReader::with_capacity(256 * 1024, File::open(path)?), flavor);
    let mut executed = 0u64;
    for stmt in reader {
        let stmt = stmt?;
        executed += 1;
        conn.execute(&stmt).map_err(|source| DumpError::Statement {
            index: executed,
            preview: preview(&stmt),
            source: Box::new(source),
        })?;
    }
    debug!(statements = executed, path = %path.display(), "dump replayed");
    Ok(executed)
}

fn preview(stmt: &str) -> String {
    let mut short: String = stmt.chars().take(PREVIEW_CHARS).collect();
    if short.len() < stmt.len() {
        short.push_str("...");
    }
    short
}
