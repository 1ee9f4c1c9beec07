// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shell-like line tokenizer shared by the driver sockets, the client
//! protocol, and the configuration files.
//!
//! Input is consumed a byte at a time; a completed line yields its argument
//! vector. Words are split on unquoted whitespace, `"..."` groups a word,
//! `\` makes the next byte literal (and joins lines when it precedes a
//! newline), `#` starts a comment, and a bare `=` is always a word of its
//! own:
//!
//! ```text
//! this is a line       -> ["this", "is", "a", "line"]
//! this "is also" one   -> ["this", "is also", "one"]
//! embedded\ space      -> ["embedded space"]
//! driver = dummy       -> ["driver", "=", "dummy"]
//! ```

use std::fmt;

/// Longest accepted word; excess bytes are dropped, not an error.
pub const WORD_LIMIT: usize = 512;

/// Most arguments accepted per line; excess words are dropped, not an error.
pub const ARG_LIMIT: usize = 32;

/// An unparseable line. The only way to produce one is an unescaped `#`
/// inside a quoted word; the caller is expected to skip to the next line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: u32,
    pub message: &'static str,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FindWordStart,
    FindEol,
    Collect,
    CollectLiteral,
    QuoteCollect,
    QcLiteral,
}

/// Result of feeding one byte to a [`Tokenizer`].
#[derive(Debug, PartialEq, Eq)]
pub enum Feed {
    /// Mid-line; keep feeding.
    Pending,
    /// A newline completed this argument vector (possibly empty).
    Line(Vec<String>),
    /// The line is unparseable; discarded through the newline already.
    Error(ParseError),
}

/// Byte-at-a-time tokenizer context. One lives per driver socket, per
/// client session, and per configuration file read.
#[derive(Debug)]
pub struct Tokenizer {
    state: State,
    word: String,
    args: Vec<String>,
    /// Set when the current line already failed; the error is reported when
    /// the terminating newline arrives.
    failed: Option<&'static str>,
    line: u32,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self { state: State::FindWordStart, word: String::new(), args: Vec::new(), failed: None, line: 1 }
    }

    /// Line number of the line currently being collected (1-based).
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Feed one byte. Returns the finished argument vector when `byte` is a
    /// newline (or the error for a failed line) and resets for the next line.
    pub fn feed(&mut self, byte: u8) -> Feed {
        if byte == b'\n' {
            return self.end_line();
        }

        if self.failed.is_some() {
            // Skip the rest of a failed line.
            return Feed::Pending;
        }

        match self.state {
            State::FindWordStart => {
                match byte {
                    b'#' => self.state = State::FindEol,
                    b if b.is_ascii_whitespace() => {}
                    b'\\' => self.state = State::CollectLiteral,
                    b'"' => self.state = State::QuoteCollect,
                    b'=' => {
                        self.push_byte(b'=');
                        self.end_word();
                    }
                    b => {
                        self.push_byte(b);
                        self.state = State::Collect;
                    }
                }
            }
            State::FindEol => {}
            State::Collect => match byte {
                b'#' => {
                    self.end_word();
                    self.state = State::FindEol;
                }
                b if b.is_ascii_whitespace() => {
                    self.end_word();
                    self.state = State::FindWordStart;
                }
                b'=' => {
                    // "a=b" splits into three words.
                    self.end_word();
                    self.push_byte(b'=');
                    self.end_word();
                    self.state = State::FindWordStart;
                }
                b'\\' => self.state = State::CollectLiteral,
                b => self.push_byte(b),
            },
            State::CollectLiteral => {
                self.push_byte(byte);
                self.state = State::Collect;
            }
            State::QuoteCollect => match byte {
                b'#' => {
                    self.end_word();
                    self.failed = Some("unbalanced word: unescaped # in quotes");
                    self.state = State::FindEol;
                }
                b'"' => {
                    self.end_word();
                    self.state = State::FindWordStart;
                }
                b'\\' => self.state = State::QcLiteral,
                b => self.push_byte(b),
            },
            State::QcLiteral => {
                self.push_byte(byte);
                self.state = State::QuoteCollect;
            }
        }

        Feed::Pending
    }

    /// Flush state at end of input for sources that may not end in a
    /// newline (files, single-line parses). Returns the pending argument
    /// vector if anything was collected, or the error for a failed line.
    pub fn finish(&mut self) -> Result<Option<Vec<String>>, ParseError> {
        if let Some(message) = self.failed.take() {
            let line = self.line;
            self.reset_line();
            return Err(ParseError { line, message });
        }

        if !self.word.is_empty() {
            self.end_word();
        }

        if self.args.is_empty() {
            self.reset_line();
            return Ok(None);
        }

        let args = std::mem::take(&mut self.args);
        self.reset_line();
        Ok(Some(args))
    }

    fn end_line(&mut self) -> Feed {
        // A backslash immediately before the newline joins physical lines;
        // so does a newline inside a quoted word.
        match self.state {
            State::CollectLiteral => {
                self.state = State::Collect;
                return Feed::Pending;
            }
            State::QcLiteral => {
                self.state = State::QuoteCollect;
                return Feed::Pending;
            }
            State::QuoteCollect => return Feed::Pending,
            _ => {}
        }

        let line = self.line;
        self.line += 1;

        if let Some(message) = self.failed.take() {
            self.reset_line();
            return Feed::Error(ParseError { line, message });
        }

        if !self.word.is_empty() {
            self.end_word();
        }

        let args = std::mem::take(&mut self.args);
        self.reset_line();
        Feed::Line(args)
    }

    fn reset_line(&mut self) {
        self.state = State::FindWordStart;
        self.word.clear();
        self.args.clear();
    }

    fn push_byte(&mut self, byte: u8) {
        // Only printable ASCII makes it into a word; everything else is a
        // historical defense against control characters (CVE-2012-2944).
        if !(0x20..=0x7e).contains(&byte) {
            return;
        }

        if self.word.len() >= WORD_LIMIT {
            return;
        }

        self.word.push(byte as char);
    }

    fn end_word(&mut self) {
        if self.args.len() >= ARG_LIMIT {
            self.word.clear();
            return;
        }

        self.args.push(std::mem::take(&mut self.word));
    }
}

/// Parse a single line delivered whole (no trailing newline required).
pub fn parse_line(line: &str) -> Result<Vec<String>, ParseError> {
    let mut tok = Tokenizer::new();

    for &byte in line.as_bytes() {
        match tok.feed(byte) {
            Feed::Pending => {}
            Feed::Line(args) => return Ok(args),
            Feed::Error(e) => return Err(e),
        }
    }

    Ok(tok.finish()?.unwrap_or_default())
}

/// One logical line of a parsed document.
#[derive(Debug)]
pub struct DocLine {
    /// Physical line number where the logical line started.
    pub line: u32,
    pub args: Result<Vec<String>, ParseError>,
}

/// Parse an entire document (configuration file contents). Logical lines
/// may span physical lines via `\`-continuation; blank and comment-only
/// lines come back as empty argument vectors.
pub fn parse_document(text: &str) -> Vec<DocLine> {
    let mut tok = Tokenizer::new();
    let mut out = Vec::new();
    let mut start = tok.line();

    for &byte in text.as_bytes() {
        match tok.feed(byte) {
            Feed::Pending => {}
            Feed::Line(args) => {
                out.push(DocLine { line: start, args: Ok(args) });
                start = tok.line();
            }
            Feed::Error(e) => {
                out.push(DocLine { line: start, args: Err(e) });
                start = tok.line();
            }
        }
    }

    match tok.finish() {
        Ok(Some(args)) => out.push(DocLine { line: start, args: Ok(args) }),
        Ok(None) => {}
        Err(e) => out.push(DocLine { line: start, args: Err(e) }),
    }

    out
}

/// Escape `#`, `\` and `"` so the result survives a round-trip through the
/// tokenizer as a single quoted word. Output is truncated at `max` bytes;
/// an escape is only emitted when both of its bytes fit.
pub fn encode(src: &str, max: usize) -> String {
    let mut out = String::new();

    for &byte in src.as_bytes() {
        if matches!(byte, b'#' | b'\\' | b'"') {
            if out.len() + 2 > max {
                return out;
            }
            out.push('\\');
        }

        if out.len() >= max {
            return out;
        }

        out.push(byte as char);
    }

    out
}

#[cfg(test)]
#[path = "textparse_tests.rs"]
mod tests;
