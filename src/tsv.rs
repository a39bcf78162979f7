//! Backslash-escaped TSV dialect used by the comment export and the bulk-load outputs.
//!
//! Dialect: tab delimiter, `\` escape character, no quoting, `\n` terminator. A value
//! containing a newline is written as a backslash followed by the literal newline, so one
//! logical record may span several physical lines. [`Recombined`] stitches those lines
//! back together before [`split_fields`] interprets them.

use crate::util::create_with_backoff;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Literal written for SQL NULL columns.
pub const NULL: &str = "NULL";

/// True when `line` ends in a backslash that is not itself escaped
/// (an odd number of trailing backslashes).
#[inline]
pub fn has_continuation(line: &str) -> bool {
    let trailing = line.bytes().rev().take_while(|&b| b == b'\\').count();
    trailing % 2 == 1
}

enum LineState {
    Normal,
    Continuing(Vec<String>),
}

/// Lazy line-reassembly pass: NORMAL -> CONTINUING -> NORMAL.
///
/// A physical line ending in an unescaped backslash opens (or extends) a continuation;
/// the backslash is dropped and the next line is appended after a `\n`. Errors from the
/// underlying reader are passed through unchanged.
pub struct Recombined<I> {
    lines: I,
    state: LineState,
}

impl<I> Recombined<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    pub fn new(lines: I) -> Self {
        Self { lines, state: LineState::Normal }
    }
}

impl<I> Iterator for Recombined<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next() {
                Some(Ok(l)) => l,
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    // Input ended inside a continuation: flush what we have.
                    return match std::mem::replace(&mut self.state, LineState::Normal) {
                        LineState::Continuing(parts) => Some(Ok(parts.join("\n"))),
                        LineState::Normal => None,
                    };
                }
            };

            if has_continuation(&line) {
                let mut head = line;
                head.pop();
                match &mut self.state {
                    LineState::Continuing(parts) => parts.push(head),
                    LineState::Normal => self.state = LineState::Continuing(vec![head]),
                }
                continue;
            }

            return match std::mem::replace(&mut self.state, LineState::Normal) {
                LineState::Normal => Some(Ok(line)),
                LineState::Continuing(mut parts) => {
                    parts.push(line);
                    Some(Ok(parts.join("\n")))
                }
            };
        }
    }
}

/// Split a logical record on unescaped tabs into at most `limit` fields, undoing the
/// backslash escaping. Once `limit - 1` fields are collected, the remainder (tabs included)
/// becomes the last field.
pub fn split_fields(line: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut fields = Vec::with_capacity(limit);
    let mut cur = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => cur.push(next),
                None => cur.push('\\'),
            },
            '\t' if fields.len() + 1 < limit => fields.push(std::mem::take(&mut cur)),
            other => cur.push(other),
        }
    }
    fields.push(cur);
    fields
}

/// Escape a single value for the dialect.
pub fn escape_field(value: &str, out: &mut String) {
    for c in value.chars() {
        if matches!(c, '\\' | '\t' | '\n' | '\r') {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Join already-stringified values into one escaped record (no terminator).
pub fn join_fields<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = String::with_capacity(fields.iter().map(|f| f.as_ref().len() + 1).sum());
    for (i, f) in fields.iter().enumerate() {
        if i > 0 {
            line.push('\t');
        }
        escape_field(f.as_ref(), &mut line);
    }
    line
}

/// Buffered TSV writer that stages into `<final>.inprogress` and is promoted atomically
/// by [`TsvWriter::finish`].
pub struct TsvWriter {
    tmp_path: PathBuf,
    final_path: PathBuf,
    w: BufWriter<File>,
    rows: u64,
}

impl TsvWriter {
    pub fn create(final_path: &Path, buf_bytes: usize) -> Result<Self> {
        let tmp_path = final_path.with_extension("tsv.inprogress");
        let f = create_with_backoff(&tmp_path, 16, 50)
            .with_context(|| format!("create {}", tmp_path.display()))?;
        Ok(Self {
            tmp_path,
            final_path: final_path.to_path_buf(),
            w: BufWriter::with_capacity(buf_bytes.max(8 * 1024), f),
            rows: 0,
        })
    }

    /// Write one record; the values are escaped, the terminator is added.
    pub fn write_row<S: AsRef<str>>(&mut self, fields: &[S]) -> io::Result<()> {
        let line = join_fields(fields);
        self.w.write_all(line.as_bytes())?;
        self.w.write_all(b"\n")?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush and promote the staged file; returns the final path.
    pub fn finish(mut self) -> Result<PathBuf> {
        self.w.flush().with_context(|| format!("flush {}", self.tmp_path.display()))?;
        drop(self.w);
        crate::util::replace_file_atomic_backoff(&self.tmp_path, &self.final_path)?;
        Ok(self.final_path)
    }
}
