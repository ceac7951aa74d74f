//! Engine log parsers.
//!
//! Every parser follows the same control structure: a single forward pass
//! over the log lines in a "scanning" state, where a fixed literal marker
//! switches into a section reader. The section reader consumes lines until
//! its exit condition (blank line, a terminal phrase or a row count derived
//! from the atom count) and hands control back to the scanner.
//!
//! Shared rules:
//!
//! - The termination marker is checked before any extraction. A missing log
//!   is [`QCError::MissingArtifact`], a log without the marker is
//!   [`QCError::AbnormalTermination`].
//! - Energy-like scalars are overwritten on every match, so the last
//!   occurrence in the log wins.
//! - Sections that repeat (population analyses printed at every optimization
//!   step) are re-read into a fresh buffer each time, keeping the last
//!   complete occurrence.
//! - Parsers return a new [`crate::properties::PropertySet`]; they never
//!   touch a molecule directly.
//!
//! Submodules:
//!
//! - [`orca`]: ORCA `output.out`
//! - [`xtb`]: xTB `output.out` plus its `charges` and `vibspectrum` files
//! - [`dftbplus`]: DFTB+ `output.out`

pub mod dftbplus;
pub mod orca;
pub mod xtb;

use crate::error::{QCError, Result};
use crate::properties::PropertySet;
use std::fs;
use std::path::Path;

/// Outcome of parsing one log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLog {
    /// Properties read from the log
    pub properties: PropertySet,
    /// Advisory notes (imaginary modes and similar), already logged with `warn!`
    pub advisories: Vec<String>,
}

/// Forward-only cursor over the lines of a log.
#[derive(Debug)]
pub struct LineCursor<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> LineCursor<'a> {
    /// Creates a cursor positioned before the first line.
    pub fn new(content: &'a str) -> Self {
        Self {
            lines: content.lines().collect(),
            pos: 0,
        }
    }

    /// Returns the next line, `None` at end of file.
    pub fn next_line(&mut self) -> Option<&'a str> {
        let line = self.lines.get(self.pos).copied();
        if line.is_some() {
            self.pos += 1;
        }
        line
    }

    /// Discards up to `n` lines.
    pub fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.lines.len());
    }

    /// 1-based number of the line returned last.
    pub fn line_number(&self) -> usize {
        self.pos
    }

    /// Next line, or a parse error naming the section being read.
    pub fn expect_line(&mut self, section: &str) -> Result<&'a str> {
        self.next_line()
            .ok_or_else(|| QCError::parse(format!("Unexpected end of file inside {}", section)))
    }
}

/// Reads a whole log, mapping a missing file to [`QCError::MissingArtifact`].
pub fn read_log(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(QCError::MissingArtifact(path.to_path_buf()));
    }
    Ok(fs::read_to_string(path)?)
}

/// Parses a float token, reporting the line it came from on failure.
pub(crate) fn parse_f64(token: &str, line: &str) -> Result<f64> {
    token
        .trim()
        .parse::<f64>()
        .map_err(|_| QCError::parse(format!("Cannot read number '{}' in line '{}'", token, line.trim())))
}

/// Parses an integer token, reporting the line it came from on failure.
pub(crate) fn parse_usize(token: &str, line: &str) -> Result<usize> {
    token
        .trim()
        .parse::<usize>()
        .map_err(|_| QCError::parse(format!("Cannot read index '{}' in line '{}'", token, line.trim())))
}

/// Token at `idx` counted from the end (`1` is the last token).
pub(crate) fn token_from_end<'a>(line: &'a str, idx: usize) -> Result<&'a str> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if idx == 0 || idx > tokens.len() {
        return Err(QCError::parse(format!(
            "Line '{}' has fewer than {} fields",
            line.trim(),
            idx
        )));
    }
    Ok(tokens[tokens.len() - idx])
}

/// Token at zero-based `idx`.
pub(crate) fn token_at<'a>(line: &'a str, idx: usize) -> Result<&'a str> {
    line.split_whitespace().nth(idx).ok_or_else(|| {
        QCError::parse(format!("Line '{}' has no field {}", line.trim(), idx))
    })
}
