//! DFTB+ output parser.
//!
//! DFTB+ has no positive termination message. A run is considered failed
//! when its captured output contains `ERROR!`. The total energy is the third
//! token of every `Total Energy:` line, and the last one wins.

use super::{parse_f64, read_log, token_at, ParsedLog};
use crate::error::{QCError, Result};
use crate::properties::Provenance;
use log::error;
use std::path::Path;

/// Captured standard output of a DFTB+ run.
pub const DFTB_LOG_FILE: &str = "output.out";
/// Final geometry of an MD or annealing run.
pub const DFTB_END_GEOMETRY: &str = "geo_end.xyz";
const FAILURE_MARKER: &str = "ERROR!";

/// Parser for `output.out` of a DFTB+ run.
#[derive(Debug, Clone)]
pub struct DftbLogParser {
    source: Provenance,
}

impl DftbLogParser {
    /// Creates a parser recording `source` as provenance.
    pub fn new(source: Provenance) -> Self {
        Self { source }
    }

    /// Reads and parses the log at `path`.
    pub fn parse_file(&self, path: &Path) -> Result<ParsedLog> {
        let content = read_log(path)?;
        self.parse_str(&content, path)
    }

    /// Parses log text; `log_path` is only used in error messages.
    pub fn parse_str(&self, content: &str, log_path: &Path) -> Result<ParsedLog> {
        if content.contains(FAILURE_MARKER) {
            error!("Error occurred during DFTB+ calculation ({})", log_path.display());
            return Err(QCError::AbnormalTermination {
                engine: "DFTB+".to_string(),
                log: log_path.to_path_buf(),
            });
        }

        let mut energy = None;
        for line in content.lines() {
            if line.trim_start().starts_with("Total Energy") {
                energy = Some(parse_f64(token_at(line, 2)?, line)?);
            }
        }

        let mut parsed = ParsedLog::default();
        if let Some(e) = energy {
            parsed.properties.set_electronic_energy(e, &self.source);
        }
        Ok(parsed)
    }
}
