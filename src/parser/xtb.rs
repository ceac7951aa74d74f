//! xTB output parser.
//!
//! xTB spreads its results over several files in the working directory:
//!
//! - `output.out` (captured stdout): energies and thermochemistry
//! - `output.err` (captured stderr): the termination message
//! - `charges`: one Mulliken charge per line
//! - `vibspectrum`: Turbomole style table of wavenumbers and IR intensities
//!
//! Energies are matched with regular expressions; the last match wins.

use super::{parse_f64, parse_usize, read_log, LineCursor, ParsedLog};
use crate::error::{QCError, Result};
use crate::properties::{Provenance, VibrationalData};
use lazy_static::lazy_static;
use log::{error, warn};
use regex::Regex;
use std::fs;
use std::path::Path;

/// Captured standard output of an xTB run.
pub const XTB_LOG_FILE: &str = "output.out";
/// Captured standard error of an xTB run.
pub const XTB_ERR_FILE: &str = "output.err";
/// Optimized geometry written by `--opt` / `--ohess`.
pub const XTB_OPT_GEOMETRY: &str = "xtbopt.xyz";

const SUCCESS_MARKER: &str = "normal termination of xtb";
const FAILURE_MARKER: &str = "abnormal termination of xtb";

/// Advisory emitted for every negative wavenumber.
pub const IMAGINARY_MODE_ADVISORY: &str = "Imaginary mode detected in frequency analysis.";

lazy_static! {
    static ref FLOAT_RE: String = r"[-+]?(?:\d+\.\d*|\.\d+)(?:[eE][-+]?\d+)?".to_string();
    static ref TOTAL_ENERGY_RE: Regex =
        Regex::new(&format!(r"TOTAL ENERGY\s+({})\s+Eh", *FLOAT_RE)).unwrap();
    static ref FREE_ENERGY_RE: Regex =
        Regex::new(&format!(r"TOTAL FREE ENERGY\s+({})\s+Eh", *FLOAT_RE)).unwrap();
    static ref GRRHO_RE: Regex =
        Regex::new(&format!(r"G\(RRHO\) contrib\.\s+({})\s+Eh", *FLOAT_RE)).unwrap();
}

/// Parser for the files of one xTB run.
#[derive(Debug, Clone)]
pub struct XtbLogParser {
    source: Provenance,
}

impl XtbLogParser {
    /// Creates a parser recording `source` as provenance.
    pub fn new(source: Provenance) -> Self {
        Self { source }
    }

    /// Parses every result file found in `dir`.
    ///
    /// # Errors
    ///
    /// - [`QCError::MissingArtifact`] if `output.out` does not exist
    /// - [`QCError::AbnormalTermination`] if neither stdout nor stderr report
    ///   a normal termination
    /// - [`QCError::ParseInconsistency`] if the free energy cannot be rebuilt
    ///   from the energy and the G(RRHO) contribution
    pub fn parse_dir(&self, dir: &Path) -> Result<ParsedLog> {
        let log_path = dir.join(XTB_LOG_FILE);
        let log = read_log(&log_path)?;
        let err = fs::read_to_string(dir.join(XTB_ERR_FILE)).unwrap_or_default();

        check_termination(&log, &err, &log_path)?;
        let mut parsed = self.parse_log(&log)?;

        let charges_path = dir.join("charges");
        if charges_path.is_file() {
            let charges = parse_charges(&fs::read_to_string(&charges_path)?)?;
            parsed
                .properties
                .set_mulliken_spin_populations(vec![0.0; charges.len()], &self.source);
            parsed.properties.set_mulliken_charges(charges, &self.source);
        }

        let spectrum_path = dir.join("vibspectrum");
        if spectrum_path.is_file() {
            let vib =
                parse_vibspectrum(&fs::read_to_string(&spectrum_path)?, &mut parsed.advisories)?;
            parsed.properties.set_vibrational_data(vib, &self.source);
        }

        Ok(parsed)
    }

    /// Reads energies from the captured standard output.
    pub fn parse_log(&self, content: &str) -> Result<ParsedLog> {
        let mut electronic_energy = None;
        let mut correction = None;
        let mut free_energy = None;

        for line in content.lines() {
            if let Some(caps) = FREE_ENERGY_RE.captures(line) {
                free_energy = Some(parse_f64(&caps[1], line)?);
            } else if let Some(caps) = TOTAL_ENERGY_RE.captures(line) {
                electronic_energy = Some(parse_f64(&caps[1], line)?);
            } else if let Some(caps) = GRRHO_RE.captures(line) {
                correction = Some(parse_f64(&caps[1], line)?);
            }
        }

        let mut parsed = ParsedLog::default();
        if let Some(e) = electronic_energy {
            parsed.properties.set_electronic_energy(e, &self.source);
        }
        if let Some(corr) = correction {
            parsed.properties.set_free_energy_correction(corr, &self.source);
        }
        if let Some(g) = free_energy {
            parsed.properties.check_gibbs_free_energy(g)?;
        }
        Ok(parsed)
    }
}

fn check_termination(log: &str, err: &str, log_path: &Path) -> Result<()> {
    let failed = log.contains(FAILURE_MARKER) || err.contains(FAILURE_MARKER);
    let finished = log.contains(SUCCESS_MARKER) || err.contains(SUCCESS_MARKER);
    if failed || !finished {
        error!("Error occurred during xTB calculation ({})", log_path.display());
        return Err(QCError::AbnormalTermination {
            engine: "xTB".to_string(),
            log: log_path.to_path_buf(),
        });
    }
    Ok(())
}

/// Reads the `charges` file, one value per non empty line.
pub fn parse_charges(content: &str) -> Result<Vec<f64>> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| parse_f64(line, line))
        .collect()
}

/// Reads a `vibspectrum` file.
///
/// Mode numbers in the file are 1-based; IR transitions are stored with
/// 0-based indices into the frequency list. Rows may carry a symmetry label
/// between the mode number and the wavenumber.
pub fn parse_vibspectrum(content: &str, advisories: &mut Vec<String>) -> Result<VibrationalData> {
    let mut vib = VibrationalData::default();
    let mut cursor = LineCursor::new(content);
    let mut in_table = false;

    while let Some(line) = cursor.next_line() {
        let trimmed = line.trim();
        if trimmed.starts_with("$vibrational spectrum") {
            in_table = true;
            continue;
        }
        if trimmed.starts_with("$end") {
            break;
        }
        if !in_table || trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() < 3 {
            return Err(QCError::parse(format!("Invalid vibspectrum row '{}'", trimmed)));
        }
        let mode = parse_usize(fields[0], line)?;
        // second column is a symmetry label when it is not numeric
        let offset = if fields[1].parse::<f64>().is_ok() { 1 } else { 2 };
        let (Some(freq), Some(intensity)) = (fields.get(offset), fields.get(offset + 1)) else {
            return Err(QCError::parse(format!("Invalid vibspectrum row '{}'", trimmed)));
        };
        let freq = parse_f64(freq, line)?;
        if freq < 0.0 {
            warn!("{}", IMAGINARY_MODE_ADVISORY);
            advisories.push(IMAGINARY_MODE_ADVISORY.to_string());
        }
        vib.frequencies.push(freq);
        vib.ir_transitions
            .push((mode.saturating_sub(1), parse_f64(intensity, line)?));
    }

    Ok(vib)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parser() -> XtbLogParser {
        XtbLogParser::new(Provenance::new("xTB", "GFN2-xTB | solvent: None"))
    }

    const SUMMARY: &str = "\
           -------------------------------------------------
          | TOTAL ENERGY               -5.070544440612 Eh   |
          | TOTAL FREE ENERGY          -5.059428436584 Eh   |
          | G(RRHO) contrib.            0.011116004028 Eh   |
           -------------------------------------------------
";

    #[test]
    fn test_energy_and_free_energy() {
        let parsed = parser().parse_log(SUMMARY).unwrap();
        assert_eq!(parsed.properties.electronic_energy(), Some(-5.070544440612));
        assert_eq!(parsed.properties.free_energy_correction(), Some(0.011116004028));
    }

    #[test]
    fn test_free_energy_mismatch() {
        let log = SUMMARY.replace("-5.059428436584", "-5.049428436584");
        let err = parser().parse_log(&log).unwrap_err();
        assert!(matches!(err, QCError::ParseInconsistency(_)));
    }

    #[test]
    fn test_termination_on_stderr() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(XTB_LOG_FILE), SUMMARY).unwrap();
        fs::write(dir.path().join(XTB_ERR_FILE), " * finished run\nnormal termination of xtb\n").unwrap();
        fs::write(dir.path().join("charges"), "  -0.56\n   0.28\n   0.28\n").unwrap();

        let parsed = parser().parse_dir(dir.path()).unwrap();
        assert_eq!(parsed.properties.mulliken_charges(), Some(&[-0.56, 0.28, 0.28][..]));
        assert_eq!(
            parsed.properties.mulliken_spin_populations(),
            Some(&[0.0, 0.0, 0.0][..])
        );
    }

    #[test]
    fn test_abnormal_termination_detected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(XTB_LOG_FILE), SUMMARY).unwrap();
        fs::write(dir.path().join(XTB_ERR_FILE), "abnormal termination of xtb\n").unwrap();
        let err = parser().parse_dir(dir.path()).unwrap_err();
        assert!(matches!(err, QCError::AbnormalTermination { .. }));
    }

    #[test]
    fn test_vibspectrum_with_symmetry_labels() {
        let content = "\
$vibrational spectrum
#  mode     symmetry     wave number   IR intensity    selection rules
#                         cm**(-1)      (km*mol⁻¹)        IR     RAMAN
     1                      -0.00         0.00000          -       -
     2        a            -45.30         1.00000         YES     YES
     3        a           1595.27        61.25391         YES     YES
$end
";
        let mut advisories = Vec::new();
        let vib = parse_vibspectrum(content, &mut advisories).unwrap();
        assert_eq!(vib.frequencies, vec![-0.0, -45.3, 1595.27]);
        assert_eq!(vib.ir_transitions[2], (2, 61.25391));
        assert_eq!(advisories.len(), 1);
    }
}
