//! ORCA `output.out` parser.
//!
//! Sections read (markers are literal substrings):
//!
//! | Marker | Content | Exit |
//! |---|---|---|
//! | `FINAL SINGLE POINT ENERGY` | electronic energy, last field | same line |
//! | `G-E(el)` | free energy correction, 4th field from the end | same line |
//! | `Final Gibbs free energy` | reported Gibbs energy, 2nd field from the end | same line |
//! | `MULLIKEN ATOMIC CHARGES` | charges, spins if the header says `SPIN` | `Sum of atomic charges` |
//! | `HIRSHFELD ANALYSIS` | charges and spins | blank line |
//! | `VIBRATIONAL FREQUENCIES` | wavenumbers | blank line |
//! | `NORMAL MODES` | displacement table, column blocks | 3N rows per block |
//! | `IR SPECTRUM` | `mode: freq eps Int ...` | blank line |
//! | `OVERTONES AND COMBINATION BANDS` | `a+b: freq eps Int ...` | blank line |
//! | `RAMAN SPECTRUM` | `mode: freq activity depolarization` | blank line |
//!
//! Population sections are printed after every optimization step, only the
//! last complete one is kept.

use super::{parse_f64, parse_usize, read_log, token_at, token_from_end, LineCursor, ParsedLog};
use crate::error::{QCError, Result};
use crate::properties::{Provenance, VibrationalData};
use log::{debug, error, warn};
use nalgebra::DVector;
use std::path::Path;

/// Fixed name of the ORCA log inside a scratch directory.
pub const ORCA_LOG_FILE: &str = "output.out";

/// Success marker printed by ORCA at the very end of a run.
pub const TERMINATION_MARKER: &str = "****ORCA TERMINATED NORMALLY****";

/// Maximum number of mode columns per block of the `NORMAL MODES` table.
pub const DEFAULT_MODE_COLUMNS: usize = 6;

/// Advisory emitted for every imaginary frequency.
pub const IMAGINARY_MODE_ADVISORY: &str = "Imaginary mode detected in frequency analysis.";

const IMAGINARY_SUFFIX: &str = "***imaginary mode***";

/// Parser for ORCA logs of one molecule.
#[derive(Debug, Clone)]
pub struct OrcaLogParser {
    num_atoms: usize,
    mode_columns: usize,
    source: Provenance,
}

impl OrcaLogParser {
    /// Creates a parser for a molecule with `num_atoms` atoms.
    ///
    /// `source` is recorded as the provenance of every parsed value.
    pub fn new(num_atoms: usize, source: Provenance) -> Self {
        Self {
            num_atoms,
            mode_columns: DEFAULT_MODE_COLUMNS,
            source,
        }
    }

    /// Overrides the number of mode columns per normal mode block.
    pub fn with_mode_columns(mut self, columns: usize) -> Self {
        self.mode_columns = columns.max(1);
        self
    }

    /// Parses the log at `path`.
    ///
    /// # Errors
    ///
    /// - [`QCError::MissingArtifact`] if the file does not exist
    /// - [`QCError::AbnormalTermination`] if the success marker is absent
    /// - [`QCError::Parse`] if a recognised section cannot be read
    /// - [`QCError::ParseInconsistency`] if the Gibbs energy cannot be
    ///   reconstructed or mode and frequency counts disagree
    pub fn parse_file(&self, path: &Path) -> Result<ParsedLog> {
        let content = read_log(path)?;
        self.parse_str(&content, path)
    }

    /// Parses log content; `log_path` is only used in error messages.
    pub fn parse_str(&self, content: &str, log_path: &Path) -> Result<ParsedLog> {
        if !content.contains(TERMINATION_MARKER) {
            error!("Error occurred during ORCA calculation ({})", log_path.display());
            return Err(QCError::AbnormalTermination {
                engine: "ORCA".to_string(),
                log: log_path.to_path_buf(),
            });
        }

        let mut parsed = ParsedLog::default();
        let mut electronic_energy = None;
        let mut free_energy_correction = None;
        let mut gibbs_free_energy = None;
        let mut mulliken: Option<(Vec<f64>, Vec<f64>)> = None;
        let mut hirshfeld: Option<(Vec<f64>, Vec<f64>)> = None;
        let mut vibrational: Option<VibrationalData> = None;

        let mut cursor = LineCursor::new(content);
        while let Some(line) = cursor.next_line() {
            if line.contains("FINAL SINGLE POINT ENERGY") {
                electronic_energy = Some(parse_f64(token_from_end(line, 1)?, line)?);
            } else if line.contains("G-E(el)") {
                free_energy_correction = Some(parse_f64(token_from_end(line, 4)?, line)?);
            } else if line.contains("Final Gibbs free energy") {
                gibbs_free_energy = Some(parse_f64(token_from_end(line, 2)?, line)?);
            } else if line.contains("MULLIKEN ATOMIC CHARGES") {
                if let Some(section) = read_mulliken(&mut cursor, line)? {
                    mulliken = Some(section);
                }
            } else if line.contains("HIRSHFELD ANALYSIS") {
                let section = read_hirshfeld(&mut cursor)?;
                if !section.0.is_empty() {
                    hirshfeld = Some(section);
                }
            } else if line.contains("VIBRATIONAL FREQUENCIES") {
                let mut vib = VibrationalData::default();
                read_frequencies(&mut cursor, &mut vib, &mut parsed.advisories)?;
                vibrational = Some(vib);
            } else if line.contains("NORMAL MODES") {
                let vib = section_target(&mut vibrational, "NORMAL MODES")?;
                self.read_normal_modes(&mut cursor, vib)?;
            } else if line.contains("IR SPECTRUM") {
                let vib = section_target(&mut vibrational, "IR SPECTRUM")?;
                read_ir_spectrum(&mut cursor, vib)?;
            } else if line.contains("OVERTONES AND COMBINATION BANDS") {
                let vib = section_target(&mut vibrational, "OVERTONES AND COMBINATION BANDS")?;
                read_combination_bands(&mut cursor, vib)?;
            } else if line.contains("RAMAN SPECTRUM") {
                let vib = section_target(&mut vibrational, "RAMAN SPECTRUM")?;
                read_raman_spectrum(&mut cursor, vib)?;
            }
        }

        let props = &mut parsed.properties;
        if let Some(e) = electronic_energy {
            props.set_electronic_energy(e, &self.source);
        }
        if let Some(corr) = free_energy_correction {
            props.set_free_energy_correction(corr, &self.source);
        }
        if let Some(gibbs) = gibbs_free_energy {
            props.check_gibbs_free_energy(gibbs)?;
        }
        if let Some((charges, spins)) = mulliken {
            props.set_mulliken_charges(charges, &self.source);
            props.set_mulliken_spin_populations(spins, &self.source);
        }
        if let Some((charges, spins)) = hirshfeld {
            props.set_hirshfeld_charges(charges, &self.source);
            props.set_hirshfeld_spin_populations(spins, &self.source);
        }
        if let Some(vib) = vibrational {
            vib.validate(self.num_atoms)?;
            debug!(
                "Read {} frequencies and {} normal modes",
                vib.frequencies.len(),
                vib.normal_modes.len()
            );
            props.set_vibrational_data(vib, &self.source);
        }

        Ok(parsed)
    }

    fn read_normal_modes(&self, cursor: &mut LineCursor, vib: &mut VibrationalData) -> Result<()> {
        cursor.skip(6);
        let ncoords = 3 * self.num_atoms;
        let mut block = 0;
        loop {
            // column header of the block
            if cursor.next_line().is_none() {
                break;
            }
            let read = self.mode_columns * block;
            if read >= ncoords {
                break;
            }
            let ncols = self.mode_columns.min(ncoords - read);

            let mut buffers = vec![Vec::with_capacity(ncoords); ncols];
            for _ in 0..ncoords {
                let row = cursor.expect_line("NORMAL MODES")?;
                for (i, token) in row.split_whitespace().skip(1).enumerate() {
                    let column = buffers.get_mut(i).ok_or_else(|| {
                        QCError::parse(format!(
                            "Normal mode row with more than {} columns: '{}'",
                            ncols,
                            row.trim()
                        ))
                    })?;
                    column.push(parse_f64(token, row)?);
                }
            }
            vib.normal_modes
                .extend(buffers.into_iter().map(DVector::from_vec));
            block += 1;
        }
        Ok(())
    }
}

fn section_target<'v>(
    vibrational: &'v mut Option<VibrationalData>,
    section: &str,
) -> Result<&'v mut VibrationalData> {
    vibrational.as_mut().ok_or_else(|| {
        QCError::ParseInconsistency(format!(
            "{} section found before VIBRATIONAL FREQUENCIES",
            section
        ))
    })
}

/// Reads one Mulliken section; `None` if the file ends before the
/// `Sum of atomic charges` line.
fn read_mulliken(cursor: &mut LineCursor, header: &str) -> Result<Option<(Vec<f64>, Vec<f64>)>> {
    let spin_available = header.contains("SPIN");
    cursor.skip(1);

    let mut charges = Vec::new();
    let mut spins = Vec::new();
    while let Some(row) = cursor.next_line() {
        if row.contains("Sum of atomic charges") {
            return Ok(Some((charges, spins)));
        }
        let cleaned = row.replace(':', " ");
        charges.push(parse_f64(token_at(&cleaned, 2)?, row)?);
        spins.push(if spin_available {
            parse_f64(token_at(&cleaned, 3)?, row)?
        } else {
            0.0
        });
    }
    Ok(None)
}

fn read_hirshfeld(cursor: &mut LineCursor) -> Result<(Vec<f64>, Vec<f64>)> {
    cursor.skip(6);
    let mut charges = Vec::new();
    let mut spins = Vec::new();
    while let Some(row) = cursor.next_line() {
        if row.trim().is_empty() || row.contains("TOTAL") {
            break;
        }
        charges.push(parse_f64(token_at(row, 2)?, row)?);
        spins.push(match row.split_whitespace().nth(3) {
            Some(token) => parse_f64(token, row)?,
            None => 0.0,
        });
    }
    Ok((charges, spins))
}

fn read_frequencies(
    cursor: &mut LineCursor,
    vib: &mut VibrationalData,
    advisories: &mut Vec<String>,
) -> Result<()> {
    cursor.skip(4);
    while let Some(row) = cursor.next_line() {
        if row.trim().is_empty() {
            break;
        }
        let mut value = row.rsplit(':').next().unwrap_or(row).trim();
        if let Some(stripped) = value.strip_suffix(IMAGINARY_SUFFIX) {
            warn!("{}", IMAGINARY_MODE_ADVISORY);
            advisories.push(IMAGINARY_MODE_ADVISORY.to_string());
            value = stripped.trim();
        }
        let value = value.trim_end_matches("cm**-1").trim();
        vib.frequencies.push(parse_f64(value, row)?);
    }
    Ok(())
}

/// Splits a table row into the mode field before the colon and the data
/// fields after it.
fn split_mode_row(row: &str) -> Result<(&str, Vec<&str>)> {
    let (mode, data) = row
        .split_once(':')
        .ok_or_else(|| QCError::parse(format!("Missing ':' in spectrum row '{}'", row.trim())))?;
    Ok((mode.trim(), data.split_whitespace().collect()))
}

fn field<'a>(fields: &[&'a str], idx: usize, row: &str) -> Result<&'a str> {
    fields
        .get(idx)
        .copied()
        .ok_or_else(|| QCError::parse(format!("Spectrum row '{}' has no field {}", row.trim(), idx)))
}

fn read_ir_spectrum(cursor: &mut LineCursor, vib: &mut VibrationalData) -> Result<()> {
    cursor.skip(5);
    while let Some(row) = cursor.next_line() {
        if row.trim().is_empty() {
            break;
        }
        let (mode, fields) = split_mode_row(row)?;
        vib.ir_transitions.push((
            parse_usize(mode, row)?,
            parse_f64(field(&fields, 2, row)?, row)?,
        ));
    }
    Ok(())
}

fn read_combination_bands(cursor: &mut LineCursor, vib: &mut VibrationalData) -> Result<()> {
    cursor.skip(5);
    while let Some(row) = cursor.next_line() {
        if row.trim().is_empty() {
            break;
        }
        let (modes, fields) = split_mode_row(row)?;
        let (a, b) = modes
            .split_once('+')
            .ok_or_else(|| QCError::parse(format!("Missing '+' in combination band '{}'", row.trim())))?;
        vib.ir_combination_bands.push((
            parse_usize(a, row)?,
            parse_usize(b, row)?,
            parse_f64(field(&fields, 2, row)?, row)?,
        ));
    }
    Ok(())
}

fn read_raman_spectrum(cursor: &mut LineCursor, vib: &mut VibrationalData) -> Result<()> {
    cursor.skip(4);
    while let Some(row) = cursor.next_line() {
        if row.trim().is_empty() {
            break;
        }
        let (mode, fields) = split_mode_row(row)?;
        vib.raman_transitions.push((
            parse_usize(mode, row)?,
            parse_f64(field(&fields, 1, row)?, row)?,
            parse_f64(field(&fields, 2, row)?, row)?,
        ));
    }
    Ok(())
}

/// Relaxed scan energies from the "The Calculated Surface using the SCF
/// energy" table, in scan order.
pub fn parse_scan_energies(content: &str) -> Result<Vec<f64>> {
    let mut energies = Vec::new();
    let mut cursor = LineCursor::new(content);
    while let Some(line) = cursor.next_line() {
        if line.contains("The Calculated Surface using the SCF energy") {
            while let Some(row) = cursor.next_line() {
                let fields: Vec<&str> = row.split_whitespace().collect();
                if fields.len() != 2 {
                    break;
                }
                energies.push(parse_f64(fields[1], row)?);
            }
            break;
        }
    }
    Ok(energies)
}

/// Solvation free energy (`dGsolv`, Hartree) printed by an OpenCOSMO-RS run.
pub fn parse_solvation_free_energy(content: &str) -> Result<Option<f64>> {
    let mut value = None;
    for line in content.lines() {
        if line.contains("Free energy of solvation (dGsolv)") {
            value = Some(parse_f64(token_from_end(line, 4)?, line)?);
        }
    }
    Ok(value)
}

/// Frame index of a scan geometry file `input.NNN.xyz`.
///
/// `input.xyz`, `input_trj.xyz` and refined frames (`input.NNN.refined.xyz`)
/// are not scan frames.
pub fn scan_frame_index(file_name: &str) -> Option<usize> {
    let stem = file_name.strip_prefix("input.")?.strip_suffix(".xyz")?;
    if stem.is_empty() || !stem.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}
