//! Report side-channel.
//!
//! After each calculation the engine log is copied to
//! `{dir}/{name}_{charge}_{spin}_{suffix}_{calc}.out` and one line is
//! appended to `{dir}/{name}.summary`. Cube files can be collected alongside.

use crate::error::Result;
use crate::molecule::Molecule;
use crate::settings::SettingsManager;
use log::debug;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writes logs and summaries to the report directory.
#[derive(Debug, Clone)]
pub struct Reporter {
    dir: PathBuf,
    enabled: bool,
}

impl Reporter {
    /// Creates a reporter writing into `dir`.
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            dir: dir.into(),
            enabled,
        }
    }

    /// Creates a reporter from the `[report]` settings.
    pub fn from_settings(settings: &SettingsManager) -> Self {
        Self::new(&settings.report().directory, settings.report().enabled)
    }

    /// A reporter that writes nothing.
    pub fn disabled() -> Self {
        Self::new("", false)
    }

    /// Report directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Records one finished calculation.
    ///
    /// `log` is the engine log inside the scratch directory; when
    /// `cubes_from` is set, every `*.cube` file found there is copied too.
    pub fn record(
        &self,
        mol: &Molecule,
        suffix: &str,
        calc: &str,
        log: &Path,
        cubes_from: Option<&Path>,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)?;

        let stem = format!("{}_{}_{}_{}_{}", mol.name, mol.charge, mol.spin, suffix, calc);
        if log.is_file() {
            let target = self.dir.join(format!("{}.out", stem));
            fs::copy(log, &target)?;
            debug!("Copied {} to {}", log.display(), target.display());
        }

        if let Some(dir) = cubes_from {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|ext| ext == "cube") {
                    if let Some(file_name) = path.file_name() {
                        let target = self
                            .dir
                            .join(format!("{}_{}", stem, file_name.to_string_lossy()));
                        fs::copy(&path, target)?;
                    }
                }
            }
        }

        let mut summary = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(format!("{}.summary", mol.name)))?;
        writeln!(summary, "{}", summary_line(mol, suffix, calc))?;
        Ok(())
    }
}

/// One human-readable summary line.
pub fn summary_line(mol: &Molecule, suffix: &str, calc: &str) -> String {
    let mut line = format!(
        "{:<8} {} | charge {} spin {}",
        calc, suffix, mol.charge, mol.spin
    );
    if let Some(e) = mol.properties.electronic_energy() {
        line.push_str(&format!(" | E_el {:.8} Eh", e));
    }
    if let Some(g) = mol.properties.gibbs_free_energy() {
        line.push_str(&format!(" | G {:.8} Eh", g));
    }
    if !mol.flags.is_empty() {
        line.push_str(&format!(" | flags: {}", mol.flags.join("; ")));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::properties::Provenance;
    use tempfile::TempDir;

    fn hydrogen() -> Molecule {
        let geometry = Geometry::new(
            vec!["H".to_string(), "H".to_string()],
            vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.74],
        )
        .unwrap();
        Molecule::new("h2", geometry, 0, 1).unwrap()
    }

    #[test]
    fn test_record_copies_log_and_appends_summary() {
        let scratch = TempDir::new().unwrap();
        let report = TempDir::new().unwrap();
        let log = scratch.path().join("output.out");
        fs::write(&log, "****ORCA TERMINATED NORMALLY****\n").unwrap();
        fs::write(scratch.path().join("input.eldens.cube"), "cube").unwrap();

        let mut mol = hydrogen();
        mol.properties
            .set_electronic_energy(-1.17, &Provenance::new("ORCA", "PBE"));
        let reporter = Reporter::new(report.path(), true);
        reporter
            .record(&mol, "orca_PBE", "spe", &log, Some(scratch.path()))
            .unwrap();
        reporter.record(&mol, "orca_PBE", "opt", &log, None).unwrap();

        assert!(report.path().join("h2_0_1_orca_PBE_spe.out").is_file());
        assert!(report.path().join("h2_0_1_orca_PBE_spe_input.eldens.cube").is_file());
        let summary = fs::read_to_string(report.path().join("h2.summary")).unwrap();
        assert_eq!(summary.lines().count(), 2);
        assert!(summary.contains("E_el -1.17000000 Eh"));
    }

    #[test]
    fn test_disabled_reporter_writes_nothing() {
        let report = TempDir::new().unwrap();
        let target = report.path().join("reports");
        Reporter::new(&target, false)
            .record(&hydrogen(), "xtb", "spe", Path::new("missing.out"), None)
            .unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn test_summary_line_flags() {
        let mut mol = hydrogen();
        mol.add_flag("Conformer search failed.");
        let line = summary_line(&mol, "crest", "conf");
        assert!(line.starts_with("conf"));
        assert!(line.ends_with("flags: Conformer search failed."));
    }
}
