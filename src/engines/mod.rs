//! Engine facades.
//!
//! A facade is the only component with process and filesystem side effects.
//! For every calculation type it runs the same sequence:
//!
//! 1. build the engine input from the call options and engine defaults,
//! 2. create a scratch directory and write the input and coordinates there,
//! 3. run the engine and wait for it,
//! 4. parse the log into a fresh [`crate::properties::PropertySet`],
//! 5. hand the results back, either by updating the caller's molecule
//!    (`inplace`) or as a new molecule,
//! 6. record the run in the report directory and drop or keep the scratch
//!    directory.
//!
//! A failure at any step returns before step 5, so an in-place call never
//! leaves a half-updated molecule behind.
//!
//! Facades:
//!
//! - [`orca::OrcaEngine`]: DFT and wavefunction methods, scans, NEB, COSMO-RS
//! - [`xtb::XtbEngine`]: GFN tight-binding single points, optimizations, Hessians
//! - [`dftbplus::DftbEngine`]: periodic DFTB single points, optimizations and MD

pub mod dftbplus;
pub mod orca;
pub mod xtb;

use crate::error::Result;
use crate::job::available_cores;
use crate::molecule::Molecule;
use crate::properties::Provenance;
use crate::report::Reporter;
use crate::scratch::ScratchDir;
use crate::settings::SettingsManager;
use std::time::Duration;

/// Options shared by every calculation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// Core count, `None` uses the configured default
    pub ncores: Option<usize>,
    /// Memory per core in MB, `None` uses the configured default
    pub maxcore: Option<u32>,
    /// Update the given molecule instead of returning a new one
    pub inplace: bool,
    /// Remove the scratch directory, `None` uses the configured policy
    pub remove_tdir: Option<bool>,
}

impl RunOptions {
    /// Default options with `inplace` set.
    pub fn inplace() -> Self {
        Self {
            inplace: true,
            ..Self::default()
        }
    }
}

/// Settings and report sink shared by the facades.
#[derive(Debug, Clone)]
pub struct EngineContext {
    settings: SettingsManager,
    reporter: Reporter,
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new(SettingsManager::default())
    }
}

impl EngineContext {
    /// Creates a context reporting as configured in `settings`.
    pub fn new(settings: SettingsManager) -> Self {
        let reporter = Reporter::from_settings(&settings);
        Self { settings, reporter }
    }

    /// Replaces the report sink.
    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Loaded settings.
    pub fn settings(&self) -> &SettingsManager {
        &self.settings
    }

    /// Report sink.
    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Effective core count for a call.
    pub fn ncores(&self, run: &RunOptions) -> usize {
        match run.ncores.unwrap_or(self.settings.general().default_ncores) {
            0 => available_cores(),
            n => n,
        }
    }

    /// Effective memory per core for a call.
    pub fn maxcore(&self, run: &RunOptions) -> u32 {
        run.maxcore
            .unwrap_or(self.settings.general().default_maxcore)
    }

    /// Engine wall time limit.
    pub fn timeout(&self) -> Option<Duration> {
        self.settings.timeout()
    }

    /// Creates the scratch directory `{name}_XXXXXX_{suffix}_{calc}`.
    pub fn scratch(&self, name: &str, suffix: &str, calc: &str, run: &RunOptions) -> Result<ScratchDir> {
        let remove = run
            .remove_tdir
            .unwrap_or(self.settings.scratch().remove_tdir);
        let base = self.settings.scratch_base();
        std::fs::create_dir_all(&base)?;
        ScratchDir::create(&base, name, suffix, calc, remove)
    }
}

/// Operations every facade offers.
pub trait Engine {
    /// Engine name used in provenance and log messages, e.g. `ORCA`.
    fn name(&self) -> &str;

    /// Method keyword.
    fn method(&self) -> &str;

    /// Human-readable level of theory recorded as provenance.
    fn level_of_theory(&self) -> String;

    /// Suffix used for scratch directories and report files.
    fn output_suffix(&self) -> String;

    /// Provenance attached to every property this engine produces.
    fn provenance(&self) -> Provenance {
        Provenance::new(self.name(), self.level_of_theory())
    }

    /// Single point energy.
    ///
    /// Returns the new molecule, or `None` when `run.inplace` updated `mol`.
    fn spe(&self, mol: &mut Molecule, run: &RunOptions) -> Result<Option<Molecule>>;

    /// Geometry optimization.
    ///
    /// Returns the new molecule, or `None` when `run.inplace` updated `mol`.
    fn opt(&self, mol: &mut Molecule, run: &RunOptions) -> Result<Option<Molecule>>;
}

/// Hands a finished result back: replaces `mol` when `inplace`, otherwise
/// returns it.
pub(crate) fn deliver(mol: &mut Molecule, result: Molecule, inplace: bool) -> Option<Molecule> {
    if inplace {
        *mol = result;
        None
    } else {
        Some(result)
    }
}

/// Copies advisories raised while rendering or parsing onto the molecule.
pub(crate) fn annotate(mol: &mut Molecule, advisories: Vec<String>) {
    for advisory in advisories {
        mol.add_flag(advisory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::settings::Settings;

    fn helium(name: &str) -> Molecule {
        let geometry = Geometry::new(vec!["He".to_string()], vec![0.0, 0.0, 0.0]).unwrap();
        Molecule::new(name, geometry, 0, 1).unwrap()
    }

    #[test]
    fn test_resource_resolution() {
        let mut settings = Settings::default();
        settings.general.default_ncores = 3;
        settings.general.default_maxcore = 1200;
        let ctx = EngineContext::new(SettingsManager::from_settings(settings));

        assert_eq!(ctx.ncores(&RunOptions::default()), 3);
        assert_eq!(ctx.maxcore(&RunOptions::default()), 1200);
        let run = RunOptions {
            ncores: Some(8),
            maxcore: Some(500),
            ..RunOptions::default()
        };
        assert_eq!(ctx.ncores(&run), 8);
        assert_eq!(ctx.maxcore(&run), 500);
    }

    #[test]
    fn test_deliver() {
        let mut mol = helium("a");
        let returned = deliver(&mut mol, helium("b"), false).unwrap();
        assert_eq!(returned.name, "b");
        assert_eq!(mol.name, "a");

        assert!(deliver(&mut mol, helium("c"), true).is_none());
        assert_eq!(mol.name, "c");
    }
}
