//! CREST conformer, tautomer and protomer searches.
//!
//! Each search writes `geom.xyz`, runs
//! `crest geom.xyz [--alpb S] --chrg C --uhf S-1 <mode flags> [optionals] -T N`
//! and splits the resulting multi-frame XYZ file into an [`Ensemble`].
//! Frame energies come from the XYZ comment lines.
//!
//! Structures whose ring count differs from the input are dropped and the
//! input molecule is flagged. Missing result files are advisories, not
//! errors:
//!
//! | Search | Result file | Members | On missing file |
//! |---|---|---|---|
//! | conformers | `crest_conformers.xyz` | `{name}_c{i}` | flag, ensemble of the input |
//! | tautomers | `tautomers.xyz` | `{name}_t{i}` | flag, ensemble of the input |
//! | deprotomers | `deprotonated.xyz` | `{name}_d{i}`, charge - 1 | flag, `None` |
//! | protomers | `protonated.xyz` | `{name}_p{i}`, charge + 1 | flag, `None` |
//!
//! Quantum cluster growth (QCG) wraps a solute in explicit solvent
//! molecules: [`Crest::qcg_grow`] returns the grown cluster read from
//! `grow/cluster.xyz` and [`Crest::qcg_ensemble`] the cluster ensemble
//! `ensemble/{choice}.xyz` with members `{name}_e{i}`. Both flag the solute
//! with "Cluster growth failed." and return `None` when CREST leaves no
//! result file.

use crate::engines::xtb::XtbMethod;
use crate::engines::{EngineContext, RunOptions};
use crate::error::Result;
use crate::io::{self, clean_suffix};
use crate::molecule::{split_multixyz, Ensemble, Molecule};
use crate::properties::Provenance;
use crate::runner::{resolve_executable, EngineCommand};
use crate::scratch::ScratchDir;
use log::{debug, error, info, warn};

const GEOMETRY_FILE: &str = "geom.xyz";
const LOG_FILE: &str = "output.out";
const SOLUTE_FILE: &str = "solute.xyz";
const SOLVENT_FILE: &str = "solvent.xyz";
const CLUSTER_FILE: &str = "grow/cluster.xyz";
const CLUSTER_FAILED: &str = "Cluster growth failed.";

/// Kind of CREST search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrestMode {
    /// Conformer search (`--mquick`)
    Conformers,
    /// Tautomer search (`--mquick --fstrict --tautomerize`)
    Tautomers,
    /// Deprotomer search (`--deprotonate --fstrict`)
    Deprotomers,
    /// Protomer search (`--protonate --fstrict`)
    Protomers,
}

impl CrestMode {
    /// Mode specific command line flags.
    pub fn flags(&self) -> &'static [&'static str] {
        match self {
            CrestMode::Conformers => &["--mquick"],
            CrestMode::Tautomers => &["--mquick", "--fstrict", "--tautomerize"],
            CrestMode::Deprotomers => &["--deprotonate", "--fstrict"],
            CrestMode::Protomers => &["--protonate", "--fstrict"],
        }
    }

    /// Multi-frame XYZ file holding the results.
    pub fn result_file(&self) -> &'static str {
        match self {
            CrestMode::Conformers => "crest_conformers.xyz",
            CrestMode::Tautomers => "tautomers.xyz",
            CrestMode::Deprotomers => "deprotonated.xyz",
            CrestMode::Protomers => "protonated.xyz",
        }
    }

    /// Member name suffix.
    pub fn member_suffix(&self) -> &'static str {
        match self {
            CrestMode::Conformers => "c",
            CrestMode::Tautomers => "t",
            CrestMode::Deprotomers => "d",
            CrestMode::Protomers => "p",
        }
    }

    /// Charge change of the members with respect to the input.
    pub fn charge_shift(&self) -> i32 {
        match self {
            CrestMode::Deprotomers => -1,
            CrestMode::Protomers => 1,
            _ => 0,
        }
    }

    /// Plural label used in reports.
    pub fn label(&self) -> &'static str {
        match self {
            CrestMode::Conformers => "conformers",
            CrestMode::Tautomers => "tautomers",
            CrestMode::Deprotomers => "deprotomers",
            CrestMode::Protomers => "protomers",
        }
    }

    fn singular(&self) -> &'static str {
        match self {
            CrestMode::Conformers => "Conformer",
            CrestMode::Tautomers => "Tautomer",
            CrestMode::Deprotomers => "Deprotomer",
            CrestMode::Protomers => "Protomer",
        }
    }

    fn scratch_tag(&self) -> &'static str {
        match self {
            CrestMode::Conformers => "CONF",
            CrestMode::Tautomers => "TAUT",
            CrestMode::Deprotomers => "DEPROT",
            CrestMode::Protomers => "PROT",
        }
    }
}

/// Ensemble file kept from a QCG ensemble run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QcgEnsembleChoice {
    /// `ensemble/full_ensemble.xyz`
    #[default]
    FullEnsemble,
    /// `ensemble/final_ensemble.xyz`
    FinalEnsemble,
    /// `ensemble/crest_best.xyz`
    CrestBest,
}

impl QcgEnsembleChoice {
    /// Path of the ensemble file relative to the scratch directory.
    pub fn result_file(&self) -> &'static str {
        match self {
            QcgEnsembleChoice::FullEnsemble => "ensemble/full_ensemble.xyz",
            QcgEnsembleChoice::FinalEnsemble => "ensemble/final_ensemble.xyz",
            QcgEnsembleChoice::CrestBest => "ensemble/crest_best.xyz",
        }
    }
}

/// Options of a quantum cluster growth run.
#[derive(Debug, Clone)]
pub struct QcgOptions {
    /// Shared run options
    pub run: RunOptions,
    /// Hamiltonian of the growth optimizations
    pub method: XtbMethod,
    /// Solvent molecules to add; 0 lets CREST grow until convergence
    pub nsolv: u32,
    /// Total charge, defaults to the solute charge
    pub charge: Option<i32>,
    /// Total spin multiplicity, defaults to the solute spin
    pub spin: Option<u32>,
}

impl Default for QcgOptions {
    fn default() -> Self {
        Self {
            run: RunOptions::default(),
            method: XtbMethod::Gfn2,
            nsolv: 0,
            charge: None,
            spin: None,
        }
    }
}

/// Ensemble step of a QCG run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QcgEnsembleLevel {
    /// Hamiltonian of the ensemble optimizations (`--enslvl`)
    pub method: XtbMethod,
    /// Ensemble file to read
    pub choice: QcgEnsembleChoice,
}

impl Default for QcgEnsembleLevel {
    fn default() -> Self {
        Self {
            method: XtbMethod::Gfn2,
            choice: QcgEnsembleChoice::FullEnsemble,
        }
    }
}

/// CREST driver configuration.
#[derive(Debug, Clone, Default)]
pub struct Crest {
    solvent: Option<String>,
    optionals: String,
    ctx: EngineContext,
}

impl Crest {
    /// Creates a driver with an optional ALPB solvent and extra flags.
    pub fn new(solvent: Option<&str>, optionals: &str) -> Self {
        Self {
            solvent: solvent.filter(|s| !s.is_empty()).map(str::to_string),
            optionals: optionals.to_string(),
            ctx: EngineContext::default(),
        }
    }

    /// Replaces the settings and report context.
    pub fn with_context(mut self, ctx: EngineContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Provenance of the frame energies.
    pub fn provenance(&self) -> Provenance {
        Provenance::new(
            "CREST",
            format!(
                "GFN2-xTB | solvent: {}",
                self.solvent.as_deref().unwrap_or("None")
            ),
        )
    }

    fn output_suffix(&self) -> String {
        clean_suffix(&format!(
            "crest_{}",
            self.solvent.as_deref().unwrap_or("vacuum")
        ))
    }

    /// Command line arguments after the executable.
    pub fn arguments(&self, mol: &Molecule, mode: CrestMode, ncores: usize) -> Vec<String> {
        let mut args = vec![GEOMETRY_FILE.to_string()];
        if let Some(solvent) = &self.solvent {
            args.push("--alpb".to_string());
            args.push(solvent.clone());
        }
        args.push("--chrg".to_string());
        args.push(mol.charge.to_string());
        args.push("--uhf".to_string());
        args.push(mol.spin.saturating_sub(1).to_string());
        args.extend(mode.flags().iter().map(|f| f.to_string()));
        args.extend(self.optionals.split_whitespace().map(str::to_string));
        args.push("-T".to_string());
        args.push(ncores.to_string());
        args
    }

    /// Runs one search and returns the filtered members, or `None` when the
    /// result file was not produced.
    fn search(&self, mol: &mut Molecule, mode: CrestMode, run: &RunOptions) -> Result<Option<Vec<Molecule>>> {
        let ncores = self.ctx.ncores(run);
        debug!("Running CREST calculation on {} cores", ncores);

        let scratch = self.ctx.scratch(&mol.name, &self.output_suffix(), mode.scratch_tag(), run)?;
        io::write_xyz(&mol.geometry, &mol.name, &scratch.join(GEOMETRY_FILE))?;
        let exe = resolve_executable(&self.ctx.settings().executables().crest, "crest")?;
        EngineCommand::new("CREST", exe, scratch.path())
            .args(self.arguments(mol, mode, ncores))
            .stderr_append(scratch.join("output.err"))
            .timeout(self.ctx.timeout())
            .run()?;

        let result_path = scratch.join(mode.result_file());
        let members = if result_path.is_file() {
            let found = split_multixyz(
                mol,
                &result_path,
                mode.member_suffix(),
                mol.charge + mode.charge_shift(),
                &self.provenance(),
            )?;
            Some(drop_ring_changes(mol, found, mode))
        } else {
            None
        };

        self.finish(scratch, mol, mode)?;
        Ok(members)
    }

    fn finish(&self, scratch: ScratchDir, mol: &Molecule, mode: CrestMode) -> Result<()> {
        self.ctx
            .reporter()
            .record(mol, "CREST", mode.label(), &scratch.join(LOG_FILE), None)?;
        scratch.finish()?;
        Ok(())
    }

    /// Conformer search.
    ///
    /// A failed search flags `mol` and returns an ensemble holding only `mol`.
    pub fn conformer_search(&self, mol: &mut Molecule, run: &RunOptions) -> Result<Ensemble> {
        info!("{}, charge {} spin {} - CREST conformer search", mol.name, mol.charge, mol.spin);
        match self.search(mol, CrestMode::Conformers, run)? {
            Some(members) => Ok(Ensemble::new(members)),
            None => {
                error!(
                    "{}, charge {} spin {}, conformer search failed. Reverting to original molecule.",
                    mol.name, mol.charge, mol.spin
                );
                mol.add_flag("Conformer search failed.");
                Ok(Ensemble::new(vec![mol.clone()]))
            }
        }
    }

    /// Tautomer search.
    ///
    /// When no tautomers exist `mol` is flagged and returned as the only
    /// member.
    pub fn tautomer_search(&self, mol: &mut Molecule, run: &RunOptions) -> Result<Ensemble> {
        info!("{}, charge {} spin {} - CREST tautomer search", mol.name, mol.charge, mol.spin);
        match self.search(mol, CrestMode::Tautomers, run)? {
            Some(members) => Ok(Ensemble::new(members)),
            None => {
                warn!(
                    "No tautomers possible for {}, charge {} spin {}. Ignoring tautomer search.",
                    mol.name, mol.charge, mol.spin
                );
                mol.add_flag("No possible tautomers. Tautomer search was ignored.");
                Ok(Ensemble::new(vec![mol.clone()]))
            }
        }
    }

    /// Deprotomer search; members carry charge - 1.
    ///
    /// Returns `None` and flags `mol` when the search fails or every
    /// candidate was dropped.
    pub fn deprotonate(&self, mol: &mut Molecule, run: &RunOptions) -> Result<Option<Ensemble>> {
        info!("{}, charge {} spin {} - CREST deprotonation", mol.name, mol.charge, mol.spin);
        self.proton_search(mol, CrestMode::Deprotomers, run)
    }

    /// Protomer search; members carry charge + 1.
    ///
    /// Returns `None` and flags `mol` when the search fails or every
    /// candidate was dropped.
    pub fn protonate(&self, mol: &mut Molecule, run: &RunOptions) -> Result<Option<Ensemble>> {
        info!("{}, charge {} spin {} - CREST protonation", mol.name, mol.charge, mol.spin);
        self.proton_search(mol, CrestMode::Protomers, run)
    }

    fn proton_search(&self, mol: &mut Molecule, mode: CrestMode, run: &RunOptions) -> Result<Option<Ensemble>> {
        match self.search(mol, mode, run)? {
            Some(members) if !members.is_empty() => Ok(Some(Ensemble::new(members))),
            Some(_) => {
                error!(
                    "{}, charge {} spin {}, no suitable {} found.",
                    mol.name,
                    mol.charge,
                    mol.spin,
                    mode.label()
                );
                mol.add_flag(format!("No suitable {}.", mode.label()));
                Ok(None)
            }
            None => {
                let search = mode.singular().to_lowercase();
                error!(
                    "{}, charge {} spin {}, {} search failed.",
                    mol.name, mol.charge, mol.spin, search
                );
                mol.add_flag(format!("{} search failed.", mode.singular()));
                Ok(None)
            }
        }
    }
}

impl Crest {
    /// Command line arguments of a QCG run after the executable.
    pub fn qcg_arguments(
        &self,
        charge: i32,
        spin: u32,
        opts: &QcgOptions,
        ensemble: Option<&QcgEnsembleLevel>,
        ncores: usize,
    ) -> Vec<String> {
        let mut args = vec![
            SOLUTE_FILE.to_string(),
            "--qcg".to_string(),
            SOLVENT_FILE.to_string(),
            "--nsolv".to_string(),
            opts.nsolv.to_string(),
            format!("--{}", opts.method),
        ];
        if let Some(level) = ensemble {
            args.push("--ensemble".to_string());
            args.push("--enslvl".to_string());
            args.push(level.method.to_string());
        }
        if let Some(solvent) = &self.solvent {
            args.push("--alpb".to_string());
            args.push(solvent.clone());
        }
        args.push("--chrg".to_string());
        args.push(charge.to_string());
        args.push("--uhf".to_string());
        args.push(spin.saturating_sub(1).to_string());
        args.extend(self.optionals.split_whitespace().map(str::to_string));
        args.push("--T".to_string());
        args.push(ncores.to_string());
        args
    }

    fn qcg_run(
        &self,
        solute: &Molecule,
        solvent: &Molecule,
        opts: &QcgOptions,
        ensemble: Option<&QcgEnsembleLevel>,
        tag: &str,
    ) -> Result<ScratchDir> {
        let ncores = self.ctx.ncores(&opts.run);
        debug!("Running CREST calculation on {} cores", ncores);

        let scratch = self.ctx.scratch(&solute.name, &self.output_suffix(), tag, &opts.run)?;
        io::write_xyz(&solute.geometry, &solute.name, &scratch.join(SOLUTE_FILE))?;
        io::write_xyz(&solvent.geometry, &solvent.name, &scratch.join(SOLVENT_FILE))?;
        let exe = resolve_executable(&self.ctx.settings().executables().crest, "crest")?;
        EngineCommand::new("CREST", exe, scratch.path())
            .args(self.qcg_arguments(
                opts.charge.unwrap_or(solute.charge),
                opts.spin.unwrap_or(solute.spin),
                opts,
                ensemble,
                ncores,
            ))
            .stderr_append(scratch.join("output.err"))
            .timeout(self.ctx.timeout())
            .run()?;
        Ok(scratch)
    }

    fn cluster_failed(&self, solute: &mut Molecule) {
        error!(
            "{}, charge {} spin {}, cluster growth failed.",
            solute.name, solute.charge, solute.spin
        );
        solute.add_flag(CLUSTER_FAILED);
    }

    /// Grows a cluster of `solvent` molecules around `solute`.
    ///
    /// The cluster keeps the solute name and takes the charge and spin from
    /// the options, falling back to the solute.
    pub fn qcg_grow(
        &self,
        solute: &mut Molecule,
        solvent: &Molecule,
        opts: &QcgOptions,
    ) -> Result<Option<Molecule>> {
        let charge = opts.charge.unwrap_or(solute.charge);
        let spin = opts.spin.unwrap_or(solute.spin);
        info!(
            "{}, charge {} spin {} - CREST QCG GROW - {} solvent molecules",
            solute.name, charge, spin, opts.nsolv
        );

        let scratch = self.qcg_run(solute, solvent, opts, None, "QCG_G")?;
        let cluster_path = scratch.join(CLUSTER_FILE);
        let cluster = if cluster_path.is_file() {
            let mut cluster = Molecule::new(solute.name.clone(), io::read_xyz(&cluster_path)?, charge, spin)?;
            cluster.geometry_level_of_theory = Some(format!(
                "{} | solvent: {}",
                opts.method,
                self.solvent.as_deref().unwrap_or("None")
            ));
            Some(cluster)
        } else {
            self.cluster_failed(solute);
            None
        };

        self.ctx
            .reporter()
            .record(solute, "QCG", "grow", &scratch.join(LOG_FILE), None)?;
        scratch.finish()?;
        Ok(cluster)
    }

    /// Grows a cluster and samples its ensemble; members are named
    /// `{solute}_e{i}` and carry the frame energies.
    pub fn qcg_ensemble(
        &self,
        solute: &mut Molecule,
        solvent: &Molecule,
        opts: &QcgOptions,
        level: &QcgEnsembleLevel,
    ) -> Result<Option<Ensemble>> {
        let charge = opts.charge.unwrap_or(solute.charge);
        let spin = opts.spin.unwrap_or(solute.spin);
        info!(
            "{}, charge {} spin {} - CREST QCG ENSEMBLE - {} solvent molecules",
            solute.name, charge, spin, opts.nsolv
        );

        let scratch = self.qcg_run(solute, solvent, opts, Some(level), "QCG_E")?;
        let ensemble_path = scratch.join(level.choice.result_file());
        let ensemble = if ensemble_path.is_file() {
            let mut members = split_multixyz(solute, &ensemble_path, "e", charge, &self.provenance())?;
            for member in &mut members {
                member.spin = spin;
            }
            Some(Ensemble::new(members))
        } else {
            self.cluster_failed(solute);
            None
        };

        self.ctx
            .reporter()
            .record(solute, "QCG", "ensemble", &scratch.join(LOG_FILE), None)?;
        scratch.finish()?;
        Ok(ensemble)
    }
}

/// Drops members whose ring count differs from `reference`, flagging each
/// removal on `reference`.
pub fn drop_ring_changes(reference: &mut Molecule, members: Vec<Molecule>, mode: CrestMode) -> Vec<Molecule> {
    let rings = reference.geometry.ring_count();
    let mut kept = Vec::with_capacity(members.len());
    for member in members {
        if member.geometry.ring_count() != rings {
            warn!(
                "Cyclization change spotted for {}, charge {} spin {}. Removing from list.",
                member.name, reference.charge, reference.spin
            );
            reference.add_flag(format!(
                "Cyclization change occurred for {} during {} search. {} was removed.",
                member.name,
                mode.singular().to_lowercase(),
                mode.singular()
            ));
        } else {
            kept.push(member);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;

    fn propane(name: &str) -> Molecule {
        let geometry = Geometry::new(
            vec!["C".to_string(), "C".to_string(), "C".to_string()],
            vec![0.0, 0.0, 0.0, 1.54, 0.0, 0.0, 3.08, 0.0, 0.0],
        )
        .unwrap();
        Molecule::new(name, geometry, 0, 1).unwrap()
    }

    fn cyclopropane(name: &str) -> Molecule {
        let geometry = Geometry::new(
            vec!["C".to_string(), "C".to_string(), "C".to_string()],
            vec![0.0, 0.0, 0.0, 1.51, 0.0, 0.0, 0.755, 1.308, 0.0],
        )
        .unwrap();
        Molecule::new(name, geometry, 0, 1).unwrap()
    }

    #[test]
    fn test_arguments() {
        let crest = Crest::new(Some("water"), "--noreftopo");
        let args = crest.arguments(&propane("p"), CrestMode::Tautomers, 8);
        assert_eq!(
            args.join(" "),
            "geom.xyz --alpb water --chrg 0 --uhf 0 --mquick --fstrict --tautomerize --noreftopo -T 8"
        );

        let vacuum = Crest::default();
        let args = vacuum.arguments(&propane("p"), CrestMode::Deprotomers, 2);
        assert_eq!(args.join(" "), "geom.xyz --chrg 0 --uhf 0 --deprotonate --fstrict -T 2");
    }

    #[test]
    fn test_ring_change_is_dropped_and_flagged() {
        let mut reference = propane("p");
        let members = vec![propane("p_c0"), cyclopropane("p_c1"), propane("p_c2")];
        let kept = drop_ring_changes(&mut reference, members, CrestMode::Conformers);

        let names: Vec<&str> = kept.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["p_c0", "p_c2"]);
        assert_eq!(
            reference.flags,
            vec!["Cyclization change occurred for p_c1 during conformer search. Conformer was removed."]
        );
    }

    #[test]
    fn test_qcg_arguments() {
        let crest = Crest::new(Some("water"), "--mdtime 10");
        let opts = QcgOptions {
            nsolv: 4,
            ..QcgOptions::default()
        };
        assert_eq!(
            crest.qcg_arguments(-1, 2, &opts, None, 8).join(" "),
            "solute.xyz --qcg solvent.xyz --nsolv 4 --gfn2 --alpb water --chrg -1 --uhf 1 --mdtime 10 --T 8"
        );

        let level = QcgEnsembleLevel {
            method: XtbMethod::GfnFf,
            choice: QcgEnsembleChoice::CrestBest,
        };
        let opts = QcgOptions {
            method: XtbMethod::Gfn1,
            ..QcgOptions::default()
        };
        assert_eq!(
            Crest::default().qcg_arguments(0, 1, &opts, Some(&level), 2).join(" "),
            "solute.xyz --qcg solvent.xyz --nsolv 0 --gfn1 --ensemble --enslvl gfnff --chrg 0 --uhf 0 --T 2"
        );
    }

    #[test]
    fn test_qcg_ensemble_files() {
        assert_eq!(QcgEnsembleChoice::default().result_file(), "ensemble/full_ensemble.xyz");
        assert_eq!(QcgEnsembleChoice::FinalEnsemble.result_file(), "ensemble/final_ensemble.xyz");
        assert_eq!(QcgEnsembleChoice::CrestBest.result_file(), "ensemble/crest_best.xyz");
    }

    #[test]
    fn test_mode_tables() {
        assert_eq!(CrestMode::Protomers.charge_shift(), 1);
        assert_eq!(CrestMode::Deprotomers.charge_shift(), -1);
        assert_eq!(CrestMode::Tautomers.result_file(), "tautomers.xyz");
        assert_eq!(CrestMode::Conformers.member_suffix(), "c");
    }
}
