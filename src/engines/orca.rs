//! ORCA facade.
//!
//! Every call renders `input.inp` with [`build_orca_input`], runs
//! `orca input.inp [mpi flags]` in a scratch directory with stdout captured
//! in `output.out`, and parses the log with [`OrcaLogParser`].
//!
//! # Examples
//!
//! ```no_run
//! use qcflow::engines::orca::{OrcaEngine, OptOptions};
//! use qcflow::molecule::Molecule;
//! use std::path::Path;
//!
//! let orca = OrcaEngine::new("PBE0", "def2-SVP", "def2/J", Some("water"), "");
//! let mut mol = Molecule::from_xyz(Path::new("water.xyz"), 0, 1)?;
//! let optimized = orca.opt_with(&mut mol, &OptOptions::default())?;
//! # Ok::<(), qcflow::error::QCError>(())
//! ```

use super::{annotate, deliver, Engine, EngineContext, RunOptions};
use crate::error::{QCError, Result};
use crate::io::{self, clean_suffix};
use crate::job::{Block, Blocks, JobSpecification};
use crate::molecule::{split_multixyz, Ensemble, Molecule};
use crate::parser::orca::{
    parse_scan_energies, parse_solvation_free_energy, scan_frame_index, OrcaLogParser,
    ORCA_LOG_FILE,
};
use crate::parser::{read_log, ParsedLog};
use crate::render::{build_orca_input, OrcaMethod, RenderedInput, ORCA_INPUT_FILE};
use crate::runner::{resolve_executable, EngineCommand};
use crate::scratch::ScratchDir;
use log::{error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Default grid dimension of density cube files.
pub const DEFAULT_CUBE_DIM: u32 = 250;
/// SCF convergence level used by TS searches unless overridden.
pub const TS_SCF_CONVERGENCE_LEVEL: &str = "TIGHTSCF";
/// SCF convergence strategy used by TS searches unless overridden.
pub const TS_SCF_CONVERGENCE_STRATEGY: &str = "SLOWCONV";

const OPTIMIZED_GEOMETRY: &str = "input.xyz";
const MEP_TRAJECTORY: &str = "input_MEP_trj.xyz";

/// Options of a single point calculation.
#[derive(Debug, Clone)]
pub struct SpeOptions {
    /// Shared run options
    pub run: RunOptions,
    /// Write electron (and spin) density cube files
    pub save_cubes: bool,
    /// Cube grid dimension
    pub cube_dim: u32,
    /// Print the Hirshfeld population analysis
    pub hirshfeld: bool,
    /// Per-call blocks, replacing the engine blocks when non-empty
    pub blocks: Option<Blocks>,
}

impl Default for SpeOptions {
    fn default() -> Self {
        Self {
            run: RunOptions::default(),
            save_cubes: false,
            cube_dim: DEFAULT_CUBE_DIM,
            hirshfeld: false,
            blocks: None,
        }
    }
}

/// Options of a geometry optimization.
#[derive(Debug, Clone)]
pub struct OptOptions {
    /// Shared run options
    pub run: RunOptions,
    /// Write density cube files for the final structure
    pub save_cubes: bool,
    /// Cube grid dimension
    pub cube_dim: u32,
    /// Print the Hirshfeld population analysis
    pub hirshfeld: bool,
    /// Optimization tightness, e.g. `TIGHTOPT`
    pub optimization_level: Option<String>,
    /// Follow the optimization with a frequency analysis
    pub frequency_analysis: bool,
    /// Per-call blocks
    pub blocks: Option<Blocks>,
}

impl Default for OptOptions {
    fn default() -> Self {
        Self {
            run: RunOptions::default(),
            save_cubes: false,
            cube_dim: DEFAULT_CUBE_DIM,
            hirshfeld: false,
            optimization_level: None,
            frequency_analysis: true,
            blocks: None,
        }
    }
}

/// Options of a transition state optimization.
#[derive(Debug, Clone)]
pub struct OptTsOptions {
    /// Shared run options
    pub run: RunOptions,
    /// Write density cube files for the final structure
    pub save_cubes: bool,
    /// Cube grid dimension
    pub cube_dim: u32,
    /// Print the Hirshfeld population analysis
    pub hirshfeld: bool,
    /// SCF convergence level
    pub scf_convergence_level: Option<String>,
    /// SCF convergence strategy
    pub scf_convergence_strategy: Option<String>,
    /// Exact Hessian before the first step
    pub calculate_hessian: bool,
    /// Follow the optimization with a frequency analysis
    pub frequency_analysis: bool,
    /// Per-call blocks
    pub blocks: Option<Blocks>,
}

impl Default for OptTsOptions {
    fn default() -> Self {
        Self {
            run: RunOptions::default(),
            save_cubes: false,
            cube_dim: DEFAULT_CUBE_DIM,
            hirshfeld: false,
            scf_convergence_level: Some(TS_SCF_CONVERGENCE_LEVEL.to_string()),
            scf_convergence_strategy: Some(TS_SCF_CONVERGENCE_STRATEGY.to_string()),
            calculate_hessian: true,
            frequency_analysis: true,
            blocks: None,
        }
    }
}

/// Options of an analytical or numerical frequency calculation.
#[derive(Debug, Clone, Default)]
pub struct FreqOptions {
    /// Shared run options
    pub run: RunOptions,
    /// Compute polarizabilities and the Raman spectrum
    pub raman: bool,
    /// Compute overtones and combination bands
    pub overtones: bool,
    /// Per-call blocks
    pub blocks: Option<Blocks>,
}

/// Options of a relaxed surface scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Shared run options; `inplace` is ignored
    pub run: RunOptions,
    /// Constraint definition for the `%geom` block
    pub constraints: Option<String>,
    /// Treat the constraints as the only coordinates left free
    pub invert_constraints: bool,
    /// Per-call blocks
    pub blocks: Option<Blocks>,
}

/// Options of a scan based transition state search.
#[derive(Debug, Clone)]
pub struct ScanTsOptions {
    /// Shared run options
    pub run: RunOptions,
    /// Complete the scan even after the maximum has been found
    pub fullscan: bool,
    /// Constraint definition for the `%geom` block
    pub constraints: Option<String>,
    /// Treat the constraints as the only coordinates left free
    pub invert_constraints: bool,
    /// Follow the TS optimization with a frequency analysis
    pub frequency_analysis: bool,
    /// SCF convergence level
    pub scf_convergence_level: Option<String>,
    /// SCF convergence strategy
    pub scf_convergence_strategy: Option<String>,
    /// Per-call blocks
    pub blocks: Option<Blocks>,
}

impl Default for ScanTsOptions {
    fn default() -> Self {
        Self {
            run: RunOptions::default(),
            fullscan: false,
            constraints: None,
            invert_constraints: false,
            frequency_analysis: true,
            scf_convergence_level: Some(TS_SCF_CONVERGENCE_LEVEL.to_string()),
            scf_convergence_strategy: Some(TS_SCF_CONVERGENCE_STRATEGY.to_string()),
            blocks: None,
        }
    }
}

/// Options of a nudged elastic band calculation.
#[derive(Debug, Clone, Default)]
pub struct NebOptions {
    /// Shared run options; `inplace` is ignored
    pub run: RunOptions,
    /// Number of images, endpoints excluded
    pub nimages: Option<u32>,
    /// Pre-optimize reactant and product
    pub preoptimize: bool,
    /// Per-call blocks
    pub blocks: Option<Blocks>,
}

/// Options of an OpenCOSMO-RS solvation free energy calculation.
#[derive(Debug, Clone, Default)]
pub struct CosmoRsOptions {
    /// Shared run options; `inplace` is ignored
    pub run: RunOptions,
    /// Solvent name known to the COSMO-RS database
    pub solvent: Option<String>,
    /// Solvent structure file, used when `solvent` is not given
    pub solvent_file: Option<PathBuf>,
    /// Use the engine functional and basis instead of BP86/def2-TZVPD
    pub use_engine_settings: bool,
    /// Per-call blocks, extended with the `%cosmors` settings
    pub blocks: Option<Blocks>,
}

/// ORCA engine configuration.
#[derive(Debug, Clone)]
pub struct OrcaEngine {
    method: OrcaMethod,
    solvent: Option<String>,
    blocks: Blocks,
    ctx: EngineContext,
}

impl Default for OrcaEngine {
    fn default() -> Self {
        Self::new("PBE", "def2-TZVP", "def2/J", None, "")
    }
}

impl OrcaEngine {
    /// Creates an engine. `solvent` enables the SMD model; an empty
    /// `aux_basis` disables RIJCOSX.
    pub fn new(
        method: &str,
        basis_set: &str,
        aux_basis: &str,
        solvent: Option<&str>,
        optionals: &str,
    ) -> Self {
        Self {
            method: OrcaMethod {
                method: method.to_string(),
                basis_set: basis_set.to_string(),
                aux_basis: aux_basis.to_string(),
                optionals: optionals.to_string(),
            },
            solvent: solvent.filter(|s| !s.is_empty()).map(str::to_string),
            blocks: Blocks::new(),
            ctx: EngineContext::default(),
        }
    }

    /// M06-2X/def2-TZVP in SMD water with a fine integration grid.
    pub fn m06() -> Self {
        Self::new("M062X", "def2-TZVP", "def2/J", Some("water"), "DEFGRID3")
    }

    /// r2SCAN-3c composite method in SMD water.
    pub fn r2scan() -> Self {
        Self::new("r2SCAN-3c", "", "", Some("water"), "")
    }

    /// DLPNO-CCSD with 2/3 basis set extrapolation in SMD water.
    pub fn ccsd() -> Self {
        Self::new("DLPNO-CCSD", "Extrapolate(2/3,ANO)", "AutoAux", Some("water"), "")
    }

    /// Sets engine level blocks, used whenever a call passes none.
    pub fn with_blocks(mut self, blocks: Blocks) -> Self {
        self.blocks = blocks;
        self
    }

    /// Replaces the settings and report context.
    pub fn with_context(mut self, ctx: EngineContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Static method parameters.
    pub fn orca_method(&self) -> &OrcaMethod {
        &self.method
    }

    /// SMD solvent.
    pub fn solvent(&self) -> Option<&str> {
        self.solvent.as_deref()
    }

    fn job(&self, mol: &Molecule, run: &RunOptions, blocks: Option<&Blocks>) -> Result<JobSpecification> {
        let mut job = JobSpecification::new();
        job.set_ncores(Some(self.ctx.ncores(run)))?;
        job.set_maxcore(Some(self.ctx.maxcore(run)))?;
        job.is_singlet = mol.is_singlet();
        job.solvent = self.solvent.clone();
        job.set_user_blocks(blocks.filter(|b| !b.is_empty()).unwrap_or(&self.blocks));
        Ok(job)
    }

    /// Writes the coordinates and input, then runs ORCA in `scratch`.
    fn execute(&self, scratch: &ScratchDir, input_text: &str, mol: &Molecule) -> Result<()> {
        mol.write_xyz_in(scratch.path())?;
        fs::write(scratch.join(ORCA_INPUT_FILE), input_text)?;

        let settings = self.ctx.settings();
        let exe = resolve_executable(&settings.executables().orca, "orca")?;
        let mut cmd = EngineCommand::new("ORCA", exe, scratch.path())
            .arg(ORCA_INPUT_FILE)
            .stderr_append(scratch.join("output.err"))
            .timeout(self.ctx.timeout());
        let flags = settings.general().mpi_flags.trim();
        if !flags.is_empty() {
            cmd = cmd.arg(flags);
        }
        cmd.run()?;
        Ok(())
    }

    fn parser(&self, num_atoms: usize) -> OrcaLogParser {
        OrcaLogParser::new(num_atoms, self.provenance())
    }

    fn parse(&self, scratch: &ScratchDir, num_atoms: usize) -> Result<ParsedLog> {
        self.parser(num_atoms).parse_file(&scratch.join(ORCA_LOG_FILE))
    }

    fn finish(&self, scratch: ScratchDir, mol: &Molecule, calc: &str, suffix: &str, cubes: bool) -> Result<()> {
        let cubes_dir = cubes.then(|| scratch.path().to_path_buf());
        self.ctx.reporter().record(
            mol,
            suffix,
            calc,
            &scratch.join(ORCA_LOG_FILE),
            cubes_dir.as_deref(),
        )?;
        scratch.finish()?;
        Ok(())
    }

    /// Runs a job whose result keeps the input geometry.
    fn run_fixed_geometry(
        &self,
        mol: &mut Molecule,
        job: &JobSpecification,
        run: &RunOptions,
        calc: &str,
        cubes: bool,
    ) -> Result<Option<Molecule>> {
        let input = build_orca_input(job, &self.method, mol)?;
        let scratch = self.ctx.scratch(&mol.name, &self.output_suffix(), calc, run)?;
        self.execute(&scratch, &input.to_text(), mol)?;
        let parsed = self.parse(&scratch, mol.geometry.num_atoms)?;

        let mut result = mol.clone();
        result.properties.absorb(parsed.properties);
        annotate(&mut result, input.advisories);
        annotate(&mut result, parsed.advisories);

        self.finish(scratch, &result, calc, &self.output_suffix(), cubes)?;
        Ok(deliver(mol, result, run.inplace))
    }

    /// Runs a job whose result carries the geometry ORCA leaves in `input.xyz`.
    fn run_new_geometry(
        &self,
        mol: &mut Molecule,
        job: &JobSpecification,
        run: &RunOptions,
        calc: &str,
        cubes: bool,
    ) -> Result<Option<Molecule>> {
        let input = build_orca_input(job, &self.method, mol)?;
        let scratch = self.ctx.scratch(&mol.name, &self.output_suffix(), calc, run)?;
        self.execute(&scratch, &input.to_text(), mol)?;
        let parsed = self.parse(&scratch, mol.geometry.num_atoms)?;
        let geometry = io::read_xyz(&scratch.join(OPTIMIZED_GEOMETRY))?;

        let mut result = mol.with_geometry(geometry, &self.level_of_theory());
        result.properties.absorb(parsed.properties);
        annotate(&mut result, input.advisories);
        annotate(&mut result, parsed.advisories);

        self.finish(scratch, &result, calc, &self.output_suffix(), cubes)?;
        Ok(deliver(mol, result, run.inplace))
    }

    fn spe_job(&self, mol: &Molecule, opts: &SpeOptions) -> Result<JobSpecification> {
        let mut job = self.job(mol, &opts.run, opts.blocks.as_ref())?;
        job.cube_dim = opts.save_cubes.then_some(opts.cube_dim);
        job.hirshfeld = opts.hirshfeld;
        Ok(job)
    }

    /// Renders the single point input without running anything.
    pub fn render_spe(&self, mol: &Molecule, opts: &SpeOptions) -> Result<RenderedInput> {
        build_orca_input(&self.spe_job(mol, opts)?, &self.method, mol)
    }

    /// Single point energy with optional cube files and Hirshfeld charges.
    pub fn spe_with(&self, mol: &mut Molecule, opts: &SpeOptions) -> Result<Option<Molecule>> {
        info!("{}, charge {} spin {} - {} SPE", mol.name, mol.charge, mol.spin, self.method.method);
        let job = self.spe_job(mol, opts)?;
        self.run_fixed_geometry(mol, &job, &opts.run, "spe", opts.save_cubes)
    }

    /// Geometry optimization, followed by a frequency analysis by default.
    pub fn opt_with(&self, mol: &mut Molecule, opts: &OptOptions) -> Result<Option<Molecule>> {
        info!("{}, charge {} spin {} - {} OPT", mol.name, mol.charge, mol.spin, self.method.method);
        let mut job = self.job(mol, &opts.run, opts.blocks.as_ref())?;
        job.opt = true;
        job.freq = opts.frequency_analysis;
        job.cube_dim = opts.save_cubes.then_some(opts.cube_dim);
        job.hirshfeld = opts.hirshfeld;
        job.set_optimization_level(opts.optimization_level.as_deref())?;
        self.run_new_geometry(mol, &job, &opts.run, "opt", opts.save_cubes)
    }

    /// Transition state optimization (`! OptTS`).
    pub fn opt_ts(&self, mol: &mut Molecule, opts: &OptTsOptions) -> Result<Option<Molecule>> {
        info!("{}, charge {} spin {} - {} OPT TS", mol.name, mol.charge, mol.spin, self.method.method);
        let mut job = self.job(mol, &opts.run, opts.blocks.as_ref())?;
        job.opt_ts = true;
        job.freq = opts.frequency_analysis;
        job.cube_dim = opts.save_cubes.then_some(opts.cube_dim);
        job.calc_hess = opts.calculate_hessian;
        job.hirshfeld = opts.hirshfeld;
        job.set_scf_convergence_level(opts.scf_convergence_level.as_deref())?;
        job.set_scf_convergence_strategy(opts.scf_convergence_strategy.as_deref())?;
        self.run_new_geometry(mol, &job, &opts.run, "optTS", opts.save_cubes)
    }

    /// Analytical frequencies (`! Freq`).
    pub fn freq(&self, mol: &mut Molecule, opts: &FreqOptions) -> Result<Option<Molecule>> {
        info!("{}, charge {} spin {} - {} FREQ", mol.name, mol.charge, mol.spin, self.method.method);
        let mut job = self.job(mol, &opts.run, opts.blocks.as_ref())?;
        job.freq = true;
        job.raman = opts.raman;
        job.nearir = opts.overtones;
        self.run_fixed_geometry(mol, &job, &opts.run, "freq", false)
    }

    /// Numerical frequencies (`! NumFreq`).
    pub fn nfreq(&self, mol: &mut Molecule, opts: &FreqOptions) -> Result<Option<Molecule>> {
        info!("{}, charge {} spin {} - {} NFREQ", mol.name, mol.charge, mol.spin, self.method.method);
        let mut job = self.job(mol, &opts.run, opts.blocks.as_ref())?;
        job.nfreq = true;
        job.raman = opts.raman;
        job.nearir = opts.overtones;
        self.run_fixed_geometry(mol, &job, &opts.run, "numfreq", false)
    }

    /// Relaxed surface scan.
    ///
    /// `scan` is the body of the `%geom scan` section, e.g.
    /// `"B 0 1 = 1.0, 3.0, 10"`. Frames are returned ordered by their index,
    /// each carrying its SCF energy.
    pub fn scan(&self, mol: &Molecule, scan: &str, opts: &ScanOptions) -> Result<Ensemble> {
        info!("{}, charge {} spin {} - {} SCAN", mol.name, mol.charge, mol.spin, self.method.method);
        let mut job = self.job(mol, &opts.run, opts.blocks.as_ref())?;
        job.scan = Some(scan.to_string());
        job.constraints = opts.constraints.clone();
        job.invert_constraints = opts.invert_constraints;

        let input = build_orca_input(&job, &self.method, mol)?;
        let scratch = self.ctx.scratch(&mol.name, &self.output_suffix(), "scan", &opts.run)?;
        self.execute(&scratch, &input.to_text(), mol)?;

        let log_path = scratch.join(ORCA_LOG_FILE);
        let content = read_log(&log_path)?;
        self.parser(mol.geometry.num_atoms).parse_str(&content, &log_path)?;
        let ensemble = self.collect_scan_frames(mol, scratch.path(), &content)?;

        self.finish(scratch, mol, "scan", &self.output_suffix(), false)?;
        Ok(ensemble)
    }

    /// Scan followed by a TS optimization from the highest point (`! ScanTS`).
    ///
    /// Returns the TS (named `{name}_TS`) and the scan frames, or `None` when
    /// `inplace` replaced `mol` with the TS.
    pub fn scan_ts(
        &self,
        mol: &mut Molecule,
        scan: &str,
        opts: &ScanTsOptions,
    ) -> Result<Option<(Molecule, Ensemble)>> {
        info!("{}, charge {} spin {} - {} SCAN TS", mol.name, mol.charge, mol.spin, self.method.method);
        let mut job = self.job(mol, &opts.run, opts.blocks.as_ref())?;
        job.scan_ts = Some(scan.to_string());
        job.freq = opts.frequency_analysis;
        job.fullscan = opts.fullscan;
        job.constraints = opts.constraints.clone();
        job.invert_constraints = opts.invert_constraints;
        job.set_scf_convergence_level(opts.scf_convergence_level.as_deref())?;
        job.set_scf_convergence_strategy(opts.scf_convergence_strategy.as_deref())?;

        let input = build_orca_input(&job, &self.method, mol)?;
        let scratch = self.ctx.scratch(&mol.name, &self.output_suffix(), "scanTS", &opts.run)?;
        self.execute(&scratch, &input.to_text(), mol)?;

        let log_path = scratch.join(ORCA_LOG_FILE);
        let content = read_log(&log_path)?;
        let parsed = self.parser(mol.geometry.num_atoms).parse_str(&content, &log_path)?;
        let geometry = io::read_xyz(&scratch.join(OPTIMIZED_GEOMETRY))?;

        let lot = self.level_of_theory();
        let mut ts = if opts.run.inplace {
            mol.with_geometry(geometry, &lot)
        } else {
            let mut ts = Molecule::new(format!("{}_TS", mol.name), geometry, mol.charge, mol.spin)?;
            ts.geometry_level_of_theory = Some(lot);
            ts
        };
        ts.properties.absorb(parsed.properties);
        annotate(&mut ts, input.advisories);
        annotate(&mut ts, parsed.advisories);

        let ensemble = if opts.run.inplace {
            None
        } else {
            Some(self.collect_scan_frames(mol, scratch.path(), &content)?)
        };

        self.finish(scratch, &ts, "scanTS", &self.output_suffix(), false)?;
        match ensemble {
            Some(ensemble) => Ok(Some((ts, ensemble))),
            None => {
                *mol = ts;
                Ok(None)
            }
        }
    }

    /// Reads the `input.NNN.xyz` frames left by a scan, sorted by index.
    fn collect_scan_frames(&self, mol: &Molecule, dir: &Path, log: &str) -> Result<Ensemble> {
        let energies = parse_scan_energies(log)?;
        let mut frames = Vec::new();
        for entry in fs::read_dir(dir)? {
            let file_name = entry?.file_name().to_string_lossy().to_string();
            if let Some(index) = scan_frame_index(&file_name) {
                frames.push((index, file_name));
            }
        }
        frames.sort_by_key(|(index, _)| *index);

        let source = self.provenance();
        let mut molecules = Vec::with_capacity(frames.len());
        for (index, file_name) in frames {
            let label = file_name
                .trim_start_matches("input.")
                .trim_end_matches(".xyz");
            let geometry = io::read_xyz(&dir.join(&file_name))?;
            let mut frame = Molecule::new(
                format!("{}.{}", mol.name, label),
                geometry,
                mol.charge,
                mol.spin,
            )?;
            match index.checked_sub(1).and_then(|i| energies.get(i)) {
                Some(energy) => frame.properties.set_electronic_energy(*energy, &source),
                None => warn!("No scan energy found for frame {}", file_name),
            }
            molecules.push(frame);
        }
        Ok(Ensemble::new(molecules))
    }

    /// Climbing image NEB between `reactant` and `product`.
    ///
    /// Returns the minimum energy path read from `input_MEP_trj.xyz`.
    ///
    /// # Errors
    ///
    /// Returns [`QCError::Configuration`] before anything is written if the
    /// endpoints share a name or differ in charge or spin.
    pub fn neb_ci(&self, reactant: &Molecule, product: &Molecule, opts: &NebOptions) -> Result<Ensemble> {
        info!("Running a NEB-CI calculation - {}", self.method.method);
        info!("Reactant: {}, charge {} spin {}", reactant.name, reactant.charge, reactant.spin);
        info!("Product:  {}, charge {} spin {}", product.name, product.charge, product.spin);
        check_endpoints("NEB-CI", reactant, product, "product")?;

        let mut job = self.job(reactant, &opts.run, opts.blocks.as_ref())?;
        job.neb_ci = true;
        job.neb_product = Some(product.xyz_filename());
        job.neb_images = opts.nimages;
        job.neb_preopt = opts.preoptimize;

        let input = build_orca_input(&job, &self.method, reactant)?;
        let scratch = self.ctx.scratch(
            &format!("{}_{}", reactant.name, product.name),
            &self.output_suffix(),
            "NEB-CI",
            &opts.run,
        )?;
        product.write_xyz_in(scratch.path())?;
        self.execute(&scratch, &input.to_text(), reactant)?;
        self.parse(&scratch, reactant.geometry.num_atoms)?;

        let mep = split_multixyz(
            reactant,
            &scratch.join(MEP_TRAJECTORY),
            "MEP",
            reactant.charge,
            &self.provenance(),
        )?;
        self.finish(scratch, reactant, "neb-ci", &self.output_suffix(), false)?;
        Ok(Ensemble::new(mep))
    }

    /// NEB followed by a TS optimization from the climbing image.
    ///
    /// Returns the TS, named `{reactant}_TS`, and the minimum energy path.
    ///
    /// # Errors
    ///
    /// Returns [`QCError::Configuration`] before anything is written if any
    /// two structures share a name or differ in charge or spin.
    pub fn neb_ts(
        &self,
        reactant: &Molecule,
        product: &Molecule,
        guess: Option<&Molecule>,
        opts: &NebOptions,
    ) -> Result<(Molecule, Ensemble)> {
        info!("Running a NEB-TS calculation - {}", self.method.method);
        info!("Reactant: {}, charge {} spin {}", reactant.name, reactant.charge, reactant.spin);
        info!("Product:  {}, charge {} spin {}", product.name, product.charge, product.spin);
        if let Some(guess) = guess {
            info!("TS guess:  {}, charge {} spin {}", guess.name, guess.charge, guess.spin);
            check_endpoints("NEB-TS", reactant, guess, "TS guess")?;
        }
        check_endpoints("NEB-TS", reactant, product, "product")?;

        let mut job = self.job(reactant, &opts.run, opts.blocks.as_ref())?;
        job.neb_ts = true;
        job.neb_product = Some(product.xyz_filename());
        job.neb_ts_guess = guess.map(Molecule::xyz_filename);
        job.neb_images = opts.nimages;
        job.neb_preopt = opts.preoptimize;

        let input = build_orca_input(&job, &self.method, reactant)?;
        let scratch = self.ctx.scratch(
            &format!("{}_{}", reactant.name, product.name),
            &self.output_suffix(),
            "NEB-TS",
            &opts.run,
        )?;
        product.write_xyz_in(scratch.path())?;
        if let Some(guess) = guess {
            guess.write_xyz_in(scratch.path())?;
        }
        self.execute(&scratch, &input.to_text(), reactant)?;
        let parsed = self.parse(&scratch, reactant.geometry.num_atoms)?;

        let geometry = io::read_xyz(&scratch.join(OPTIMIZED_GEOMETRY))?;
        let mut ts = Molecule::new(
            format!("{}_TS", reactant.name),
            geometry,
            reactant.charge,
            reactant.spin,
        )?;
        ts.geometry_level_of_theory = Some(self.level_of_theory());
        ts.properties.absorb(parsed.properties);
        annotate(&mut ts, input.advisories);
        annotate(&mut ts, parsed.advisories);

        let mep = split_multixyz(
            reactant,
            &scratch.join(MEP_TRAJECTORY),
            "MEP",
            reactant.charge,
            &self.provenance(),
        )?;
        self.finish(scratch, &ts, "neb-ts", &self.output_suffix(), false)?;
        Ok((ts, Ensemble::new(mep)))
    }

    /// Builds the `%cosmors` block for a COSMO-RS call.
    ///
    /// The solvent is taken from the options (by name, then by structure
    /// file) and finally from the engine SMD solvent. Returns the block and
    /// the structure file to copy as `{stem}.cosmorsxyz`, if any.
    pub fn cosmors_block(&self, opts: &CosmoRsOptions) -> Result<(Block, Option<(PathBuf, String)>)> {
        let mut block = opts
            .blocks
            .as_ref()
            .and_then(|b| b.get("cosmors").cloned())
            .unwrap_or_default();
        let mut solvent_file = None;

        if let Some(solvent) = &opts.solvent {
            block.insert("solvent".to_string(), format!("\"{}\"", solvent).into());
        } else if let Some(path) = &opts.solvent_file {
            if !path.is_file() {
                return Err(QCError::config(format!("Solvent file not found: {}", path.display())));
            }
            let stem = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.split('.').next())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| QCError::config(format!("Invalid solvent file name: {}", path.display())))?
                .to_string();
            block.insert("solventfilename".to_string(), format!("\"{}\"", stem).into());
            solvent_file = Some((path.clone(), format!("{}.cosmorsxyz", stem)));
        } else if let Some(solvent) = &self.solvent {
            info!(
                "Solvent not explicitly indicated in COSMO-RS call. The calculation will be run using the engine solvent ({}).",
                solvent
            );
            block.insert("solvent".to_string(), format!("\"{}\"", solvent).into());
        } else {
            error!("COSMO-RS requested without solvent name or structure file");
            return Err(QCError::config(
                "Cannot run COSMO-RS calculation with neither solvent name nor structure file.",
            ));
        }

        if opts.use_engine_settings {
            block.insert("dftfunc".to_string(), format!("\"{}\"", self.method.method).into());
            block.insert("dftbas".to_string(), format!("\"{}\"", self.method.basis_set).into());
        }
        Ok((block, solvent_file))
    }

    /// OpenCOSMO-RS solvation free energy (`dGsolv`, Hartree).
    pub fn cosmors(&self, mol: &Molecule, opts: &CosmoRsOptions) -> Result<f64> {
        let suffix = if opts.use_engine_settings {
            info!(
                "{}, charge {} spin {} - {}/{} COSMO-RS",
                mol.name, mol.charge, mol.spin, self.method.method, self.method.basis_set
            );
            clean_suffix(&format!("_{}_{}", self.method.method, self.method.basis_set))
        } else {
            info!("{}, charge {} spin {} - BP86/def2-TZVPD COSMO-RS", mol.name, mol.charge, mol.spin);
            clean_suffix("_BP86_def2-TZVPD")
        };

        let (cosmors, solvent_file) = self.cosmors_block(opts)?;
        let mut blocks = opts.blocks.clone().unwrap_or_default();
        blocks.insert("cosmors".to_string(), cosmors);

        let mut job = self.job(mol, &opts.run, Some(&blocks))?;
        job.solvent = None;

        let input = build_orca_input(&job, &self.method, mol)?;
        let scratch = self.ctx.scratch(&mol.name, &self.output_suffix(), "cosmors", &opts.run)?;
        if let Some((source, target)) = &solvent_file {
            fs::copy(source, scratch.join(target))?;
        }
        self.execute(&scratch, &input.to_text(), mol)?;

        let log_path = scratch.join(ORCA_LOG_FILE);
        let content = read_log(&log_path)?;
        self.parser(mol.geometry.num_atoms).parse_str(&content, &log_path)?;
        let dgsolv = parse_solvation_free_energy(&content)?.ok_or_else(|| {
            QCError::parse(format!("No solvation free energy found in {}", log_path.display()))
        })?;

        self.finish(scratch, mol, "cosmors", &suffix, false)?;
        Ok(dgsolv)
    }
}

impl Engine for OrcaEngine {
    fn name(&self) -> &str {
        "ORCA"
    }

    fn method(&self) -> &str {
        &self.method.method
    }

    fn level_of_theory(&self) -> String {
        format!(
            "{} | basis: {} | solvent: {}",
            self.method.method,
            self.method.basis_set,
            self.solvent.as_deref().unwrap_or("None")
        )
    }

    fn output_suffix(&self) -> String {
        let mut suffix = format!("orca_{}", self.method.method);
        if !self.method.basis_set.is_empty() {
            suffix.push_str(&format!("_{}", self.method.basis_set));
        }
        match &self.solvent {
            Some(solvent) => suffix.push_str(&format!("_{}", solvent)),
            None => suffix.push_str("_vacuum"),
        }
        clean_suffix(&suffix)
    }

    fn spe(&self, mol: &mut Molecule, run: &RunOptions) -> Result<Option<Molecule>> {
        let opts = SpeOptions {
            run: run.clone(),
            ..SpeOptions::default()
        };
        self.spe_with(mol, &opts)
    }

    fn opt(&self, mol: &mut Molecule, run: &RunOptions) -> Result<Option<Molecule>> {
        let opts = OptOptions {
            run: run.clone(),
            ..OptOptions::default()
        };
        self.opt_with(mol, &opts)
    }
}

/// Checks that two NEB structures can share one calculation.
fn check_endpoints(calc: &str, reactant: &Molecule, other: &Molecule, role: &str) -> Result<()> {
    if reactant.name == other.name {
        error!("{} required with reactant and {} with the same name", calc, role);
        return Err(QCError::config(format!("Reactant and {} must have different names", role)));
    }
    if reactant.spin != other.spin {
        error!("{} required with reactant and {} having different spin multiplicities.", calc, role);
        return Err(QCError::config(format!(
            "Reactant and {} must have the same spin multiplicity",
            role
        )));
    }
    if reactant.charge != other.charge {
        error!("{} required with reactant and {} having different charge.", calc, role);
        return Err(QCError::config(format!("Reactant and {} must have the same charge", role)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::job::BlockEntry;

    fn molecule(name: &str, charge: i32, spin: u32) -> Molecule {
        let geometry = Geometry::new(
            vec!["H".to_string(), "H".to_string()],
            vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.74],
        )
        .unwrap();
        Molecule::new(name, geometry, charge, spin).unwrap()
    }

    #[test]
    fn test_level_of_theory_and_suffix() {
        let orca = OrcaEngine::new("PBE", "def2-TZVP", "def2/J", None, "");
        assert_eq!(orca.level_of_theory(), "PBE | basis: def2-TZVP | solvent: None");
        assert_eq!(orca.output_suffix(), "orca_PBE_def2-TZVP_vacuum");

        let ccsd = OrcaEngine::ccsd();
        assert_eq!(ccsd.output_suffix(), "orca_DLPNO-CCSD_Extrapolate_2_3_ANO__water");
        assert_eq!(OrcaEngine::r2scan().output_suffix(), "orca_r2SCAN-3c_water");
        assert_eq!(OrcaEngine::m06().orca_method().optionals, "DEFGRID3");
    }

    #[test]
    fn test_endpoint_checks() {
        let reactant = molecule("r", 0, 1);
        assert!(check_endpoints("NEB-CI", &reactant, &molecule("r", 0, 1), "product")
            .unwrap_err()
            .is_configuration());
        assert!(check_endpoints("NEB-CI", &reactant, &molecule("p", 0, 3), "product").is_err());
        assert!(check_endpoints("NEB-CI", &reactant, &molecule("p", 1, 1), "product").is_err());
        assert!(check_endpoints("NEB-CI", &reactant, &molecule("p", 0, 1), "product").is_ok());
    }

    #[test]
    fn test_cosmors_block_sources() {
        let orca = OrcaEngine::new("PBE", "def2-SVP", "", Some("water"), "");

        let (block, file) = orca.cosmors_block(&CosmoRsOptions::default()).unwrap();
        assert_eq!(block.get("solvent"), Some(&BlockEntry::Value("\"water\"".to_string())));
        assert!(file.is_none());

        let opts = CosmoRsOptions {
            solvent: Some("ethanol".to_string()),
            use_engine_settings: true,
            ..CosmoRsOptions::default()
        };
        let (block, _) = orca.cosmors_block(&opts).unwrap();
        assert_eq!(block.get("solvent"), Some(&BlockEntry::Value("\"ethanol\"".to_string())));
        assert_eq!(block.get("dftfunc"), Some(&BlockEntry::Value("\"PBE\"".to_string())));
        assert_eq!(block.get("dftbas"), Some(&BlockEntry::Value("\"def2-SVP\"".to_string())));

        let vacuum = OrcaEngine::new("PBE", "def2-SVP", "", None, "");
        let err = vacuum.cosmors_block(&CosmoRsOptions::default()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_cosmors_solvent_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("dmso.solvent.xyz");
        fs::write(&path, "").unwrap();
        let orca = OrcaEngine::new("PBE", "def2-SVP", "", None, "");
        let opts = CosmoRsOptions {
            solvent_file: Some(path.clone()),
            ..CosmoRsOptions::default()
        };
        let (block, file) = orca.cosmors_block(&opts).unwrap();
        assert_eq!(
            block.get("solventfilename"),
            Some(&BlockEntry::Value("\"dmso\"".to_string()))
        );
        assert_eq!(file, Some((path, "dmso.cosmorsxyz".to_string())));

        let missing = CosmoRsOptions {
            solvent_file: Some(dir.path().join("missing.xyz")),
            ..CosmoRsOptions::default()
        };
        assert!(orca.cosmors_block(&missing).is_err());
    }
}
