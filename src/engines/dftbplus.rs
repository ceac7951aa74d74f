//! DFTB+ facade.
//!
//! The input `dftb_in.hsd` is assembled as an [`HsdDocument`] from the task
//! driver, the Hamiltonian and the per-element parameter tables, next to a
//! `{name}.gen` geometry. DFTB+ runs either under `mpirun` with one OpenMP
//! thread per rank, or as a single shared-memory process.

use super::{annotate, deliver, Engine, EngineContext, RunOptions};
use crate::error::{QCError, Result};
use crate::hsd::{HsdDocument, HsdNode};
use crate::io::{self, clean_suffix, XyzFrame};
use crate::molecule::{molecules_from_frames, Ensemble, Molecule};
use crate::parser::dftbplus::{DftbLogParser, DFTB_END_GEOMETRY, DFTB_LOG_FILE};
use crate::parser::ParsedLog;
use crate::runner::{resolve_executable, EngineCommand};
use crate::scratch::ScratchDir;
use log::{debug, error, info};
use std::env;
use std::fs;
use std::path::Path;

/// Input file read by DFTB+ from its working directory.
pub const DFTB_INPUT_FILE: &str = "dftb_in.hsd";
/// Environment variable pointing at the Slater-Koster parameter tree.
pub const PARAM_DIR_ENV: &str = "DFTBPLUS_PARAM_DIR";

/// Highest angular momentum shell per element.
const MAX_ANGULAR_MOMENTUM: [(&str, &str); 15] = [
    ("Br", "d"),
    ("C", "p"),
    ("Ca", "p"),
    ("Cl", "d"),
    ("F", "p"),
    ("H", "s"),
    ("I", "d"),
    ("K", "p"),
    ("Mg", "p"),
    ("N", "p"),
    ("Na", "p"),
    ("O", "p"),
    ("P", "d"),
    ("S", "d"),
    ("Zn", "d"),
];

/// Hubbard derivatives of the 3ob set.
const HUBBARD_DERIVS: [(&str, f64); 15] = [
    ("Br", -0.0573),
    ("C", -0.1492),
    ("Ca", -0.0340),
    ("Cl", -0.0697),
    ("F", -0.1623),
    ("H", -0.1857),
    ("I", -0.0433),
    ("K", -0.0339),
    ("Mg", -0.02),
    ("N", -0.1535),
    ("Na", -0.0454),
    ("O", -0.1575),
    ("P", -0.14),
    ("S", -0.11),
    ("Zn", -0.03),
];

/// Shell resolved spin constants.
const SPIN_CONSTANTS: [(&str, &[f64]); 5] = [
    ("H", &[-0.072]),
    ("C", &[-0.031, -0.025, -0.025, -0.023]),
    ("N", &[-0.033, -0.027, -0.027, -0.026]),
    ("O", &[-0.035, -0.030, -0.030, -0.028]),
    (
        "S",
        &[-0.021, -0.017, 0.000, -0.017, -0.016, 0.000, 0.000, 0.000, -0.080],
    ),
];

fn lookup<T: Copy>(table: &[(&str, T)], element: &str, what: &str) -> Result<T> {
    table
        .iter()
        .find(|(symbol, _)| *symbol == element)
        .map(|(_, value)| *value)
        .ok_or_else(|| {
            error!("No {} available for element {}", what, element);
            QCError::config(format!("Element {} has no {} in DFTB+ tables", element, what))
        })
}

/// Floats are written with at least one decimal, e.g. `298.0`.
fn real(value: f64) -> String {
    format!("{:?}", value)
}

/// Hamiltonian family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DftbMethod {
    /// Slater-Koster based DFTB
    Dftb,
    /// GFN2-xTB as implemented in DFTB+
    Xtb,
}

impl DftbMethod {
    /// Name used in the `Hamiltonian = ...` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            DftbMethod::Dftb => "DFTB",
            DftbMethod::Xtb => "xTB",
        }
    }
}

impl std::str::FromStr for DftbMethod {
    type Err = QCError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dftb" => Ok(DftbMethod::Dftb),
            "xtb" => Ok(DftbMethod::Xtb),
            _ => Err(QCError::config(format!(
                "`{}` is not a valid DFTB+ method. Must be one of DFTB, xTB",
                s
            ))),
        }
    }
}

/// Parallel execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallel {
    /// `mpirun -np N dftb+` with `OMP_NUM_THREADS=1`
    Mpi,
    /// `dftb+` with `OMP_NUM_THREADS=N`
    NoMpi,
}

/// Static DFTB+ parameters.
#[derive(Debug, Clone)]
pub struct DftbConfig {
    /// Hamiltonian family
    pub method: DftbMethod,
    /// Slater-Koster set relative to the parameter directory
    pub parameters: String,
    /// LAPACK eigensolver
    pub solver: Option<String>,
    /// Third order terms with Hubbard derivatives and H damping
    pub thirdorder: bool,
    /// D3 dispersion correction
    pub dispersion: bool,
    /// Fermi filling of the single particle levels
    pub fermi: bool,
    /// Electronic temperature of the Fermi filling in K
    pub fermi_temp: f64,
    /// Parallel execution mode
    pub parallel: Parallel,
}

impl Default for DftbConfig {
    fn default() -> Self {
        Self {
            method: DftbMethod::Dftb,
            parameters: "3ob/3ob-3-1".to_string(),
            solver: None,
            thirdorder: true,
            dispersion: false,
            fermi: false,
            fermi_temp: 300.0,
            parallel: Parallel::Mpi,
        }
    }
}

/// Options of an NVT molecular dynamics run.
#[derive(Debug, Clone)]
pub struct MdOptions {
    /// Shared run options; `inplace` is ignored
    pub run: RunOptions,
    /// Number of MD steps
    pub steps: u64,
    /// Time step in fs
    pub timestep: f64,
    /// Thermostat temperature in K
    pub temperature: f64,
    /// Steps between trajectory frames
    pub mdrestartfreq: u64,
    /// Cubic box side in Angstrom, overriding the molecule box
    pub box_side: Option<f64>,
}

impl Default for MdOptions {
    fn default() -> Self {
        Self {
            run: RunOptions::default(),
            steps: 1000,
            timestep: 1.0,
            temperature: 298.0,
            mdrestartfreq: 100,
            box_side: None,
        }
    }
}

/// Options of a simulated annealing run.
#[derive(Debug, Clone)]
pub struct AnnealingOptions {
    /// Shared run options
    pub run: RunOptions,
    /// Start and end temperature in K
    pub start_temp: f64,
    /// Plateau temperature in K
    pub target_temp: f64,
    /// Steps of each heating and cooling ramp
    pub ramp_steps: u64,
    /// Steps held at the plateau
    pub hold_steps: u64,
    /// Time step in fs
    pub timestep: f64,
    /// Steps between trajectory frames
    pub mdrestartfreq: u64,
    /// Cubic box side in Angstrom, overriding the molecule box
    pub box_side: Option<f64>,
}

impl Default for AnnealingOptions {
    fn default() -> Self {
        Self {
            run: RunOptions::default(),
            start_temp: 1.0,
            target_temp: 2000.0,
            ramp_steps: 500,
            hold_steps: 1000,
            timestep: 1.0,
            mdrestartfreq: 100,
            box_side: None,
        }
    }
}

/// What `dftb_in.hsd` asks DFTB+ to do.
#[derive(Debug, Clone, PartialEq)]
pub enum DftbTask {
    /// Zero step geometry optimization
    Spe,
    /// Geometry optimization, optionally relaxing the lattice
    Opt {
        /// Optimize the lattice vectors too
        lattice_opt: bool,
    },
    /// Velocity Verlet with a Nose-Hoover thermostat
    MdNvt {
        /// Number of steps
        steps: u64,
        /// Time step in fs
        timestep: f64,
        /// Temperature in K
        temperature: f64,
        /// Steps between trajectory frames
        mdrestartfreq: u64,
    },
    /// Heat, hold and cool through a temperature profile
    Annealing {
        /// Start and end temperature in K
        start_temp: f64,
        /// Plateau temperature in K
        target_temp: f64,
        /// Ramp length in steps
        ramp_steps: u64,
        /// Plateau length in steps
        hold_steps: u64,
        /// Time step in fs
        timestep: f64,
        /// Steps between trajectory frames
        mdrestartfreq: u64,
    },
}

impl DftbTask {
    fn driver(&self) -> HsdNode {
        match self {
            DftbTask::Spe => HsdNode::group(
                "Driver = GeometryOptimization",
                vec![HsdNode::assign("MaxSteps", 0)],
            ),
            DftbTask::Opt { lattice_opt } => HsdNode::group(
                "Driver = GeometryOptimization",
                vec![HsdNode::assign(
                    "LatticeOpt",
                    if *lattice_opt { "Yes" } else { "No" },
                )],
            ),
            DftbTask::MdNvt {
                steps,
                timestep,
                temperature,
                mdrestartfreq,
            } => HsdNode::group(
                "Driver = VelocityVerlet",
                vec![
                    HsdNode::assign("TimeStep [fs]", real(*timestep)),
                    HsdNode::group(
                        "Thermostat = NoseHoover",
                        vec![
                            HsdNode::assign("Temperature [K]", real(*temperature)),
                            HsdNode::assign("CouplingStrength [cm^-1]", 3200),
                        ],
                    ),
                    HsdNode::assign("Steps", steps),
                    HsdNode::assign("MovedAtoms", "1:-1"),
                    HsdNode::assign("MDRestartFrequency", mdrestartfreq),
                ],
            ),
            DftbTask::Annealing {
                start_temp,
                target_temp,
                ramp_steps,
                hold_steps,
                timestep,
                mdrestartfreq,
            } => HsdNode::group(
                "Driver = VelocityVerlet",
                vec![
                    HsdNode::assign("TimeStep [fs]", real(*timestep)),
                    HsdNode::group(
                        "Thermostat = NoseHoover",
                        vec![
                            HsdNode::group(
                                "Temperature [Kelvin] = TemperatureProfile",
                                vec![
                                    HsdNode::line(format!("constant 1 {}", real(*start_temp))),
                                    HsdNode::line(format!(
                                        "linear {} {}",
                                        ramp_steps.saturating_sub(1),
                                        real(*target_temp)
                                    )),
                                    HsdNode::line(format!(
                                        "constant {} {}",
                                        hold_steps,
                                        real(*target_temp)
                                    )),
                                    HsdNode::line(format!(
                                        "linear {} {}",
                                        ramp_steps,
                                        real(*start_temp)
                                    )),
                                ],
                            ),
                            HsdNode::assign("CouplingStrength [cm^-1]", 3200),
                        ],
                    ),
                    HsdNode::assign("MovedAtoms", "1:-1"),
                    HsdNode::assign("MDRestartFrequency", mdrestartfreq),
                ],
            ),
        }
    }
}

/// DFTB+ engine configuration.
#[derive(Debug, Clone, Default)]
pub struct DftbEngine {
    config: DftbConfig,
    ctx: EngineContext,
}

impl DftbEngine {
    /// Creates an engine from static parameters.
    pub fn new(config: DftbConfig) -> Self {
        Self {
            config,
            ctx: EngineContext::default(),
        }
    }

    /// Replaces the settings and report context.
    pub fn with_context(mut self, ctx: EngineContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Static parameters.
    pub fn config(&self) -> &DftbConfig {
        &self.config
    }

    /// Slater-Koster parameter directory from the settings or the
    /// `DFTBPLUS_PARAM_DIR` environment variable.
    pub fn param_dir(&self) -> Result<String> {
        let configured = self.ctx.settings().executables().dftb_param_dir.trim();
        if !configured.is_empty() {
            return Ok(configured.to_string());
        }
        env::var(PARAM_DIR_ENV).map_err(|_| {
            QCError::config(format!(
                "DFTB+ parameter directory not configured and {} is not set",
                PARAM_DIR_ENV
            ))
        })
    }

    /// Builds `dftb_in.hsd` for `mol`.
    ///
    /// `param_dir` is only read by the DFTB Hamiltonian.
    ///
    /// # Errors
    ///
    /// Returns [`QCError::Configuration`] if an element is missing from a
    /// parameter table.
    pub fn build_input(&self, mol: &Molecule, task: &DftbTask, param_dir: &str) -> Result<HsdDocument> {
        let atom_types = mol.geometry.atom_types();
        let mut doc = HsdDocument::new();
        doc.push(HsdNode::group(
            "Geometry = GenFormat",
            vec![HsdNode::line(format!("<<< \"{}.gen\"", mol.name))],
        ));
        doc.push(task.driver());
        doc.push(self.hamiltonian(mol, &atom_types, param_dir)?);
        doc.push(HsdNode::group(
            "ParserOptions",
            vec![HsdNode::assign("ParserVersion", 11)],
        ));
        Ok(doc)
    }

    fn hamiltonian(&self, mol: &Molecule, atom_types: &[String], param_dir: &str) -> Result<HsdNode> {
        let method = self.config.method;
        let mut children = vec![
            HsdNode::assign("MaxSCCIterations", 500),
            HsdNode::assign("Charge", mol.charge),
        ];

        if self.config.fermi {
            children.push(HsdNode::group(
                "Filling = Fermi",
                vec![HsdNode::assign("Temperature [K]", real(self.config.fermi_temp))],
            ));
        }

        if !mol.is_singlet() {
            children.push(HsdNode::group(
                "SpinPolarisation = Colinear",
                vec![HsdNode::assign("UnpairedElectrons", mol.spin.saturating_sub(1))],
            ));
            let mut constants = Vec::new();
            if method == DftbMethod::Dftb {
                constants.push(HsdNode::assign("ShellResolvedSpin", "Yes"));
            }
            for atom in atom_types {
                let values = lookup(&SPIN_CONSTANTS, atom, "spin constants")?;
                let line = values.iter().map(|v| real(*v)).collect::<Vec<_>>().join(" ");
                constants.push(HsdNode::group(format!("{} =", atom), vec![HsdNode::line(line)]));
            }
            children.push(HsdNode::group("SpinConstants =", constants));
        }

        if let Some(solver) = &self.config.solver {
            children.push(HsdNode::line(format!("Solver = {} {{}}", solver)));
        }

        match method {
            DftbMethod::Dftb => {
                children.push(HsdNode::assign("Scc", "Yes"));
                children.push(HsdNode::group(
                    "SlaterKosterFiles = Type2FileNames",
                    vec![
                        HsdNode::assign(
                            "Prefix",
                            format!(
                                "\"{}/\"",
                                Path::new(param_dir).join(&self.config.parameters).display()
                            ),
                        ),
                        HsdNode::assign("Separator", "\"-\""),
                        HsdNode::assign("Suffix", "\".skf\""),
                    ],
                ));
                let mut momenta = Vec::new();
                for atom in atom_types {
                    let shell = lookup(&MAX_ANGULAR_MOMENTUM, atom, "maximum angular momentum")?;
                    momenta.push(HsdNode::assign(atom.as_str(), format!("\"{}\"", shell)));
                }
                children.push(HsdNode::group("MaxAngularMomentum", momenta));
                if mol.is_periodic() {
                    children.push(HsdNode::assign("kPointsAndWeights", "{ 0.0 0.0 0.0 1.0 }"));
                }
                if self.config.thirdorder {
                    children.push(HsdNode::assign("ThirdOrderFull", "Yes"));
                    let mut derivs = Vec::new();
                    for atom in atom_types {
                        let value = lookup(&HUBBARD_DERIVS, atom, "Hubbard derivative")?;
                        derivs.push(HsdNode::assign(atom.as_str(), real(value)));
                    }
                    children.push(HsdNode::group("HubbardDerivs", derivs));
                    children.push(HsdNode::group(
                        "HCorrection = Damping",
                        vec![HsdNode::assign("Exponent", "4.00")],
                    ));
                }
                if self.config.dispersion {
                    children.push(HsdNode::group(
                        "Dispersion = SimpleDftD3",
                        vec![
                            HsdNode::assign("a1", "0.746"),
                            HsdNode::assign("a2", "4.191"),
                            HsdNode::assign("s6", "1.0"),
                            HsdNode::assign("s8", "3.209"),
                        ],
                    ));
                }
            }
            DftbMethod::Xtb => {
                children.push(HsdNode::assign("Method", "\"GFN2-xTB\""));
                if mol.is_periodic() {
                    children.push(HsdNode::assign("kPointsAndWeights", "{ 0.0 0.0 0.0 1.0 }"));
                }
            }
        }

        Ok(HsdNode::group(format!("Hamiltonian = {}", method.as_str()), children))
    }

    /// Process invocation for the configured parallel mode.
    pub fn command(&self, scratch: &Path, ncores: usize) -> Result<EngineCommand> {
        let executables = self.ctx.settings().executables();
        let dftb = resolve_executable(&executables.dftbplus, "dftb+")?;
        let cmd = match self.config.parallel {
            Parallel::Mpi => {
                let mpirun = resolve_executable(&executables.mpirun, "mpirun")?;
                EngineCommand::new("DFTB+", mpirun, scratch)
                    .arg("-np")
                    .arg(ncores)
                    .args(self.ctx.settings().general().mpi_flags.split_whitespace())
                    .arg(dftb.display())
                    .env("OMP_NUM_THREADS", 1)
            }
            Parallel::NoMpi => {
                EngineCommand::new("DFTB+", dftb, scratch).env("OMP_NUM_THREADS", ncores)
            }
        };
        Ok(cmd
            .stderr_append(scratch.join("output.err"))
            .timeout(self.ctx.timeout()))
    }

    /// Renders the input, runs DFTB+ and checks its log.
    fn run_task(
        &self,
        mol: &Molecule,
        task: &DftbTask,
        calc: &str,
        run: &RunOptions,
    ) -> Result<(ScratchDir, ParsedLog)> {
        let param_dir = match self.config.method {
            DftbMethod::Dftb => self.param_dir()?,
            DftbMethod::Xtb => String::new(),
        };
        let input = self.build_input(mol, task, &param_dir)?;

        let scratch = self.ctx.scratch(&mol.name, &self.output_suffix(), calc, run)?;
        io::write_gen(
            &mol.geometry,
            mol.box_side,
            &scratch.join(&format!("{}.gen", mol.name)),
        )?;
        fs::write(scratch.join(DFTB_INPUT_FILE), input.to_text())?;

        let ncores = self.ctx.ncores(run);
        debug!("Running DFTB+ calculation on {} cores", ncores);
        self.command(scratch.path(), ncores)?.run()?;

        let parsed = DftbLogParser::new(self.provenance()).parse_file(&scratch.join(DFTB_LOG_FILE))?;
        Ok((scratch, parsed))
    }

    fn finish(&self, scratch: ScratchDir, mol: &Molecule, calc: &str) -> Result<()> {
        self.ctx.reporter().record(
            mol,
            &self.output_suffix(),
            calc,
            &scratch.join(DFTB_LOG_FILE),
            None,
        )?;
        scratch.finish()?;
        Ok(())
    }

    /// Geometry optimization; `lattice_opt` also relaxes the box.
    pub fn opt_with(&self, mol: &mut Molecule, lattice_opt: bool, run: &RunOptions) -> Result<Option<Molecule>> {
        info!("{}, charge {} spin {} - {} OPT", mol.name, mol.charge, mol.spin, self.method());
        let (scratch, parsed) = self.run_task(mol, &DftbTask::Opt { lattice_opt }, "opt", run)?;
        let geometry = io::read_xyz(&scratch.join(DFTB_END_GEOMETRY))?;

        let mut result = mol.with_geometry(geometry, &self.level_of_theory());
        result.properties.absorb(parsed.properties);
        annotate(&mut result, parsed.advisories);

        self.finish(scratch, &result, "opt")?;
        Ok(deliver(mol, result, run.inplace))
    }

    /// NVT molecular dynamics; returns the trajectory frames.
    pub fn md_nvt(&self, mol: &Molecule, opts: &MdOptions) -> Result<Ensemble> {
        info!("{}, charge {} spin {} - {} NVT MD", mol.name, mol.charge, mol.spin, self.method());
        let mut system = mol.clone();
        if opts.box_side.is_some() {
            system.box_side = opts.box_side;
        }
        let task = DftbTask::MdNvt {
            steps: opts.steps,
            timestep: opts.timestep,
            temperature: opts.temperature,
            mdrestartfreq: opts.mdrestartfreq,
        };
        let (scratch, _) = self.run_task(&system, &task, "md_nvt", &opts.run)?;
        let frames = trajectory_frames(&scratch.join(DFTB_END_GEOMETRY))?;
        let members = molecules_from_frames(&system, frames, "", system.charge, &self.provenance())?;

        self.finish(scratch, mol, "md_nvt")?;
        Ok(Ensemble::new(members))
    }

    /// Simulated annealing; the last trajectory frame becomes the new
    /// geometry.
    pub fn simulated_annealing(&self, mol: &mut Molecule, opts: &AnnealingOptions) -> Result<Option<Molecule>> {
        info!(
            "{}, charge {} spin {} - {} Simulated Annealing",
            mol.name,
            mol.charge,
            mol.spin,
            self.method()
        );
        debug!(
            "Heating/cooling between {}K and {}K for {} steps and holding max temp for {} steps",
            opts.start_temp, opts.target_temp, opts.ramp_steps, opts.hold_steps
        );
        let mut system = mol.clone();
        if opts.box_side.is_some() {
            system.box_side = opts.box_side;
        }
        let task = DftbTask::Annealing {
            start_temp: opts.start_temp,
            target_temp: opts.target_temp,
            ramp_steps: opts.ramp_steps,
            hold_steps: opts.hold_steps,
            timestep: opts.timestep,
            mdrestartfreq: opts.mdrestartfreq,
        };
        let (scratch, parsed) = self.run_task(&system, &task, "anneal", &opts.run)?;
        let end_geometry = scratch.join(DFTB_END_GEOMETRY);
        let last = trajectory_frames(&end_geometry)?
            .pop()
            .ok_or_else(|| QCError::parse(format!("No frames in {}", end_geometry.display())))?;

        let mut result = system.with_geometry(last.geometry, &self.level_of_theory());
        annotate(&mut result, parsed.advisories);

        self.finish(scratch, &result, "anneal")?;
        Ok(deliver(mol, result, opts.run.inplace))
    }
}

/// Reads `geo_end.xyz` frames; MD comments hold step counters, not energies.
fn trajectory_frames(path: &Path) -> Result<Vec<XyzFrame>> {
    Ok(io::read_multi_xyz(path)?
        .into_iter()
        .map(|frame| XyzFrame {
            comment: String::new(),
            ..frame
        })
        .collect())
}

impl Engine for DftbEngine {
    fn name(&self) -> &str {
        "DFTB+"
    }

    fn method(&self) -> &str {
        self.config.method.as_str()
    }

    fn level_of_theory(&self) -> String {
        let parameters = match self.config.method {
            DftbMethod::Dftb => self.config.parameters.as_str(),
            DftbMethod::Xtb => "gfn2",
        };
        format!(
            "{} | parameters: {} | 3rd order: {} | dispersion: {}",
            self.method(),
            parameters,
            self.config.thirdorder,
            self.config.dispersion
        )
    }

    fn output_suffix(&self) -> String {
        let mut suffix = "DFTB".to_string();
        if self.config.thirdorder {
            suffix.push('3');
        }
        if self.config.dispersion {
            suffix.push_str("-D3");
        }
        clean_suffix(&suffix)
    }

    fn spe(&self, mol: &mut Molecule, run: &RunOptions) -> Result<Option<Molecule>> {
        info!("{}, charge {} spin {} - {} SPE", mol.name, mol.charge, mol.spin, self.method());
        let (scratch, parsed) = self.run_task(mol, &DftbTask::Spe, "spe", run)?;

        let mut result = mol.clone();
        result.properties.absorb(parsed.properties);
        annotate(&mut result, parsed.advisories);

        self.finish(scratch, &result, "spe")?;
        Ok(deliver(mol, result, run.inplace))
    }

    fn opt(&self, mol: &mut Molecule, run: &RunOptions) -> Result<Option<Molecule>> {
        self.opt_with(mol, false, run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;

    fn water(spin: u32) -> Molecule {
        let geometry = Geometry::new(
            vec!["O".to_string(), "H".to_string(), "H".to_string()],
            vec![0.0, 0.0, 0.0, 0.757, 0.586, 0.0, -0.757, 0.586, 0.0],
        )
        .unwrap();
        Molecule::new("water", geometry, 0, spin).unwrap()
    }

    #[test]
    fn test_spe_input() {
        let engine = DftbEngine::default();
        let text = engine
            .build_input(&water(1), &DftbTask::Spe, "/opt/slakos")
            .unwrap()
            .to_text();

        assert!(text.starts_with("Geometry = GenFormat {\n  <<< \"water.gen\"\n}\n\n"));
        assert!(text.contains("Driver = GeometryOptimization {\n  MaxSteps = 0\n}\n"));
        assert!(text.contains("Hamiltonian = DFTB {\n  MaxSCCIterations = 500\n  Charge = 0\n"));
        assert!(text.contains("    Prefix = \"/opt/slakos/3ob/3ob-3-1/\"\n"));
        assert!(text.contains("  MaxAngularMomentum {\n    O = \"p\"\n    H = \"s\"\n  }\n"));
        assert!(text.contains("  HubbardDerivs {\n    O = -0.1575\n    H = -0.1857\n  }\n"));
        assert!(text.contains("  HCorrection = Damping {\n    Exponent = 4.00\n  }\n"));
        assert!(!text.contains("SpinPolarisation"));
        assert!(text.ends_with("ParserOptions {\n  ParserVersion = 11\n}\n"));
    }

    #[test]
    fn test_open_shell_spin_constants() {
        let engine = DftbEngine::default();
        let text = engine
            .build_input(&water(3), &DftbTask::Spe, "/p")
            .unwrap()
            .to_text();
        assert!(text.contains("  SpinPolarisation = Colinear {\n    UnpairedElectrons = 2\n  }\n"));
        assert!(text.contains("    ShellResolvedSpin = Yes\n"));
        assert!(text.contains("    O = {\n      -0.035 -0.03 -0.03 -0.028\n    }\n"));
    }

    #[test]
    fn test_unknown_element_is_configuration_error() {
        let geometry = Geometry::new(vec!["Xe".to_string()], vec![0.0, 0.0, 0.0]).unwrap();
        let xenon = Molecule::new("xe", geometry, 0, 1).unwrap();
        let err = DftbEngine::default()
            .build_input(&xenon, &DftbTask::Spe, "/p")
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_annealing_profile() {
        let task = DftbTask::Annealing {
            start_temp: 1.0,
            target_temp: 2000.0,
            ramp_steps: 500,
            hold_steps: 1000,
            timestep: 1.0,
            mdrestartfreq: 100,
        };
        let text = DftbEngine::default()
            .build_input(&water(1), &task, "/p")
            .unwrap()
            .to_text();
        assert!(text.contains(
            "    Temperature [Kelvin] = TemperatureProfile {\n      constant 1 1.0\n      linear 499 2000.0\n      constant 1000 2000.0\n      linear 500 1.0\n    }\n"
        ));
        assert!(text.contains("  TimeStep [fs] = 1.0\n"));
    }

    #[test]
    fn test_md_driver_and_xtb_hamiltonian() {
        let config = DftbConfig {
            method: DftbMethod::Xtb,
            ..DftbConfig::default()
        };
        let mut mol = water(1);
        mol.box_side = Some(12.0);
        let task = DftbTask::MdNvt {
            steps: 5000,
            timestep: 0.5,
            temperature: 298.0,
            mdrestartfreq: 10,
        };
        let text = DftbEngine::new(config)
            .build_input(&mol, &task, "")
            .unwrap()
            .to_text();
        assert!(text.contains("    Temperature [K] = 298.0\n    CouplingStrength [cm^-1] = 3200\n"));
        assert!(text.contains("  Steps = 5000\n"));
        assert!(text.contains("Hamiltonian = xTB {\n"));
        assert!(text.contains("  Method = \"GFN2-xTB\"\n  kPointsAndWeights = { 0.0 0.0 0.0 1.0 }\n"));
        assert!(!text.contains("SlaterKosterFiles"));
    }

    #[test]
    fn test_suffix_and_level_of_theory() {
        let config = DftbConfig {
            dispersion: true,
            ..DftbConfig::default()
        };
        let engine = DftbEngine::new(config);
        assert_eq!(engine.output_suffix(), "DFTB3-D3");
        assert_eq!(
            engine.level_of_theory(),
            "DFTB | parameters: 3ob/3ob-3-1 | 3rd order: true | dispersion: true"
        );
    }
}
