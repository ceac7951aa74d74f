//! xTB facade.
//!
//! Runs `xtb geom.xyz --chrg C --uhf S-1 [method] [--alpb S] [task] -P N`
//! with stdout in `output.out` and stderr appended to `output.err`, then
//! collects the result files with [`XtbLogParser`].

use super::{annotate, deliver, Engine, EngineContext, RunOptions};
use crate::error::{QCError, Result};
use crate::io::{self, clean_suffix};
use crate::molecule::Molecule;
use crate::parser::xtb::{XtbLogParser, XTB_ERR_FILE, XTB_OPT_GEOMETRY};
use crate::runner::{resolve_executable, EngineCommand};
use crate::scratch::ScratchDir;
use log::info;
use std::fmt;
use std::str::FromStr;

const GEOMETRY_FILE: &str = "geom.xyz";

/// Hamiltonian selected on the xTB command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XtbMethod {
    /// GFN0-xTB
    Gfn0,
    /// GFN1-xTB
    Gfn1,
    /// GFN2-xTB
    Gfn2,
    /// GFN-FF force field
    GfnFf,
}

impl XtbMethod {
    /// Lower case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            XtbMethod::Gfn0 => "gfn0",
            XtbMethod::Gfn1 => "gfn1",
            XtbMethod::Gfn2 => "gfn2",
            XtbMethod::GfnFf => "gfnff",
        }
    }

    /// Command line flags selecting the method.
    pub fn flags(&self) -> Vec<&'static str> {
        match self {
            XtbMethod::Gfn0 => vec!["--gfn", "0"],
            XtbMethod::Gfn1 => vec!["--gfn", "1"],
            XtbMethod::Gfn2 => vec!["--gfn", "2"],
            XtbMethod::GfnFf => vec!["--gfnff"],
        }
    }
}

impl FromStr for XtbMethod {
    type Err = QCError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gfn0" => Ok(XtbMethod::Gfn0),
            "gfn1" => Ok(XtbMethod::Gfn1),
            "gfn2" => Ok(XtbMethod::Gfn2),
            "gfnff" | "gfn-ff" => Ok(XtbMethod::GfnFf),
            _ => Err(QCError::config(format!(
                "`{}` is not a valid xTB method. Must be one of gfn0, gfn1, gfn2, gfnff",
                s
            ))),
        }
    }
}

impl fmt::Display for XtbMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optimization thresholds accepted by `--opt` and `--ohess`.
pub const OPT_LEVELS: [&str; 8] = [
    "crude", "sloppy", "loose", "lax", "normal", "tight", "vtight", "extreme",
];

/// Checks an optimization level against [`OPT_LEVELS`] and returns it in
/// lower case.
pub fn check_opt_level(level: &str) -> Result<String> {
    let level = level.trim().to_lowercase();
    if OPT_LEVELS.contains(&level.as_str()) {
        Ok(level)
    } else {
        Err(QCError::config(format!(
            "`{}` is not a valid xTB optimization level. Must be one of {}",
            level,
            OPT_LEVELS.join(", ")
        )))
    }
}

/// Options of an xTB geometry optimization.
#[derive(Debug, Clone)]
pub struct XtbOptOptions {
    /// Shared run options
    pub run: RunOptions,
    /// Convergence threshold, one of [`OPT_LEVELS`]
    pub level: String,
    /// Run `--ohess` to follow the optimization with a Hessian
    pub frequency_analysis: bool,
}

impl Default for XtbOptOptions {
    fn default() -> Self {
        Self {
            run: RunOptions::default(),
            level: "normal".to_string(),
            frequency_analysis: false,
        }
    }
}

/// xTB engine configuration.
#[derive(Debug, Clone)]
pub struct XtbEngine {
    method: XtbMethod,
    solvent: Option<String>,
    ctx: EngineContext,
}

impl Default for XtbEngine {
    fn default() -> Self {
        Self {
            method: XtbMethod::Gfn2,
            solvent: None,
            ctx: EngineContext::default(),
        }
    }
}

impl XtbEngine {
    /// Creates an engine for `method` (gfn0, gfn1, gfn2, gfnff) with an
    /// optional ALPB solvent.
    pub fn new(method: &str, solvent: Option<&str>) -> Result<Self> {
        Ok(Self {
            method: method.parse()?,
            solvent: solvent.filter(|s| !s.is_empty()).map(str::to_string),
            ctx: EngineContext::default(),
        })
    }

    /// Replaces the settings and report context.
    pub fn with_context(mut self, ctx: EngineContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// ALPB solvent.
    pub fn solvent(&self) -> Option<&str> {
        self.solvent.as_deref()
    }

    /// Command line arguments after the geometry file.
    pub fn arguments(&self, mol: &Molecule, task: &[String], ncores: usize) -> Vec<String> {
        let mut args = vec![
            GEOMETRY_FILE.to_string(),
            "--chrg".to_string(),
            mol.charge.to_string(),
            "--uhf".to_string(),
            mol.spin.saturating_sub(1).to_string(),
        ];
        args.extend(self.method.flags().into_iter().map(str::to_string));
        if let Some(solvent) = &self.solvent {
            args.push("--alpb".to_string());
            args.push(solvent.clone());
        }
        args.extend(task.iter().cloned());
        args.push("-P".to_string());
        args.push(ncores.to_string());
        args
    }

    fn execute(&self, scratch: &ScratchDir, mol: &Molecule, task: &[String], run: &RunOptions) -> Result<()> {
        io::write_xyz(&mol.geometry, &mol.name, &scratch.join(GEOMETRY_FILE))?;
        let exe = resolve_executable(&self.ctx.settings().executables().xtb, "xtb")?;
        let ncores = self.ctx.ncores(run);
        EngineCommand::new("xTB", exe, scratch.path())
            .args(self.arguments(mol, task, ncores))
            .env("OMP_NUM_THREADS", ncores)
            .stderr_append(scratch.join(XTB_ERR_FILE))
            .timeout(self.ctx.timeout())
            .run()?;
        Ok(())
    }

    fn finish(&self, scratch: ScratchDir, mol: &Molecule, calc: &str) -> Result<()> {
        self.ctx.reporter().record(
            mol,
            &self.output_suffix(),
            calc,
            &scratch.join("output.out"),
            None,
        )?;
        scratch.finish()?;
        Ok(())
    }

    /// Hessian calculation (`--hess`) on the current geometry.
    pub fn freq(&self, mol: &mut Molecule, run: &RunOptions) -> Result<Option<Molecule>> {
        info!("{}, charge {} spin {} - {} FREQ", mol.name, mol.charge, mol.spin, self.method);
        let scratch = self.ctx.scratch(&mol.name, &self.output_suffix(), "freq", run)?;
        self.execute(&scratch, mol, &["--hess".to_string()], run)?;
        let parsed = XtbLogParser::new(self.provenance()).parse_dir(scratch.path())?;

        let mut result = mol.clone();
        result.properties.absorb(parsed.properties);
        annotate(&mut result, parsed.advisories);

        self.finish(scratch, &result, "freq")?;
        Ok(deliver(mol, result, run.inplace))
    }

    /// Geometry optimization (`--opt LEVEL`, or `--ohess LEVEL` with a
    /// frequency analysis); the new geometry is read from `xtbopt.xyz`.
    pub fn opt_with(&self, mol: &mut Molecule, opts: &XtbOptOptions) -> Result<Option<Molecule>> {
        let level = check_opt_level(&opts.level)?;
        info!("{}, charge {} spin {} - {} OPT", mol.name, mol.charge, mol.spin, self.method);

        let flag = if opts.frequency_analysis { "--ohess" } else { "--opt" };
        let scratch = self.ctx.scratch(&mol.name, &self.output_suffix(), "opt", &opts.run)?;
        self.execute(&scratch, mol, &[flag.to_string(), level], &opts.run)?;
        let parsed = XtbLogParser::new(self.provenance()).parse_dir(scratch.path())?;
        let geometry = io::read_xyz(&scratch.join(XTB_OPT_GEOMETRY))?;

        let mut result = mol.with_geometry(geometry, &self.level_of_theory());
        result.properties.absorb(parsed.properties);
        annotate(&mut result, parsed.advisories);

        self.finish(scratch, &result, "opt")?;
        Ok(deliver(mol, result, opts.run.inplace))
    }
}

impl Engine for XtbEngine {
    fn name(&self) -> &str {
        "xTB"
    }

    fn method(&self) -> &str {
        self.method.as_str()
    }

    fn level_of_theory(&self) -> String {
        format!(
            "{} | solvent: {}",
            self.method,
            self.solvent.as_deref().unwrap_or("None")
        )
    }

    fn output_suffix(&self) -> String {
        clean_suffix(&format!(
            "xtb_{}_{}",
            self.method,
            self.solvent.as_deref().unwrap_or("vacuum")
        ))
    }

    fn spe(&self, mol: &mut Molecule, run: &RunOptions) -> Result<Option<Molecule>> {
        info!("{}, charge {} spin {} - {} SPE", mol.name, mol.charge, mol.spin, self.method);
        let scratch = self.ctx.scratch(&mol.name, &self.output_suffix(), "spe", run)?;
        self.execute(&scratch, mol, &[], run)?;
        let parsed = XtbLogParser::new(self.provenance()).parse_dir(scratch.path())?;

        let mut result = mol.clone();
        result.properties.absorb(parsed.properties);
        annotate(&mut result, parsed.advisories);

        self.finish(scratch, &result, "spe")?;
        Ok(deliver(mol, result, run.inplace))
    }

    fn opt(&self, mol: &mut Molecule, run: &RunOptions) -> Result<Option<Molecule>> {
        let opts = XtbOptOptions {
            run: run.clone(),
            ..XtbOptOptions::default()
        };
        self.opt_with(mol, &opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;

    fn radical() -> Molecule {
        let geometry = Geometry::new(
            vec!["O".to_string(), "H".to_string()],
            vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.97],
        )
        .unwrap();
        Molecule::new("oh", geometry, -1, 2).unwrap()
    }

    #[test]
    fn test_arguments() {
        let xtb = XtbEngine::new("gfn2", Some("water")).unwrap();
        let args = xtb.arguments(&radical(), &["--opt".to_string(), "tight".to_string()], 4);
        assert_eq!(
            args.join(" "),
            "geom.xyz --chrg -1 --uhf 1 --gfn 2 --alpb water --opt tight -P 4"
        );

        let ff = XtbEngine::new("GFNFF", None).unwrap();
        assert_eq!(
            ff.arguments(&radical(), &[], 1).join(" "),
            "geom.xyz --chrg -1 --uhf 1 --gfnff -P 1"
        );
    }

    #[test]
    fn test_zero_spin_set_after_construction() {
        let mut mol = radical();
        mol.spin = 0;
        let args = XtbEngine::default().arguments(&mol, &[], 1);
        assert_eq!(args.join(" "), "geom.xyz --chrg -1 --uhf 0 --gfn 2 -P 1");
    }

    #[test]
    fn test_method_vocabulary() {
        assert!(XtbEngine::new("gfn3", None).unwrap_err().is_configuration());
        assert_eq!(XtbEngine::default().method(), "gfn2");
    }

    #[test]
    fn test_opt_levels() {
        assert_eq!(check_opt_level("VTIGHT").unwrap(), "vtight");
        assert!(check_opt_level("ultra").unwrap_err().is_configuration());
    }

    #[test]
    fn test_suffix_and_level_of_theory() {
        let xtb = XtbEngine::new("gfn1", None).unwrap();
        assert_eq!(xtb.output_suffix(), "xtb_gfn1_vacuum");
        assert_eq!(xtb.level_of_theory(), "gfn1 | solvent: None");
    }
}
