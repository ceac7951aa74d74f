//! Declarative description of one ORCA calculation request.
//!
//! A [`JobSpecification`] is built fresh by the engine facade for every call,
//! handed to the renderer and dropped afterwards. It holds:
//!
//! - resource limits (cores, memory per core)
//! - calculation mode flags (optimization, frequencies, scan, TS search, NEB)
//! - solvent, constraints and plotting options
//! - enumerated resolution options ([`OptimizationLevel`],
//!   [`ScfConvergenceLevel`], [`ScfConvergenceStrategy`], [`PrintLevel`])
//! - user supplied raw directive blocks
//!
//! Enumerated options only accept their closed vocabulary. Parsing is case
//! insensitive and values are stored in canonical upper case:
//!
//! ```
//! use qcflow::job::{JobSpecification, OptimizationLevel};
//!
//! let mut job = JobSpecification::new();
//! job.set_optimization_level(Some("tightopt")).unwrap();
//! assert_eq!(job.optimization_level(), Some(OptimizationLevel::TightOpt));
//! assert_eq!(job.optimization_level().unwrap().to_string(), "TIGHTOPT");
//!
//! assert!(job.set_optimization_level(Some("superopt")).is_err());
//! ```
//!
//! # Directive blocks
//!
//! User blocks are case folded (block names and keys lowercased). The library
//! derives its own entries from the flags and merges them into the user
//! block of the same name; on a key collision the library value wins.

use crate::error::{QCError, Result};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Default memory per core in MB.
pub const DEFAULT_MAXCORE: u32 = 750;

/// Blocks whose content the library may extend, in rendering order.
pub const LIBRARY_BLOCKS: [&str; 6] = ["geom", "cpcm", "plots", "output", "elprop", "neb"];

/// Number of cores available to this process.
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

macro_rules! closed_vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Every accepted value in canonical form.
            pub const ACCEPTED_VALUES: &'static [&'static str] = &[$($text),+];

            /// Canonical upper case keyword.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = QCError;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_uppercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(QCError::config(format!(
                        "`{}` is not a valid {}. Must be one of {}",
                        s,
                        $label,
                        Self::ACCEPTED_VALUES.join(", ")
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

closed_vocabulary! {
    /// Convergence level of a geometry optimization.
    OptimizationLevel, "optimization level" {
        /// `VERYTIGHTOPT`
        VeryTightOpt => "VERYTIGHTOPT",
        /// `TIGHTOPT`
        TightOpt => "TIGHTOPT",
        /// `NORMALOPT`
        NormalOpt => "NORMALOPT",
        /// `LOOSEOPT`
        LooseOpt => "LOOSEOPT",
    }
}

closed_vocabulary! {
    /// SCF convergence threshold preset.
    ScfConvergenceLevel, "SCF convergence level" {
        /// `NORMALSCF`
        NormalScf => "NORMALSCF",
        /// `LOOSESCF`
        LooseScf => "LOOSESCF",
        /// `SLOPPYSCF`
        SloppyScf => "SLOPPYSCF",
        /// `STRONGSCF`
        StrongScf => "STRONGSCF",
        /// `TIGHTSCF`
        TightScf => "TIGHTSCF",
        /// `VERYTIGHTSCF`
        VeryTightScf => "VERYTIGHTSCF",
        /// `EXTREMESCF`
        ExtremeScf => "EXTREMESCF",
    }
}

closed_vocabulary! {
    /// SCF convergence strategy preset.
    ScfConvergenceStrategy, "SCF convergence strategy" {
        /// `EASYCONV`
        EasyConv => "EASYCONV",
        /// `NORMALCONV`
        NormalConv => "NORMALCONV",
        /// `SLOWCONV`
        SlowConv => "SLOWCONV",
        /// `VERYSLOWCONV`
        VerySlowConv => "VERYSLOWCONV",
        /// `FORCECONV`
        ForceConv => "FORCECONV",
        /// `IGNORECONV`
        IgnoreConv => "IGNORECONV",
    }
}

closed_vocabulary! {
    /// Verbosity of the engine log.
    PrintLevel, "print level" {
        /// `MINIPRINT`
        MiniPrint => "MINIPRINT",
        /// `SMALLPRINT`
        SmallPrint => "SMALLPRINT",
        /// `NORMALPRINT`
        NormalPrint => "NORMALPRINT",
        /// `LARGEPRINT`
        LargePrint => "LARGEPRINT",
    }
}

/// One entry of a directive block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BlockEntry {
    /// `key value`
    Value(String),
    /// `key` followed by nested `subkey value` lines and `end`
    Section(IndexMap<String, String>),
}

impl From<&str> for BlockEntry {
    fn from(value: &str) -> Self {
        BlockEntry::Value(value.to_string())
    }
}

impl From<String> for BlockEntry {
    fn from(value: String) -> Self {
        BlockEntry::Value(value)
    }
}

impl From<IndexMap<String, String>> for BlockEntry {
    fn from(value: IndexMap<String, String>) -> Self {
        BlockEntry::Section(value)
    }
}

/// Ordered key/value content of one directive block.
pub type Block = IndexMap<String, BlockEntry>;

/// Ordered mapping block name to block content.
pub type Blocks = IndexMap<String, Block>;

/// Builds a block from `(key, value)` pairs.
///
/// # Examples
///
/// ```
/// use qcflow::job::{block, BlockEntry};
///
/// let scf = block([("MaxIter", "500")]);
/// assert_eq!(scf.get("MaxIter"), Some(&BlockEntry::Value("500".to_string())));
/// ```
pub fn block<I, K, V>(entries: I) -> Block
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<BlockEntry>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Lowercases block names and keys. Later duplicates overwrite earlier ones.
pub fn case_fold_blocks(blocks: &Blocks) -> Blocks {
    let mut folded = Blocks::new();
    for (name, content) in blocks {
        let target = folded.entry(name.to_lowercase()).or_default();
        for (key, value) in content {
            target.insert(key.to_lowercase(), value.clone());
        }
    }
    folded
}

/// Calculation request rendered into one ORCA input file.
#[derive(Debug, Clone)]
pub struct JobSpecification {
    ncores: usize,
    maxcore: u32,
    /// Closed shell singlet (controls spin density plots)
    pub is_singlet: bool,
    /// SMD solvent name
    pub solvent: Option<String>,
    /// Geometry optimization
    pub opt: bool,
    /// Transition state optimization
    pub opt_ts: bool,
    /// Analytical frequencies
    pub freq: bool,
    /// Numerical frequencies
    pub nfreq: bool,
    /// Relaxed surface scan definition
    pub scan: Option<String>,
    /// Scan followed by a TS optimization from the highest point
    pub scan_ts: Option<String>,
    /// Climbing image NEB
    pub neb_ci: bool,
    /// NEB followed by a TS optimization
    pub neb_ts: bool,
    /// Constraint definition for the `%geom` block
    pub constraints: Option<String>,
    /// Treat the constraints as the only coordinates left free
    pub invert_constraints: bool,
    /// Full relaxed scan before the ScanTS step
    pub fullscan: bool,
    /// Grid dimension of the density cube files
    pub cube_dim: Option<u32>,
    /// Exact Hessian at the start of a TS optimization
    pub calc_hess: bool,
    /// Print the Hirshfeld population analysis
    pub hirshfeld: bool,
    /// Overtones and combination bands
    pub nearir: bool,
    /// Polarizabilities and Raman spectrum
    pub raman: bool,
    /// Product coordinate file of a NEB run
    pub neb_product: Option<String>,
    /// TS guess coordinate file of a NEB run
    pub neb_ts_guess: Option<String>,
    /// Number of NEB images, endpoints excluded
    pub neb_images: Option<u32>,
    /// Pre-optimize the NEB endpoints
    pub neb_preopt: bool,
    user_blocks: Blocks,
    print_level: Option<PrintLevel>,
    optimization_level: Option<OptimizationLevel>,
    scf_convergence_level: Option<ScfConvergenceLevel>,
    scf_convergence_strategy: Option<ScfConvergenceStrategy>,
}

impl Default for JobSpecification {
    fn default() -> Self {
        Self {
            ncores: available_cores(),
            maxcore: DEFAULT_MAXCORE,
            is_singlet: true,
            solvent: None,
            opt: false,
            opt_ts: false,
            freq: false,
            nfreq: false,
            scan: None,
            scan_ts: None,
            neb_ci: false,
            neb_ts: false,
            constraints: None,
            invert_constraints: false,
            fullscan: false,
            cube_dim: None,
            calc_hess: false,
            hirshfeld: false,
            nearir: false,
            raman: false,
            neb_product: None,
            neb_ts_guess: None,
            neb_images: None,
            neb_preopt: false,
            user_blocks: Blocks::new(),
            print_level: None,
            optimization_level: None,
            scf_convergence_level: None,
            scf_convergence_strategy: None,
        }
    }
}

impl JobSpecification {
    /// Creates a specification with default resources and no active flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cores handed to the engine.
    pub fn ncores(&self) -> usize {
        self.ncores
    }

    /// Sets the core count, `None` selects every available core.
    ///
    /// # Errors
    ///
    /// Returns [`QCError::Configuration`] for zero cores.
    pub fn set_ncores(&mut self, value: Option<usize>) -> Result<()> {
        match value {
            Some(0) => Err(QCError::config("ncores must be at least 1")),
            Some(n) => {
                self.ncores = n;
                Ok(())
            }
            None => {
                self.ncores = available_cores();
                Ok(())
            }
        }
    }

    /// Memory per core in MB.
    pub fn maxcore(&self) -> u32 {
        self.maxcore
    }

    /// Sets the memory per core, `None` restores [`DEFAULT_MAXCORE`].
    pub fn set_maxcore(&mut self, value: Option<u32>) -> Result<()> {
        match value {
            Some(0) => Err(QCError::config("maxcore must be greater than 0 MB")),
            Some(mb) => {
                self.maxcore = mb;
                Ok(())
            }
            None => {
                self.maxcore = DEFAULT_MAXCORE;
                Ok(())
            }
        }
    }

    /// Print level, if set.
    pub fn print_level(&self) -> Option<PrintLevel> {
        self.print_level
    }

    /// Sets the print level from its keyword; `None` unsets it.
    pub fn set_print_level(&mut self, value: Option<&str>) -> Result<()> {
        self.print_level = value.map(str::parse::<PrintLevel>).transpose()?;
        Ok(())
    }

    /// Optimization level, if set.
    pub fn optimization_level(&self) -> Option<OptimizationLevel> {
        self.optimization_level
    }

    /// Sets the optimization level from its keyword; `None` unsets it.
    pub fn set_optimization_level(&mut self, value: Option<&str>) -> Result<()> {
        self.optimization_level = value.map(str::parse::<OptimizationLevel>).transpose()?;
        Ok(())
    }

    /// SCF convergence level, if set.
    pub fn scf_convergence_level(&self) -> Option<ScfConvergenceLevel> {
        self.scf_convergence_level
    }

    /// Sets the SCF convergence level from its keyword; `None` unsets it.
    pub fn set_scf_convergence_level(&mut self, value: Option<&str>) -> Result<()> {
        self.scf_convergence_level = value.map(str::parse::<ScfConvergenceLevel>).transpose()?;
        Ok(())
    }

    /// SCF convergence strategy, if set.
    pub fn scf_convergence_strategy(&self) -> Option<ScfConvergenceStrategy> {
        self.scf_convergence_strategy
    }

    /// Sets the SCF convergence strategy from its keyword; `None` unsets it.
    pub fn set_scf_convergence_strategy(&mut self, value: Option<&str>) -> Result<()> {
        self.scf_convergence_strategy = value.map(str::parse::<ScfConvergenceStrategy>).transpose()?;
        Ok(())
    }

    /// Case folded user blocks.
    pub fn user_blocks(&self) -> &Blocks {
        &self.user_blocks
    }

    /// Replaces the user blocks, lowercasing block names and keys.
    pub fn set_user_blocks(&mut self, blocks: &Blocks) {
        self.user_blocks = case_fold_blocks(blocks);
    }

    /// Checks the flag combination before rendering.
    ///
    /// # Errors
    ///
    /// Returns [`QCError::Configuration`] when optimization and TS
    /// optimization are both requested, when both NEB variants are active, or
    /// when a NEB run has no product structure.
    pub fn validate(&self) -> Result<()> {
        if self.opt && self.opt_ts {
            return Err(QCError::config(
                "Optimization and transition state optimization cannot be requested together",
            ));
        }
        if self.neb_ci && self.neb_ts {
            return Err(QCError::config("NEB-CI and NEB-TS cannot be requested together"));
        }
        if (self.neb_ci || self.neb_ts) && self.neb_product.is_none() {
            return Err(QCError::config("NEB calculation requested without a product structure"));
        }
        Ok(())
    }

    fn user_block(&self, name: &str) -> Block {
        self.user_blocks.get(name).cloned().unwrap_or_default()
    }

    /// `%geom` content: user entries plus scan, constraint and Hessian flags.
    pub fn geom_block(&self) -> Block {
        let mut block = self.user_block("geom");
        if self.calc_hess {
            block.insert("calc_hess".to_string(), "true".into());
        }
        if self.fullscan {
            block.insert("fullscan".to_string(), "true".into());
        }
        if let Some(scan) = &self.scan {
            block.insert("scan".to_string(), format!("{}  end", scan).into());
        }
        if let Some(scan) = &self.scan_ts {
            block.insert("scan".to_string(), format!("{}  end", scan).into());
        }
        if let Some(constraints) = &self.constraints {
            block.insert(
                "constraints".to_string(),
                format!("{{ {} C }}  end", constraints).into(),
            );
        }
        if self.invert_constraints {
            block.insert("invertconstraints".to_string(), "true".into());
        }
        block
    }

    /// `%cpcm` content: user entries plus the SMD solvent.
    pub fn cpcm_block(&self) -> Block {
        let mut block = self.user_block("cpcm");
        if let Some(solvent) = self.solvent.as_deref().filter(|s| !s.is_empty()) {
            block.insert("smd".to_string(), "true".into());
            block.insert("smdsolvent".to_string(), format!("\"{}\"", solvent).into());
        }
        block
    }

    /// `%cosmors` content as given by the user.
    pub fn cosmors_block(&self) -> Block {
        self.user_block("cosmors")
    }

    /// `%plots` content: user entries plus density cube requests.
    pub fn plots_block(&self) -> Block {
        let mut block = self.user_block("plots");
        if let Some(dim) = self.cube_dim {
            block.insert("format".to_string(), "gaussian_cube".into());
            block.insert("dim1".to_string(), dim.to_string().into());
            block.insert("dim2".to_string(), dim.to_string().into());
            block.insert("dim3".to_string(), dim.to_string().into());
            block.insert("eldens(\"eldens.cube\");".to_string(), "".into());
            if !self.is_singlet {
                block.insert("spindens(\"spindens.cube\");".to_string(), "".into());
            }
        }
        block
    }

    /// `%output` content: user entries plus the Hirshfeld print flag.
    pub fn output_block(&self) -> Block {
        let mut block = self.user_block("output");
        if self.hirshfeld {
            block.insert("print[p_hirshfeld]".to_string(), "1".into());
        }
        block
    }

    /// `%elprop` content: user entries plus polarizabilities for Raman.
    pub fn elprop_block(&self) -> Block {
        let mut block = self.user_block("elprop");
        if self.raman {
            block.insert("polar".to_string(), "1".into());
        }
        block
    }

    /// `%neb` content: user entries plus endpoints and image settings.
    pub fn neb_block(&self) -> Block {
        let mut block = self.user_block("neb");
        if self.neb_ci || self.neb_ts {
            if let Some(product) = &self.neb_product {
                block.insert("product".to_string(), format!("\"{}\"", product).into());
            }
            if let Some(guess) = &self.neb_ts_guess {
                block.insert("ts".to_string(), format!("\"{}\"", guess).into());
            }
            if let Some(images) = self.neb_images {
                block.insert("nimages".to_string(), images.to_string().into());
            }
            if self.neb_preopt {
                block.insert("preopt".to_string(), "true".into());
            }
        }
        block
    }

    /// Every block to render, library blocks first, then the remaining user
    /// blocks in insertion order. Empty blocks are left out.
    pub fn parsed_blocks(&self) -> Blocks {
        let mut blocks = Blocks::new();
        let library = [
            ("geom", self.geom_block()),
            ("cpcm", self.cpcm_block()),
            ("plots", self.plots_block()),
            ("output", self.output_block()),
            ("elprop", self.elprop_block()),
            ("neb", self.neb_block()),
        ];
        for (name, content) in library {
            if !content.is_empty() {
                blocks.insert(name.to_string(), content);
            }
        }
        for (name, content) in &self.user_blocks {
            if !LIBRARY_BLOCKS.contains(&name.as_str()) && !content.is_empty() {
                blocks.insert(name.clone(), content.clone());
            }
        }
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerated_setters_normalize_case() {
        let mut job = JobSpecification::new();
        job.set_print_level(Some("miniprint")).unwrap();
        job.set_scf_convergence_level(Some("TightScf")).unwrap();
        job.set_scf_convergence_strategy(Some("slowconv")).unwrap();
        job.set_optimization_level(Some("LOOSEOPT")).unwrap();

        assert_eq!(job.print_level(), Some(PrintLevel::MiniPrint));
        assert_eq!(job.scf_convergence_level().unwrap().as_str(), "TIGHTSCF");
        assert_eq!(
            job.scf_convergence_strategy(),
            Some(ScfConvergenceStrategy::SlowConv)
        );
        assert_eq!(job.optimization_level(), Some(OptimizationLevel::LooseOpt));
    }

    #[test]
    fn test_enumerated_setters_reject_unknown_values() {
        let mut job = JobSpecification::new();
        assert!(job.set_print_level(Some("HUGEPRINT")).unwrap_err().is_configuration());
        assert!(job.set_optimization_level(Some("TIGHT")).is_err());
        assert!(job.set_scf_convergence_level(Some("SCF")).is_err());
        assert!(job.set_scf_convergence_strategy(Some("FASTCONV")).is_err());
    }

    #[test]
    fn test_none_resets_only_its_own_field() {
        let mut job = JobSpecification::new();
        job.set_print_level(Some("LARGEPRINT")).unwrap();
        job.set_optimization_level(Some("TIGHTOPT")).unwrap();
        job.set_scf_convergence_level(Some("TIGHTSCF")).unwrap();
        job.set_scf_convergence_strategy(Some("SLOWCONV")).unwrap();

        job.set_optimization_level(None).unwrap();
        assert_eq!(job.optimization_level(), None);
        assert_eq!(job.print_level(), Some(PrintLevel::LargePrint));

        job.set_scf_convergence_level(None).unwrap();
        job.set_scf_convergence_strategy(None).unwrap();
        assert_eq!(job.scf_convergence_level(), None);
        assert_eq!(job.scf_convergence_strategy(), None);
        assert_eq!(job.print_level(), Some(PrintLevel::LargePrint));

        job.set_print_level(None).unwrap();
        assert_eq!(job.print_level(), None);
    }

    #[test]
    fn test_failed_assignment_keeps_previous_value() {
        let mut job = JobSpecification::new();
        job.set_optimization_level(Some("TIGHTOPT")).unwrap();
        assert!(job.set_optimization_level(Some("bogus")).is_err());
        assert_eq!(job.optimization_level(), Some(OptimizationLevel::TightOpt));
    }

    #[test]
    fn test_resource_limits() {
        let mut job = JobSpecification::new();
        assert!(job.ncores() >= 1);
        assert_eq!(job.maxcore(), DEFAULT_MAXCORE);
        assert!(job.set_ncores(Some(0)).is_err());
        assert!(job.set_maxcore(Some(0)).is_err());
        job.set_ncores(Some(4)).unwrap();
        job.set_maxcore(Some(2000)).unwrap();
        assert_eq!(job.ncores(), 4);
        assert_eq!(job.maxcore(), 2000);
        job.set_maxcore(None).unwrap();
        assert_eq!(job.maxcore(), DEFAULT_MAXCORE);
    }

    #[test]
    fn test_opt_and_opt_ts_exclusive() {
        let mut job = JobSpecification::new();
        job.opt = true;
        job.opt_ts = true;
        assert!(job.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_user_blocks_are_case_folded() {
        let mut blocks = Blocks::new();
        blocks.insert("SCF".to_string(), block([("MaxIter", "500")]));
        let mut job = JobSpecification::new();
        job.set_user_blocks(&blocks);

        let scf = job.user_blocks().get("scf").unwrap();
        assert_eq!(scf.get("maxiter"), Some(&BlockEntry::Value("500".to_string())));
    }

    #[test]
    fn test_library_value_wins_on_collision() {
        let mut blocks = Blocks::new();
        blocks.insert(
            "geom".to_string(),
            block([("Calc_Hess", "false"), ("MaxIter", "100")]),
        );
        let mut job = JobSpecification::new();
        job.set_user_blocks(&blocks);
        job.calc_hess = true;

        let geom = job.geom_block();
        assert_eq!(geom.get("calc_hess"), Some(&BlockEntry::Value("true".to_string())));
        assert_eq!(geom.get("maxiter"), Some(&BlockEntry::Value("100".to_string())));
    }

    #[test]
    fn test_parsed_blocks_order_and_omission() {
        let mut blocks = Blocks::new();
        blocks.insert("scf".to_string(), block([("maxiter", "500")]));
        blocks.insert("output".to_string(), Block::new());
        let mut job = JobSpecification::new();
        job.set_user_blocks(&blocks);
        job.solvent = Some("water".to_string());
        job.scan = Some("B 0 1 = 1.0, 3.0, 10".to_string());

        let parsed = job.parsed_blocks();
        let names: Vec<&str> = parsed.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["geom", "cpcm", "scf"]);
        assert_eq!(
            parsed["cpcm"].get("smdsolvent"),
            Some(&BlockEntry::Value("\"water\"".to_string()))
        );
    }

    #[test]
    fn test_spin_density_only_for_open_shell() {
        let mut job = JobSpecification::new();
        job.cube_dim = Some(100);
        assert!(!job.plots_block().contains_key("spindens(\"spindens.cube\");"));
        job.is_singlet = false;
        assert!(job.plots_block().contains_key("spindens(\"spindens.cube\");"));
        assert_eq!(
            job.plots_block().get("dim2"),
            Some(&BlockEntry::Value("100".to_string()))
        );
    }
}
