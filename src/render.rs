//! ORCA input rendering.
//!
//! Rendering happens in two steps. [`build_orca_input`] decides which
//! directives are active for a [`JobSpecification`] and returns them as an
//! ordered [`RenderedInput`]; [`RenderedInput::to_text`] serializes that list
//! in a single pass. ORCA is sensitive to directive order, so the list is
//! always built in the same sequence:
//!
//! 1. `%pal` and `%maxcore` resource directives
//! 2. method line and RIJCOSX auxiliary basis (left out for COSMO-RS runs)
//! 3. SCF convergence keywords, then the print level
//! 4. calculation keywords (`Opt`, `OptTS`, `ScanTS`, `Freq`, `NumFreq`, ...)
//! 5. `%` directive blocks (library blocks first, see [`JobSpecification::parsed_blocks`])
//! 6. the `* xyzfile` geometry reference
//!
//! The renderer never touches the file system; the engine facade writes the
//! text to `input.inp`.

use crate::error::Result;
use crate::job::{Block, BlockEntry, JobSpecification};
use crate::molecule::Molecule;
use log::{debug, warn};

/// Fixed name of the ORCA input file.
pub const ORCA_INPUT_FILE: &str = "input.inp";

/// Advisory recorded when analytical frequencies are replaced by numerical ones.
pub const NUMFREQ_DOWNGRADE: &str =
    "Optimization with frequency in solvent was requested. Switching to numerical frequencies.";

/// Advisory recorded when analytical frequencies are requested with SMD.
pub const SMD_ANALYTICAL_FREQ: &str =
    "Analytical frequencies are not supported for the SMD solvent model.";

/// Static level of theory of an ORCA engine instance.
#[derive(Debug, Clone, PartialEq)]
pub struct OrcaMethod {
    /// Method keyword, e.g. `PBE`, `M062X`, `r2SCAN-3c`
    pub method: String,
    /// Basis set keyword, may be empty for composite methods
    pub basis_set: String,
    /// Auxiliary basis for RIJCOSX, empty to disable
    pub aux_basis: String,
    /// Extra keywords appended to the method line
    pub optionals: String,
}

/// One element of an ORCA input file.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// `%pal nprocs N end`
    Pal(usize),
    /// `%maxcore M`
    MaxCore(u32),
    /// `! keyword keyword ...`
    Keywords(Vec<String>),
    /// Empty separator line
    Blank,
    /// `%name ... end`
    Block {
        /// Block name without the percent sign
        name: String,
        /// Ordered entries
        entries: Block,
    },
    /// `* xyzfile charge spin file`
    XyzFile {
        /// Total charge
        charge: i32,
        /// Spin multiplicity
        spin: u32,
        /// Coordinate file name
        file: String,
    },
}

/// Ordered directives of one input file plus the advisories raised while
/// building it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedInput {
    /// Directives in file order
    pub directives: Vec<Directive>,
    /// Non fatal notes, e.g. the numerical frequency downgrade
    pub advisories: Vec<String>,
}

impl RenderedInput {
    /// Serializes the directives into ORCA input grammar.
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for directive in &self.directives {
            match directive {
                Directive::Pal(ncores) => {
                    text.push_str(&format!("%pal\n  nprocs {}\nend\n\n", ncores));
                }
                Directive::MaxCore(mb) => text.push_str(&format!("%maxcore {}\n\n", mb)),
                Directive::Keywords(words) => {
                    text.push_str(&format!("! {}\n", words.join(" ")));
                }
                Directive::Blank => text.push('\n'),
                Directive::Block { name, entries } => {
                    text.push_str(&format!("%{}\n", name));
                    for (key, entry) in entries {
                        match entry {
                            BlockEntry::Value(value) if value.is_empty() => {
                                text.push_str(&format!("  {}\n", key));
                            }
                            BlockEntry::Value(value) => {
                                text.push_str(&format!("  {} {}\n", key, value));
                            }
                            BlockEntry::Section(sub) => {
                                text.push_str(&format!("  {}\n", key));
                                for (subkey, value) in sub {
                                    text.push_str(&format!("    {} {}\n", subkey, value));
                                }
                                text.push_str("  end\n");
                            }
                        }
                    }
                    text.push_str("end\n\n");
                }
                Directive::XyzFile { charge, spin, file } => {
                    text.push_str(&format!("* xyzfile {} {} {}\n\n", charge, spin, file));
                }
            }
        }
        text
    }

    /// All `!` keyword lines, each joined by single spaces.
    pub fn keyword_lines(&self) -> Vec<String> {
        self.directives
            .iter()
            .filter_map(|d| match d {
                Directive::Keywords(words) => Some(words.join(" ")),
                _ => None,
            })
            .collect()
    }

    /// Names of the rendered `%` blocks in order.
    pub fn block_names(&self) -> Vec<&str> {
        self.directives
            .iter()
            .filter_map(|d| match d {
                Directive::Block { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

fn words(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

/// Builds the directive list for one ORCA run on `mol`.
///
/// When an optimization (or TS optimization) with analytical frequencies is
/// requested in solvent, the frequency keyword is downgraded to `NumFreq`;
/// the downgrade is logged and recorded in [`RenderedInput::advisories`].
///
/// # Errors
///
/// Returns [`crate::error::QCError::Configuration`] if the specification is
/// inconsistent (see [`JobSpecification::validate`]).
///
/// # Examples
///
/// ```
/// use qcflow::geometry::Geometry;
/// use qcflow::job::JobSpecification;
/// use qcflow::molecule::Molecule;
/// use qcflow::render::{build_orca_input, OrcaMethod};
///
/// let geometry = Geometry::new(vec!["H".into(), "H".into()], vec![0.0, 0.0, 0.0, 0.74, 0.0, 0.0]).unwrap();
/// let mol = Molecule::new("h2", geometry, 0, 1).unwrap();
/// let method = OrcaMethod {
///     method: "PBE".into(),
///     basis_set: "def2-SVP".into(),
///     aux_basis: String::new(),
///     optionals: String::new(),
/// };
/// let mut job = JobSpecification::new();
/// job.set_ncores(Some(2)).unwrap();
/// job.opt = true;
///
/// let text = build_orca_input(&job, &method, &mol).unwrap().to_text();
/// assert!(text.starts_with("%pal\n  nprocs 2\nend\n\n%maxcore 750\n\n! PBE def2-SVP\n"));
/// assert!(text.contains("! Opt\n"));
/// assert!(text.ends_with("* xyzfile 0 1 h2.xyz\n\n"));
/// ```
pub fn build_orca_input(
    job: &JobSpecification,
    method: &OrcaMethod,
    mol: &Molecule,
) -> Result<RenderedInput> {
    job.validate()?;

    let mut input = RenderedInput::default();
    let directives = &mut input.directives;

    debug!(
        "Running ORCA calculation on {} cores and {} MB of RAM",
        job.ncores(),
        job.maxcore()
    );
    directives.push(Directive::Pal(job.ncores()));
    directives.push(Directive::MaxCore(job.maxcore()));

    if job.cosmors_block().is_empty() {
        directives.push(Directive::Keywords(words(&format!(
            "{} {} {}",
            method.method, method.basis_set, method.optionals
        ))));
        if !method.aux_basis.is_empty() {
            directives.push(Directive::Keywords(vec![
                "RIJCOSX".to_string(),
                method.aux_basis.clone(),
            ]));
            directives.push(Directive::Blank);
        }
    }

    let scf: Vec<String> = job
        .scf_convergence_level()
        .map(|l| l.to_string())
        .into_iter()
        .chain(job.scf_convergence_strategy().map(|s| s.to_string()))
        .collect();
    if !scf.is_empty() {
        directives.push(Directive::Keywords(scf));
    }

    if let Some(level) = job.print_level() {
        directives.push(Directive::Keywords(vec![level.to_string()]));
        directives.push(Directive::Blank);
    }

    let in_solvent = job.solvent.as_deref().is_some_and(|s| !s.is_empty());
    let mut freq = job.freq;
    let mut nfreq = job.nfreq;
    if (job.opt || job.opt_ts) && freq && in_solvent {
        warn!("{}", NUMFREQ_DOWNGRADE);
        input.advisories.push(NUMFREQ_DOWNGRADE.to_string());
        freq = false;
        nfreq = true;
    }

    let mut calc = |keyword: String| directives.push(Directive::Keywords(vec![keyword]));
    if job.opt {
        calc(job
            .optimization_level()
            .map_or_else(|| "Opt".to_string(), |l| l.to_string()));
    }
    if job.scan.is_some() {
        calc("Opt".to_string());
    }
    if job.opt_ts {
        calc("OptTS".to_string());
    }
    if job.scan_ts.is_some() {
        calc("ScanTS".to_string());
    }
    if freq {
        if in_solvent {
            warn!("{}", SMD_ANALYTICAL_FREQ);
            input.advisories.push(SMD_ANALYTICAL_FREQ.to_string());
        }
        calc("Freq".to_string());
    }
    if nfreq {
        calc("NumFreq".to_string());
    }
    if job.nearir {
        calc("NearIR".to_string());
    }
    if job.neb_ci {
        calc("NEB-CI".to_string());
    }
    if job.neb_ts {
        calc("NEB-TS".to_string());
    }
    directives.push(Directive::Blank);

    for (name, entries) in job.parsed_blocks() {
        directives.push(Directive::Block { name, entries });
    }

    directives.push(Directive::XyzFile {
        charge: mol.charge,
        spin: mol.spin,
        file: mol.xyz_filename(),
    });

    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::job::{block, Blocks};
    use indexmap::IndexMap;

    fn mol() -> Molecule {
        let geometry = Geometry::new(
            vec!["H".to_string(), "F".to_string()],
            vec![0.0, 0.0, 0.0, 0.92, 0.0, 0.0],
        )
        .unwrap();
        Molecule::new("hf", geometry, 0, 1).unwrap()
    }

    fn pbe() -> OrcaMethod {
        OrcaMethod {
            method: "PBE".to_string(),
            basis_set: "def2-TZVP".to_string(),
            aux_basis: "def2/J".to_string(),
            optionals: String::new(),
        }
    }

    fn job() -> JobSpecification {
        let mut job = JobSpecification::new();
        job.set_ncores(Some(4)).unwrap();
        job
    }

    #[test]
    fn test_single_point_layout() {
        let text = build_orca_input(&job(), &pbe(), &mol()).unwrap().to_text();
        assert_eq!(
            text,
            "%pal\n  nprocs 4\nend\n\n%maxcore 750\n\n! PBE def2-TZVP\n! RIJCOSX def2/J\n\n\n* xyzfile 0 1 hf.xyz\n\n"
        );
    }

    #[test]
    fn test_scf_and_print_lines() {
        let mut job = job();
        job.set_scf_convergence_strategy(Some("slowconv")).unwrap();
        job.set_scf_convergence_level(Some("tightscf")).unwrap();
        job.set_print_level(Some("largeprint")).unwrap();

        let rendered = build_orca_input(&job, &pbe(), &mol()).unwrap();
        let lines = rendered.keyword_lines();
        assert_eq!(lines[2], "TIGHTSCF SLOWCONV");
        assert_eq!(lines[3], "LARGEPRINT");
    }

    #[test]
    fn test_optimization_level_replaces_opt() {
        let mut job = job();
        job.opt = true;
        job.set_optimization_level(Some("verytightopt")).unwrap();
        let lines = build_orca_input(&job, &pbe(), &mol()).unwrap().keyword_lines();
        assert!(lines.contains(&"VERYTIGHTOPT".to_string()));
        assert!(!lines.contains(&"Opt".to_string()));
    }

    #[test]
    fn test_solvent_downgrades_frequencies() {
        let mut job = job();
        job.opt = true;
        job.freq = true;
        job.solvent = Some("water".to_string());

        let rendered = build_orca_input(&job, &pbe(), &mol()).unwrap();
        let lines = rendered.keyword_lines();
        assert!(lines.contains(&"NumFreq".to_string()));
        assert!(!lines.contains(&"Freq".to_string()));
        assert_eq!(rendered.advisories, vec![NUMFREQ_DOWNGRADE.to_string()]);
        // caller's specification is untouched
        assert!(job.freq);
    }

    #[test]
    fn test_frequencies_without_opt_keep_analytical() {
        let mut job = job();
        job.freq = true;
        job.solvent = Some("water".to_string());
        let rendered = build_orca_input(&job, &pbe(), &mol()).unwrap();
        assert!(rendered.keyword_lines().contains(&"Freq".to_string()));
        assert_eq!(rendered.advisories, vec![SMD_ANALYTICAL_FREQ.to_string()]);
    }

    #[test]
    fn test_cosmors_block_drops_method_line() {
        let mut blocks = Blocks::new();
        blocks.insert("cosmors".to_string(), block([("solvent", "\"water\"")]));
        let mut job = job();
        job.set_user_blocks(&blocks);

        let rendered = build_orca_input(&job, &pbe(), &mol()).unwrap();
        assert!(!rendered.keyword_lines().iter().any(|l| l.contains("PBE")));
        assert!(!rendered.keyword_lines().iter().any(|l| l.contains("RIJCOSX")));
        assert!(rendered.to_text().contains("%cosmors\n  solvent \"water\"\nend\n\n"));
    }

    #[test]
    fn test_nested_block_entries() {
        let mut sub = IndexMap::new();
        sub.insert("NRoots".to_string(), "5".to_string());
        let mut entries = Block::new();
        entries.insert("tda".to_string(), "true".into());
        entries.insert("cis".to_string(), BlockEntry::Section(sub));
        let mut blocks = Blocks::new();
        blocks.insert("tddft".to_string(), entries);

        let mut job = job();
        job.set_user_blocks(&blocks);
        let text = build_orca_input(&job, &pbe(), &mol()).unwrap().to_text();
        assert!(text.contains("%tddft\n  tda true\n  cis\n    NRoots 5\n  end\nend\n\n"));
    }

    #[test]
    fn test_cube_entries_have_no_trailing_value() {
        let mut job = job();
        job.cube_dim = Some(250);
        let text = build_orca_input(&job, &pbe(), &mol()).unwrap().to_text();
        assert!(text.contains("  eldens(\"eldens.cube\");\n"));
        assert!(text.contains("  format gaussian_cube\n"));
    }
}
