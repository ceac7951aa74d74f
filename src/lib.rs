#![deny(missing_docs)]

//! qcflow - Quantum Chemistry Engine Orchestration
//!
//! qcflow drives external quantum chemistry programs from Rust. It renders
//! their text inputs from declarative calculation requests, runs them in
//! isolated scratch directories and parses their free-form logs back into
//! typed molecular properties.
//!
//! # Overview
//!
//! Every calculation goes through the same two transformations:
//!
//! 1. **request to input**: a [`job::JobSpecification`] plus static method
//!    parameters is rendered into the engine grammar (ORCA `input.inp`,
//!    DFTB+ `dftb_in.hsd`, xTB and CREST command lines)
//! 2. **log to properties**: the engine log is scanned line by line and the
//!    results land in a [`properties::PropertySet`] with provenance
//!
//! Engine facades glue the two together with process execution, scratch
//! directory handling and a report side-channel.
//!
//! # Supported Programs
//!
//! | Program | Facade | Calculations |
//! |---------|--------|--------------|
//! | ORCA | [`engines::orca::OrcaEngine`] | SPE, OPT, OptTS, Freq, NumFreq, scans, ScanTS, NEB-CI, NEB-TS, OpenCOSMO-RS |
//! | xTB | [`engines::xtb::XtbEngine`] | SPE, OPT, Hessian |
//! | DFTB+ | [`engines::dftbplus::DftbEngine`] | SPE, OPT, NVT MD, simulated annealing |
//! | CREST | [`crest::Crest`] | conformers, tautomers, (de)protomers |
//!
//! # Quick Start
//!
//! ```no_run
//! use qcflow::engines::orca::OrcaEngine;
//! use qcflow::engines::{Engine, EngineContext, RunOptions};
//! use qcflow::molecule::Molecule;
//! use qcflow::settings::SettingsManager;
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = SettingsManager::load()?;
//!     let orca = OrcaEngine::r2scan().with_context(EngineContext::new(settings));
//!
//!     let mut water = Molecule::from_xyz(Path::new("water.xyz"), 0, 1)?;
//!     orca.opt(&mut water, &RunOptions::inplace())?;
//!     println!("E = {:?} Eh", water.properties.electronic_energy());
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`error`](error/index.html) - Error taxonomy
//! - [`geometry`](geometry/index.html) - Coordinates and connectivity
//! - [`molecule`](molecule/index.html) - Molecules and ensembles
//! - [`properties`](properties/index.html) - Parsed properties with provenance
//! - [`job`](job/index.html) - Calculation requests
//! - [`render`](render/index.html) - ORCA input renderer
//! - [`hsd`](hsd/index.html) - DFTB+ HSD document model
//! - [`parser`](parser/index.html) - Engine log parsers
//! - [`engines`](engines/index.html) - Engine facades
//! - [`crest`](crest/index.html) - CREST searches
//! - [`settings`](settings/index.html) - Configuration files

pub mod crest;
pub mod engines;
pub mod error;
pub mod geometry;
/// DFTB+ HSD input model
pub mod hsd;
pub mod io;
pub mod job;
pub mod molecule;
pub mod parser;
pub mod properties;
pub mod render;
/// Report side-channel
pub mod report;
/// External process execution
pub mod runner;
/// Per-calculation scratch directories
pub mod scratch;
/// Configuration management system
pub mod settings;

pub use error::{QCError, Result};
pub use geometry::Geometry;
pub use molecule::{Ensemble, Molecule};
