//! Molecule and ensemble records passed through the engine facades.
//!
//! A [`Molecule`] couples a [`Geometry`] with charge, spin multiplicity, a name
//! and one [`PropertySet`]. The name doubles as the stem of every coordinate
//! file written for the molecule, so it must be unique among the structures
//! taking part in one calculation.
//!
//! An [`Ensemble`] is an ordered list of molecules with a common origin (scan
//! frames, NEB images, conformers).
//!
//! Advisory conditions met while processing a molecule (imaginary modes,
//! discarded conformers, missing tautomers) are appended to
//! [`Molecule::flags`] and never raised as errors.

use crate::error::{QCError, Result};
use crate::geometry::Geometry;
use crate::io::{self, XyzFrame};
use crate::properties::{PropertySet, Provenance};
use log::warn;
use std::path::{Path, PathBuf};

/// A single structure with its computed properties.
#[derive(Debug, Clone)]
pub struct Molecule {
    /// Name, also used as file stem for the coordinate files
    pub name: String,
    /// Total charge
    pub charge: i32,
    /// Spin multiplicity (2S + 1)
    pub spin: u32,
    /// Cartesian geometry
    pub geometry: Geometry,
    /// Computed properties
    pub properties: PropertySet,
    /// Advisory annotations collected during calculations
    pub flags: Vec<String>,
    /// Side of the cubic periodic box in Angstrom, `None` for clusters
    pub box_side: Option<f64>,
    /// Level of theory at which the geometry was optimized
    pub geometry_level_of_theory: Option<String>,
}

impl Molecule {
    /// Creates a molecule from a geometry.
    ///
    /// # Errors
    ///
    /// Returns [`QCError::Configuration`] if the name is empty or the spin
    /// multiplicity is zero.
    pub fn new(name: impl Into<String>, geometry: Geometry, charge: i32, spin: u32) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(QCError::config("Molecule name cannot be empty"));
        }
        if spin == 0 {
            return Err(QCError::config(format!(
                "Invalid spin multiplicity 0 for molecule {}",
                name
            )));
        }
        Ok(Self {
            name,
            charge,
            spin,
            geometry,
            properties: PropertySet::new(),
            flags: Vec::new(),
            box_side: None,
            geometry_level_of_theory: None,
        })
    }

    /// Loads a molecule from an XYZ file, naming it after the file stem.
    ///
    /// # Examples
    ///
    /// ```
    /// use qcflow::molecule::Molecule;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let path = dir.path().join("water.xyz");
    /// std::fs::write(&path, "3\n\nO 0.0 0.0 0.0\nH 0.757 0.586 0.0\nH -0.757 0.586 0.0\n").unwrap();
    ///
    /// let mol = Molecule::from_xyz(&path, 0, 1).unwrap();
    /// assert_eq!(mol.name, "water");
    /// assert!(mol.is_singlet());
    /// ```
    pub fn from_xyz(path: &Path, charge: i32, spin: u32) -> Result<Self> {
        let geometry = io::read_xyz(path)?;
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| QCError::config(format!("Cannot derive a name from {}", path.display())))?;
        Self::new(name, geometry, charge, spin)
    }

    /// True for closed shell singlets.
    pub fn is_singlet(&self) -> bool {
        self.spin == 1
    }

    /// True when a periodic box has been assigned.
    pub fn is_periodic(&self) -> bool {
        self.box_side.is_some()
    }

    /// Appends an advisory annotation.
    pub fn add_flag(&mut self, flag: impl Into<String>) {
        self.flags.push(flag.into());
    }

    /// File name of the coordinate file written for this molecule.
    pub fn xyz_filename(&self) -> String {
        format!("{}.xyz", self.name)
    }

    /// Writes `{name}.xyz` into `dir` and returns its path.
    pub fn write_xyz_in(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(self.xyz_filename());
        io::write_xyz(&self.geometry, &self.name, &path)?;
        Ok(path)
    }

    /// Replaces the geometry with one produced by an engine.
    ///
    /// Properties computed on the previous geometry are dropped.
    pub fn replace_geometry(&mut self, geometry: Geometry, level_of_theory: &str) {
        self.geometry = geometry;
        self.properties = PropertySet::new();
        self.geometry_level_of_theory = Some(level_of_theory.to_string());
    }

    /// Builds a molecule with the same identity and flags and a new
    /// geometry; properties start empty.
    pub fn with_geometry(&self, geometry: Geometry, level_of_theory: &str) -> Self {
        Self {
            name: self.name.clone(),
            charge: self.charge,
            spin: self.spin,
            geometry,
            properties: PropertySet::new(),
            flags: self.flags.clone(),
            box_side: self.box_side,
            geometry_level_of_theory: Some(level_of_theory.to_string()),
        }
    }
}

/// Ordered collection of molecules with a common origin.
#[derive(Debug, Clone, Default)]
pub struct Ensemble {
    /// Member structures in generation order
    pub molecules: Vec<Molecule>,
}

impl Ensemble {
    /// Creates an ensemble from molecules.
    pub fn new(molecules: Vec<Molecule>) -> Self {
        Self { molecules }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.molecules.len()
    }

    /// True when the ensemble has no members.
    pub fn is_empty(&self) -> bool {
        self.molecules.is_empty()
    }

    /// Iterates over the members.
    pub fn iter(&self) -> std::slice::Iter<'_, Molecule> {
        self.molecules.iter()
    }

    /// Names of the members in order.
    pub fn names(&self) -> Vec<&str> {
        self.molecules.iter().map(|m| m.name.as_str()).collect()
    }

    /// Electronic energies of the members, `None` where unset.
    pub fn energies(&self) -> Vec<Option<f64>> {
        self.molecules
            .iter()
            .map(|m| m.properties.electronic_energy())
            .collect()
    }
}

impl IntoIterator for Ensemble {
    type Item = Molecule;
    type IntoIter = std::vec::IntoIter<Molecule>;

    fn into_iter(self) -> Self::IntoIter {
        self.molecules.into_iter()
    }
}

impl From<Vec<Molecule>> for Ensemble {
    fn from(molecules: Vec<Molecule>) -> Self {
        Self::new(molecules)
    }
}

/// Turns the frames of a multi-frame XYZ file into molecules.
///
/// Members are named `{parent}_{suffix}{index}` (zero-based) and inherit the
/// parent spin. When a frame comment carries an energy it is stored as the
/// electronic energy, tagged with `source`.
pub fn molecules_from_frames(
    parent: &Molecule,
    frames: Vec<XyzFrame>,
    suffix: &str,
    charge: i32,
    source: &Provenance,
) -> Result<Vec<Molecule>> {
    let mut molecules = Vec::with_capacity(frames.len());
    for (idx, frame) in frames.into_iter().enumerate() {
        if frame.geometry.num_atoms == 0 {
            warn!("Skipping empty frame {} of {}", idx, parent.name);
            continue;
        }
        let energy = frame.comment_energy();
        let mut mol = Molecule::new(
            format!("{}_{}{}", parent.name, suffix, idx),
            frame.geometry,
            charge,
            parent.spin,
        )?;
        mol.box_side = parent.box_side;
        if let Some(e) = energy {
            mol.properties.set_electronic_energy(e, source);
        }
        molecules.push(mol);
    }
    Ok(molecules)
}

/// Reads a multi-frame XYZ file and splits it into molecules.
///
/// See [`molecules_from_frames`] for naming and energy handling.
pub fn split_multixyz(
    parent: &Molecule,
    path: &Path,
    suffix: &str,
    charge: i32,
    source: &Provenance,
) -> Result<Vec<Molecule>> {
    let frames = io::read_multi_xyz(path)?;
    molecules_from_frames(parent, frames, suffix, charge, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn water() -> Molecule {
        let geometry = Geometry::new(
            vec!["O".to_string(), "H".to_string(), "H".to_string()],
            vec![0.0, 0.0, 0.0, 0.757, 0.586, 0.0, -0.757, 0.586, 0.0],
        )
        .unwrap();
        Molecule::new("water", geometry, 0, 1).unwrap()
    }

    #[test]
    fn test_zero_spin_rejected() {
        let geometry = water().geometry;
        let err = Molecule::new("bad", geometry, 0, 0).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_replace_geometry_drops_properties() {
        let mut mol = water();
        mol.properties
            .set_electronic_energy(-76.0, &Provenance::new("ORCA", "PBE"));
        let new_geometry = mol.geometry.clone();
        mol.replace_geometry(new_geometry, "PBE | basis: def2-TZVP | solvent: None");
        assert!(mol.properties.is_empty());
        assert_eq!(
            mol.geometry_level_of_theory.as_deref(),
            Some("PBE | basis: def2-TZVP | solvent: None")
        );
    }

    #[test]
    fn test_with_geometry_keeps_flags() {
        let mut mol = water();
        mol.add_flag("Imaginary mode detected in frequency analysis.");
        mol.properties
            .set_electronic_energy(-76.0, &Provenance::new("ORCA", "PBE"));

        let moved = mol.with_geometry(mol.geometry.clone(), "gfn2 | solvent: None");
        assert_eq!(moved.flags, mol.flags);
        assert!(moved.properties.is_empty());
        assert_eq!(moved.name, "water");
    }

    #[test]
    fn test_split_multixyz_names_and_energies() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crest_conformers.xyz");
        std::fs::write(
            &path,
            "1\n  -5.07\nH 0.0 0.0 0.0\n1\n  -5.01\nH 0.0 0.0 0.1\n",
        )
        .unwrap();

        let mol = water();
        let source = Provenance::new("CREST", "GFN2-xTB");
        let members = split_multixyz(&mol, &path, "c", mol.charge, &source).unwrap();
        let ensemble = Ensemble::new(members);

        assert_eq!(ensemble.names(), vec!["water_c0", "water_c1"]);
        assert_eq!(ensemble.energies(), vec![Some(-5.07), Some(-5.01)]);
    }

    #[test]
    fn test_write_xyz_in_uses_name() {
        let dir = TempDir::new().unwrap();
        let path = water().write_xyz_in(dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "water.xyz");
        assert!(path.exists());
    }
}
