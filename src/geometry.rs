//! Cartesian geometry container for the molecules handed to the engines.
//!
//! - [`Geometry`]: element symbols plus flat Cartesian coordinates in Angstrom
//!
//! The crate never moves atoms itself. Geometries are read from and written to
//! the coordinate files exchanged with the external engines (see [`crate::io`]).

use crate::error::{QCError, Result};
use nalgebra::DVector;

/// Bond detection tolerance applied to the sum of covalent radii.
const BOND_TOLERANCE: f64 = 1.2;

/// Fallback covalent radius (Angstrom) for elements missing from the table.
const DEFAULT_COVALENT_RADIUS: f64 = 1.50;

/// Represents a molecular geometry with atomic elements and Cartesian coordinates.
///
/// Coordinates are stored flat, `[x1, y1, z1, x2, y2, z2, ...]`, in a
/// `DVector<f64>`, in Angstrom as written in XYZ files.
///
/// # Examples
///
/// ```
/// use qcflow::geometry::Geometry;
///
/// let elements = vec!["O".to_string(), "H".to_string(), "H".to_string()];
/// let coords = vec![
///     0.0, 0.0, 0.0,
///     0.757, 0.586, 0.0,
///     -0.757, 0.586, 0.0,
/// ];
///
/// let geometry = Geometry::new(elements, coords).unwrap();
/// assert_eq!(geometry.num_atoms, 3);
/// assert_eq!(geometry.get_atom_coords(1), [0.757, 0.586, 0.0]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    /// Chemical element symbols for each atom in order
    pub elements: Vec<String>,
    /// Flattened Cartesian coordinates [x1, y1, z1, x2, y2, z2, ...] in Angstroms
    pub coords: DVector<f64>,
    /// Number of atoms in the molecule
    pub num_atoms: usize,
}

impl Geometry {
    /// Create a new `Geometry` from element list and coordinate vector.
    ///
    /// # Errors
    ///
    /// Returns [`QCError::Parse`] if `coords.len() != elements.len() * 3`.
    pub fn new(elements: Vec<String>, coords: Vec<f64>) -> Result<Self> {
        let num_atoms = elements.len();
        if coords.len() != num_atoms * 3 {
            return Err(QCError::parse(format!(
                "Expected {} coordinates for {} atoms, got {}",
                num_atoms * 3,
                num_atoms,
                coords.len()
            )));
        }
        Ok(Self {
            elements,
            coords: DVector::from_vec(coords),
            num_atoms,
        })
    }

    /// Get the Cartesian coordinates of a specific atom (zero-based index).
    pub fn get_atom_coords(&self, atom_idx: usize) -> [f64; 3] {
        let i = atom_idx * 3;
        [self.coords[i], self.coords[i + 1], self.coords[i + 2]]
    }

    /// Distinct element symbols in order of first appearance.
    ///
    /// This is the atom type list of DFTB+ `.gen` files and the order in
    /// which per-element parameter tables are written.
    pub fn atom_types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::new();
        for element in &self.elements {
            if !types.contains(element) {
                types.push(element.clone());
            }
        }
        types
    }

    /// Euclidean distance between two atoms in Angstrom.
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        let a = self.get_atom_coords(i);
        let b = self.get_atom_coords(j);
        ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
    }

    /// Bonded atom pairs detected from covalent radii.
    pub fn bonds(&self) -> Vec<(usize, usize)> {
        let mut bonds = Vec::new();
        for i in 0..self.num_atoms {
            for j in (i + 1)..self.num_atoms {
                let cutoff = BOND_TOLERANCE
                    * (covalent_radius(&self.elements[i]) + covalent_radius(&self.elements[j]));
                if self.distance(i, j) <= cutoff {
                    bonds.push((i, j));
                }
            }
        }
        bonds
    }

    /// Number of independent rings (cyclomatic number of the bond graph).
    ///
    /// Computed as `bonds - atoms + connected components`.
    pub fn ring_count(&self) -> usize {
        let bonds = self.bonds();
        let mut parent: Vec<usize> = (0..self.num_atoms).collect();

        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        let mut components = self.num_atoms;
        for &(i, j) in &bonds {
            let ri = find(&mut parent, i);
            let rj = find(&mut parent, j);
            if ri != rj {
                parent[ri] = rj;
                components -= 1;
            }
        }
        (bonds.len() + components).saturating_sub(self.num_atoms)
    }
}

/// Covalent radius in Angstrom (Cordero et al. 2008 values).
fn covalent_radius(element: &str) -> f64 {
    match element {
        "H" => 0.31,
        "He" => 0.28,
        "Li" => 1.28,
        "Be" => 0.96,
        "B" => 0.84,
        "C" => 0.76,
        "N" => 0.71,
        "O" => 0.66,
        "F" => 0.57,
        "Ne" => 0.58,
        "Na" => 1.66,
        "Mg" => 1.41,
        "Al" => 1.21,
        "Si" => 1.11,
        "P" => 1.07,
        "S" => 1.05,
        "Cl" => 1.02,
        "Ar" => 1.06,
        "K" => 2.03,
        "Ca" => 1.76,
        "Fe" => 1.32,
        "Cu" => 1.32,
        "Zn" => 1.22,
        "Br" => 1.20,
        "I" => 1.39,
        _ => DEFAULT_COVALENT_RADIUS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn water() -> Geometry {
        Geometry::new(
            vec!["O".to_string(), "H".to_string(), "H".to_string()],
            vec![0.0, 0.0, 0.0, 0.757, 0.586, 0.0, -0.757, 0.586, 0.0],
        )
        .unwrap()
    }

    #[test]
    fn test_geometry_length_mismatch() {
        let result = Geometry::new(vec!["H".to_string(), "H".to_string()], vec![0.0, 0.0, 0.0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_atom_types_first_appearance() {
        let geom = Geometry::new(
            vec!["C".to_string(), "H".to_string(), "O".to_string(), "H".to_string()],
            vec![0.0; 12],
        )
        .unwrap();
        assert_eq!(geom.atom_types(), vec!["C", "H", "O"]);
    }

    #[test]
    fn test_water_bonds_no_rings() {
        let geom = water();
        assert_eq!(geom.bonds(), vec![(0, 1), (0, 2)]);
        assert_eq!(geom.ring_count(), 0);
    }

    #[test]
    fn test_triangle_has_one_ring() {
        // Cyclopropane-like carbon triangle, 1.5 A sides
        let geom = Geometry::new(
            vec!["C".to_string(), "C".to_string(), "C".to_string()],
            vec![0.0, 0.0, 0.0, 1.5, 0.0, 0.0, 0.75, 1.299, 0.0],
        )
        .unwrap();
        assert_eq!(geom.ring_count(), 1);
    }
}
