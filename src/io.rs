//! File I/O utilities for the coordinate files exchanged with the engines.
//!
//! This module reads and writes molecular geometries in the formats the
//! external programs consume or produce:
//!
//! - XYZ (single frame, and multi-frame trajectories such as scan, NEB and
//!   CREST ensembles)
//! - DFTB+ `.gen` (cluster and supercell variants)
//!
//! It also hosts small string helpers shared by the engine facades.

use crate::error::{QCError, Result};
use crate::geometry::Geometry;
use lazy_static::lazy_static;
use regex::Regex;
use std::fs;
use std::path::Path;

lazy_static! {
    // Characters allowed in scratch directory and report file names
    static ref UNSAFE_SUFFIX_RE: Regex = Regex::new(r"[^A-Za-z0-9_\-.]+").unwrap();
}

/// One frame of a multi-frame XYZ file.
#[derive(Debug, Clone)]
pub struct XyzFrame {
    /// Frame geometry
    pub geometry: Geometry,
    /// Raw comment line (second line of the frame)
    pub comment: String,
}

impl XyzFrame {
    /// Energy stored in the comment line, if any.
    ///
    /// Engines write the frame energy as the last numeric token of the comment
    /// (`"Coordinates from ORCA-job input E -76.123"`, or just `"-12.345"` for
    /// CREST ensembles).
    pub fn comment_energy(&self) -> Option<f64> {
        self.comment
            .split_whitespace()
            .rev()
            .find_map(|token| token.parse::<f64>().ok())
    }
}

/// Writes a molecular geometry to an XYZ file.
///
/// The file holds the atom count, a comment line and one `Element X Y Z`
/// line per atom.
///
/// # Examples
///
/// ```
/// use qcflow::geometry::Geometry;
/// use qcflow::io;
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("molecule.xyz");
/// let geometry = Geometry::new(
///     vec!["C".to_string(), "H".to_string()],
///     vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
/// ).unwrap();
///
/// io::write_xyz(&geometry, "", &path).unwrap();
/// let back = io::read_xyz(&path).unwrap();
/// assert_eq!(back.num_atoms, 2);
/// ```
pub fn write_xyz(geom: &Geometry, comment: &str, path: &Path) -> Result<()> {
    fs::write(path, xyz_string(geom, comment))?;
    Ok(())
}

/// Renders a geometry in XYZ format.
pub fn xyz_string(geom: &Geometry, comment: &str) -> String {
    let mut content = format!("{}\n{}\n", geom.num_atoms, comment);

    for i in 0..geom.num_atoms {
        let coords = geom.get_atom_coords(i);
        content.push_str(&format!(
            "{}  {:.8}  {:.8}  {:.8}\n",
            geom.elements[i], coords[0], coords[1], coords[2]
        ));
    }

    content
}

/// Reads the first frame of an XYZ file.
pub fn read_xyz(path: &Path) -> Result<Geometry> {
    if !path.exists() {
        return Err(QCError::MissingArtifact(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    parse_xyz_frames(&content)?
        .into_iter()
        .next()
        .map(|frame| frame.geometry)
        .ok_or_else(|| QCError::parse(format!("No geometry found in {}", path.display())))
}

/// Reads every frame of a multi-frame XYZ file.
pub fn read_multi_xyz(path: &Path) -> Result<Vec<XyzFrame>> {
    if !path.exists() {
        return Err(QCError::MissingArtifact(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    parse_xyz_frames(&content)
}

/// Parses concatenated XYZ frames from a string.
///
/// Each frame is an atom count, a comment line and `count` coordinate lines.
/// Blank lines between frames are ignored.
pub fn parse_xyz_frames(content: &str) -> Result<Vec<XyzFrame>> {
    let lines: Vec<&str> = content.lines().collect();
    let mut frames = Vec::new();
    let mut pos = 0;

    while pos < lines.len() {
        let header = lines[pos].trim();
        if header.is_empty() {
            pos += 1;
            continue;
        }

        let num_atoms: usize = header
            .parse()
            .map_err(|_| QCError::parse(format!("Invalid XYZ atom count: '{}'", header)))?;
        let comment = lines.get(pos + 1).map(|l| l.trim()).unwrap_or("").to_string();

        let end = match (pos + 2).checked_add(num_atoms) {
            Some(end) if end <= lines.len() => end,
            _ => {
                return Err(QCError::parse(format!(
                    "Truncated XYZ frame: expected {} atoms after line {}",
                    num_atoms,
                    pos + 1
                )))
            }
        };

        let mut elements = Vec::with_capacity(num_atoms);
        let mut coords = Vec::with_capacity(num_atoms * 3);
        for line in &lines[pos + 2..end] {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return Err(QCError::parse(format!("Invalid XYZ atom line: '{}'", line)));
            }
            elements.push(parts[0].to_string());
            for coord_str in &parts[1..4] {
                coords.push(coord_str.parse().map_err(|_| {
                    QCError::parse(format!("Invalid coordinate in XYZ file: '{}'", coord_str))
                })?);
            }
        }

        frames.push(XyzFrame {
            geometry: Geometry::new(elements, coords)?,
            comment,
        });
        pos = end;
    }

    Ok(frames)
}

/// Writes a DFTB+ `.gen` file.
///
/// Clusters use the `C` flag. When `box_side` is given a cubic supercell
/// (`S` flag) with the origin at zero is written.
pub fn write_gen(geom: &Geometry, box_side: Option<f64>, path: &Path) -> Result<()> {
    fs::write(path, gen_string(geom, box_side))?;
    Ok(())
}

/// Renders a geometry in DFTB+ `.gen` format.
pub fn gen_string(geom: &Geometry, box_side: Option<f64>) -> String {
    let types = geom.atom_types();
    let flag = if box_side.is_some() { "S" } else { "C" };

    let mut content = format!("{} {}\n{}\n", geom.num_atoms, flag, types.join(" "));
    for i in 0..geom.num_atoms {
        let coords = geom.get_atom_coords(i);
        // type index is 1-based in the order of the type line
        let type_idx = types
            .iter()
            .position(|t| *t == geom.elements[i])
            .map_or(1, |p| p + 1);
        content.push_str(&format!(
            "{} {} {:.8} {:.8} {:.8}\n",
            i + 1,
            type_idx,
            coords[0],
            coords[1],
            coords[2]
        ));
    }

    if let Some(side) = box_side {
        content.push_str("0.0 0.0 0.0\n");
        content.push_str(&format!("{:.8} 0.0 0.0\n", side));
        content.push_str(&format!("0.0 {:.8} 0.0\n", side));
        content.push_str(&format!("0.0 0.0 {:.8}\n", side));
    }

    content
}

/// Replaces characters that are unsafe in file names with underscores.
///
/// # Examples
///
/// ```
/// use qcflow::io::clean_suffix;
///
/// assert_eq!(clean_suffix("orca_M062X_def2-TZVP_water"), "orca_M062X_def2-TZVP_water");
/// assert_eq!(clean_suffix("orca_DLPNO-CCSD_Extrapolate(2/3,ANO)"), "orca_DLPNO-CCSD_Extrapolate_2_3_ANO_");
/// ```
pub fn clean_suffix(suffix: &str) -> String {
    UNSAFE_SUFFIX_RE.replace_all(suffix, "_").to_string()
}

/// Cleans keyword strings by removing comments and extra whitespace.
///
/// Lines starting with `#`, inline comments and empty lines are dropped; the
/// remaining keywords are joined with single spaces.
///
/// # Examples
///
/// ```
/// use qcflow::io;
///
/// let raw = "# grid settings\nDEFGRID3 # finer grid\n\nTightSCF";
/// assert_eq!(io::clean_keywords(raw), "DEFGRID3 TightSCF");
/// ```
pub fn clean_keywords(keywords: &str) -> String {
    keywords
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn water() -> Geometry {
        Geometry::new(
            vec!["O".to_string(), "H".to_string(), "H".to_string()],
            vec![0.0, 0.0, 0.0, 0.757, 0.586, 0.0, -0.757, 0.586, 0.0],
        )
        .unwrap()
    }

    #[test]
    fn test_xyz_round_trip_keeps_comment() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("water.xyz");
        write_xyz(&water(), "E -76.4", &path).unwrap();

        let frames = read_multi_xyz(&path).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].comment, "E -76.4");
        assert_eq!(frames[0].comment_energy(), Some(-76.4));
        assert_eq!(frames[0].geometry.get_atom_coords(2), [-0.757, 0.586, 0.0]);
    }

    #[test]
    fn test_multi_frame_with_blank_separator() {
        let content = "1\n-1.5\nH 0.0 0.0 0.0\n\n1\n  -2.5\nH 0.0 0.0 1.0\n";
        let frames = parse_xyz_frames(content).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].comment_energy(), Some(-2.5));
        assert_eq!(frames[1].geometry.get_atom_coords(0), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_truncated_frame_is_error() {
        let content = "3\ncomment\nH 0.0 0.0 0.0\n";
        assert!(parse_xyz_frames(content).is_err());
    }

    #[test]
    fn test_huge_atom_count_is_error() {
        let content = format!("{}\ncomment\nH 0.0 0.0 0.0\n", usize::MAX);
        let err = parse_xyz_frames(&content).unwrap_err();
        assert!(matches!(err, QCError::Parse(_)));
    }

    #[test]
    fn test_comment_without_number() {
        let frame = XyzFrame {
            geometry: water(),
            comment: "generated by hand".to_string(),
        };
        assert_eq!(frame.comment_energy(), None);
    }

    #[test]
    fn test_read_missing_xyz() {
        let dir = TempDir::new().unwrap();
        let err = read_xyz(&dir.path().join("nothing.xyz")).unwrap_err();
        assert!(matches!(err, QCError::MissingArtifact(_)));
    }

    #[test]
    fn test_gen_cluster() {
        let gen = gen_string(&water(), None);
        let lines: Vec<&str> = gen.lines().collect();
        assert_eq!(lines[0], "3 C");
        assert_eq!(lines[1], "O H");
        assert!(lines[2].starts_with("1 1 "));
        assert!(lines[3].starts_with("2 2 "));
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_gen_supercell() {
        let gen = gen_string(&water(), Some(10.0));
        let lines: Vec<&str> = gen.lines().collect();
        assert_eq!(lines[0], "3 S");
        assert_eq!(lines[5], "0.0 0.0 0.0");
        assert_eq!(lines[6], "10.00000000 0.0 0.0");
        assert_eq!(lines.len(), 9);
    }
}
