//! Computed properties attached to a molecule.
//!
//! A [`PropertySet`] collects every number an engine run produced for one
//! structure: energies, population analyses and vibrational data. Each value
//! is stored together with the [`Provenance`] of the engine instance that
//! produced it, so reports can tell which level of theory a number belongs to.
//!
//! Values are written by the output parsers only. A parse always fills a fresh
//! set which is merged into the molecule with [`PropertySet::absorb`] once the
//! whole log has been read, so a failed parse never leaves a half-updated
//! molecule behind.

use crate::error::{QCError, Result};
use log::debug;
use nalgebra::DVector;
use serde::Serialize;

/// Relative tolerance of the Gibbs free energy reconstruction check.
pub const GIBBS_RTOL: f64 = 1e-9;

/// Absolute tolerance of the Gibbs free energy reconstruction check; covers
/// the 8 decimals ORCA prints for the correction and the Gibbs energy.
pub const GIBBS_ATOL: f64 = 1e-8;

/// Identifies the engine configuration that produced a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provenance {
    /// Engine name, e.g. `ORCA`, `xTB`, `DFTB+`
    pub engine: String,
    /// Human readable level of theory, e.g. `PBE | basis: def2-TZVP | solvent: None`
    pub level_of_theory: String,
}

impl Provenance {
    /// Creates a provenance tag.
    pub fn new(engine: impl Into<String>, level_of_theory: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            level_of_theory: level_of_theory.into(),
        }
    }
}

/// A value together with the engine that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tagged<T> {
    /// The stored value
    pub value: T,
    /// Where the value comes from
    pub source: Provenance,
}

/// Names of the properties a [`PropertySet`] can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    /// Electronic energy in Hartree
    ElectronicEnergy,
    /// Free energy correction G - E(el) in Hartree
    FreeEnergyCorrection,
    /// Mulliken charges
    MullikenCharges,
    /// Mulliken spin populations
    MullikenSpinPopulations,
    /// Hirshfeld charges
    HirshfeldCharges,
    /// Hirshfeld spin populations
    HirshfeldSpinPopulations,
    /// Vibrational analysis
    VibrationalData,
    /// pKa computed by downstream tools
    Pka,
}

/// Results of a vibrational analysis.
///
/// Frequencies are in cm^-1 (negative values are imaginary modes), IR
/// intensities in km/mol. Normal modes are displacement vectors of length
/// `3 * atom count`, kept in reading order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VibrationalData {
    /// Wavenumbers, one per mode
    pub frequencies: Vec<f64>,
    /// Displacement vectors, one per frequency
    pub normal_modes: Vec<DVector<f64>>,
    /// (mode index, intensity)
    pub ir_transitions: Vec<(usize, f64)>,
    /// (mode index A, mode index B, intensity)
    pub ir_combination_bands: Vec<(usize, usize, f64)>,
    /// (mode index, activity, depolarization ratio)
    pub raman_transitions: Vec<(usize, f64, f64)>,
}

impl VibrationalData {
    /// Checks the internal consistency of the vibrational record.
    ///
    /// When both frequencies and normal modes are present their counts must
    /// match, and every mode must hold `3 * num_atoms` components.
    pub fn validate(&self, num_atoms: usize) -> Result<()> {
        if !self.normal_modes.is_empty()
            && !self.frequencies.is_empty()
            && self.normal_modes.len() != self.frequencies.len()
        {
            return Err(QCError::ParseInconsistency(format!(
                "{} normal modes parsed for {} frequencies",
                self.normal_modes.len(),
                self.frequencies.len()
            )));
        }
        if let Some(mode) = self
            .normal_modes
            .iter()
            .find(|mode| mode.len() != 3 * num_atoms)
        {
            return Err(QCError::ParseInconsistency(format!(
                "Normal mode with {} components for {} atoms",
                mode.len(),
                num_atoms
            )));
        }
        Ok(())
    }

    /// Number of imaginary (negative) frequencies.
    pub fn imaginary_count(&self) -> usize {
        self.frequencies.iter().filter(|&&f| f < 0.0).count()
    }
}

/// Bag of computed attributes of one molecule.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PropertySet {
    electronic_energy: Option<Tagged<f64>>,
    free_energy_correction: Option<Tagged<f64>>,
    mulliken_charges: Option<Tagged<Vec<f64>>>,
    mulliken_spin_populations: Option<Tagged<Vec<f64>>>,
    hirshfeld_charges: Option<Tagged<Vec<f64>>>,
    hirshfeld_spin_populations: Option<Tagged<Vec<f64>>>,
    vibrational_data: Option<Tagged<VibrationalData>>,
    pka: Option<Tagged<f64>>,
}

impl PropertySet {
    /// Creates an empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Electronic energy in Hartree.
    pub fn electronic_energy(&self) -> Option<f64> {
        self.electronic_energy.as_ref().map(|t| t.value)
    }

    /// Free energy correction G - E(el) in Hartree.
    pub fn free_energy_correction(&self) -> Option<f64> {
        self.free_energy_correction.as_ref().map(|t| t.value)
    }

    /// Gibbs free energy, electronic energy plus free energy correction.
    pub fn gibbs_free_energy(&self) -> Option<f64> {
        match (self.electronic_energy(), self.free_energy_correction()) {
            (Some(e), Some(corr)) => Some(e + corr),
            _ => None,
        }
    }

    /// Mulliken charges in atom order.
    pub fn mulliken_charges(&self) -> Option<&[f64]> {
        self.mulliken_charges.as_ref().map(|t| t.value.as_slice())
    }

    /// Mulliken spin populations in atom order.
    pub fn mulliken_spin_populations(&self) -> Option<&[f64]> {
        self.mulliken_spin_populations
            .as_ref()
            .map(|t| t.value.as_slice())
    }

    /// Hirshfeld charges in atom order.
    pub fn hirshfeld_charges(&self) -> Option<&[f64]> {
        self.hirshfeld_charges.as_ref().map(|t| t.value.as_slice())
    }

    /// Hirshfeld spin populations in atom order.
    pub fn hirshfeld_spin_populations(&self) -> Option<&[f64]> {
        self.hirshfeld_spin_populations
            .as_ref()
            .map(|t| t.value.as_slice())
    }

    /// Vibrational analysis results.
    pub fn vibrational_data(&self) -> Option<&VibrationalData> {
        self.vibrational_data.as_ref().map(|t| &t.value)
    }

    /// pKa value.
    pub fn pka(&self) -> Option<f64> {
        self.pka.as_ref().map(|t| t.value)
    }

    /// Provenance of a stored property, `None` if the property is unset.
    pub fn provenance(&self, property: Property) -> Option<&Provenance> {
        match property {
            Property::ElectronicEnergy => self.electronic_energy.as_ref().map(|t| &t.source),
            Property::FreeEnergyCorrection => {
                self.free_energy_correction.as_ref().map(|t| &t.source)
            }
            Property::MullikenCharges => self.mulliken_charges.as_ref().map(|t| &t.source),
            Property::MullikenSpinPopulations => {
                self.mulliken_spin_populations.as_ref().map(|t| &t.source)
            }
            Property::HirshfeldCharges => self.hirshfeld_charges.as_ref().map(|t| &t.source),
            Property::HirshfeldSpinPopulations => {
                self.hirshfeld_spin_populations.as_ref().map(|t| &t.source)
            }
            Property::VibrationalData => self.vibrational_data.as_ref().map(|t| &t.source),
            Property::Pka => self.pka.as_ref().map(|t| &t.source),
        }
    }

    /// True when no property has been set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn set_electronic_energy(&mut self, value: f64, source: &Provenance) {
        self.electronic_energy = Some(tag(value, source));
    }

    pub(crate) fn set_free_energy_correction(&mut self, value: f64, source: &Provenance) {
        self.free_energy_correction = Some(tag(value, source));
    }

    pub(crate) fn set_mulliken_charges(&mut self, value: Vec<f64>, source: &Provenance) {
        self.mulliken_charges = Some(tag(value, source));
    }

    pub(crate) fn set_mulliken_spin_populations(&mut self, value: Vec<f64>, source: &Provenance) {
        self.mulliken_spin_populations = Some(tag(value, source));
    }

    pub(crate) fn set_hirshfeld_charges(&mut self, value: Vec<f64>, source: &Provenance) {
        self.hirshfeld_charges = Some(tag(value, source));
    }

    pub(crate) fn set_hirshfeld_spin_populations(&mut self, value: Vec<f64>, source: &Provenance) {
        self.hirshfeld_spin_populations = Some(tag(value, source));
    }

    pub(crate) fn set_vibrational_data(&mut self, value: VibrationalData, source: &Provenance) {
        self.vibrational_data = Some(tag(value, source));
    }

    /// Stores a pKa computed by a downstream consumer.
    pub fn set_pka(&mut self, value: f64, source: &Provenance) {
        self.pka = Some(tag(value, source));
    }

    /// Checks a Gibbs free energy reported in a log against the stored values.
    ///
    /// The correction must have been read, and electronic energy plus
    /// correction must reproduce `reported` within
    /// `GIBBS_ATOL + GIBBS_RTOL * |reported|`.
    pub fn check_gibbs_free_energy(&self, reported: f64) -> Result<()> {
        let computed = match (self.electronic_energy(), self.free_energy_correction()) {
            (_, None) => {
                return Err(QCError::ParseInconsistency(
                    "Gibbs free energy found but no free energy correction was read".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(QCError::ParseInconsistency(
                    "Gibbs free energy found but no electronic energy was read".to_string(),
                ))
            }
            (Some(e), Some(corr)) => e + corr,
        };

        if (computed - reported).abs() > GIBBS_ATOL + GIBBS_RTOL * reported.abs() {
            return Err(QCError::ParseInconsistency(format!(
                "Computed Gibbs free energy {:.10} differs from reported {:.10}",
                computed, reported
            )));
        }
        Ok(())
    }

    /// Merges the properties of a freshly parsed set into this one.
    ///
    /// Every property set in `parsed` replaces the stored one; properties the
    /// parse did not produce are kept.
    pub fn absorb(&mut self, parsed: PropertySet) {
        let PropertySet {
            electronic_energy,
            free_energy_correction,
            mulliken_charges,
            mulliken_spin_populations,
            hirshfeld_charges,
            hirshfeld_spin_populations,
            vibrational_data,
            pka,
        } = parsed;

        replace_if_some(&mut self.electronic_energy, electronic_energy);
        replace_if_some(&mut self.free_energy_correction, free_energy_correction);
        replace_if_some(&mut self.mulliken_charges, mulliken_charges);
        replace_if_some(&mut self.mulliken_spin_populations, mulliken_spin_populations);
        replace_if_some(&mut self.hirshfeld_charges, hirshfeld_charges);
        replace_if_some(&mut self.hirshfeld_spin_populations, hirshfeld_spin_populations);
        replace_if_some(&mut self.vibrational_data, vibrational_data);
        replace_if_some(&mut self.pka, pka);
        debug!("Property set updated");
    }
}

fn tag<T>(value: T, source: &Provenance) -> Tagged<T> {
    Tagged {
        value,
        source: source.clone(),
    }
}

fn replace_if_some<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orca() -> Provenance {
        Provenance::new("ORCA", "PBE | basis: def2-TZVP | solvent: None")
    }

    #[test]
    fn test_gibbs_is_derived() {
        let mut props = PropertySet::new();
        assert_eq!(props.gibbs_free_energy(), None);
        props.set_electronic_energy(-76.4, &orca());
        props.set_free_energy_correction(0.0035, &orca());
        assert!((props.gibbs_free_energy().unwrap() - (-76.3965)).abs() < 1e-12);
    }

    #[test]
    fn test_gibbs_check_requires_correction() {
        let mut props = PropertySet::new();
        props.set_electronic_energy(-76.4, &orca());
        let err = props.check_gibbs_free_energy(-76.39).unwrap_err();
        assert!(matches!(err, QCError::ParseInconsistency(_)));
    }

    #[test]
    fn test_gibbs_check_mismatch() {
        let mut props = PropertySet::new();
        props.set_electronic_energy(-76.4, &orca());
        props.set_free_energy_correction(0.0035, &orca());
        assert!(props.check_gibbs_free_energy(-76.3965).is_ok());
        assert!(props.check_gibbs_free_energy(-76.3900).is_err());
    }

    #[test]
    fn test_provenance_recorded() {
        let mut props = PropertySet::new();
        props.set_mulliken_charges(vec![0.1, -0.1], &orca());
        assert_eq!(
            props.provenance(Property::MullikenCharges).map(|p| p.engine.as_str()),
            Some("ORCA")
        );
        assert!(props.provenance(Property::ElectronicEnergy).is_none());
    }

    #[test]
    fn test_absorb_keeps_unparsed_properties() {
        let xtb = Provenance::new("xTB", "gfn2");
        let mut stored = PropertySet::new();
        stored.set_electronic_energy(-5.0, &xtb);
        stored.set_pka(4.2, &xtb);

        let mut parsed = PropertySet::new();
        parsed.set_electronic_energy(-76.0, &orca());
        stored.absorb(parsed);

        assert_eq!(stored.electronic_energy(), Some(-76.0));
        assert_eq!(
            stored.provenance(Property::ElectronicEnergy),
            Some(&orca())
        );
        assert_eq!(stored.pka(), Some(4.2));
    }

    #[test]
    fn test_vibrational_validation() {
        let mut vib = VibrationalData {
            frequencies: vec![0.0, 1600.0],
            normal_modes: vec![DVector::zeros(6), DVector::zeros(6)],
            ..Default::default()
        };
        assert!(vib.validate(2).is_ok());
        assert!(vib.validate(3).is_err());
        vib.frequencies.push(-45.3);
        assert!(vib.validate(2).is_err());
        assert_eq!(vib.imaginary_count(), 1);
    }
}
