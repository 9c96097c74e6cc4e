//! Energy-scan calibration and interpolation.
//!
//! An energy scan replays the beamline setup at arbitrary energies between
//! two reference calibrations captured at known energies. Each calibration
//! is an ordered list of control-point values; for a requested energy every
//! value is linearly interpolated between the two references.

use std::path::Path;

use serde::{Deserialize, Serialize};

use tomo_core::{TomoError, TomoResult};

use crate::sync::EPSILON;

/// Control-point values captured at one known energy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyCalibration {
    /// Beam energy this capture was taken at, keV.
    pub energy: f64,
    /// Ordered (control point name, value) pairs.
    pub points: Vec<(String, f64)>,
}

impl EnergyCalibration {
    pub fn load(path: &Path) -> TomoResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            TomoError::Configuration(format!(
                "cannot read energy calibration {}: {err}",
                path.display()
            ))
        })?;
        let calibration: Self = serde_json::from_str(&text).map_err(|err| {
            TomoError::Configuration(format!(
                "malformed energy calibration {}: {err}",
                path.display()
            ))
        })?;
        Ok(calibration)
    }

    pub fn save(&self, path: &Path) -> TomoResult<()> {
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

/// Validate a calibration pair: both must reference the same ordered list
/// of control points, at energies that actually differ.
pub fn validate_pair(low: &EnergyCalibration, high: &EnergyCalibration) -> TomoResult<()> {
    if (high.energy - low.energy).abs() <= EPSILON {
        return Err(TomoError::Configuration(format!(
            "energy calibrations are at the same energy ({} keV)",
            low.energy
        )));
    }
    if low.points.len() != high.points.len() {
        return Err(TomoError::Configuration(format!(
            "energy calibrations list {} vs {} control points",
            low.points.len(),
            high.points.len()
        )));
    }
    for ((name_low, _), (name_high, _)) in low.points.iter().zip(&high.points) {
        if name_low != name_high {
            return Err(TomoError::Configuration(format!(
                "energy calibrations disagree on control point order: '{name_low}' vs '{name_high}'"
            )));
        }
    }
    Ok(())
}

/// Linearly interpolate every calibrated value at `energy`. The pair must
/// have passed [`validate_pair`]; requested energies outside the reference
/// interval extrapolate on the same line.
pub fn interpolate(
    low: &EnergyCalibration,
    high: &EnergyCalibration,
    energy: f64,
) -> Vec<(String, f64)> {
    let fraction = (energy - low.energy) / (high.energy - low.energy);
    low.points
        .iter()
        .zip(&high.points)
        .map(|((name, value_low), (_, value_high))| {
            (name.clone(), value_low + fraction * (value_high - value_low))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibration(energy: f64, values: &[(&str, f64)]) -> EnergyCalibration {
        EnergyCalibration {
            energy,
            points: values
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect(),
        }
    }

    #[test]
    fn interpolation_is_exact_linear() {
        let low = calibration(10.0, &[("mirror_angle", 5.0), ("sample_x", 1.0)]);
        let high = calibration(10.1, &[("mirror_angle", 5.2), ("sample_x", 1.0)]);
        validate_pair(&low, &high).unwrap();

        let mid = interpolate(&low, &high, 10.05);
        assert_eq!(mid[0].0, "mirror_angle");
        assert!((mid[0].1 - 5.1).abs() < 1e-9);
        assert!((mid[1].1 - 1.0).abs() < 1e-9);

        // At a reference energy the reference values come back exactly.
        let at_low = interpolate(&low, &high, 10.0);
        assert!((at_low[0].1 - 5.0).abs() < 1e-12);
    }

    #[test]
    fn equal_reference_energies_are_rejected() {
        let low = calibration(10.0, &[("mirror_angle", 5.0)]);
        let high = calibration(10.0, &[("mirror_angle", 5.2)]);
        assert!(matches!(
            validate_pair(&low, &high),
            Err(TomoError::Configuration(_))
        ));
    }

    #[test]
    fn mismatched_point_lists_are_rejected() {
        let low = calibration(10.0, &[("mirror_angle", 5.0), ("sample_x", 1.0)]);
        let reordered = calibration(10.1, &[("sample_x", 1.0), ("mirror_angle", 5.2)]);
        assert!(validate_pair(&low, &reordered).is_err());

        let shorter = calibration(10.1, &[("mirror_angle", 5.2)]);
        assert!(validate_pair(&low, &shorter).is_err());
    }

    #[test]
    fn calibration_files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("energy_10keV.json");
        let original = calibration(10.0, &[("mirror_angle", 5.0)]);
        original.save(&path).unwrap();
        assert_eq!(EnergyCalibration::load(&path).unwrap(), original);
    }

    #[test]
    fn missing_calibration_is_a_configuration_error() {
        let err = EnergyCalibration::load(Path::new("/no/such/file.json")).unwrap_err();
        assert!(matches!(err, TomoError::Configuration(_)));
    }
}
