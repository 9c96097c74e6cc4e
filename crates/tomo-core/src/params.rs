//! Scan parameters for one tomographic dataset.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TomoError, TomoResult};

/// When dark or flat fields are collected relative to the projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FieldMode {
    None,
    #[default]
    Start,
    End,
    Both,
}

impl FieldMode {
    pub fn at_start(self) -> bool {
        matches!(self, FieldMode::Start | FieldMode::Both)
    }

    pub fn at_end(self) -> bool {
        matches!(self, FieldMode::End | FieldMode::Both)
    }

    /// Number of times the phase runs over the whole scan.
    pub fn occurrences(self) -> u32 {
        match self {
            FieldMode::None => 0,
            FieldMode::Start | FieldMode::End => 1,
            FieldMode::Both => 2,
        }
    }
}

/// Which translation axis moves the sample out of the beam for flat fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FlatFieldAxis {
    #[default]
    X,
    Y,
    Both,
    /// No sample motion at all; used when flat fields are disabled.
    None,
}

/// Sweep shape tag recorded with each dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    #[default]
    Single,
    Vertical,
    Horizontal,
    Mosaic,
    Energy,
    File,
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanType::Single => "single",
            ScanType::Vertical => "vertical",
            ScanType::Horizontal => "horizontal",
            ScanType::Mosaic => "mosaic",
            ScanType::Energy => "energy",
            ScanType::File => "file",
        };
        f.write_str(s)
    }
}

impl FromStr for ScanType {
    type Err = TomoError;

    fn from_str(s: &str) -> TomoResult<Self> {
        match s {
            "single" => Ok(ScanType::Single),
            "vertical" => Ok(ScanType::Vertical),
            "horizontal" => Ok(ScanType::Horizontal),
            "mosaic" => Ok(ScanType::Mosaic),
            "energy" => Ok(ScanType::Energy),
            "file" => Ok(ScanType::File),
            other => Err(TomoError::Configuration(format!(
                "unknown scan type '{other}'"
            ))),
        }
    }
}

/// Everything one dataset acquisition needs. Snapshotted at `BeginScan` and
/// immutable for the duration of the scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanParameters {
    pub rotation_start: f64,
    /// Degrees per projection; negative steps scan in the reverse direction.
    pub rotation_step: f64,
    pub num_angles: u32,
    /// Command the rotation stage back to `rotation_start` after the last
    /// projection. The return motion is initiated, not awaited.
    pub return_rotation: bool,

    pub num_dark_fields: u32,
    pub dark_field_mode: FieldMode,
    /// Detector register value tagging dark frames.
    pub dark_field_value: f64,

    pub num_flat_fields: u32,
    pub flat_field_mode: FieldMode,
    pub flat_field_value: f64,
    pub flat_field_axis: FlatFieldAxis,
    /// Use `flat_exposure_time` instead of `exposure_time` for flat frames.
    pub different_flat_exposure: bool,
    pub flat_exposure_time: f64,

    pub sample_in_x: f64,
    pub sample_out_x: f64,
    pub sample_in_y: f64,
    pub sample_out_y: f64,

    /// Seconds per frame.
    pub exposure_time: f64,

    pub file_path: String,
    pub file_name: String,

    pub scan_type: ScanType,
}

impl Default for ScanParameters {
    fn default() -> Self {
        Self {
            rotation_start: 0.0,
            rotation_step: 0.12,
            num_angles: 1500,
            return_rotation: true,
            num_dark_fields: 0,
            dark_field_mode: FieldMode::None,
            dark_field_value: 0.0,
            num_flat_fields: 0,
            flat_field_mode: FieldMode::None,
            flat_field_value: 0.0,
            flat_field_axis: FlatFieldAxis::X,
            different_flat_exposure: false,
            flat_exposure_time: 0.1,
            sample_in_x: 0.0,
            sample_out_x: 0.0,
            sample_in_y: 0.0,
            sample_out_y: 0.0,
            exposure_time: 0.1,
            file_path: String::new(),
            file_name: String::new(),
            scan_type: ScanType::Single,
        }
    }
}

impl ScanParameters {
    /// Derived end angle. Never stored, always recomputed.
    pub fn rotation_stop(&self) -> f64 {
        self.rotation_start + self.rotation_step * f64::from(self.num_angles)
    }

    /// Total frames the file writer should expect for this dataset,
    /// counting each dark/flat phase once per occurrence.
    pub fn total_images(&self) -> u32 {
        self.num_angles
            + self.num_dark_fields * self.dark_field_mode.occurrences()
            + self.num_flat_fields * self.flat_field_mode.occurrences()
    }

    pub fn validate(&self) -> TomoResult<()> {
        if self.num_angles == 0 {
            return Err(TomoError::Configuration("num_angles must be > 0".into()));
        }
        if self.rotation_step == 0.0 {
            return Err(TomoError::Configuration(
                "rotation_step must be non-zero".into(),
            ));
        }
        if self.exposure_time <= 0.0 {
            return Err(TomoError::Configuration(
                "exposure_time must be positive".into(),
            ));
        }
        if self.dark_field_mode != FieldMode::None && self.num_dark_fields == 0 {
            return Err(TomoError::Configuration(
                "dark fields enabled but num_dark_fields is 0".into(),
            ));
        }
        if self.flat_field_mode != FieldMode::None && self.num_flat_fields == 0 {
            return Err(TomoError::Configuration(
                "flat fields enabled but num_flat_fields is 0".into(),
            ));
        }
        if self.different_flat_exposure && self.flat_exposure_time <= 0.0 {
            return Err(TomoError::Configuration(
                "flat_exposure_time must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Exposure applied during flat-field collection.
    pub fn flat_exposure(&self) -> f64 {
        if self.different_flat_exposure {
            self.flat_exposure_time
        } else {
            self.exposure_time
        }
    }
}
