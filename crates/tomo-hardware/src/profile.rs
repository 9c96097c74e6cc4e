//! Concrete hardware profiles.

use tomo_core::{HardwareProfile, TriggerSource};

/// A profile assembled from plain constants. Sites with unusual detector
/// timing implement [`HardwareProfile`] directly instead.
#[derive(Debug, Clone)]
pub struct BeamlineProfile {
    pub trigger_source: TriggerSource,
    pub readout_time: f64,
    pub readout_margin: f64,
    pub slew_speed: f64,
}

impl BeamlineProfile {
    /// Stepper-driven stage with a pulse-dividing counter.
    pub fn pulse_division(steps_per_degree: f64) -> Self {
        Self {
            trigger_source: TriggerSource::PulseDivision { steps_per_degree },
            readout_time: 0.005,
            readout_margin: 1.01,
            slew_speed: 50.0,
        }
    }

    /// Encoder-linked stage with position-synchronized output.
    pub fn position_sync(counts_per_rotation: f64, accel_time: f64) -> Self {
        Self {
            trigger_source: TriggerSource::PositionSync {
                counts_per_rotation,
                accel_time,
            },
            readout_time: 0.005,
            readout_margin: 1.01,
            slew_speed: 50.0,
        }
    }

    pub fn with_readout(mut self, readout_time: f64, readout_margin: f64) -> Self {
        self.readout_time = readout_time;
        self.readout_margin = readout_margin;
        self
    }

    pub fn with_slew_speed(mut self, slew_speed: f64) -> Self {
        self.slew_speed = slew_speed;
        self
    }
}

impl HardwareProfile for BeamlineProfile {
    fn trigger_source(&self) -> TriggerSource {
        self.trigger_source
    }

    fn readout_time(&self) -> f64 {
        self.readout_time
    }

    fn readout_margin(&self) -> f64 {
        self.readout_margin
    }

    fn slew_speed(&self) -> f64 {
        self.slew_speed
    }
}

impl Default for BeamlineProfile {
    /// Matches the simulated beamline: pulse division, 10000 steps/degree.
    fn default() -> Self {
        Self::pulse_division(10000.0)
    }
}
