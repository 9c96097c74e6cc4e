//! Per-site hardware capabilities.
//!
//! Beamlines differ in how the rotation stage triggers the detector and in
//! detector readout characteristics. Sites supply a [`HardwareProfile`]
//! implementation instead of subclassing the engine.

use std::time::Duration;

/// How the rotation stage produces one detector trigger per angular step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerSource {
    /// A hardware counter divides the stepper pulse train. The division
    /// factor is micro-steps per projection step.
    PulseDivision {
        /// Stepper micro-steps per degree of rotation.
        steps_per_degree: f64,
    },
    /// An encoder-linked controller emits one pulse per fixed encoder-count
    /// increment while the stage is at constant velocity.
    PositionSync {
        /// Encoder counts per full rotation. Sign encodes the encoder
        /// direction convention relative to positive motor motion.
        counts_per_rotation: f64,
        /// Time for the stage to reach slew speed, seconds.
        accel_time: f64,
    },
}

/// Site-specific constants the engine and synchronization policy need.
pub trait HardwareProfile: Send + Sync {
    fn trigger_source(&self) -> TriggerSource;

    /// Detector readout time per frame, seconds.
    fn readout_time(&self) -> f64;

    /// Safety margin multiplied into the exposure when computing frame
    /// spacing. 1.0 means no margin.
    fn readout_margin(&self) -> f64 {
        1.0
    }

    /// Rotation slew speed used outside triggered acquisition, deg/s.
    fn slew_speed(&self) -> f64 {
        50.0
    }

    /// Minimum time between detector triggers for a given exposure.
    /// The frame is bounded below by exposure plus a 1 ms trigger latency
    /// over the readout.
    fn frame_time(&self, exposure: f64) -> f64 {
        let margin = exposure * self.readout_margin();
        margin.max(self.readout_time() + exposure + 0.001)
    }

    /// Upper bound on how long collecting `num_frames` may take before the
    /// scan is declared timed out.
    fn collection_bound(&self, num_frames: u32, exposure: f64) -> Duration {
        let nominal = f64::from(num_frames) * self.frame_time(exposure);
        Duration::from_secs_f64(nominal * 1.1 + 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Profile {
        readout: f64,
        margin: f64,
    }

    impl HardwareProfile for Profile {
        fn trigger_source(&self) -> TriggerSource {
            TriggerSource::PulseDivision {
                steps_per_degree: 10000.0,
            }
        }

        fn readout_time(&self) -> f64 {
            self.readout
        }

        fn readout_margin(&self) -> f64 {
            self.margin
        }
    }

    #[test]
    fn frame_time_is_bounded_by_readout() {
        let profile = Profile {
            readout: 0.05,
            margin: 1.01,
        };
        // Long exposure: margin dominates readout floor.
        let long = profile.frame_time(10.0);
        assert!((long - 10.1).abs() < 1e-9);
        // Short exposure: readout plus latency dominates.
        let short = profile.frame_time(0.01);
        assert!((short - 0.061).abs() < 1e-9);
    }

    #[test]
    fn collection_bound_has_fixed_slack() {
        let profile = Profile {
            readout: 0.0,
            margin: 1.0,
        };
        let bound = profile.collection_bound(100, 0.1);
        // 100 frames at ~0.101 s, 10% slack, plus 60 s.
        assert!(bound > Duration::from_secs(70));
        assert!(bound < Duration::from_secs(72));
    }
}
