//! Simulated beamline.
//!
//! Registers every control point the scan stack expects under the canonical
//! names, backed by in-process simulations with realistic timing. Used by
//! the CLI's testing mode and by the integration tests.

mod detector;
mod motor;
mod shutter;
mod value;

use std::sync::Arc;

pub use detector::{DetectorSignal, SimDetector};
pub use motor::SimMotor;
pub use shutter::SimShutter;
pub use value::SimValue;

use tomo_core::{points, ControlPointRegistry, PointValue};

/// Timing constants for the simulated hardware.
#[derive(Debug, Clone)]
pub struct SimTiming {
    /// Rotation stage slew speed, deg/s.
    pub rotation_speed: f64,
    /// Sample translation speed, mm/s.
    pub translation_speed: f64,
    /// Detector readout per frame, seconds.
    pub detector_readout: f64,
}

impl Default for SimTiming {
    fn default() -> Self {
        Self {
            rotation_speed: 50.0,
            translation_speed: 5.0,
            detector_readout: 0.005,
        }
    }
}

impl SimTiming {
    /// Aggressive timing for tests: motors settle in milliseconds and
    /// frames clock out as fast as the exposure allows.
    pub fn fast() -> Self {
        Self {
            rotation_speed: 100_000.0,
            translation_speed: 100_000.0,
            detector_readout: 0.0,
        }
    }
}

/// Handles onto the simulated hardware, kept alongside the registry so
/// tests can assert on physical state directly.
pub struct SimBeamline {
    pub registry: Arc<ControlPointRegistry>,
    pub rotation: SimMotor,
    pub sample_x: SimMotor,
    pub sample_y: SimMotor,
    pub shutter: SimShutter,
    pub detector: SimDetector,
}

/// Build a fully populated simulated beamline.
pub fn simulated_beamline(timing: &SimTiming) -> SimBeamline {
    let rotation = SimMotor::new(points::ROTATION, 0.0, timing.rotation_speed);
    let sample_x = SimMotor::new(points::SAMPLE_X, 0.0, timing.translation_speed);
    let sample_y = SimMotor::new(points::SAMPLE_Y, 0.0, timing.translation_speed);
    let shutter = SimShutter::new();
    let detector = SimDetector::new(timing.detector_readout);

    let mut registry = ControlPointRegistry::new();
    registry.register(Arc::new(rotation.clone()));
    registry.register(Arc::new(rotation.speed_point(points::ROTATION_SPEED)));
    registry.register(Arc::new(rotation.stop_point(points::ROTATION_STOP)));
    registry.register(Arc::new(sample_x.clone()));
    registry.register(Arc::new(sample_y.clone()));
    registry.register(Arc::new(shutter.open_point(points::OPEN_SHUTTER)));
    registry.register(Arc::new(shutter.close_point(points::CLOSE_SHUTTER)));

    registry.register(Arc::new(
        detector.point(points::CAM_ACQUIRE, DetectorSignal::Acquire),
    ));
    registry.register(Arc::new(
        detector.point(points::CAM_ACQUIRE_BUSY, DetectorSignal::AcquireBusy),
    ));
    registry.register(Arc::new(
        detector.point(points::CAM_TRIGGER_MODE, DetectorSignal::TriggerMode),
    ));
    registry.register(Arc::new(
        detector.point(points::CAM_NUM_IMAGES, DetectorSignal::NumImages),
    ));
    registry.register(Arc::new(
        detector.point(points::CAM_IMAGES_COLLECTED, DetectorSignal::Collected),
    ));
    registry.register(Arc::new(
        detector.point(points::CAM_EXPOSURE, DetectorSignal::Exposure),
    ));
    registry.register(Arc::new(
        detector.point(points::CAM_FRAME_TYPE, DetectorSignal::FrameType),
    ));
    registry.register(Arc::new(
        detector.point(points::FILE_NUM_CAPTURE, DetectorSignal::NumCapture),
    ));
    registry.register(Arc::new(
        detector.point(points::FILE_NUM_CAPTURED, DetectorSignal::NumCaptured),
    ));

    registry.register(Arc::new(SimValue::new(points::FILE_PATH, "")));
    registry.register(Arc::new(SimValue::new(points::FILE_NAME, "")));
    registry.register(Arc::new(SimValue::new(points::DARK_FIELD_VALUE, 0.0)));
    registry.register(Arc::new(SimValue::new(points::FLAT_FIELD_VALUE, 0.0)));
    registry.register(Arc::new(SimValue::new(points::WATCHDOG, PointValue::Int(0))));
    registry.register(Arc::new(SimValue::new(points::SCAN_STATUS, "idle")));

    // Pulse-division trigger hardware.
    registry.register(Arc::new(SimValue::new(points::MCS_PRESCALE, PointValue::Int(0))));
    registry.register(Arc::new(SimValue::new(points::MCS_DWELL, 0.0)));
    registry.register(Arc::new(SimValue::new(
        points::MCS_ERASE_START,
        PointValue::Int(0),
    )));
    registry.register(Arc::new(SimValue::new(points::MCS_STOP, PointValue::Int(0))));
    registry.register(Arc::new(SimValue::new(
        points::MCS_CHANNEL_ADVANCE,
        PointValue::Int(0),
    )));

    // Position-synchronized-output trigger hardware.
    registry.register(Arc::new(SimValue::new(points::PSO_START_POS, 0.0)));
    registry.register(Arc::new(SimValue::new(points::PSO_END_POS, 0.0)));
    registry.register(Arc::new(SimValue::new(points::PSO_SCAN_DELTA, 0.0)));
    registry.register(Arc::new(SimValue::new(points::PSO_ARM, PointValue::Int(0))));

    SimBeamline {
        registry: Arc::new(registry),
        rotation,
        sample_x,
        sample_y,
        shutter,
        detector,
    }
}
