//! Hardware synchronization policy.
//!
//! Computes everything needed so that one detector trigger corresponds to
//! exactly one angular step: the pulse division factor or encoder delta,
//! the motor speed during triggered acquisition, and the taxi positions
//! that keep acceleration ramps outside the triggered range. All of it is
//! pure arithmetic; the engine applies the resulting plan to hardware.

use tomo_core::{HardwareProfile, ScanParameters, TomoError, TomoResult, TriggerSource};

/// Step sizes are adjusted to the encoder grid; a relative drift beyond
/// this is reported to the operator.
const STEP_DRIFT_WARN: f64 = 1e-5;

/// Tolerance below which two energies or angles are considered equal.
pub const EPSILON: f64 = 1e-6;

/// Triggering plan for one dataset in pulse-division mode.
#[derive(Debug, Clone, PartialEq)]
pub struct PulseDivisionPlan {
    /// Micro-steps per detector trigger.
    pub prescale: i64,
    /// Counter dwell for static frame collection, seconds.
    pub dwell: f64,
    /// Rotation speed during triggered acquisition, deg/s.
    pub motor_speed: f64,
    /// Start position with backoff so the first step is taken at speed.
    pub taxi_start: f64,
    /// Position commanded for the triggered move.
    pub motion_target: f64,
}

/// Triggering plan for one dataset in position-synchronized-output mode.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSyncPlan {
    /// Encoder counts between triggers.
    pub counts_per_step: i64,
    /// Signed angular step after rounding to the encoder grid.
    pub step: f64,
    /// End of the triggered range after step adjustment.
    pub rotation_stop: f64,
    pub motor_speed: f64,
    pub taxi_start: f64,
    /// Position commanded for the triggered move, past the last trigger.
    pub taxi_end: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncPlan {
    PulseDivision(PulseDivisionPlan),
    PositionSync(PositionSyncPlan),
}

impl SyncPlan {
    pub fn motor_speed(&self) -> f64 {
        match self {
            SyncPlan::PulseDivision(plan) => plan.motor_speed,
            SyncPlan::PositionSync(plan) => plan.motor_speed,
        }
    }

    pub fn taxi_start(&self) -> f64 {
        match self {
            SyncPlan::PulseDivision(plan) => plan.taxi_start,
            SyncPlan::PositionSync(plan) => plan.taxi_start,
        }
    }

    pub fn motion_target(&self) -> f64 {
        match self {
            SyncPlan::PulseDivision(plan) => plan.motion_target,
            SyncPlan::PositionSync(plan) => plan.taxi_end,
        }
    }
}

/// Compute the synchronization plan for `params` on the site described by
/// `profile`. Configuration mismatches are caught here, before any
/// hardware is touched.
pub fn plan_sync(params: &ScanParameters, profile: &dyn HardwareProfile) -> TomoResult<SyncPlan> {
    let frame_time = profile.frame_time(params.exposure_time);
    match profile.trigger_source() {
        TriggerSource::PulseDivision { steps_per_degree } => {
            plan_pulse_division(params, profile, steps_per_degree, frame_time)
        }
        TriggerSource::PositionSync {
            counts_per_rotation,
            accel_time,
        } => plan_position_sync(params, counts_per_rotation, accel_time, frame_time),
    }
}

fn plan_pulse_division(
    params: &ScanParameters,
    profile: &dyn HardwareProfile,
    steps_per_degree: f64,
    frame_time: f64,
) -> TomoResult<SyncPlan> {
    if steps_per_degree <= 0.0 {
        return Err(TomoError::Configuration(
            "steps_per_degree must be positive".into(),
        ));
    }
    let prescale = (params.rotation_step.abs() * steps_per_degree).floor() as i64;
    if prescale < 1 {
        return Err(TomoError::Configuration(format!(
            "rotation step {} deg is below one micro-step ({} steps/deg)",
            params.rotation_step, steps_per_degree
        )));
    }

    // Floor the speed to a whole number of micro-steps per second so the
    // divided pulse train stays phase-locked to the motion.
    let raw_speed = params.rotation_step.abs() / frame_time;
    let motor_speed = (raw_speed * steps_per_degree).floor() / steps_per_degree;
    if motor_speed <= 0.0 {
        return Err(TomoError::Configuration(
            "rotation speed rounds to zero at this exposure".into(),
        ));
    }

    // 1.5 steps of backoff: one step for the counter to arm, half a step
    // of ramp allowance.
    let taxi_start = params.rotation_start - 1.5 * params.rotation_step;

    Ok(SyncPlan::PulseDivision(PulseDivisionPlan {
        prescale,
        dwell: params.exposure_time + profile.readout_time(),
        motor_speed,
        taxi_start,
        motion_target: params.rotation_stop(),
    }))
}

fn plan_position_sync(
    params: &ScanParameters,
    counts_per_rotation: f64,
    accel_time: f64,
    frame_time: f64,
) -> TomoResult<SyncPlan> {
    if counts_per_rotation == 0.0 {
        return Err(TomoError::Configuration(
            "encoder counts_per_rotation is zero".into(),
        ));
    }
    // The encoder sign convention must agree with the scan direction, or
    // the controller would count away from the programmed window.
    if counts_per_rotation * params.rotation_step < 0.0 {
        return Err(TomoError::Configuration(format!(
            "encoder direction ({}) does not match rotation step {}",
            if counts_per_rotation > 0.0 { "+" } else { "-" },
            params.rotation_step
        )));
    }

    let encoder_multiply = counts_per_rotation.abs() / 360.0;
    let counts_per_step = (params.rotation_step.abs() * encoder_multiply).round() as i64;
    if counts_per_step < 1 {
        return Err(TomoError::Configuration(format!(
            "rotation step {} deg is below one encoder count",
            params.rotation_step
        )));
    }

    let sign = params.rotation_step.signum();
    let adjusted = counts_per_step as f64 / encoder_multiply;
    let drift = (adjusted - params.rotation_step.abs()).abs() / params.rotation_step.abs();
    if drift > STEP_DRIFT_WARN {
        tracing::warn!(
            requested = params.rotation_step.abs(),
            adjusted,
            "rotation step adjusted to the encoder grid"
        );
    }
    let step = adjusted * sign;
    let rotation_stop = params.rotation_start + step * f64::from(params.num_angles);

    let motor_speed = adjusted / frame_time;
    // Distance covered while ramping up, plus enough whole steps that the
    // first trigger fires at constant velocity.
    let accel_dist = accel_time / 2.0 * motor_speed;
    let taxi_dist = ((accel_dist / adjusted).ceil() + 0.5) * adjusted;
    let taxi_start = params.rotation_start - taxi_dist * sign;
    let taxi_end = rotation_stop + taxi_dist * sign;

    Ok(SyncPlan::PositionSync(PositionSyncPlan {
        counts_per_step,
        step,
        rotation_stop,
        motor_speed,
        taxi_start,
        taxi_end,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Profile {
        source: TriggerSource,
    }

    impl HardwareProfile for Profile {
        fn trigger_source(&self) -> TriggerSource {
            self.source
        }

        fn readout_time(&self) -> f64 {
            0.01
        }
    }

    fn params(start: f64, step: f64, num_angles: u32) -> ScanParameters {
        ScanParameters {
            rotation_start: start,
            rotation_step: step,
            num_angles,
            exposure_time: 0.1,
            ..Default::default()
        }
    }

    fn pulse_profile(steps_per_degree: f64) -> Profile {
        Profile {
            source: TriggerSource::PulseDivision { steps_per_degree },
        }
    }

    fn pso_profile(counts_per_rotation: f64, accel_time: f64) -> Profile {
        Profile {
            source: TriggerSource::PositionSync {
                counts_per_rotation,
                accel_time,
            },
        }
    }

    #[test]
    fn pulse_division_prescale_and_taxi() {
        let plan = plan_sync(&params(0.0, 0.12, 1500), &pulse_profile(10000.0)).unwrap();
        let SyncPlan::PulseDivision(plan) = plan else {
            panic!("expected pulse-division plan");
        };
        assert_eq!(plan.prescale, 1200);
        assert!((plan.dwell - 0.11).abs() < 1e-12);
        assert!((plan.taxi_start - (-0.18)).abs() < 1e-12);
        assert!((plan.motion_target - 180.0).abs() < 1e-9);
        // frame_time = 0.1 + 0.01 + 0.001; speed just under 0.12/0.111.
        assert!(plan.motor_speed > 0.0 && plan.motor_speed <= 0.12 / 0.111 + 1e-12);
    }

    #[test]
    fn pulse_division_rejects_sub_microstep_steps() {
        let err = plan_sync(&params(0.0, 0.00005, 100), &pulse_profile(10000.0)).unwrap_err();
        assert!(matches!(err, TomoError::Configuration(_)));
    }

    #[test]
    fn position_sync_rounds_step_to_encoder_grid() {
        // 36000 counts per rotation = 100 counts per degree.
        let plan = plan_sync(&params(0.0, 0.124, 1440), &pso_profile(36000.0, 1.0)).unwrap();
        let SyncPlan::PositionSync(plan) = plan else {
            panic!("expected position-sync plan");
        };
        // 0.124 deg * 100 counts/deg rounds to 12 counts, 0.12 deg.
        assert_eq!(plan.counts_per_step, 12);
        assert!((plan.step - 0.12).abs() < 1e-12);
        assert!((plan.rotation_stop - 172.8).abs() < 1e-9);
        // Taxi is whole adjusted steps plus a half step beyond accel_dist.
        let accel_dist = 1.0 / 2.0 * plan.motor_speed;
        let expected_taxi = ((accel_dist / 0.12).ceil() + 0.5) * 0.12;
        assert!((plan.taxi_start - (-expected_taxi)).abs() < 1e-9);
        assert!((plan.taxi_end - (172.8 + expected_taxi)).abs() < 1e-9);
    }

    #[test]
    fn position_sync_reverse_scan_taxis_past_both_ends() {
        let plan = plan_sync(&params(180.0, -0.12, 1500), &pso_profile(-36000.0, 1.0)).unwrap();
        let SyncPlan::PositionSync(plan) = plan else {
            panic!("expected position-sync plan");
        };
        assert!(plan.step < 0.0);
        assert!(plan.taxi_start > 180.0);
        assert!(plan.taxi_end < plan.rotation_stop);
    }

    #[test]
    fn position_sync_direction_mismatch_is_a_setup_error() {
        let err = plan_sync(&params(0.0, 0.12, 1500), &pso_profile(-36000.0, 1.0)).unwrap_err();
        assert!(matches!(err, TomoError::Configuration(_)));

        let err = plan_sync(&params(0.0, 0.12, 1500), &pso_profile(0.0, 1.0)).unwrap_err();
        assert!(matches!(err, TomoError::Configuration(_)));
    }
}
