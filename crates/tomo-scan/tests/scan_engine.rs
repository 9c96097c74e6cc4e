//! Engine scenarios against the simulated beamline.

use std::sync::Arc;
use std::time::Duration;

use tomo_core::{
    points, trigger_mode, FieldMode, FlatFieldAxis, HardwareProfile, ScanParameters, ScanState,
    TomoError, TriggerSource,
};
use tomo_hardware::{simulated_beamline, BeamlineProfile, SimBeamline, SimTiming};
use tomo_scan::engine::{EngineTimeouts, ScanEngine, ScanOutcome};

fn fast_timeouts() -> EngineTimeouts {
    EngineTimeouts {
        motion: Duration::from_secs(5),
        shutter: Duration::from_secs(1),
        poll: Duration::from_millis(5),
    }
}

fn test_engine() -> (ScanEngine, SimBeamline) {
    let beamline = simulated_beamline(&SimTiming::fast());
    let engine = ScanEngine::with_timeouts(
        Arc::clone(&beamline.registry),
        Arc::new(BeamlineProfile::default()),
        fast_timeouts(),
    );
    (engine, beamline)
}

fn quick_params(num_angles: u32) -> ScanParameters {
    ScanParameters {
        rotation_start: 0.0,
        rotation_step: 0.12,
        num_angles,
        exposure_time: 0.005,
        return_rotation: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn single_scan_collects_exactly_num_angles() {
    let (engine, beamline) = test_engine();
    let params = quick_params(5);

    let outcome = engine.run_scan(&params).await.unwrap();
    assert_eq!(outcome, ScanOutcome::Complete);

    let status = engine.status().await;
    assert_eq!(status.state, ScanState::Complete);
    assert_eq!(status.progress.images_collected, 5);
    assert_eq!(status.progress.total_images, 5);

    // Teardown leaves the shutter closed and the detector restored to its
    // pre-scan free-running mode.
    assert!(!beamline.shutter.is_open().await);
    assert_eq!(beamline.detector.trigger_mode().await, trigger_mode::FREE_RUN);
    assert_eq!(engine.completed_scans(), 1);

    // External observers see the final state on the published point.
    assert_eq!(
        beamline
            .registry
            .read_string(points::SCAN_STATUS)
            .await
            .unwrap(),
        "complete"
    );
}

#[tokio::test]
async fn dark_and_flat_phases_run_in_order() {
    let (engine, beamline) = test_engine();
    let params = ScanParameters {
        num_dark_fields: 2,
        dark_field_mode: FieldMode::Both,
        dark_field_value: 3.0,
        num_flat_fields: 3,
        flat_field_mode: FieldMode::Start,
        flat_field_value: 95.0,
        flat_field_axis: FlatFieldAxis::X,
        sample_in_x: 0.0,
        sample_out_x: 5.0,
        ..quick_params(4)
    };

    let outcome = engine.run_scan(&params).await.unwrap();
    assert_eq!(outcome, ScanOutcome::Complete);

    let status = engine.status().await;
    // 4 projections + 2 darks at each end + 3 flats at the start.
    assert_eq!(status.progress.images_collected, 4 + 2 * 2 + 3);
    assert_eq!(status.progress.total_images, params.total_images());

    // The sample is back in the beam after the flat-field excursion.
    assert!((beamline.sample_x.position().await - params.sample_in_x).abs() < 1e-9);
    assert!(beamline.detector.is_idle().await);

    // The substitute pixel values were recorded with the dataset.
    let registry = &beamline.registry;
    assert_eq!(
        registry.read_f64(points::DARK_FIELD_VALUE).await.unwrap(),
        3.0
    );
    assert_eq!(
        registry.read_f64(points::FLAT_FIELD_VALUE).await.unwrap(),
        95.0
    );
}

#[tokio::test]
async fn scan_writes_a_dataset_snapshot() {
    let (engine, _beamline) = test_engine();
    let dir = tempfile::tempdir().unwrap();
    let params = ScanParameters {
        file_path: dir.path().to_string_lossy().into_owned(),
        file_name: "sample_a_001".into(),
        ..quick_params(3)
    };

    engine.run_scan(&params).await.unwrap();

    let snapshot = dir.path().join("sample_a_001.config.json");
    let text = std::fs::read_to_string(snapshot).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert!(value["collected_at"].is_string());
    let recorded: ScanParameters = serde_json::from_value(value["params"].clone()).unwrap();
    assert_eq!(recorded, params);
}

#[tokio::test]
async fn abort_mid_projections_leaves_hardware_safe() {
    let (engine, beamline) = test_engine();
    // Enough frames that the scan is still collecting when we abort.
    let params = quick_params(1000);

    let runner = engine.clone();
    let scan = tokio::spawn(async move { runner.run_scan(&params).await });

    // Wait until projections are underway, then pull the plug.
    loop {
        let state = engine.status().await.state;
        if state == ScanState::Running(tomo_core::ScanPhase::CollectProjections)
            && beamline.detector.is_acquiring().await
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    engine.request_abort();

    let outcome = scan.await.unwrap().unwrap();
    assert_eq!(outcome, ScanOutcome::Aborted);
    assert_eq!(engine.status().await.state, ScanState::Aborted);
    assert_eq!(
        beamline
            .registry
            .read_string(points::SCAN_STATUS)
            .await
            .unwrap(),
        "aborted"
    );
    assert!(!beamline.shutter.is_open().await);
    assert!(beamline.detector.is_idle().await);
    assert!(engine.is_ready());
    assert_eq!(engine.completed_scans(), 0);
}

#[tokio::test]
async fn second_scan_is_rejected_while_busy() {
    let (engine, _beamline) = test_engine();
    let params = quick_params(1000);

    let runner = engine.clone();
    let background = params.clone();
    let scan = tokio::spawn(async move { runner.run_scan(&background).await });

    while engine.is_ready() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let before = engine.status().await;

    let err = engine.run_scan(&params).await.unwrap_err();
    assert!(matches!(err, TomoError::Busy { .. }));
    // The rejection must not touch the running scan's status.
    assert_eq!(engine.status().await.state, before.state);

    engine.request_abort();
    scan.await.unwrap().unwrap();
}

#[tokio::test]
async fn complete_is_reported_while_return_rotation_travels() {
    let beamline = simulated_beamline(&SimTiming::fast());
    let engine = ScanEngine::with_timeouts(
        Arc::clone(&beamline.registry),
        Arc::new(BeamlineProfile::default()),
        fast_timeouts(),
    );
    // Large steps put the stage tens of degrees out when the last frame
    // lands, so the return at slew speed takes a while.
    let params = ScanParameters {
        rotation_step: 10.0,
        return_rotation: true,
        ..quick_params(5)
    };

    let outcome = engine.run_scan(&params).await.unwrap();
    assert_eq!(outcome, ScanOutcome::Complete);
    assert_eq!(engine.status().await.state, ScanState::Complete);
    // The return motion was initiated, not awaited.
    assert!(beamline.rotation.is_moving().await);

    beamline
        .registry
        .wait_until(
            points::ROTATION,
            |v| v.as_f64().is_some_and(|p| p.abs() < 1e-6),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
}

/// Profile whose collection bound expires almost immediately, standing in
/// for a detector that stops producing frames.
struct StalledProfile;

impl HardwareProfile for StalledProfile {
    fn trigger_source(&self) -> TriggerSource {
        TriggerSource::PulseDivision {
            steps_per_degree: 10000.0,
        }
    }

    fn readout_time(&self) -> f64 {
        0.0
    }

    fn collection_bound(&self, _num_frames: u32, _exposure: f64) -> Duration {
        Duration::from_millis(50)
    }
}

#[tokio::test]
async fn detector_stall_times_out_and_cleans_up() {
    let beamline = simulated_beamline(&SimTiming::fast());
    let engine = ScanEngine::with_timeouts(
        Arc::clone(&beamline.registry),
        Arc::new(StalledProfile),
        fast_timeouts(),
    );
    // Ten-second exposures cannot finish inside the 50 ms bound.
    let params = ScanParameters {
        exposure_time: 10.0,
        ..quick_params(5)
    };

    let err = engine.run_scan(&params).await.unwrap_err();
    assert!(matches!(err, TomoError::DetectorTimeout { expected: 5, .. }));
    assert!(matches!(engine.status().await.state, ScanState::Error(_)));
    assert!(!beamline.shutter.is_open().await);
    assert!(beamline.detector.is_idle().await);
    assert!(engine.is_ready());
}

#[tokio::test]
async fn invalid_parameters_fail_before_touching_hardware() {
    let (engine, beamline) = test_engine();
    let params = ScanParameters {
        num_angles: 0,
        ..quick_params(0)
    };

    let err = engine.run_scan(&params).await.unwrap_err();
    assert!(matches!(err, TomoError::Configuration(_)));
    // Validation failures are rejections, not scans: status stays idle.
    assert_eq!(engine.status().await.state, ScanState::Idle);
    assert!(!beamline.shutter.is_open().await);
}
