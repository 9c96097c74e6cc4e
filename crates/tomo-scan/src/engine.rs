//! Single-scan state machine.
//!
//! Runs one complete dataset acquisition against the control-point
//! registry: dark fields, flat fields, projections, teardown. One scan at
//! a time; a second start while a scan is in flight is rejected with a
//! busy error. Abort is cooperative, observed at phase boundaries and
//! inside the bounded frame-count polls, and always routes through the
//! same cleanup path as a hardware failure.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use tomo_core::{
    points, trigger_mode, ControlPointRegistry, FlatFieldAxis, HardwareProfile, ScanParameters,
    ScanPhase, ScanProgress, ScanState, ScanStatus, TomoError, TomoResult, POLL_INTERVAL,
};

use crate::sync::{plan_sync, SyncPlan};

/// Frame-type tags written to the detector so the file carries the
/// purpose of every frame.
pub mod frame_type {
    pub const DARK: &str = "DarkField";
    pub const FLAT: &str = "FlatField";
    pub const PROJECTION: &str = "Projection";
}

/// Bounds applied to hardware waits. Every wait in the engine is bounded;
/// exceeding a bound fails the scan rather than retrying.
#[derive(Debug, Clone)]
pub struct EngineTimeouts {
    /// Sample and rotation stage moves.
    pub motion: Duration,
    /// Shutter open/close.
    pub shutter: Duration,
    /// Interval between frame-count polls.
    pub poll: Duration,
}

impl Default for EngineTimeouts {
    fn default() -> Self {
        Self {
            motion: Duration::from_secs(600),
            shutter: Duration::from_secs(10),
            poll: POLL_INTERVAL,
        }
    }
}

/// How a scan ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Complete,
    Aborted,
}

/// The orchestration engine. Cheap to clone; clones share state, so one
/// handle can run a scan while another polls status or requests an abort.
#[derive(Clone)]
pub struct ScanEngine {
    registry: Arc<ControlPointRegistry>,
    profile: Arc<dyn HardwareProfile>,
    status: Arc<RwLock<ScanStatus>>,
    abort: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    completed: Arc<AtomicU32>,
    timeouts: EngineTimeouts,
}

impl ScanEngine {
    pub fn new(registry: Arc<ControlPointRegistry>, profile: Arc<dyn HardwareProfile>) -> Self {
        Self::with_timeouts(registry, profile, EngineTimeouts::default())
    }

    pub fn with_timeouts(
        registry: Arc<ControlPointRegistry>,
        profile: Arc<dyn HardwareProfile>,
        timeouts: EngineTimeouts,
    ) -> Self {
        Self {
            registry,
            profile,
            status: Arc::new(RwLock::new(ScanStatus::default())),
            abort: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            completed: Arc::new(AtomicU32::new(0)),
            timeouts,
        }
    }

    pub fn registry(&self) -> &Arc<ControlPointRegistry> {
        &self.registry
    }

    pub async fn status(&self) -> ScanStatus {
        self.status.read().await.clone()
    }

    pub fn is_ready(&self) -> bool {
        !self.running.load(Ordering::SeqCst)
    }

    /// Datasets completed since the engine was built.
    pub fn completed_scans(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Request a cooperative abort of the scan in flight. No-op when idle.
    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Run one dataset acquisition to completion, abort, or error.
    pub async fn run_scan(&self, params: &ScanParameters) -> TomoResult<ScanOutcome> {
        params.validate()?;
        if self.running.swap(true, Ordering::SeqCst) {
            let state = self.status.read().await.state.clone();
            return Err(TomoError::Busy {
                state: state.to_string(),
            });
        }
        self.abort.store(false, Ordering::SeqCst);
        {
            let mut status = self.status.write().await;
            status.progress = ScanProgress {
                total_images: params.total_images(),
                ..Default::default()
            };
        }
        self.set_state(ScanState::Running(ScanPhase::BeginScan)).await;

        let result = self.fly_scan(params).await;
        let outcome = match result {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
                self.set_state(ScanState::Complete).await;
                Ok(ScanOutcome::Complete)
            }
            Err(TomoError::Aborted) => {
                warn!("scan aborted by operator");
                self.cleanup().await;
                self.set_state(ScanState::Aborted).await;
                Ok(ScanOutcome::Aborted)
            }
            Err(err) => {
                error!(%err, "scan failed");
                self.cleanup().await;
                self.set_state(ScanState::Error(err.to_string())).await;
                Err(err)
            }
        };
        self.running.store(false, Ordering::SeqCst);
        outcome
    }

    async fn fly_scan(&self, params: &ScanParameters) -> TomoResult<()> {
        let started = Instant::now();
        let plan = plan_sync(params, self.profile.as_ref())?;
        let prior_mode = self.begin_scan(params, &plan).await?;

        let mut collected = 0;
        self.check_abort()?;
        if params.dark_field_mode.at_start() {
            collected = self
                .collect_dark_fields(params, &plan, collected, started)
                .await?;
        }
        self.check_abort()?;
        if params.flat_field_mode.at_start() {
            collected = self
                .collect_flat_fields(params, &plan, collected, started)
                .await?;
        }
        self.check_abort()?;
        collected = self
            .collect_projections(params, &plan, collected, started)
            .await?;
        if params.flat_field_mode.at_end() {
            self.check_abort()?;
            collected = self
                .collect_flat_fields(params, &plan, collected, started)
                .await?;
        }
        if params.dark_field_mode.at_end() {
            self.check_abort()?;
            collected = self
                .collect_dark_fields(params, &plan, collected, started)
                .await?;
        }
        debug!(frames = collected, "all phases collected");
        self.end_scan(params, &prior_mode, started).await
    }

    /// Capture restoration state, configure the detector and file writer,
    /// program the trigger hardware, and taxi to the start position.
    async fn begin_scan(&self, params: &ScanParameters, plan: &SyncPlan) -> TomoResult<String> {
        info!(
            file = %params.file_name,
            scan_type = %params.scan_type,
            angles = params.num_angles,
            "begin scan"
        );
        let prior_mode = self.registry.read_string(points::CAM_TRIGGER_MODE).await?;
        self.registry.write(points::CAM_ACQUIRE, 0i64).await?;
        self.registry
            .write(points::CAM_EXPOSURE, params.exposure_time)
            .await?;
        self.registry
            .write(points::FILE_PATH, params.file_path.as_str())
            .await?;
        self.registry
            .write(points::FILE_NAME, params.file_name.as_str())
            .await?;
        self.registry
            .write(points::FILE_NUM_CAPTURE, i64::from(params.total_images()))
            .await?;

        self.apply_plan(params, plan).await?;
        self.registry
            .write(points::ROTATION_SPEED, self.profile.slew_speed())
            .await?;
        self.registry
            .write_wait(points::ROTATION, plan.taxi_start(), self.timeouts.motion)
            .await?;
        Ok(prior_mode)
    }

    async fn apply_plan(&self, params: &ScanParameters, plan: &SyncPlan) -> TomoResult<()> {
        match plan {
            SyncPlan::PulseDivision(plan) => {
                debug!(prescale = plan.prescale, dwell = plan.dwell, "pulse-division plan");
                self.registry
                    .write(points::MCS_PRESCALE, plan.prescale)
                    .await?;
                self.registry.write(points::MCS_DWELL, plan.dwell).await?;
            }
            SyncPlan::PositionSync(plan) => {
                debug!(
                    counts_per_step = plan.counts_per_step,
                    taxi_start = plan.taxi_start,
                    taxi_end = plan.taxi_end,
                    "position-sync plan"
                );
                self.registry
                    .write(points::PSO_START_POS, params.rotation_start)
                    .await?;
                self.registry
                    .write(points::PSO_END_POS, plan.rotation_stop)
                    .await?;
                self.registry
                    .write(points::PSO_SCAN_DELTA, plan.step)
                    .await?;
            }
        }
        Ok(())
    }

    async fn collect_dark_fields(
        &self,
        params: &ScanParameters,
        plan: &SyncPlan,
        base: u32,
        started: Instant,
    ) -> TomoResult<u32> {
        self.set_state(ScanState::Running(ScanPhase::DarkFields)).await;
        info!(count = params.num_dark_fields, "collecting dark fields");
        self.registry
            .write_wait(points::CLOSE_SHUTTER, 1i64, self.timeouts.shutter)
            .await?;
        self.registry
            .write(points::CAM_FRAME_TYPE, frame_type::DARK)
            .await?;
        self.registry
            .write(points::DARK_FIELD_VALUE, params.dark_field_value)
            .await?;
        self.collect_static_frames(params.num_dark_fields, params.exposure_time, plan, base, started)
            .await
    }

    async fn collect_flat_fields(
        &self,
        params: &ScanParameters,
        plan: &SyncPlan,
        base: u32,
        started: Instant,
    ) -> TomoResult<u32> {
        self.set_state(ScanState::Running(ScanPhase::FlatFields)).await;
        info!(count = params.num_flat_fields, "collecting flat fields");
        self.move_sample_out(params).await?;
        self.registry
            .write_wait(points::OPEN_SHUTTER, 1i64, self.timeouts.shutter)
            .await?;
        self.registry
            .write(points::CAM_FRAME_TYPE, frame_type::FLAT)
            .await?;
        self.registry
            .write(points::FLAT_FIELD_VALUE, params.flat_field_value)
            .await?;
        self.registry
            .write(points::CAM_EXPOSURE, params.flat_exposure())
            .await?;
        let total = self
            .collect_static_frames(params.num_flat_fields, params.flat_exposure(), plan, base, started)
            .await?;
        self.registry
            .write(points::CAM_EXPOSURE, params.exposure_time)
            .await?;
        self.move_sample_in(params).await?;
        Ok(total)
    }

    /// Static frame collection shared by dark and flat phases: the
    /// detector self-times `count` frames in internal trigger mode.
    async fn collect_static_frames(
        &self,
        count: u32,
        exposure: f64,
        plan: &SyncPlan,
        base: u32,
        started: Instant,
    ) -> TomoResult<u32> {
        self.registry
            .write(points::CAM_TRIGGER_MODE, trigger_mode::INTERNAL)
            .await?;
        self.registry
            .write(points::CAM_NUM_IMAGES, i64::from(count))
            .await?;
        if let SyncPlan::PulseDivision(_) = plan {
            // Static dwell leaves room for readout so no frame is dropped.
            self.registry
                .write(points::MCS_DWELL, exposure + self.profile.readout_time())
                .await?;
        }
        self.registry.write(points::CAM_ACQUIRE, 1i64).await?;
        self.wait_frames(count, base, self.profile.collection_bound(count, exposure), started)
            .await
    }

    async fn collect_projections(
        &self,
        params: &ScanParameters,
        plan: &SyncPlan,
        base: u32,
        started: Instant,
    ) -> TomoResult<u32> {
        self.set_state(ScanState::Running(ScanPhase::CollectProjections))
            .await;
        info!(
            angles = params.num_angles,
            start = params.rotation_start,
            stop = params.rotation_stop(),
            "collecting projections"
        );
        self.move_sample_in(params).await?;
        self.registry
            .write_wait(points::OPEN_SHUTTER, 1i64, self.timeouts.shutter)
            .await?;
        self.registry
            .write(points::CAM_FRAME_TYPE, frame_type::PROJECTION)
            .await?;
        self.registry
            .write(points::CAM_EXPOSURE, params.exposure_time)
            .await?;
        self.registry
            .write(points::CAM_TRIGGER_MODE, trigger_mode::EXTERNAL)
            .await?;
        self.registry
            .write(points::CAM_NUM_IMAGES, i64::from(params.num_angles))
            .await?;
        self.registry
            .write(points::ROTATION_SPEED, plan.motor_speed())
            .await?;
        match plan {
            SyncPlan::PulseDivision(_) => {
                self.registry.write(points::MCS_ERASE_START, 1i64).await?;
            }
            SyncPlan::PositionSync(_) => {
                self.registry.write(points::PSO_ARM, 1i64).await?;
            }
        }
        self.registry.write(points::CAM_ACQUIRE, 1i64).await?;
        // Motion is initiated, not awaited; the frame count is the source
        // of truth for completion.
        self.registry
            .write(points::ROTATION, plan.motion_target())
            .await?;
        let bound = self
            .profile
            .collection_bound(params.num_angles, params.exposure_time);
        let total = self.wait_frames(params.num_angles, base, bound, started).await?;
        if params.return_rotation {
            self.registry
                .write(points::ROTATION_SPEED, self.profile.slew_speed())
                .await?;
            // Return motion is initiated here and deliberately not awaited;
            // the scan is reported complete while the stage travels back.
            self.registry
                .write(points::ROTATION, params.rotation_start)
                .await?;
        }
        Ok(total)
    }

    /// Poll the detector until exactly `expected` frames of this phase have
    /// been collected. Fewer within the bound is a timeout, more is an
    /// overrun; both fail the scan.
    async fn wait_frames(
        &self,
        expected: u32,
        base: u32,
        bound: Duration,
        started: Instant,
    ) -> TomoResult<u32> {
        let wait_start = Instant::now();
        loop {
            self.check_abort()?;
            let collected = self
                .registry
                .read_i64(points::CAM_IMAGES_COLLECTED)
                .await?
                .max(0) as u32;
            let saved = self
                .registry
                .read_i64(points::FILE_NUM_CAPTURED)
                .await?
                .max(0) as u32;
            {
                let mut status = self.status.write().await;
                status
                    .progress
                    .observe(base + collected.min(expected), saved, started.elapsed());
            }
            if collected > expected {
                return Err(TomoError::Overrun { collected, expected });
            }
            if collected == expected {
                return Ok(base + collected);
            }
            if wait_start.elapsed() > bound {
                return Err(TomoError::DetectorTimeout {
                    collected,
                    expected,
                    waited: wait_start.elapsed(),
                });
            }
            tokio::time::sleep(self.timeouts.poll).await;
        }
    }

    /// Restore detector state, persist the dataset snapshot, and initiate
    /// the return rotation without awaiting it.
    async fn end_scan(
        &self,
        params: &ScanParameters,
        prior_mode: &str,
        started: Instant,
    ) -> TomoResult<()> {
        self.set_state(ScanState::Running(ScanPhase::EndScan)).await;
        self.registry
            .write_wait(points::CLOSE_SHUTTER, 1i64, self.timeouts.shutter)
            .await?;
        self.registry
            .write(points::CAM_TRIGGER_MODE, prior_mode)
            .await?;
        self.registry
            .write(points::ROTATION_SPEED, self.profile.slew_speed())
            .await?;
        self.write_snapshot(params).await?;
        info!(elapsed = ?started.elapsed(), "scan complete");
        Ok(())
    }

    /// Persist the parameters this dataset was collected with, next to the
    /// data file.
    async fn write_snapshot(&self, params: &ScanParameters) -> TomoResult<()> {
        if params.file_path.is_empty() {
            debug!("no file path set, skipping dataset snapshot");
            return Ok(());
        }

        #[derive(serde::Serialize)]
        struct Snapshot<'a> {
            collected_at: String,
            params: &'a ScanParameters,
        }

        let name = if params.file_name.is_empty() {
            "scan"
        } else {
            params.file_name.as_str()
        };
        let path = Path::new(&params.file_path).join(format!("{name}.config.json"));
        let snapshot = Snapshot {
            collected_at: chrono::Local::now().to_rfc3339(),
            params,
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(&path, json).await?;
        debug!(path = %path.display(), "dataset snapshot written");
        Ok(())
    }

    async fn move_sample_in(&self, params: &ScanParameters) -> TomoResult<()> {
        match params.flat_field_axis {
            FlatFieldAxis::X => {
                self.registry
                    .write_wait(points::SAMPLE_X, params.sample_in_x, self.timeouts.motion)
                    .await?;
            }
            FlatFieldAxis::Y => {
                self.registry
                    .write_wait(points::SAMPLE_Y, params.sample_in_y, self.timeouts.motion)
                    .await?;
            }
            FlatFieldAxis::Both => {
                self.registry
                    .write_wait(points::SAMPLE_X, params.sample_in_x, self.timeouts.motion)
                    .await?;
                self.registry
                    .write_wait(points::SAMPLE_Y, params.sample_in_y, self.timeouts.motion)
                    .await?;
            }
            FlatFieldAxis::None => {}
        }
        Ok(())
    }

    async fn move_sample_out(&self, params: &ScanParameters) -> TomoResult<()> {
        match params.flat_field_axis {
            FlatFieldAxis::X => {
                self.registry
                    .write_wait(points::SAMPLE_X, params.sample_out_x, self.timeouts.motion)
                    .await?;
            }
            FlatFieldAxis::Y => {
                self.registry
                    .write_wait(points::SAMPLE_Y, params.sample_out_y, self.timeouts.motion)
                    .await?;
            }
            FlatFieldAxis::Both => {
                self.registry
                    .write_wait(points::SAMPLE_X, params.sample_out_x, self.timeouts.motion)
                    .await?;
                self.registry
                    .write_wait(points::SAMPLE_Y, params.sample_out_y, self.timeouts.motion)
                    .await?;
            }
            FlatFieldAxis::None => {}
        }
        Ok(())
    }

    /// Leave the hardware safe after an abort or failure: shutter closed,
    /// detector idle and free-running, rotation halted. Best effort; a
    /// failing endpoint is logged, not propagated, so the remaining steps
    /// still run.
    async fn cleanup(&self) {
        self.set_state(ScanState::Running(ScanPhase::Cleanup)).await;
        let shutter = self
            .registry
            .write_wait(points::CLOSE_SHUTTER, 1i64, self.timeouts.shutter)
            .await;
        if let Err(err) = shutter {
            warn!(point = points::CLOSE_SHUTTER, %err, "cleanup step failed");
        }
        if let Err(err) = self.registry.write(points::CAM_ACQUIRE, 0i64).await {
            warn!(point = points::CAM_ACQUIRE, %err, "cleanup step failed");
        }
        let mode = self
            .registry
            .write(points::CAM_TRIGGER_MODE, trigger_mode::FREE_RUN)
            .await;
        if let Err(err) = mode {
            warn!(point = points::CAM_TRIGGER_MODE, %err, "cleanup step failed");
        }
        if let Err(err) = self.registry.write(points::ROTATION_STOP, 1i64).await {
            warn!(point = points::ROTATION_STOP, %err, "cleanup step failed");
        }
        if self.registry.contains(points::PSO_ARM) {
            if let Err(err) = self.registry.write(points::PSO_ARM, 0i64).await {
                warn!(point = points::PSO_ARM, %err, "cleanup step failed");
            }
        }
        if self.registry.contains(points::MCS_STOP) {
            if let Err(err) = self.registry.write(points::MCS_STOP, 1i64).await {
                warn!(point = points::MCS_STOP, %err, "cleanup step failed");
            }
        }
    }

    fn check_abort(&self) -> TomoResult<()> {
        if self.abort.load(Ordering::SeqCst) {
            Err(TomoError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Update the shared status cell and mirror the state onto the
    /// published control point external observers watch.
    async fn set_state(&self, state: ScanState) {
        let text = state.to_string();
        self.status.write().await.state = state;
        if self.registry.contains(points::SCAN_STATUS) {
            if let Err(err) = self.registry.write(points::SCAN_STATUS, text).await {
                warn!(%err, "scan status publish failed");
            }
        }
    }
}
