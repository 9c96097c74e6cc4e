//! Named control points and the registry that resolves them.
//!
//! A control point is one addressable endpoint on the beamline: a motor
//! setpoint, a detector register, a shutter command. The scan engine never
//! talks to hardware directly; it reads and writes points by name through a
//! [`ControlPointRegistry`], so the same scan logic runs against simulated
//! endpoints in tests and real transports in production.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{TomoError, TomoResult};

/// Default polling interval for bounded waits on control points.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A value held by a control point.
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    Float(f64),
    Int(i64),
    Str(String),
}

impl PointValue {
    pub fn kind(&self) -> &'static str {
        match self {
            PointValue::Float(_) => "float",
            PointValue::Int(_) => "int",
            PointValue::Str(_) => "string",
        }
    }

    /// Numeric coercion: ints widen to floats, strings do not.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PointValue::Float(v) => Some(*v),
            PointValue::Int(v) => Some(*v as f64),
            PointValue::Str(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PointValue::Int(v) => Some(*v),
            PointValue::Float(_) | PointValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PointValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointValue::Float(v) => write!(f, "{v}"),
            PointValue::Int(v) => write!(f, "{v}"),
            PointValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for PointValue {
    fn from(v: f64) -> Self {
        PointValue::Float(v)
    }
}

impl From<i64> for PointValue {
    fn from(v: i64) -> Self {
        PointValue::Int(v)
    }
}

impl From<&str> for PointValue {
    fn from(v: &str) -> Self {
        PointValue::Str(v.to_string())
    }
}

impl From<String> for PointValue {
    fn from(v: String) -> Self {
        PointValue::Str(v)
    }
}

/// One named endpoint on the beamline.
///
/// `put` initiates the write and returns as soon as the endpoint has accepted
/// it. Endpoints whose writes take physical time to complete (motors, shutter
/// actuators) override `put_wait` with a bounded completion wait; for the
/// rest the write is the completion.
#[async_trait]
pub trait ControlPoint: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self) -> TomoResult<PointValue>;

    async fn put(&self, value: PointValue) -> TomoResult<()>;

    async fn put_wait(&self, value: PointValue, _timeout: Duration) -> TomoResult<()> {
        self.put(value).await
    }
}

/// Name-to-endpoint map shared by the engine, the composer, and the watchdog.
#[derive(Default)]
pub struct ControlPointRegistry {
    points: HashMap<String, Arc<dyn ControlPoint>>,
}

impl ControlPointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, point: Arc<dyn ControlPoint>) {
        self.points.insert(point.name().to_string(), point);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.points.contains_key(name)
    }

    pub fn get(&self, name: &str) -> TomoResult<Arc<dyn ControlPoint>> {
        self.points
            .get(name)
            .cloned()
            .ok_or_else(|| TomoError::UnknownPoint(name.to_string()))
    }

    pub async fn read(&self, name: &str) -> TomoResult<PointValue> {
        self.get(name)?.get().await
    }

    pub async fn read_f64(&self, name: &str) -> TomoResult<f64> {
        let value = self.read(name).await?;
        value.as_f64().ok_or_else(|| TomoError::WrongType {
            point: name.to_string(),
            expected: "float",
            actual: value.kind(),
        })
    }

    pub async fn read_i64(&self, name: &str) -> TomoResult<i64> {
        let value = self.read(name).await?;
        value.as_i64().ok_or_else(|| TomoError::WrongType {
            point: name.to_string(),
            expected: "int",
            actual: value.kind(),
        })
    }

    pub async fn read_string(&self, name: &str) -> TomoResult<String> {
        Ok(self.read(name).await?.to_string())
    }

    /// Initiate a write without waiting for completion.
    pub async fn write(&self, name: &str, value: impl Into<PointValue>) -> TomoResult<()> {
        self.get(name)?.put(value.into()).await
    }

    /// Write and wait for the endpoint to report completion.
    pub async fn write_wait(
        &self,
        name: &str,
        value: impl Into<PointValue>,
        timeout: Duration,
    ) -> TomoResult<()> {
        self.get(name)?.put_wait(value.into(), timeout).await
    }

    /// Poll a point until `pred` accepts its value or `timeout` expires.
    pub async fn wait_until<F>(&self, name: &str, pred: F, timeout: Duration) -> TomoResult<()>
    where
        F: Fn(&PointValue) -> bool + Send,
    {
        let point = self.get(name)?;
        let start = Instant::now();
        loop {
            if pred(&point.get().await?) {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(TomoError::Timeout {
                    point: name.to_string(),
                    waited: start.elapsed(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL.min(timeout)).await;
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.points.keys().map(String::as_str)
    }
}

/// Canonical point names the scan stack expects a beamline to provide.
///
/// Hardware integrations register endpoints under these names; anything a
/// site does not have is simply left unregistered and the engine reports
/// `UnknownPoint` if a scan needs it.
pub mod points {
    /// Rotation stage setpoint, degrees.
    pub const ROTATION: &str = "rotation";
    /// Rotation stage slew speed, degrees per second.
    pub const ROTATION_SPEED: &str = "rotation_speed";
    /// Writing any value stops rotation motion.
    pub const ROTATION_STOP: &str = "rotation_stop";
    /// Sample horizontal translation, millimetres.
    pub const SAMPLE_X: &str = "sample_x";
    /// Sample vertical translation, millimetres.
    pub const SAMPLE_Y: &str = "sample_y";

    pub const OPEN_SHUTTER: &str = "open_shutter";
    pub const CLOSE_SHUTTER: &str = "close_shutter";

    /// 1 while the detector is acquiring, 0 otherwise.
    pub const CAM_ACQUIRE: &str = "cam_acquire";
    pub const CAM_ACQUIRE_BUSY: &str = "cam_acquire_busy";
    pub const CAM_TRIGGER_MODE: &str = "cam_trigger_mode";
    pub const CAM_NUM_IMAGES: &str = "cam_num_images";
    /// Frames collected in the current acquisition.
    pub const CAM_IMAGES_COLLECTED: &str = "cam_images_collected";
    pub const CAM_EXPOSURE: &str = "cam_exposure";
    /// Dark / flat / projection tag applied to each frame.
    pub const CAM_FRAME_TYPE: &str = "cam_frame_type";
    /// Substitute pixel values recorded with the dataset for downstream
    /// normalization when a correction phase is skipped.
    pub const DARK_FIELD_VALUE: &str = "dark_field_value";
    pub const FLAT_FIELD_VALUE: &str = "flat_field_value";

    /// File writer capture arm and progress.
    pub const FILE_NUM_CAPTURE: &str = "file_num_capture";
    pub const FILE_NUM_CAPTURED: &str = "file_num_captured";
    pub const FILE_PATH: &str = "file_path";
    pub const FILE_NAME: &str = "file_name";

    /// Liveness counter refreshed by the engine watchdog.
    pub const WATCHDOG: &str = "watchdog";
    /// Engine scan state, published for external observers.
    pub const SCAN_STATUS: &str = "scan_status";

    /// Hardware synchronization endpoints. Pulse-division beamlines provide
    /// the `mcs_*` points, position-synchronized beamlines the `pso_*` ones.
    pub const MCS_PRESCALE: &str = "mcs_prescale";
    pub const MCS_DWELL: &str = "mcs_dwell";
    pub const MCS_ERASE_START: &str = "mcs_erase_start";
    pub const MCS_STOP: &str = "mcs_stop";
    pub const MCS_CHANNEL_ADVANCE: &str = "mcs_channel_advance";

    pub const PSO_START_POS: &str = "pso_start_pos";
    pub const PSO_END_POS: &str = "pso_end_pos";
    pub const PSO_SCAN_DELTA: &str = "pso_scan_delta";
    pub const PSO_ARM: &str = "pso_arm";
}

/// Detector trigger mode values written to [`points::CAM_TRIGGER_MODE`].
pub mod trigger_mode {
    /// Detector free-runs; frames are not synchronized to motion.
    pub const FREE_RUN: &str = "FreeRun";
    /// Detector self-times a fixed number of frames.
    pub const INTERNAL: &str = "Internal";
    /// One frame per hardware trigger pulse.
    pub const EXTERNAL: &str = "External";
}
