//! Simulated area detector with an attached file writer.
//!
//! Starting an acquisition spawns a frame clock that advances the collected
//! counter once per frame interval (exposure plus readout). In `Internal`
//! and `External` trigger modes the acquisition stops itself after
//! `num_images` frames; in `FreeRun` it runs until stopped. The file writer
//! mirrors the collected counter once armed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use tomo_core::{trigger_mode, ControlPoint, PointValue, TomoError, TomoResult};

#[derive(Debug)]
struct DetectorState {
    acquiring: bool,
    trigger_mode: String,
    num_images: i64,
    collected: i64,
    exposure: f64,
    readout: f64,
    frame_type: String,
    capture_armed: bool,
    num_capture: i64,
    num_captured: i64,
    /// Bumped per acquisition so a superseded frame clock exits.
    generation: u64,
}

#[derive(Clone)]
pub struct SimDetector {
    state: Arc<Mutex<DetectorState>>,
}

impl SimDetector {
    pub fn new(readout: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(DetectorState {
                acquiring: false,
                trigger_mode: trigger_mode::FREE_RUN.to_string(),
                num_images: 1,
                collected: 0,
                exposure: 0.1,
                readout,
                frame_type: String::new(),
                capture_armed: false,
                num_capture: 0,
                num_captured: 0,
                generation: 0,
            })),
        }
    }

    pub async fn is_acquiring(&self) -> bool {
        self.state.lock().await.acquiring
    }

    pub async fn trigger_mode(&self) -> String {
        self.state.lock().await.trigger_mode.clone()
    }

    pub async fn collected(&self) -> i64 {
        self.state.lock().await.collected
    }

    /// Idle means no acquisition in flight and the detector back in its
    /// free-running default.
    pub async fn is_idle(&self) -> bool {
        let state = self.state.lock().await;
        !state.acquiring && state.trigger_mode == trigger_mode::FREE_RUN
    }

    pub fn point(&self, name: &str, signal: DetectorSignal) -> DetectorPoint {
        DetectorPoint {
            name: name.to_string(),
            signal,
            state: Arc::clone(&self.state),
        }
    }

    async fn start_acquisition(&self) {
        let generation = {
            let mut state = self.state.lock().await;
            state.acquiring = true;
            state.collected = 0;
            // The capture counter is not reset here: the file writer
            // accumulates frames across the acquisitions of one dataset and
            // only rearms when num_capture is written.
            state.generation += 1;
            trace!(
                mode = %state.trigger_mode,
                num_images = state.num_images,
                "acquisition started"
            );
            state.generation
        };

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            loop {
                let interval = {
                    let guard = state.lock().await;
                    if guard.generation != generation || !guard.acquiring {
                        break;
                    }
                    Duration::from_secs_f64(guard.exposure + guard.readout)
                };
                tokio::time::sleep(interval).await;
                let mut guard = state.lock().await;
                if guard.generation != generation || !guard.acquiring {
                    break;
                }
                guard.collected += 1;
                if guard.capture_armed && guard.num_captured < guard.num_capture {
                    guard.num_captured += 1;
                }
                if guard.trigger_mode != trigger_mode::FREE_RUN
                    && guard.collected >= guard.num_images
                {
                    guard.acquiring = false;
                    break;
                }
            }
        });
    }
}

/// Which detector register an endpoint exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorSignal {
    Acquire,
    AcquireBusy,
    TriggerMode,
    NumImages,
    Collected,
    Exposure,
    FrameType,
    NumCapture,
    NumCaptured,
}

pub struct DetectorPoint {
    name: String,
    signal: DetectorSignal,
    state: Arc<Mutex<DetectorState>>,
}

impl DetectorPoint {
    fn wrong_type(&self, expected: &'static str, value: &PointValue) -> TomoError {
        TomoError::WrongType {
            point: self.name.clone(),
            expected,
            actual: value.kind(),
        }
    }
}

#[async_trait]
impl ControlPoint for DetectorPoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self) -> TomoResult<PointValue> {
        let state = self.state.lock().await;
        let value = match self.signal {
            DetectorSignal::Acquire | DetectorSignal::AcquireBusy => {
                PointValue::Int(i64::from(state.acquiring))
            }
            DetectorSignal::TriggerMode => PointValue::Str(state.trigger_mode.clone()),
            DetectorSignal::NumImages => PointValue::Int(state.num_images),
            DetectorSignal::Collected => PointValue::Int(state.collected),
            DetectorSignal::Exposure => PointValue::Float(state.exposure),
            DetectorSignal::FrameType => PointValue::Str(state.frame_type.clone()),
            DetectorSignal::NumCapture => PointValue::Int(state.num_capture),
            DetectorSignal::NumCaptured => PointValue::Int(state.num_captured),
        };
        Ok(value)
    }

    async fn put(&self, value: PointValue) -> TomoResult<()> {
        match self.signal {
            DetectorSignal::Acquire => {
                let start = value
                    .as_i64()
                    .ok_or_else(|| self.wrong_type("int", &value))?;
                if start != 0 {
                    let detector = SimDetector {
                        state: Arc::clone(&self.state),
                    };
                    detector.start_acquisition().await;
                } else {
                    self.state.lock().await.acquiring = false;
                }
            }
            DetectorSignal::TriggerMode => {
                let mode = value
                    .as_str()
                    .ok_or_else(|| self.wrong_type("string", &value))?;
                self.state.lock().await.trigger_mode = mode.to_string();
            }
            DetectorSignal::NumImages => {
                let n = value
                    .as_i64()
                    .ok_or_else(|| self.wrong_type("int", &value))?;
                self.state.lock().await.num_images = n;
            }
            DetectorSignal::Exposure => {
                let exposure = value
                    .as_f64()
                    .ok_or_else(|| self.wrong_type("float", &value))?;
                self.state.lock().await.exposure = exposure;
            }
            DetectorSignal::FrameType => {
                self.state.lock().await.frame_type = value.to_string();
            }
            DetectorSignal::NumCapture => {
                let n = value
                    .as_i64()
                    .ok_or_else(|| self.wrong_type("int", &value))?;
                let mut state = self.state.lock().await;
                state.num_capture = n;
                state.num_captured = 0;
                state.capture_armed = n > 0;
            }
            DetectorSignal::AcquireBusy
            | DetectorSignal::Collected
            | DetectorSignal::NumCaptured => {
                // Read-only registers; writes are ignored like a real
                // detector driver would.
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_detector() -> SimDetector {
        SimDetector::new(0.0)
    }

    #[tokio::test]
    async fn internal_mode_stops_at_num_images() {
        let detector = fast_detector();
        detector
            .point("cam_trigger_mode", DetectorSignal::TriggerMode)
            .put(PointValue::Str(trigger_mode::INTERNAL.into()))
            .await
            .unwrap();
        detector
            .point("cam_num_images", DetectorSignal::NumImages)
            .put(PointValue::Int(3))
            .await
            .unwrap();
        detector
            .point("cam_exposure", DetectorSignal::Exposure)
            .put(PointValue::Float(0.005))
            .await
            .unwrap();
        detector
            .point("cam_acquire", DetectorSignal::Acquire)
            .put(PointValue::Int(1))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(detector.collected().await, 3);
        assert!(!detector.is_acquiring().await);
    }

    #[tokio::test]
    async fn stopping_acquire_halts_the_frame_clock() {
        let detector = fast_detector();
        detector
            .point("cam_exposure", DetectorSignal::Exposure)
            .put(PointValue::Float(0.005))
            .await
            .unwrap();
        let acquire = detector.point("cam_acquire", DetectorSignal::Acquire);
        acquire.put(PointValue::Int(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        acquire.put(PointValue::Int(0)).await.unwrap();
        let frozen = detector.collected().await;
        assert!(frozen > 0);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(detector.collected().await, frozen);
    }

    #[tokio::test]
    async fn file_writer_mirrors_collected_when_armed() {
        let detector = fast_detector();
        detector
            .point("file_num_capture", DetectorSignal::NumCapture)
            .put(PointValue::Int(2))
            .await
            .unwrap();
        detector
            .point("cam_trigger_mode", DetectorSignal::TriggerMode)
            .put(PointValue::Str(trigger_mode::INTERNAL.into()))
            .await
            .unwrap();
        detector
            .point("cam_num_images", DetectorSignal::NumImages)
            .put(PointValue::Int(2))
            .await
            .unwrap();
        detector
            .point("cam_exposure", DetectorSignal::Exposure)
            .put(PointValue::Float(0.005))
            .await
            .unwrap();
        detector
            .point("cam_acquire", DetectorSignal::Acquire)
            .put(PointValue::Int(1))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        let captured = detector
            .point("file_num_captured", DetectorSignal::NumCaptured)
            .get()
            .await
            .unwrap();
        assert_eq!(captured, PointValue::Int(2));
    }
}
