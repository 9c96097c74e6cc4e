//! Simulated motor axis.
//!
//! A setpoint write starts a background motion task that slews the readback
//! toward the target at the configured speed. `put` returns once motion has
//! started; `put_wait` polls until the axis settles or the timeout expires.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use tracing::trace;

use tomo_core::{ControlPoint, PointValue, TomoError, TomoResult};

const TICK: Duration = Duration::from_millis(2);
const SETTLE_POLL: Duration = Duration::from_millis(5);

#[derive(Debug)]
struct MotorState {
    position: f64,
    target: f64,
    speed: f64,
    moving: bool,
    /// Bumped on every new command so a superseded motion task exits.
    generation: u64,
}

/// Shared state handle; the setpoint, speed, and stop endpoints all view
/// the same axis.
#[derive(Clone)]
pub struct SimMotor {
    name: String,
    state: Arc<Mutex<MotorState>>,
}

impl SimMotor {
    pub fn new(name: &str, position: f64, speed: f64) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(MotorState {
                position,
                target: position,
                speed,
                moving: false,
                generation: 0,
            })),
        }
    }

    pub async fn position(&self) -> f64 {
        self.state.lock().await.position
    }

    pub async fn is_moving(&self) -> bool {
        self.state.lock().await.moving
    }

    /// Endpoint writing the slew speed, deg/s or mm/s.
    pub fn speed_point(&self, name: &str) -> SimMotorSpeed {
        SimMotorSpeed {
            name: name.to_string(),
            state: Arc::clone(&self.state),
        }
    }

    /// Endpoint that halts motion where it stands.
    pub fn stop_point(&self, name: &str) -> SimMotorStop {
        SimMotorStop {
            name: name.to_string(),
            state: Arc::clone(&self.state),
        }
    }

    async fn start_motion(&self, target: f64) {
        let generation = {
            let mut state = self.state.lock().await;
            state.target = target;
            state.moving = (target - state.position).abs() > f64::EPSILON;
            state.generation += 1;
            if !state.moving {
                return;
            }
            trace!(motor = %self.name, target, "motion started");
            state.generation
        };

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(TICK).await;
                let mut guard = state.lock().await;
                if guard.generation != generation || !guard.moving {
                    break;
                }
                let step = guard.speed * TICK.as_secs_f64();
                let delta = guard.target - guard.position;
                if delta.abs() <= step {
                    guard.position = guard.target;
                    guard.moving = false;
                    break;
                }
                guard.position += step * delta.signum();
            }
        });
    }
}

#[async_trait]
impl ControlPoint for SimMotor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self) -> TomoResult<PointValue> {
        Ok(PointValue::Float(self.position().await))
    }

    async fn put(&self, value: PointValue) -> TomoResult<()> {
        let target = value.as_f64().ok_or_else(|| TomoError::WrongType {
            point: self.name.clone(),
            expected: "float",
            actual: value.kind(),
        })?;
        self.start_motion(target).await;
        Ok(())
    }

    async fn put_wait(&self, value: PointValue, timeout: Duration) -> TomoResult<()> {
        self.put(value).await?;
        let start = Instant::now();
        loop {
            if !self.is_moving().await {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(TomoError::Timeout {
                    point: self.name.clone(),
                    waited: start.elapsed(),
                });
            }
            tokio::time::sleep(SETTLE_POLL).await;
        }
    }
}

pub struct SimMotorSpeed {
    name: String,
    state: Arc<Mutex<MotorState>>,
}

#[async_trait]
impl ControlPoint for SimMotorSpeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self) -> TomoResult<PointValue> {
        Ok(PointValue::Float(self.state.lock().await.speed))
    }

    async fn put(&self, value: PointValue) -> TomoResult<()> {
        let speed = value.as_f64().ok_or_else(|| TomoError::WrongType {
            point: self.name.clone(),
            expected: "float",
            actual: value.kind(),
        })?;
        if speed > 0.0 {
            self.state.lock().await.speed = speed;
        }
        Ok(())
    }
}

pub struct SimMotorStop {
    name: String,
    state: Arc<Mutex<MotorState>>,
}

#[async_trait]
impl ControlPoint for SimMotorStop {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self) -> TomoResult<PointValue> {
        Ok(PointValue::Int(0))
    }

    async fn put(&self, _value: PointValue) -> TomoResult<()> {
        let mut state = self.state.lock().await;
        state.target = state.position;
        state.moving = false;
        state.generation += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_wait_settles_at_target() {
        let motor = SimMotor::new("rotation", 0.0, 1000.0);
        motor
            .put_wait(PointValue::Float(5.0), Duration::from_secs(2))
            .await
            .unwrap();
        assert!((motor.position().await - 5.0).abs() < 1e-9);
        assert!(!motor.is_moving().await);
    }

    #[tokio::test]
    async fn put_returns_while_motion_continues() {
        let motor = SimMotor::new("rotation", 0.0, 10.0);
        motor.put(PointValue::Float(100.0)).await.unwrap();
        assert!(motor.is_moving().await);
        assert!(motor.position().await < 100.0);
    }

    #[tokio::test]
    async fn stop_halts_in_place() {
        let motor = SimMotor::new("rotation", 0.0, 10.0);
        motor.put(PointValue::Float(100.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        motor.stop_point("rotation_stop").put(PointValue::Int(1)).await.unwrap();
        let halted = motor.position().await;
        assert!(halted < 100.0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!((motor.position().await - halted).abs() < 1e-9);
    }

    #[tokio::test]
    async fn put_wait_times_out_on_slow_motion() {
        let motor = SimMotor::new("sample_x", 0.0, 0.001);
        let err = motor
            .put_wait(PointValue::Float(50.0), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, TomoError::Timeout { .. }));
    }
}
