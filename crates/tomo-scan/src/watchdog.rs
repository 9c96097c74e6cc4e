//! Process liveness heartbeat.
//!
//! A background task refreshes a liveness cell and the watchdog control
//! point on a fixed period, independent of any scan. External observers
//! treat the process as dead once the cell has not been refreshed within
//! the stale window.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use tomo_core::{points, ControlPointRegistry, PointValue, TomoResult};

/// How often the heartbeat is refreshed.
pub const REFRESH_PERIOD: Duration = Duration::from_secs(3);

/// A heartbeat older than this marks the process as stopped.
pub const STALE_AFTER: Duration = Duration::from_secs(5);

/// Value written to the watchdog control point on every refresh. External
/// monitors decrement it once a second; reaching zero means the process
/// died.
const WATCHDOG_RELOAD: i64 = 5;

/// Owned liveness cell, cheap to clone and share with observers.
#[derive(Clone)]
pub struct Heartbeat {
    last: Arc<RwLock<Instant>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            last: Arc::new(RwLock::new(Instant::now())),
        }
    }

    pub async fn refresh(&self) {
        *self.last.write().await = Instant::now();
    }

    pub async fn age(&self) -> Duration {
        self.last.read().await.elapsed()
    }

    pub async fn is_stale(&self) -> bool {
        self.age().await > STALE_AFTER
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// The background refresher. Dropping it stops the task.
pub struct Watchdog {
    heartbeat: Heartbeat,
    handle: JoinHandle<()>,
}

impl Watchdog {
    /// Spawn the refresh task. Keeps ticking while scans block on
    /// hardware, since it runs on its own task.
    pub fn spawn(registry: Arc<ControlPointRegistry>) -> Self {
        let heartbeat = Heartbeat::new();
        let beat = heartbeat.clone();
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = registry
                    .write(points::WATCHDOG, PointValue::Int(WATCHDOG_RELOAD))
                    .await
                {
                    warn!(%err, "watchdog refresh failed");
                }
                beat.refresh().await;
                debug!("heartbeat refreshed");
                tokio::time::sleep(REFRESH_PERIOD).await;
            }
        });
        Self { heartbeat, handle }
    }

    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat.clone()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Whether a scan process is alive behind `registry`. External monitors
/// decrement the watchdog point once a second, so a positive reload value
/// means something refreshed it within the last few seconds; zero means the
/// refresher is gone.
pub async fn engine_alive(registry: &ControlPointRegistry) -> TomoResult<bool> {
    Ok(registry.read_i64(points::WATCHDOG).await? > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn heartbeat_goes_stale_without_refresh() {
        let heartbeat = Heartbeat::new();
        assert!(!heartbeat.is_stale().await);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(heartbeat.is_stale().await);
        heartbeat.refresh().await;
        assert!(!heartbeat.is_stale().await);
    }

    fn reloaded(value: &PointValue) -> bool {
        value.as_i64() == Some(WATCHDOG_RELOAD)
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_task_keeps_the_point_reloaded() {
        let mut registry = ControlPointRegistry::new();
        registry.register(Arc::new(
            tomo_hardware::sim::SimValue::new(points::WATCHDOG, PointValue::Int(0)),
        ));
        let registry = Arc::new(registry);

        let watchdog = Watchdog::spawn(Arc::clone(&registry));
        registry
            .wait_until(points::WATCHDOG, reloaded, Duration::from_secs(1))
            .await
            .unwrap();

        // Simulate the external monitor draining the counter; the next
        // period reloads it.
        registry
            .write(points::WATCHDOG, PointValue::Int(1))
            .await
            .unwrap();
        registry
            .wait_until(
                points::WATCHDOG,
                reloaded,
                REFRESH_PERIOD + Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(!watchdog.heartbeat().is_stale().await);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_alive_follows_the_watchdog_point() {
        let mut registry = ControlPointRegistry::new();
        registry.register(Arc::new(
            tomo_hardware::sim::SimValue::new(points::WATCHDOG, PointValue::Int(0)),
        ));
        let registry = Arc::new(registry);
        assert!(!engine_alive(&registry).await.unwrap());

        let _watchdog = Watchdog::spawn(Arc::clone(&registry));
        registry
            .wait_until(points::WATCHDOG, reloaded, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(engine_alive(&registry).await.unwrap());
    }
}
