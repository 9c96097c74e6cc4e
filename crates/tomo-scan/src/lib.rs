//! Scan orchestration for tomographic data acquisition.
//!
//! The [`engine::ScanEngine`] runs one dataset at a time through the
//! dark/flat/projection state machine; [`sweep::Composer`] builds
//! multi-point sweeps on top of it; [`store`] persists operator
//! configuration and replay files; [`watchdog`] publishes process
//! liveness; [`sync`] computes the hardware triggering plan.

pub mod energy;
pub mod engine;
pub mod store;
pub mod sweep;
pub mod sync;
pub mod watchdog;

pub use energy::EnergyCalibration;
pub use engine::{EngineTimeouts, ScanEngine, ScanOutcome};
pub use store::{default_config_path, snapshot_live, ReplayFile, ReplayRecord, ScanConfig};
pub use sweep::{AxisSweep, Composer, InSituRamp, RepeatOptions, SweepGrid, SweepOutcome};
pub use sync::{plan_sync, SyncPlan};
pub use watchdog::{engine_alive, Heartbeat, Watchdog};
