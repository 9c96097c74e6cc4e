//! Core types for tomography scan orchestration.
//!
//! This crate defines the vocabulary shared by the hardware layer and the
//! scan engine: named control points, scan parameters, published status,
//! the per-site hardware profile, and the error taxonomy. It contains no
//! hardware access and no scan logic.

pub mod control;
pub mod error;
pub mod params;
pub mod profile;
pub mod status;

pub use control::{
    points, trigger_mode, ControlPoint, ControlPointRegistry, PointValue, POLL_INTERVAL,
};
pub use error::{TomoError, TomoResult};
pub use params::{FieldMode, FlatFieldAxis, ScanParameters, ScanType};
pub use profile::{HardwareProfile, TriggerSource};
pub use status::{ScanPhase, ScanProgress, ScanState, ScanStatus};
