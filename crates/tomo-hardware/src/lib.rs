//! Hardware layer for the scan stack.
//!
//! Provides concrete [`tomo_core::HardwareProfile`] implementations and a
//! simulated beamline that registers every canonical control point. Real
//! control-system transports plug in by registering their own
//! [`tomo_core::ControlPoint`] endpoints under the same names.

pub mod profile;
pub mod sim;

pub use profile::BeamlineProfile;
pub use sim::{simulated_beamline, SimBeamline, SimTiming};
