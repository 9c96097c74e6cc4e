//! Error taxonomy for the scan engine.
//!
//! Every fallible operation in the workspace returns [`TomoResult`]. Errors
//! that terminate a scan (timeouts, overruns, bad configuration) carry enough
//! context to be logged and reported to the operator without a backtrace.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type TomoResult<T> = Result<T, TomoError>;

/// All error conditions the scan stack can report.
#[derive(Error, Debug)]
pub enum TomoError {
    /// A control point name was looked up that no endpoint provides.
    #[error("unknown control point '{0}'")]
    UnknownPoint(String),

    /// A control point held a value of a different kind than requested.
    #[error("control point '{point}' holds a {actual} value, expected {expected}")]
    WrongType {
        point: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A bounded wait on a single control point expired.
    #[error("timed out after {waited:?} waiting on control point '{point}'")]
    Timeout { point: String, waited: Duration },

    /// The detector produced fewer frames than expected within the
    /// collection-time bound.
    #[error("detector timeout: {collected} of {expected} frames after {waited:?}")]
    DetectorTimeout {
        collected: u32,
        expected: u32,
        waited: Duration,
    },

    /// The detector produced more frames than the scan asked for, which
    /// indicates a hardware triggering fault.
    #[error("detector overrun: collected {collected} frames, expected {expected}")]
    Overrun { collected: u32, expected: u32 },

    /// Invalid or inconsistent scan parameters or configuration files.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A scan was requested while another one is in flight.
    #[error("scan engine is busy: {state}")]
    Busy { state: String },

    /// The engine heartbeat is stale, so the scan process is presumed dead.
    #[error("scan engine is not running (heartbeat stale)")]
    EngineNotRunning,

    /// The operator requested an abort. Not a fault.
    #[error("scan aborted by operator")]
    Aborted,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("toml serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}
