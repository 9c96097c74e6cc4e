//! Scan status published to external observers.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Phase of the single-scan state machine currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanPhase {
    BeginScan,
    DarkFields,
    FlatFields,
    CollectProjections,
    EndScan,
    Cleanup,
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanPhase::BeginScan => "begin scan",
            ScanPhase::DarkFields => "collecting dark fields",
            ScanPhase::FlatFields => "collecting flat fields",
            ScanPhase::CollectProjections => "collecting projections",
            ScanPhase::EndScan => "end scan",
            ScanPhase::Cleanup => "cleanup",
        };
        f.write_str(s)
    }
}

/// Engine state, one scan at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ScanState {
    #[default]
    Idle,
    Running(ScanPhase),
    Complete,
    Aborted,
    Error(String),
}

impl ScanState {
    /// Ready to accept a new scan. Terminal states count as ready; the
    /// next scan supersedes them.
    pub fn is_ready(&self) -> bool {
        !matches!(self, ScanState::Running(_))
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanState::Idle => f.write_str("idle"),
            ScanState::Running(phase) => write!(f, "running: {phase}"),
            ScanState::Complete => f.write_str("complete"),
            ScanState::Aborted => f.write_str("aborted"),
            ScanState::Error(cause) => write!(f, "error: {cause}"),
        }
    }
}

/// Progress counters for the scan in flight. Counters only move forward
/// within one scan; the remaining-time estimate is best effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScanProgress {
    pub images_collected: u32,
    pub images_saved: u32,
    pub total_images: u32,
    pub elapsed: Duration,
    pub remaining_estimate: Option<Duration>,
}

impl ScanProgress {
    /// Update counters from the latest detector readback. Counters never
    /// move backwards; a lower readback (detector counter reset) is ignored.
    pub fn observe(&mut self, collected: u32, saved: u32, elapsed: Duration) {
        self.images_collected = self.images_collected.max(collected);
        self.images_saved = self.images_saved.max(saved);
        self.elapsed = elapsed;
        if self.images_collected > 0 && self.total_images > self.images_collected {
            let per_frame = elapsed.as_secs_f64() / f64::from(self.images_collected);
            let remaining = f64::from(self.total_images - self.images_collected) * per_frame;
            self.remaining_estimate = Some(Duration::from_secs_f64(remaining));
        } else {
            self.remaining_estimate = None;
        }
    }
}

/// Full published status: state plus progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScanStatus {
    pub state: ScanState,
    pub progress: ScanProgress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_follows_state() {
        assert!(ScanState::Idle.is_ready());
        assert!(ScanState::Complete.is_ready());
        assert!(ScanState::Aborted.is_ready());
        assert!(ScanState::Error("boom".into()).is_ready());
        assert!(!ScanState::Running(ScanPhase::CollectProjections).is_ready());
    }

    #[test]
    fn progress_counters_are_monotonic() {
        let mut progress = ScanProgress {
            total_images: 100,
            ..Default::default()
        };
        progress.observe(10, 8, Duration::from_secs(10));
        assert_eq!(progress.images_collected, 10);
        // Detector counter reset mid-scan must not rewind the counters.
        progress.observe(3, 2, Duration::from_secs(11));
        assert_eq!(progress.images_collected, 10);
        assert_eq!(progress.images_saved, 8);
    }

    #[test]
    fn remaining_estimate_scales_with_rate() {
        let mut progress = ScanProgress {
            total_images: 100,
            ..Default::default()
        };
        progress.observe(50, 50, Duration::from_secs(50));
        let remaining = progress.remaining_estimate.unwrap();
        assert_eq!(remaining, Duration::from_secs(50));
    }
}
