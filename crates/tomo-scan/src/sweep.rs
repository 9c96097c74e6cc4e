//! Scan composition: multi-point sweeps built from single-scan invocations.
//!
//! Every sweep shape reduces to a [`SweepGrid`] of stage positions visited
//! left to right, one dataset per point. The composer positions the stage,
//! adjusts the flat-field axis away from the swept axis, and delegates each
//! point to the engine. An optional sleep/repeat wrapper reruns the whole
//! sweep with a fixed delay and an in-situ set-point ramp.

use std::time::Duration;

use tracing::{debug, info};

use tomo_core::{points, FieldMode, FlatFieldAxis, ScanParameters, ScanType, TomoError, TomoResult};

use crate::energy::{interpolate, validate_pair, EnergyCalibration};
use crate::engine::{ScanEngine, ScanOutcome};
use crate::store::ReplayFile;

/// One linear axis sweep: `start + k * step` for `k` in `[0, steps)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisSweep {
    pub start: f64,
    pub step: f64,
    pub steps: u32,
}

impl AxisSweep {
    pub fn positions(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.steps).map(|k| self.start + f64::from(k) * self.step)
    }
}

/// Stage position for one dataset. `None` leaves that axis where it is.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GridPoint {
    pub vertical: Option<f64>,
    pub horizontal: Option<f64>,
}

/// Ordered, immutable position sequence for one composed sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepGrid(Vec<GridPoint>);

impl SweepGrid {
    pub fn single() -> Self {
        Self(vec![GridPoint::default()])
    }

    pub fn vertical(sweep: &AxisSweep) -> Self {
        Self(
            sweep
                .positions()
                .map(|v| GridPoint {
                    vertical: Some(v),
                    horizontal: None,
                })
                .collect(),
        )
    }

    pub fn horizontal(sweep: &AxisSweep) -> Self {
        Self(
            sweep
                .positions()
                .map(|h| GridPoint {
                    vertical: None,
                    horizontal: Some(h),
                })
                .collect(),
        )
    }

    /// Row-major mosaic: the vertical axis is the outer loop.
    pub fn mosaic(vertical: &AxisSweep, horizontal: &AxisSweep) -> Self {
        let mut grid = Vec::with_capacity((vertical.steps * horizontal.steps) as usize);
        for v in vertical.positions() {
            for h in horizontal.positions() {
                grid.push(GridPoint {
                    vertical: Some(v),
                    horizontal: Some(h),
                });
            }
        }
        Self(grid)
    }

    pub fn points(&self) -> &[GridPoint] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Sleep/repeat wrapper configuration.
#[derive(Debug, Clone, Default)]
pub struct RepeatOptions {
    /// Number of repetitions of the whole sweep; 0 and 1 both mean once.
    pub count: u32,
    /// Delay between repetitions.
    pub delay: Duration,
    /// Auxiliary set-point written once per repetition as
    /// `start + k * step`.
    pub in_situ: Option<InSituRamp>,
}

#[derive(Debug, Clone)]
pub struct InSituRamp {
    pub point: String,
    pub start: f64,
    pub step: f64,
}

/// What a composed sweep did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    pub scans_completed: u32,
    pub aborted: bool,
}

enum Sweep<'a> {
    Single,
    Vertical(&'a AxisSweep),
    Horizontal(&'a AxisSweep),
    Mosaic {
        vertical: &'a AxisSweep,
        horizontal: &'a AxisSweep,
    },
    Energy {
        low: &'a EnergyCalibration,
        high: &'a EnergyCalibration,
        energies: &'a [f64],
    },
    File(&'a ReplayFile),
}

/// Builds sweeps on top of a [`ScanEngine`].
pub struct Composer {
    engine: ScanEngine,
    repeat: RepeatOptions,
    motion_timeout: Duration,
    /// Plan and log without running scans.
    dry_run: bool,
}

impl Composer {
    pub fn new(engine: ScanEngine) -> Self {
        Self {
            engine,
            repeat: RepeatOptions::default(),
            motion_timeout: Duration::from_secs(600),
            dry_run: false,
        }
    }

    pub fn with_repeat(mut self, repeat: RepeatOptions) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_motion_timeout(mut self, timeout: Duration) -> Self {
        self.motion_timeout = timeout;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn run_single(&self, params: &ScanParameters) -> TomoResult<SweepOutcome> {
        self.run_sweep(params, Sweep::Single).await
    }

    pub async fn run_vertical(
        &self,
        params: &ScanParameters,
        sweep: &AxisSweep,
    ) -> TomoResult<SweepOutcome> {
        self.run_sweep(params, Sweep::Vertical(sweep)).await
    }

    pub async fn run_horizontal(
        &self,
        params: &ScanParameters,
        sweep: &AxisSweep,
    ) -> TomoResult<SweepOutcome> {
        self.run_sweep(params, Sweep::Horizontal(sweep)).await
    }

    pub async fn run_mosaic(
        &self,
        params: &ScanParameters,
        vertical: &AxisSweep,
        horizontal: &AxisSweep,
    ) -> TomoResult<SweepOutcome> {
        self.run_sweep(
            params,
            Sweep::Mosaic {
                vertical,
                horizontal,
            },
        )
        .await
    }

    pub async fn run_energy(
        &self,
        params: &ScanParameters,
        low: &EnergyCalibration,
        high: &EnergyCalibration,
        energies: &[f64],
    ) -> TomoResult<SweepOutcome> {
        self.run_sweep(
            params,
            Sweep::Energy {
                low,
                high,
                energies,
            },
        )
        .await
    }

    pub async fn run_file(&self, replay: &ReplayFile) -> TomoResult<SweepOutcome> {
        self.run_sweep(&ScanParameters::default(), Sweep::File(replay))
            .await
    }

    async fn run_sweep(
        &self,
        params: &ScanParameters,
        sweep: Sweep<'_>,
    ) -> TomoResult<SweepOutcome> {
        let repetitions = self.repeat.count.max(1);
        let mut total = 0;
        for rep in 0..repetitions {
            if let Some(ramp) = &self.repeat.in_situ {
                let value = ramp.start + f64::from(rep) * ramp.step;
                info!(point = %ramp.point, value, "setting in-situ value");
                if !self.dry_run {
                    self.engine
                        .registry()
                        .write_wait(&ramp.point, value, self.motion_timeout)
                        .await?;
                }
            }
            let outcome = self.run_pass(params, &sweep).await?;
            total += outcome.scans_completed;
            if outcome.aborted {
                return Ok(SweepOutcome {
                    scans_completed: total,
                    aborted: true,
                });
            }
            if rep + 1 < repetitions && !self.repeat.delay.is_zero() {
                info!(delay = ?self.repeat.delay, "sleeping between repetitions");
                tokio::time::sleep(self.repeat.delay).await;
            }
        }
        Ok(SweepOutcome {
            scans_completed: total,
            aborted: false,
        })
    }

    async fn run_pass(
        &self,
        params: &ScanParameters,
        sweep: &Sweep<'_>,
    ) -> TomoResult<SweepOutcome> {
        match sweep {
            Sweep::Single => {
                self.run_grid(params, &SweepGrid::single(), params.scan_type, None)
                    .await
            }
            Sweep::Vertical(axis) => {
                self.run_grid(
                    params,
                    &SweepGrid::vertical(axis),
                    ScanType::Vertical,
                    Some(SweptAxis::Vertical),
                )
                .await
            }
            Sweep::Horizontal(axis) => {
                self.run_grid(
                    params,
                    &SweepGrid::horizontal(axis),
                    ScanType::Horizontal,
                    Some(SweptAxis::Horizontal),
                )
                .await
            }
            Sweep::Mosaic {
                vertical,
                horizontal,
            } => {
                // The inner (horizontal) axis is the one in motion between
                // datasets, so the flat-field axis is swept away from it.
                self.run_grid(
                    params,
                    &SweepGrid::mosaic(vertical, horizontal),
                    ScanType::Mosaic,
                    Some(SweptAxis::Horizontal),
                )
                .await
            }
            Sweep::Energy {
                low,
                high,
                energies,
            } => self.run_energy_pass(params, low, high, energies).await,
            Sweep::File(replay) => self.run_file_pass(replay).await,
        }
    }

    async fn run_grid(
        &self,
        params: &ScanParameters,
        grid: &SweepGrid,
        scan_type: ScanType,
        swept: Option<SweptAxis>,
    ) -> TomoResult<SweepOutcome> {
        if grid.is_empty() {
            return Err(TomoError::Configuration("sweep grid is empty".into()));
        }
        let flat_axis = effective_flat_axis(params, swept);
        let mut completed = 0;
        for (index, point) in grid.points().iter().enumerate() {
            info!(
                point = index + 1,
                total = grid.len(),
                vertical = ?point.vertical,
                horizontal = ?point.horizontal,
                "sweep point"
            );
            if self.dry_run {
                continue;
            }
            let mut scan = params.clone();
            scan.scan_type = scan_type;
            scan.flat_field_axis = flat_axis;
            if let Some(v) = point.vertical {
                scan.sample_out_y = v + (params.sample_out_y - params.sample_in_y);
                scan.sample_in_y = v;
                self.engine
                    .registry()
                    .write_wait(points::SAMPLE_Y, v, self.motion_timeout)
                    .await?;
            }
            if let Some(h) = point.horizontal {
                scan.sample_out_x = h + (params.sample_out_x - params.sample_in_x);
                scan.sample_in_x = h;
                self.engine
                    .registry()
                    .write_wait(points::SAMPLE_X, h, self.motion_timeout)
                    .await?;
            }
            match self.engine.run_scan(&scan).await? {
                ScanOutcome::Complete => completed += 1,
                ScanOutcome::Aborted => {
                    return Ok(SweepOutcome {
                        scans_completed: completed,
                        aborted: true,
                    });
                }
            }
        }
        Ok(SweepOutcome {
            scans_completed: completed,
            aborted: false,
        })
    }

    async fn run_energy_pass(
        &self,
        params: &ScanParameters,
        low: &EnergyCalibration,
        high: &EnergyCalibration,
        energies: &[f64],
    ) -> TomoResult<SweepOutcome> {
        validate_pair(low, high)?;
        if energies.is_empty() {
            return Err(TomoError::Configuration("no energies requested".into()));
        }
        let mut completed = 0;
        for &energy in energies {
            let values = interpolate(low, high, energy);
            info!(energy, points = values.len(), "moving beamline to energy");
            if self.dry_run {
                for (name, value) in &values {
                    debug!(point = %name, value, "interpolated set-point");
                }
                continue;
            }
            let mut scan = params.clone();
            scan.scan_type = ScanType::Energy;
            for (name, value) in &values {
                self.engine
                    .registry()
                    .write_wait(name, *value, self.motion_timeout)
                    .await?;
                // A calibrated sample position overrides the stored one, or
                // the engine would move the stage back when projections
                // start.
                match name.as_str() {
                    points::SAMPLE_X => scan.sample_in_x = *value,
                    points::SAMPLE_Y => scan.sample_in_y = *value,
                    _ => {}
                }
            }
            match self.engine.run_scan(&scan).await? {
                ScanOutcome::Complete => completed += 1,
                ScanOutcome::Aborted => {
                    return Ok(SweepOutcome {
                        scans_completed: completed,
                        aborted: true,
                    });
                }
            }
        }
        Ok(SweepOutcome {
            scans_completed: completed,
            aborted: false,
        })
    }

    async fn run_file_pass(&self, replay: &ReplayFile) -> TomoResult<SweepOutcome> {
        if replay.is_empty() {
            return Err(TomoError::Configuration("scan file has no records".into()));
        }
        let mut completed = 0;
        for (key, record) in replay.iter() {
            info!(key = %key, file = %record.params.file_name, "replaying recorded scan");
            if self.dry_run {
                continue;
            }
            self.engine
                .registry()
                .write_wait(points::SAMPLE_X, record.sample_x, self.motion_timeout)
                .await?;
            self.engine
                .registry()
                .write_wait(points::SAMPLE_Y, record.sample_y, self.motion_timeout)
                .await?;
            let mut scan = record.params.clone();
            scan.scan_type = ScanType::File;
            scan.sample_in_x = record.sample_x;
            scan.sample_in_y = record.sample_y;
            match self.engine.run_scan(&scan).await? {
                ScanOutcome::Complete => completed += 1,
                ScanOutcome::Aborted => {
                    return Ok(SweepOutcome {
                        scans_completed: completed,
                        aborted: true,
                    });
                }
            }
        }
        Ok(SweepOutcome {
            scans_completed: completed,
            aborted: false,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweptAxis {
    Vertical,
    Horizontal,
}

/// Flat fields must not move the sample along an axis the sweep itself
/// positions, and need no axis at all when flat fields are disabled.
fn effective_flat_axis(params: &ScanParameters, swept: Option<SweptAxis>) -> FlatFieldAxis {
    if params.flat_field_mode == FieldMode::None {
        return FlatFieldAxis::None;
    }
    match swept {
        None => params.flat_field_axis,
        Some(SweptAxis::Vertical) => match params.flat_field_axis {
            FlatFieldAxis::Y | FlatFieldAxis::Both => FlatFieldAxis::X,
            other => other,
        },
        Some(SweptAxis::Horizontal) => match params.flat_field_axis {
            FlatFieldAxis::X | FlatFieldAxis::Both => FlatFieldAxis::Y,
            other => other,
        },
    }
}
