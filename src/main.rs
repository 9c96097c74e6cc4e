//! Command-line front end for the scan stack.
//!
//! Wires a beamline registry, the scan engine, the watchdog, and the
//! sweep composer together, with one subcommand per sweep shape.
//! Parameters come from the operator configuration file, overridden by
//! command flags; the configuration is rewritten after every successful
//! sweep so a bare invocation repeats the last one.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tomo_core::{points, ScanParameters, TomoError, TomoResult};
use tomo_hardware::{simulated_beamline, BeamlineProfile, SimTiming};
use tomo_scan::store::{AxisSection, ScanConfig};
use tomo_scan::sweep::{AxisSweep, Composer, InSituRamp, RepeatOptions, SweepOutcome};
use tomo_scan::{
    default_config_path, engine_alive, snapshot_live, EnergyCalibration, ReplayFile, ScanEngine,
    Watchdog,
};

#[derive(Parser)]
#[command(name = "tomoscan", version, about = "Tomography scan orchestration")]
struct Cli {
    /// Configuration file; defaults to ~/tomoscan.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Plan and log sweeps without running any scan
    #[arg(long, global = true)]
    testing: bool,

    #[command(subcommand)]
    command: Command,
}

/// Dataset parameter overrides shared by every scan verb. Anything left
/// unset repeats the value from the configuration file.
#[derive(Args, Clone, Default)]
struct ScanArgs {
    #[arg(long)]
    rotation_start: Option<f64>,

    /// Degrees per projection
    #[arg(long)]
    rotation_step: Option<f64>,

    #[arg(long)]
    num_angles: Option<u32>,

    /// Seconds per frame
    #[arg(long)]
    exposure: Option<f64>,

    #[arg(long)]
    file_path: Option<String>,

    #[arg(long)]
    file_name: Option<String>,
}

#[derive(Args, Clone, Default)]
struct AxisArgs {
    #[arg(long)]
    start: Option<f64>,

    #[arg(long)]
    step: Option<f64>,

    #[arg(long)]
    steps: Option<u32>,
}

/// Sleep/repeat wrapper flags.
#[derive(Args, Clone, Default)]
struct SleepArgs {
    /// Repeat the whole sweep this many times
    #[arg(long)]
    repeats: Option<u32>,

    /// Delay between repetitions, seconds
    #[arg(long)]
    sleep_time: Option<f64>,

    /// Ramp the configured in-situ set-point once per repetition
    #[arg(long)]
    in_situ: bool,
}

#[derive(Args, Clone, Default)]
struct MosaicArgs {
    #[arg(long)]
    vertical_start: Option<f64>,

    #[arg(long)]
    vertical_step: Option<f64>,

    #[arg(long)]
    vertical_steps: Option<u32>,

    #[arg(long)]
    horizontal_start: Option<f64>,

    #[arg(long)]
    horizontal_step: Option<f64>,

    #[arg(long)]
    horizontal_steps: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Snapshot live control-point values into a new configuration file
    Init,

    /// Show engine and heartbeat status
    Status,

    /// One dataset at the current position
    Single {
        #[command(flatten)]
        scan: ScanArgs,
        #[command(flatten)]
        sleep: SleepArgs,
    },

    /// One dataset per vertical position
    Vertical {
        #[command(flatten)]
        scan: ScanArgs,
        #[command(flatten)]
        axis: AxisArgs,
        #[command(flatten)]
        sleep: SleepArgs,
    },

    /// One dataset per horizontal position
    Horizontal {
        #[command(flatten)]
        scan: ScanArgs,
        #[command(flatten)]
        axis: AxisArgs,
        #[command(flatten)]
        sleep: SleepArgs,
    },

    /// Row-major vertical x horizontal grid of datasets
    Mosaic {
        #[command(flatten)]
        scan: ScanArgs,
        #[command(flatten)]
        grid: MosaicArgs,
        #[command(flatten)]
        sleep: SleepArgs,
    },

    /// Datasets at interpolated beamline energies
    Energy {
        #[command(flatten)]
        scan: ScanArgs,
        #[command(flatten)]
        sleep: SleepArgs,
        /// Calibration captured at the lower reference energy
        #[arg(long)]
        calibration_low: Option<PathBuf>,
        /// Calibration captured at the higher reference energy
        #[arg(long)]
        calibration_high: Option<PathBuf>,
        /// Energies to scan at, keV
        #[arg(long, value_delimiter = ',')]
        energies: Vec<f64>,
    },

    /// Replay recorded scans from a JSON scan file
    File {
        #[command(flatten)]
        sleep: SleepArgs,
        /// Scan file of recorded parameters and positions
        #[arg(long)]
        scan_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "command failed");
            exit_code(&err)
        }
    }
}

fn exit_code(err: &TomoError) -> ExitCode {
    match err {
        TomoError::Configuration(_) | TomoError::TomlParse(_) => ExitCode::from(2),
        TomoError::Busy { .. } | TomoError::EngineNotRunning => ExitCode::from(3),
        _ => ExitCode::from(1),
    }
}

async fn run(cli: Cli) -> TomoResult<()> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let beamline = simulated_beamline(&SimTiming::default());
    let registry = Arc::clone(&beamline.registry);

    match cli.command {
        Command::Init => {
            let params = snapshot_live(&registry).await?;
            ScanConfig::init(&config_path, params)?;
            info!(path = %config_path.display(), "configuration file created");
            Ok(())
        }
        Command::Status => {
            // The watchdog point is refreshed by whatever process hosts the
            // engine; zero means nothing has refreshed it recently.
            if !engine_alive(&registry).await? {
                return Err(TomoError::EngineNotRunning);
            }
            let state = registry.read_string(points::SCAN_STATUS).await?;
            let reload = registry.read_i64(points::WATCHDOG).await?;
            println!(
                "engine: {state}\nwatchdog: {reload}\nconfig: {}",
                config_path.display()
            );
            Ok(())
        }
        ref command => {
            let mut config = if config_path.exists() {
                ScanConfig::load(&config_path)?
            } else {
                ScanConfig::default()
            };
            if cli.testing {
                config.general.testing = true;
            }

            // This process hosts the engine; the watchdog advertises it to
            // external monitors for the duration of the sweep.
            let _watchdog = Watchdog::spawn(Arc::clone(&registry));

            let engine = ScanEngine::new(registry, Arc::new(BeamlineProfile::default()));
            let aborter = engine.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, aborting scan");
                    aborter.request_abort();
                }
            });

            let outcome = dispatch(command, &mut config, engine).await?;
            if outcome.aborted {
                info!(scans = outcome.scans_completed, "sweep aborted by operator");
            } else {
                info!(scans = outcome.scans_completed, "sweep finished");
                config.save(&config_path)?;
            }
            Ok(())
        }
    }
}

async fn dispatch(
    command: &Command,
    config: &mut ScanConfig,
    engine: ScanEngine,
) -> TomoResult<SweepOutcome> {
    match command {
        Command::Single { scan, sleep } => {
            let params = merge_params(&config.scan, scan);
            let composer = composer(engine, config, sleep)?;
            let outcome = composer.run_single(&params).await?;
            config.scan = params;
            Ok(outcome)
        }
        Command::Vertical { scan, axis, sleep } => {
            let params = merge_params(&config.scan, scan);
            let section = merge_axis(&config.vertical, axis);
            let composer = composer(engine, config, sleep)?;
            let outcome = composer.run_vertical(&params, &sweep_of(&section)).await?;
            config.scan = params;
            config.vertical = section;
            Ok(outcome)
        }
        Command::Horizontal { scan, axis, sleep } => {
            let params = merge_params(&config.scan, scan);
            let section = merge_axis(&config.horizontal, axis);
            let composer = composer(engine, config, sleep)?;
            let outcome = composer
                .run_horizontal(&params, &sweep_of(&section))
                .await?;
            config.scan = params;
            config.horizontal = section;
            Ok(outcome)
        }
        Command::Mosaic { scan, grid, sleep } => {
            let params = merge_params(&config.scan, scan);
            let vertical = merge_axis(
                &config.vertical,
                &AxisArgs {
                    start: grid.vertical_start,
                    step: grid.vertical_step,
                    steps: grid.vertical_steps,
                },
            );
            let horizontal = merge_axis(
                &config.horizontal,
                &AxisArgs {
                    start: grid.horizontal_start,
                    step: grid.horizontal_step,
                    steps: grid.horizontal_steps,
                },
            );
            let composer = composer(engine, config, sleep)?;
            let outcome = composer
                .run_mosaic(&params, &sweep_of(&vertical), &sweep_of(&horizontal))
                .await?;
            config.scan = params;
            config.vertical = vertical;
            config.horizontal = horizontal;
            Ok(outcome)
        }
        Command::Energy {
            scan,
            sleep,
            calibration_low,
            calibration_high,
            energies,
        } => {
            let params = merge_params(&config.scan, scan);
            let low_path = calibration_low
                .clone()
                .or_else(|| non_empty_path(&config.energy.calibration_low))
                .ok_or_else(|| {
                    TomoError::Configuration("no low-energy calibration configured".into())
                })?;
            let high_path = calibration_high
                .clone()
                .or_else(|| non_empty_path(&config.energy.calibration_high))
                .ok_or_else(|| {
                    TomoError::Configuration("no high-energy calibration configured".into())
                })?;
            let low = EnergyCalibration::load(&low_path)?;
            let high = EnergyCalibration::load(&high_path)?;
            let energies = if energies.is_empty() {
                config.energy.energies.clone()
            } else {
                energies.clone()
            };
            let composer = composer(engine, config, sleep)?;
            let outcome = composer.run_energy(&params, &low, &high, &energies).await?;
            config.scan = params;
            config.energy.energies = energies;
            config.energy.calibration_low = low_path.to_string_lossy().into_owned();
            config.energy.calibration_high = high_path.to_string_lossy().into_owned();
            Ok(outcome)
        }
        Command::File { sleep, scan_file } => {
            let path = scan_file
                .clone()
                .or_else(|| non_empty_path(&config.file.scan_file))
                .ok_or_else(|| TomoError::Configuration("no scan file configured".into()))?;
            let replay = ReplayFile::load(&path)?;
            let composer = composer(engine, config, sleep)?;
            let outcome = composer.run_file(&replay).await?;
            config.file.scan_file = path.to_string_lossy().into_owned();
            Ok(outcome)
        }
        Command::Init | Command::Status => {
            unreachable!("handled before dispatch")
        }
    }
}

fn composer(engine: ScanEngine, config: &ScanConfig, sleep: &SleepArgs) -> TomoResult<Composer> {
    let count = sleep.repeats.unwrap_or({
        if config.general.sleep {
            config.in_situ.sleep_steps
        } else {
            1
        }
    });
    let delay = sleep.sleep_time.unwrap_or(config.in_situ.sleep_time).max(0.0);
    let ramp = if sleep.in_situ || config.general.in_situ {
        if config.in_situ.point.is_empty() {
            return Err(TomoError::Configuration(
                "in-situ ramp requested but no set-point is configured".into(),
            ));
        }
        Some(InSituRamp {
            point: config.in_situ.point.clone(),
            start: config.in_situ.start,
            step: config.in_situ.step,
        })
    } else {
        None
    };
    Ok(Composer::new(engine)
        .with_repeat(RepeatOptions {
            count,
            delay: Duration::from_secs_f64(delay),
            in_situ: ramp,
        })
        .dry_run(config.general.testing))
}

fn merge_params(base: &ScanParameters, args: &ScanArgs) -> ScanParameters {
    let mut params = base.clone();
    if let Some(v) = args.rotation_start {
        params.rotation_start = v;
    }
    if let Some(v) = args.rotation_step {
        params.rotation_step = v;
    }
    if let Some(v) = args.num_angles {
        params.num_angles = v;
    }
    if let Some(v) = args.exposure {
        params.exposure_time = v;
    }
    if let Some(v) = &args.file_path {
        params.file_path = v.clone();
    }
    if let Some(v) = &args.file_name {
        params.file_name = v.clone();
    }
    params
}

fn merge_axis(base: &AxisSection, args: &AxisArgs) -> AxisSection {
    AxisSection {
        start: args.start.unwrap_or(base.start),
        step: args.step.unwrap_or(base.step),
        steps: args.steps.unwrap_or(base.steps),
    }
}

fn sweep_of(section: &AxisSection) -> AxisSweep {
    AxisSweep {
        start: section.start,
        step: section.step,
        steps: section.steps,
    }
}

fn non_empty_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}
