//! Configuration persistence.
//!
//! Two independent mechanisms: a sectioned TOML file holding defaults and
//! the last-used parameters per sweep shape, rewritten after every
//! successful sweep; and JSON replay files mapping zero-padded scan keys
//! to full parameter records for arbitrary-position file scans.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use tomo_core::{points, ControlPointRegistry, ScanParameters, TomoError, TomoResult};

/// Default location of the operator configuration file.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tomoscan.toml")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GeneralSection {
    pub verbose: bool,
    /// Dry-run mode: plan sweeps and log them without touching hardware.
    pub testing: bool,
    pub sleep: bool,
    pub in_situ: bool,
}

/// Auxiliary set-point ramped once per sleep repetition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InSituSection {
    pub point: String,
    pub start: f64,
    pub step: f64,
    /// Delay between repetitions, seconds.
    pub sleep_time: f64,
    pub sleep_steps: u32,
}

impl Default for InSituSection {
    fn default() -> Self {
        Self {
            point: String::new(),
            start: 0.0,
            step: 0.0,
            sleep_time: 0.0,
            sleep_steps: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisSection {
    pub start: f64,
    pub step: f64,
    pub steps: u32,
}

impl Default for AxisSection {
    fn default() -> Self {
        Self {
            start: 0.0,
            step: 0.1,
            steps: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EnergySection {
    pub energies: Vec<f64>,
    pub calibration_low: String,
    pub calibration_high: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileSection {
    pub scan_file: String,
}

/// The whole operator configuration: defaults plus last-used parameters,
/// one section per sweep shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScanConfig {
    pub general: GeneralSection,
    /// Last-used dataset parameters; the starting point for every sweep.
    pub scan: ScanParameters,
    pub in_situ: InSituSection,
    pub vertical: AxisSection,
    pub horizontal: AxisSection,
    pub energy: EnergySection,
    pub file: FileSection,
}

impl ScanConfig {
    /// Load the configuration, failing loudly when missing or malformed.
    pub fn load(path: &Path) -> TomoResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            TomoError::Configuration(format!(
                "cannot read configuration {}: {err} (run 'init' first)",
                path.display()
            ))
        })?;
        let config = toml::from_str(&text)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> TomoResult<()> {
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Create a fresh configuration file from a live snapshot. Refuses to
    /// overwrite an existing file.
    pub fn init(path: &Path, params: ScanParameters) -> TomoResult<()> {
        if path.exists() {
            return Err(TomoError::Configuration(format!(
                "configuration {} already exists, refusing to overwrite",
                path.display()
            )));
        }
        let config = ScanConfig {
            scan: params,
            ..Default::default()
        };
        config.save(path)
    }
}

/// Snapshot the current control-point values into scan parameters, for
/// `init` and as a starting point for ad-hoc scans.
pub async fn snapshot_live(registry: &ControlPointRegistry) -> TomoResult<ScanParameters> {
    let mut params = ScanParameters::default();
    params.rotation_start = registry.read_f64(points::ROTATION).await?;
    params.sample_in_x = registry.read_f64(points::SAMPLE_X).await?;
    params.sample_in_y = registry.read_f64(points::SAMPLE_Y).await?;
    params.exposure_time = registry.read_f64(points::CAM_EXPOSURE).await?;
    params.file_path = registry.read_string(points::FILE_PATH).await?;
    params.file_name = registry.read_string(points::FILE_NAME).await?;
    Ok(params)
}

/// One replayed dataset: full parameters plus the explicit stage position
/// to collect it at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub params: ScanParameters,
    pub sample_x: f64,
    pub sample_y: f64,
}

/// Ordered replay mapping. Keys are zero-padded decimal strings so the
/// map's lexicographic order is the insertion order and the file is stable
/// under round-tripping. Six digits of padding keeps that property up to a
/// million records, far past any realistic beamtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ReplayFile {
    records: BTreeMap<String, ReplayRecord>,
}

impl ReplayFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ReplayRecord) {
        let key = format!("{:06}", self.records.len());
        self.records.insert(key, record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ReplayRecord)> {
        self.records.iter()
    }

    /// A missing or malformed replay file is a configuration error the
    /// operator must see, never silently skipped.
    pub fn load(path: &Path) -> TomoResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            TomoError::Configuration(format!(
                "cannot read scan file {}: {err}",
                path.display()
            ))
        })?;
        let replay: Self = serde_json::from_str(&text).map_err(|err| {
            TomoError::Configuration(format!(
                "malformed scan file {}: {err}",
                path.display()
            ))
        })?;
        Ok(replay)
    }

    pub fn save(&self, path: &Path) -> TomoResult<()> {
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tomo_core::ScanType;

    #[test]
    fn config_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tomoscan.toml");
        let mut config = ScanConfig::default();
        config.scan.num_angles = 900;
        config.scan.scan_type = ScanType::Vertical;
        config.vertical = AxisSection {
            start: -1.0,
            step: 0.5,
            steps: 4,
        };
        config.save(&path).unwrap();
        assert_eq!(ScanConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn missing_config_mentions_init() {
        let err = ScanConfig::load(Path::new("/no/such/tomoscan.toml")).unwrap_err();
        assert!(err.to_string().contains("init"));
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tomoscan.toml");
        ScanConfig::init(&path, ScanParameters::default()).unwrap();
        let err = ScanConfig::init(&path, ScanParameters::default()).unwrap_err();
        assert!(matches!(err, TomoError::Configuration(_)));
    }

    #[test]
    fn replay_file_round_trips_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.json");

        let mut replay = ReplayFile::new();
        for i in 0..12 {
            replay.push(ReplayRecord {
                params: ScanParameters {
                    num_angles: 100 + i,
                    ..Default::default()
                },
                sample_x: f64::from(i),
                sample_y: -f64::from(i),
            });
        }
        replay.save(&path).unwrap();
        let loaded = ReplayFile::load(&path).unwrap();
        assert_eq!(loaded, replay);

        // Keys come back in insertion order, including past two digits'
        // worth of records.
        let keys: Vec<_> = loaded.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys[0], "000000");
        assert_eq!(keys[9], "000009");
        assert_eq!(keys[10], "000010");
        assert_eq!(keys[11], "000011");
        let angles: Vec<_> = loaded.iter().map(|(_, r)| r.params.num_angles).collect();
        assert_eq!(angles, (100..112).collect::<Vec<_>>());
    }

    #[test]
    fn replay_order_survives_four_digit_counts() {
        let mut replay = ReplayFile::new();
        for i in 0..1002u32 {
            replay.push(ReplayRecord {
                params: ScanParameters {
                    num_angles: 100 + i,
                    ..Default::default()
                },
                sample_x: 0.0,
                sample_y: 0.0,
            });
        }
        // "1000" would sort between "100" and "101" under narrower padding.
        let angles: Vec<_> = replay.iter().map(|(_, r)| r.params.num_angles).collect();
        assert_eq!(angles, (100..1102).collect::<Vec<_>>());
    }

    #[test]
    fn malformed_replay_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = ReplayFile::load(&path).unwrap_err();
        assert!(matches!(err, TomoError::Configuration(_)));
        assert!(ReplayFile::load(Path::new("/no/such/scan.json")).is_err());
    }

    #[tokio::test]
    async fn snapshot_live_reads_the_registry() {
        use std::sync::Arc;
        use tomo_core::{ControlPoint, PointValue, TomoResult};

        struct Cell(String, tokio::sync::RwLock<PointValue>);

        #[async_trait::async_trait]
        impl ControlPoint for Cell {
            fn name(&self) -> &str {
                &self.0
            }
            async fn get(&self) -> TomoResult<PointValue> {
                Ok(self.1.read().await.clone())
            }
            async fn put(&self, value: PointValue) -> TomoResult<()> {
                *self.1.write().await = value;
                Ok(())
            }
        }

        fn cell(name: &str, value: impl Into<PointValue>) -> Arc<Cell> {
            Arc::new(Cell(name.to_string(), tokio::sync::RwLock::new(value.into())))
        }

        let mut registry = ControlPointRegistry::new();
        registry.register(cell(points::ROTATION, 45.0));
        registry.register(cell(points::SAMPLE_X, 1.5));
        registry.register(cell(points::SAMPLE_Y, -2.0));
        registry.register(cell(points::CAM_EXPOSURE, 0.2));
        registry.register(cell(points::FILE_PATH, "/data"));
        registry.register(cell(points::FILE_NAME, "sample_a"));

        let params = snapshot_live(&registry).await.unwrap();
        assert_eq!(params.rotation_start, 45.0);
        assert_eq!(params.sample_in_x, 1.5);
        assert_eq!(params.sample_in_y, -2.0);
        assert_eq!(params.exposure_time, 0.2);
        assert_eq!(params.file_path, "/data");
        assert_eq!(params.file_name, "sample_a");
    }
}
