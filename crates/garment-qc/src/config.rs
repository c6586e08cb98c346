//! Session configuration, read once at session start.

use std::fs;
use std::path::{Path, PathBuf};

use garment_qc_track::{GarmentColor, MeasurementSpec, Side};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read session config: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed session config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything a measurement session consumes at startup. Paths for the back
/// side are optional; side switching requires them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Human label for the annotation (e.g. a size like "XXL").
    #[serde(default)]
    pub annotation_name: Option<String>,
    #[serde(default)]
    pub side: Side,
    pub annotation_path: PathBuf,
    pub reference_image_path: PathBuf,
    #[serde(default)]
    pub back_annotation_path: Option<PathBuf>,
    #[serde(default)]
    pub back_reference_image_path: Option<PathBuf>,
    #[serde(default)]
    pub calibration_path: Option<PathBuf>,
    /// Where the live snapshot file is written; omit to disable snapshots.
    #[serde(default)]
    pub results_path: Option<PathBuf>,
    #[serde(default)]
    pub garment_color: GarmentColor,
    /// Global QC tolerance. The permissive default mirrors a line setup
    /// where targets gate visually and tolerance is tightened per article.
    #[serde(default = "default_tolerance_cm")]
    pub tolerance_cm: f64,
    /// Per-pair labels decorating the snapshot; never consulted by QC.
    #[serde(default)]
    pub measurement_specs: Vec<MeasurementSpec>,
}

fn default_tolerance_cm() -> f64 {
    100.0
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
