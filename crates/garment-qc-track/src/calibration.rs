use std::fs;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("failed to read calibration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed calibration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pixel-to-centimeter scale, derived from a reference object of known
/// length. Absence is a supported degraded mode (pixel-only measurements).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub pixels_per_cm: f64,
    pub reference_length_cm: f64,
    pub is_calibrated: bool,
}

impl Calibration {
    /// Derive the scale from a measured pixel span of an object with known
    /// physical length.
    pub fn from_reference(pixel_distance: f64, length_cm: f64) -> Option<Self> {
        if pixel_distance <= 0.0 || length_cm <= 0.0 {
            return None;
        }
        Some(Self {
            pixels_per_cm: pixel_distance / length_cm,
            reference_length_cm: length_cm,
            is_calibrated: true,
        })
    }

    /// Load calibration; a missing file or an invalid scale yields
    /// `Ok(None)` (run uncalibrated), while unreadable JSON is an error.
    pub fn load(path: &Path) -> Result<Option<Self>, CalibrationError> {
        if !path.exists() {
            info!("no calibration file at {path:?}, running in pixel-only mode");
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        let cal: Calibration = serde_json::from_str(&raw)?;
        if !cal.is_calibrated || cal.pixels_per_cm <= 0.0 {
            warn!("calibration file {path:?} present but not valid, ignoring");
            return Ok(None);
        }
        info!(
            "calibration loaded: {:.2} px/cm (reference {} cm)",
            cal.pixels_per_cm, cal.reference_length_cm
        );
        Ok(Some(cal))
    }

    pub fn save(&self, path: &Path) -> Result<(), CalibrationError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
