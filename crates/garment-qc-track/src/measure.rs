use std::collections::BTreeMap;

use log::debug;
use nalgebra::Point2;

use crate::calibration::Calibration;

/// One measurement pair's result for a frame in which both endpoints were
/// valid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LiveMeasurement {
    /// 1-based measurement pair index.
    pub pair_id: u32,
    pub pixel_distance: f64,
    /// Centimeters; absent in pixel-only (uncalibrated) mode.
    pub real_cm: Option<f64>,
    pub qc_passed: bool,
}

/// Converts stabilized keypoint pairs into distances and pass/fail, and
/// remembers the last successful measurement per pair so momentary tracking
/// dropouts never blank the externally visible snapshot.
#[derive(Clone, Debug)]
pub struct MeasurementEvaluator {
    calibration: Option<Calibration>,
    tolerance_cm: f64,
    targets: BTreeMap<u32, f64>,
    last_measured: BTreeMap<u32, LiveMeasurement>,
}

impl MeasurementEvaluator {
    pub fn new(
        calibration: Option<Calibration>,
        targets: BTreeMap<u32, f64>,
        tolerance_cm: f64,
    ) -> Self {
        Self {
            calibration,
            tolerance_cm,
            targets,
            last_measured: BTreeMap::new(),
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_some()
    }

    pub fn pixels_per_cm(&self) -> f64 {
        self.calibration.map(|c| c.pixels_per_cm).unwrap_or(0.0)
    }

    pub fn tolerance_cm(&self) -> f64 {
        self.tolerance_cm
    }

    /// Last successful measurement per pair, across all frames of the
    /// session/side so far.
    pub fn cached(&self) -> &BTreeMap<u32, LiveMeasurement> {
        &self.last_measured
    }

    /// Forget all cached measurements (side switch / session restart).
    pub fn reset(&mut self) {
        self.last_measured.clear();
    }

    /// Evaluate the current frame's stabilized keypoints. Pairs with an
    /// invalid endpoint are skipped entirely this frame; they stay
    /// available from the cache.
    pub fn evaluate(&mut self, points: &[Option<Point2<f32>>]) -> Vec<LiveMeasurement> {
        let mut out = Vec::new();

        for pair_index in 0..points.len() / 2 {
            let (Some(p1), Some(p2)) = (points[2 * pair_index], points[2 * pair_index + 1]) else {
                continue;
            };

            let pair_id = pair_index as u32 + 1;
            let pixel_distance = (p1 - p2).norm() as f64;

            let measurement = match self.calibration {
                Some(cal) => {
                    let real = pixel_distance / cal.pixels_per_cm;
                    LiveMeasurement {
                        pair_id,
                        pixel_distance,
                        real_cm: Some(real),
                        qc_passed: self.check_qc(pair_id, real),
                    }
                }
                // Pixel-only mode: no cm value, QC not evaluated.
                None => LiveMeasurement {
                    pair_id,
                    pixel_distance,
                    real_cm: None,
                    qc_passed: false,
                },
            };

            self.last_measured.insert(pair_id, measurement);
            out.push(measurement);
        }

        out
    }

    /// A pair without a configured target auto-passes; a configured target
    /// passes within the global tolerance.
    fn check_qc(&self, pair_id: u32, measured_cm: f64) -> bool {
        match self.targets.get(&pair_id) {
            None => {
                debug!("no target distance for pair {pair_id}, auto-passing");
                true
            }
            Some(&target) => (measured_cm - target).abs() <= self.tolerance_cm,
        }
    }
}
