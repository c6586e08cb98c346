use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::measure::{LiveMeasurement, MeasurementEvaluator};
use crate::Side;

/// Garment color mode; affects only camera exposure/gain at the driver
/// boundary and is echoed in the snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GarmentColor {
    White,
    Black,
    #[default]
    Other,
}

impl GarmentColor {
    /// Suggested (analog gain, auto-exposure) for camera drivers.
    pub fn exposure_hint(self) -> (u32, bool) {
        match self {
            GarmentColor::White => (20, true),
            GarmentColor::Black => (150, false),
            GarmentColor::Other => (64, true),
        }
    }
}

/// Human-facing decoration for one measurement pair, supplied by the
/// operator panel. Never consulted by the QC check; the global tolerance is
/// authoritative.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeasurementSpec {
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub db_id: Option<i64>,
    #[serde(default)]
    pub expected_value: Option<f64>,
    #[serde(default = "default_spec_tolerance")]
    pub tol_plus: f64,
    #[serde(default = "default_spec_tolerance")]
    pub tol_minus: f64,
}

fn default_spec_tolerance() -> f64 {
    1.0
}

/// One pair's entry in the externally visible snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub id: u32,
    pub name: String,
    pub spec_id: Option<i64>,
    pub spec_code: Option<String>,
    /// Null only if the pair has never once been measured this session.
    pub actual_cm: Option<f64>,
    pub pixel_distance: f64,
    pub expected_value: Option<f64>,
    pub tolerance_plus: f64,
    pub tolerance_minus: f64,
    pub qc_passed: bool,
    /// True when the value came from a previous frame's cache rather than
    /// the current frame.
    pub is_fallback: bool,
}

/// The per-frame result file contract read by the operator panel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LiveSnapshot {
    pub timestamp_unix: u64,
    pub annotation_name: String,
    pub side: Side,
    pub is_calibrated: bool,
    pub pixels_per_cm: f64,
    pub tolerance_cm: f64,
    pub garment_color: GarmentColor,
    pub measurements: Vec<SnapshotEntry>,
}

/// Session-level fields the snapshot carries unchanged.
#[derive(Clone, Debug, Default)]
pub struct SnapshotMeta {
    pub annotation_name: String,
    pub side: Side,
    pub garment_color: GarmentColor,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Build the frame's snapshot: current-frame measurements first, cached
/// values for pairs that dropped out this frame, and explicit
/// never-measured entries (null cm, zero px) for the rest.
pub fn build_snapshot(
    evaluator: &MeasurementEvaluator,
    current: &[LiveMeasurement],
    specs: &[MeasurementSpec],
    meta: &SnapshotMeta,
) -> LiveSnapshot {
    let timestamp_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut merged: std::collections::BTreeMap<u32, (LiveMeasurement, bool)> =
        std::collections::BTreeMap::new();
    for m in current {
        merged.insert(m.pair_id, (*m, false));
    }
    for (&pair_id, m) in evaluator.cached() {
        merged.entry(pair_id).or_insert((*m, true));
    }

    let max_pairs = merged
        .keys()
        .next_back()
        .copied()
        .unwrap_or(0)
        .max(specs.len() as u32);

    let mut measurements = Vec::with_capacity(max_pairs as usize);
    for pair_id in 1..=max_pairs {
        let spec = specs.get(pair_id as usize - 1);
        let (actual_cm, pixel_distance, qc_passed, is_fallback) = match merged.get(&pair_id) {
            Some((m, fallback)) => (
                m.real_cm.map(round2),
                round2(m.pixel_distance),
                m.qc_passed,
                *fallback,
            ),
            // Never measured this session: null, not a frozen zero.
            None => (None, 0.0, false, true),
        };

        measurements.push(SnapshotEntry {
            id: pair_id,
            name: spec
                .map(|s| s.name.clone())
                .unwrap_or_else(|| format!("Measurement {pair_id}")),
            spec_id: spec.and_then(|s| s.db_id),
            spec_code: spec.and_then(|s| s.code.clone()),
            actual_cm,
            pixel_distance,
            expected_value: spec.and_then(|s| s.expected_value),
            tolerance_plus: spec.map(|s| s.tol_plus).unwrap_or(1.0),
            tolerance_minus: spec.map(|s| s.tol_minus).unwrap_or(1.0),
            qc_passed,
            is_fallback,
        });
    }

    LiveSnapshot {
        timestamp_unix,
        annotation_name: meta.annotation_name.clone(),
        side: meta.side,
        is_calibrated: evaluator.is_calibrated(),
        pixels_per_cm: evaluator.pixels_per_cm(),
        tolerance_cm: evaluator.tolerance_cm(),
        garment_color: meta.garment_color,
        measurements,
    }
}

/// Writes snapshots atomically (temp-then-rename) so a polling reader never
/// observes a half-written file; falls back to a direct write when the
/// rename fails.
#[derive(Clone, Debug)]
pub struct SnapshotWriter {
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, snapshot: &LiveSnapshot) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        match fs::write(&tmp, &json).and_then(|_| fs::rename(&tmp, &self.path)) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("atomic snapshot write failed ({e}), falling back to direct write");
                let _ = fs::remove_file(&tmp);
                fs::write(&self.path, &json)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point2;
    use std::collections::BTreeMap;

    use crate::calibration::Calibration;

    fn evaluator() -> MeasurementEvaluator {
        MeasurementEvaluator::new(
            Some(Calibration {
                pixels_per_cm: 10.0,
                reference_length_cm: 10.0,
                is_calibrated: true,
            }),
            BTreeMap::new(),
            1.0,
        )
    }

    fn pt(x: f32, y: f32) -> Option<Point2<f32>> {
        Some(Point2::new(x, y))
    }

    #[test]
    fn never_measured_pair_is_null_not_zero() {
        let mut eval = evaluator();
        // Pair 1 measured, pair 2 never valid.
        let current = eval.evaluate(&[pt(0.0, 0.0), pt(50.0, 0.0), None, None]);

        let specs = vec![
            MeasurementSpec {
                name: "Chest".into(),
                code: None,
                db_id: None,
                expected_value: None,
                tol_plus: 1.0,
                tol_minus: 1.0,
            },
            MeasurementSpec {
                name: "Waist".into(),
                code: None,
                db_id: None,
                expected_value: None,
                tol_plus: 1.0,
                tol_minus: 1.0,
            },
        ];

        let snapshot = build_snapshot(&eval, &current, &specs, &SnapshotMeta::default());
        assert_eq!(snapshot.measurements.len(), 2);
        assert_eq!(snapshot.measurements[0].actual_cm, Some(5.0));
        assert!(!snapshot.measurements[0].is_fallback);
        assert_eq!(snapshot.measurements[1].actual_cm, None);
        assert!(snapshot.measurements[1].is_fallback);

        let json = serde_json::to_string(&snapshot).expect("serialize");
        assert!(json.contains(r#""actual_cm": null"#) || json.contains(r#""actual_cm":null"#));
    }

    #[test]
    fn dropout_pair_falls_back_to_cached_value() {
        let mut eval = evaluator();
        eval.evaluate(&[pt(0.0, 0.0), pt(50.0, 0.0)]);

        // Next frame the pair drops out entirely.
        let current = eval.evaluate(&[None, None]);
        assert!(current.is_empty());

        let snapshot = build_snapshot(&eval, &current, &[], &SnapshotMeta::default());
        assert_eq!(snapshot.measurements.len(), 1);
        assert_eq!(snapshot.measurements[0].actual_cm, Some(5.0));
        assert!(snapshot.measurements[0].is_fallback);
    }

    #[test]
    fn spec_labels_decorate_entries() {
        let mut eval = evaluator();
        let current = eval.evaluate(&[pt(0.0, 0.0), pt(50.0, 0.0)]);

        let specs = vec![MeasurementSpec {
            name: "Leg Opening".into(),
            code: Some("JD_k-30".into()),
            db_id: Some(77),
            expected_value: Some(5.0),
            tol_plus: 0.5,
            tol_minus: 0.25,
        }];

        let snapshot = build_snapshot(&eval, &current, &specs, &SnapshotMeta::default());
        let entry = &snapshot.measurements[0];
        assert_eq!(entry.name, "Leg Opening");
        assert_eq!(entry.spec_code.as_deref(), Some("JD_k-30"));
        assert_eq!(entry.spec_id, Some(77));
        assert_eq!(entry.tolerance_plus, 0.5);
        assert_eq!(entry.tolerance_minus, 0.25);
        // Spec tolerances decorate only; QC already ran with the global
        // tolerance.
        assert!(entry.qc_passed);
    }

    #[test]
    fn writer_is_atomic_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("live_measurements.json");
        let writer = SnapshotWriter::new(&path);

        let eval = evaluator();
        let snapshot = build_snapshot(&eval, &[], &[], &SnapshotMeta::default());
        writer.write(&snapshot).expect("write");

        let reloaded: LiveSnapshot =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(reloaded.side, Side::Front);
        assert!(!dir.path().join("live_measurements.json.tmp").exists());

        // Second write replaces the file in place.
        writer.write(&snapshot).expect("rewrite");
        assert!(path.exists());
    }
}
