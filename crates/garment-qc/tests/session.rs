//! End-to-end session test: real files on disk, an image-sequence frame
//! source, and the snapshot contract.

use std::fs;
use std::path::Path;

use garment_qc::config::SessionConfig;
use garment_qc::session::{ImageDirSource, LiveSession, SessionParams};
use garment_qc::track::{LiveSnapshot, TrackerParams};
use garment_qc::features::{ExtractorParams, FastParams, PyramidParams};
use garment_qc::track::TemplateParams;

fn texture(x: i64, y: i64) -> u8 {
    let v = (x.wrapping_mul(2654435761) ^ y.wrapping_mul(40503)) as u64;
    ((v >> 16) % 256) as u8
}

fn write_frame(path: &Path, w: u32, h: u32, shift_x: i64) {
    let img = image::GrayImage::from_fn(w, h, |x, y| {
        image::Luma([texture(x as i64 + shift_x, y as i64)])
    });
    img.save(path).expect("save frame");
}

fn small_tracker_params() -> TrackerParams {
    TrackerParams {
        extractor: ExtractorParams {
            max_dimension: 800,
            fast: FastParams {
                threshold: 20,
                max_keypoints: 500,
            },
            pyramid: PyramidParams {
                levels: 2,
                scale_step: 1.2,
                fast_threshold: 20,
                level_budget: 400,
            },
        },
        template: TemplateParams {
            roi_size: 30,
            search_multiplier: 1.5,
            corner_roi_size: 40,
            corner_search_multiplier: 1.5,
            ..TemplateParams::default()
        },
        ..TrackerParams::default()
    }
}

#[test]
fn session_measures_and_writes_snapshots() {
    let dir = tempfile::tempdir().expect("tempdir");
    let frames_dir = dir.path().join("frames");
    let results_dir = dir.path().join("results");
    fs::create_dir_all(&frames_dir).expect("mkdir");

    // Reference image and two live frames (identity, then +6 px shift).
    let reference_path = dir.path().join("reference.png");
    write_frame(&reference_path, 240, 180, 0);
    write_frame(&frames_dir.join("frame_000.png"), 240, 180, 0);
    write_frame(&frames_dir.join("frame_001.png"), 240, 180, -6);

    let annotation_path = dir.path().join("annotation.json");
    fs::write(
        &annotation_path,
        r#"{
            "keypoints": [[60, 60, "normal"], [110, 60, "normal"], [70, 120, "corner"], [130, 120, "corner"]],
            "target_distances": {"1": 5.0},
            "placement_box": [10, 10, 200, 160]
        }"#,
    )
    .expect("write annotation");

    let calibration_path = dir.path().join("calibration.json");
    fs::write(
        &calibration_path,
        r#"{"pixels_per_cm": 10.0, "reference_length_cm": 10.0, "is_calibrated": true}"#,
    )
    .expect("write calibration");

    let config: SessionConfig = serde_json::from_str(&format!(
        r#"{{
            "annotation_name": "M",
            "annotation_path": {annotation:?},
            "reference_image_path": {reference:?},
            "calibration_path": {calibration:?},
            "results_path": {results:?},
            "tolerance_cm": 1.0,
            "measurement_specs": [{{"name": "Chest Width", "code": "CW-1", "expected_value": 5.0}}]
        }}"#,
        annotation = annotation_path,
        reference = reference_path,
        calibration = calibration_path,
        results = results_dir,
    ))
    .expect("config");

    let source = ImageDirSource::from_dir(&frames_dir).expect("source");
    assert_eq!(source.len(), 2);

    let params = SessionParams {
        tracker: small_tracker_params(),
        // No throttling in tests: every frame runs a fresh transfer.
        transfer_interval: std::time::Duration::ZERO,
    };
    let mut session = LiveSession::from_config(&config, source, params).expect("session");

    let mut reports = Vec::new();
    while let Some(report) = session.step().expect("step") {
        reports.push(report);
    }
    assert_eq!(reports.len(), 2);

    // Pair 1 is 50 px = 5.0 cm in both frames; target 5.0 within 1.0 cm.
    for report in &reports {
        let pair1 = report
            .measurements
            .iter()
            .find(|m| m.pair_id == 1)
            .expect("pair 1");
        let cm = pair1.real_cm.expect("calibrated");
        assert!((cm - 5.0).abs() < 0.4, "cm = {cm}");
        assert!(pair1.qc_passed);
    }

    // Snapshot file exists, parses, and carries the spec decoration.
    let snapshot_path = results_dir.join("live_measurements.json");
    let snapshot: LiveSnapshot =
        serde_json::from_str(&fs::read_to_string(&snapshot_path).expect("read")).expect("parse");
    assert!(snapshot.is_calibrated);
    assert_eq!(snapshot.measurements[0].name, "Chest Width");
    assert_eq!(snapshot.measurements[0].spec_code.as_deref(), Some("CW-1"));
    assert!(snapshot.measurements[0].actual_cm.is_some());
}

#[test]
fn empty_frame_directory_ends_immediately() {
    let dir = tempfile::tempdir().expect("tempdir");
    let frames_dir = dir.path().join("frames");
    fs::create_dir_all(&frames_dir).expect("mkdir");

    let reference_path = dir.path().join("reference.png");
    write_frame(&reference_path, 240, 180, 0);
    let annotation_path = dir.path().join("annotation.json");
    fs::write(
        &annotation_path,
        r#"{"keypoints": [[60, 60, "normal"], [110, 60, "normal"]]}"#,
    )
    .expect("write annotation");

    let config: SessionConfig = serde_json::from_str(&format!(
        r#"{{"annotation_path": {annotation:?}, "reference_image_path": {reference:?}}}"#,
        annotation = annotation_path,
        reference = reference_path,
    ))
    .expect("config");

    let source = ImageDirSource::from_dir(&frames_dir).expect("source");
    assert!(source.is_empty());

    let mut session =
        LiveSession::from_config(&config, source, SessionParams::default()).expect("session");
    assert!(session.step().expect("step").is_none());
}
