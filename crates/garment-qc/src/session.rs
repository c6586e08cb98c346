//! The single-threaded live measurement loop.
//!
//! One frame per iteration: capture, (throttled) keypoint transfer,
//! measurement, snapshot emission. Pausing freezes capture and transfer;
//! side switching fully resets tracking state; stopping is cooperative via
//! a flag checked once per iteration.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use garment_qc_core::GrayImage;
use garment_qc_track::{
    build_snapshot, AnnotationError, AnnotationSet, Calibration, CalibrationError,
    KeypointTracker, LiveMeasurement, LiveSnapshot, MeasurementEvaluator, MeasurementSpec, Side,
    SnapshotMeta, SnapshotWriter, TrackerParams, TrackingState,
};
use log::{info, warn};
use nalgebra::Point2;
use thiserror::Error;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::config::SessionConfig;
use crate::io::{load_gray_image, DecodeError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Annotation(#[from] AnnotationError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("no {0} annotation configured for this session")]
    MissingSide(Side),
}

/// One frame-grab outcome from a source. `Timeout` means retry (a camera
/// missed its deadline); `End` terminates the session (file sources).
#[derive(Debug)]
pub enum Frame {
    Image(GrayImage),
    Timeout,
    End,
}

/// Abstraction over the camera SDK boundary. The grab is the only blocking
/// call in the loop and must bound its own wait.
pub trait FrameSource {
    fn grab(&mut self) -> Frame;
}

/// File-based frame source: plays a sorted directory of images as the live
/// feed. Undecodable frames are skipped with a warning.
pub struct ImageDirSource {
    files: Vec<PathBuf>,
    index: usize,
}

impl ImageDirSource {
    pub fn from_dir(dir: &Path) -> std::io::Result<Self> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| {
                        matches!(
                            e.to_ascii_lowercase().as_str(),
                            "png" | "jpg" | "jpeg" | "bmp"
                        )
                    })
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(Self { files, index: 0 })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageDirSource {
    fn grab(&mut self) -> Frame {
        while self.index < self.files.len() {
            let path = self.files[self.index].clone();
            self.index += 1;
            match load_gray_image(&path) {
                Ok(loaded) => return Frame::Image(loaded.gray),
                Err(e) => warn!("skipping undecodable frame {path:?}: {e}"),
            }
        }
        Frame::End
    }
}

/// Everything produced for one processed frame.
#[derive(Clone, Debug)]
pub struct FrameReport {
    pub frame: GrayImage,
    pub points: Vec<Option<Point2<f32>>>,
    pub measurements: Vec<LiveMeasurement>,
    pub snapshot: LiveSnapshot,
}

#[derive(Clone, Copy, Debug)]
pub struct SessionParams {
    pub tracker: TrackerParams,
    /// Minimum interval between (expensive) transfer runs; frames arriving
    /// faster reuse the previous transfer result.
    pub transfer_interval: Duration,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            tracker: TrackerParams::default(),
            transfer_interval: Duration::from_millis(60),
        }
    }
}

struct SideContext {
    tracker: KeypointTracker,
    evaluator: MeasurementEvaluator,
}

impl SideContext {
    fn build(
        annotation_path: &Path,
        reference_path: &Path,
        calibration: Option<Calibration>,
        tolerance_cm: f64,
        params: TrackerParams,
    ) -> Result<Self, SessionError> {
        let annotation = AnnotationSet::load(annotation_path)?;
        let loaded = load_gray_image(reference_path)?;
        if loaded.suspect {
            warn!("reference image {reference_path:?} needed corruption recovery");
        }
        let targets = annotation.target_distances.clone();
        let tracker = KeypointTracker::new(loaded.gray, annotation, params);
        Ok(Self {
            tracker,
            evaluator: MeasurementEvaluator::new(calibration, targets, tolerance_cm),
        })
    }
}

/// Owns the per-frame loop state. Exactly one live session is active at a
/// time; the surrounding worker process enforces at-most-one camera
/// consumer, so no locking is needed here.
pub struct LiveSession<S: FrameSource> {
    source: S,
    front: SideContext,
    back: Option<SideContext>,
    side: Side,
    state: TrackingState,
    paused: bool,
    stop: Arc<AtomicBool>,
    last_transfer: Option<Instant>,
    last_points: Vec<Option<Point2<f32>>>,
    last_frame: Option<GrayImage>,
    writer: Option<SnapshotWriter>,
    specs: Vec<MeasurementSpec>,
    annotation_name: String,
    transfer_interval: Duration,
    garment_color: garment_qc_track::GarmentColor,
}

impl<S: FrameSource> LiveSession<S> {
    pub fn from_config(
        config: &SessionConfig,
        source: S,
        params: SessionParams,
    ) -> Result<Self, SessionError> {
        let calibration = match &config.calibration_path {
            Some(path) => Calibration::load(path)?,
            None => None,
        };
        if calibration.is_none() {
            info!("running uncalibrated: pixel distances only, no QC");
        }

        let front = SideContext::build(
            &config.annotation_path,
            &config.reference_image_path,
            calibration,
            config.tolerance_cm,
            params.tracker,
        )?;

        let back = match (&config.back_annotation_path, &config.back_reference_image_path) {
            (Some(annotation), Some(reference)) => Some(SideContext::build(
                annotation,
                reference,
                calibration,
                config.tolerance_cm,
                params.tracker,
            )?),
            _ => None,
        };

        if config.side == Side::Back && back.is_none() {
            return Err(SessionError::MissingSide(Side::Back));
        }

        let (gain, auto_exposure) = config.garment_color.exposure_hint();
        info!(
            "session start: side {}, garment color {:?} (camera hint: gain {gain}, AE {auto_exposure})",
            config.side, config.garment_color
        );

        Ok(Self {
            source,
            front,
            back,
            side: config.side,
            state: TrackingState::new(),
            paused: false,
            stop: Arc::new(AtomicBool::new(false)),
            last_transfer: None,
            last_points: Vec::new(),
            last_frame: None,
            writer: config
                .results_path
                .as_ref()
                .map(|dir| SnapshotWriter::new(dir.join("live_measurements.json"))),
            specs: config.measurement_specs.clone(),
            annotation_name: config
                .annotation_name
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            transfer_interval: params.transfer_interval,
            garment_color: config.garment_color,
        })
    }

    /// Flag handle for cooperative cancellation from a signal handler or
    /// supervising process.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            info!("measurement {}", if paused { "paused" } else { "resumed" });
        }
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Current side's annotation (roles and placement box feed the overlay
    /// renderer).
    pub fn annotation(&self) -> &AnnotationSet {
        self.context().tracker.annotation()
    }

    pub fn is_stabilized(&self) -> bool {
        self.state.stabilized
    }

    /// Switch measured side, fully resetting tracking state (including the
    /// static-lock map) and the target side's measurement cache.
    pub fn switch_side(&mut self, side: Side) -> Result<(), SessionError> {
        if side == self.side {
            return Ok(());
        }
        if side == Side::Back && self.back.is_none() {
            return Err(SessionError::MissingSide(Side::Back));
        }

        self.side = side;
        self.state.reset();
        self.last_points.clear();
        self.last_transfer = None;
        match side {
            Side::Front => self.front.evaluator.reset(),
            Side::Back => {
                if let Some(back) = self.back.as_mut() {
                    back.evaluator.reset();
                }
            }
        }
        info!("switched to {side} side measurement");
        Ok(())
    }

    /// Process one loop iteration. Returns `Ok(None)` when the source is
    /// exhausted or a stop was requested.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn step(&mut self) -> Result<Option<FrameReport>, SessionError> {
        if self.stop.load(Ordering::Relaxed) {
            info!("stop requested, ending measurement loop");
            return Ok(None);
        }

        if self.paused {
            return self.paused_report().map(Some);
        }

        let frame = loop {
            match self.source.grab() {
                Frame::Image(img) => break img,
                Frame::Timeout => {
                    if self.stop.load(Ordering::Relaxed) {
                        return Ok(None);
                    }
                }
                Frame::End => return Ok(None),
            }
        };

        // Throttle the expensive transfer; intermediate frames reuse the
        // previous result so rendering cadence can exceed transfer cadence.
        let now = Instant::now();
        let reuse = self
            .last_transfer
            .map(|t| now.duration_since(t) < self.transfer_interval)
            .unwrap_or(false)
            && !self.last_points.is_empty();

        let points = if reuse {
            self.last_points.clone()
        } else {
            let tracker = match self.side {
                Side::Front => &self.front.tracker,
                Side::Back => {
                    let Some(back) = self.back.as_ref() else {
                        return Err(SessionError::MissingSide(Side::Back));
                    };
                    &back.tracker
                }
            };
            let tracked = tracker.track(&frame.view(), &mut self.state);
            self.last_transfer = Some(now);
            tracked
        };

        let meta = SnapshotMeta {
            annotation_name: self.annotation_name.clone(),
            side: self.side,
            garment_color: self.garment_color,
        };
        let evaluator = match self.side {
            Side::Front => &mut self.front.evaluator,
            Side::Back => {
                let Some(back) = self.back.as_mut() else {
                    return Err(SessionError::MissingSide(Side::Back));
                };
                &mut back.evaluator
            }
        };

        let measurements = evaluator.evaluate(&points);
        let snapshot = build_snapshot(evaluator, &measurements, &self.specs, &meta);

        if let Some(writer) = &self.writer {
            if let Err(e) = writer.write(&snapshot) {
                warn!("failed to write live snapshot: {e}");
            }
        }

        self.last_points = points.clone();
        self.last_frame = Some(frame.clone());

        Ok(Some(FrameReport {
            frame,
            points,
            measurements,
            snapshot,
        }))
    }

    /// Run the loop to completion (source end or stop request).
    pub fn run(&mut self) -> Result<(), SessionError> {
        while self.step()?.is_some() {}
        Ok(())
    }

    /// While paused, keep serving the frozen frame and cached measurements
    /// without capturing or transferring.
    fn paused_report(&self) -> Result<FrameReport, SessionError> {
        let evaluator = &self.context().evaluator;
        let meta = SnapshotMeta {
            annotation_name: self.annotation_name.clone(),
            side: self.side,
            garment_color: self.garment_color,
        };
        let snapshot = build_snapshot(evaluator, &[], &self.specs, &meta);
        Ok(FrameReport {
            frame: self
                .last_frame
                .clone()
                .unwrap_or_else(|| GrayImage::new(0, 0)),
            points: self.last_points.clone(),
            measurements: Vec::new(),
            snapshot,
        })
    }

    fn context(&self) -> &SideContext {
        match self.side {
            Side::Front => &self.front,
            // The back context's presence is enforced whenever `side`
            // becomes `Back`.
            Side::Back => self.back.as_ref().unwrap_or(&self.front),
        }
    }
}
