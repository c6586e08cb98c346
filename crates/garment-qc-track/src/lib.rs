//! Keypoint transfer and measurement engine.
//!
//! Given an annotated reference image and live grayscale frames, this crate
//! re-locates every annotated point per frame (sparse feature transfer,
//! template/corner fallback, role-aware fusion with temporal stabilization)
//! and turns stabilized point pairs into centimeter measurements with
//! pass/fail QC.
//!
//! All per-session mutable data lives in an explicit [`TrackingState`] owned
//! by the caller's frame loop; the engine itself is immutable once built.

mod annotation;
mod calibration;
mod fusion;
mod measure;
mod snapshot;
mod state;
mod template;
mod tracker;
mod transfer;

pub use annotation::{AnnotationError, AnnotationSet, Role};
pub use calibration::{Calibration, CalibrationError};
pub use fusion::FusionParams;
pub use measure::{LiveMeasurement, MeasurementEvaluator};
pub use snapshot::{
    build_snapshot, GarmentColor, LiveSnapshot, MeasurementSpec, SnapshotEntry, SnapshotMeta,
    SnapshotWriter,
};
pub use state::TrackingState;
pub use template::{TemplateMatcher, TemplateParams};
pub use tracker::{KeypointTracker, TrackerParams};
pub use transfer::{TransferMethod, TransferParams, TransferResult};

use serde::{Deserialize, Serialize};

/// Which garment side a session is measuring. Switching sides resets all
/// tracking state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    Front,
    Back,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Front => write!(f, "front"),
            Side::Back => write!(f, "back"),
        }
    }
}
