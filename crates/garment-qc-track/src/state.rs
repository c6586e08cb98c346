use std::collections::BTreeMap;

use nalgebra::Point2;

/// Per-session mutable tracking data, owned by the frame loop and passed
/// explicitly into each stage. Side switches and restarts replace the whole
/// value via [`TrackingState::reset`].
#[derive(Clone, Debug)]
pub struct TrackingState {
    /// Previous frame's stabilized positions, same cardinality as the
    /// annotation's keypoints once tracking has produced a frame.
    pub last_valid: Vec<Option<Point2<f32>>>,
    /// Display cue only: set after two consecutive all-points-valid frames.
    pub stabilized: bool,
    pub stable_frames: u32,
    /// Exponentially smoothed scale-change estimate, consumed by the
    /// template fallback.
    pub last_scale: f32,
    /// Frozen positions for perpendicular-role keypoints. Once an index is
    /// present, fusion must output exactly this coordinate for it.
    pub static_lock: BTreeMap<usize, Point2<f32>>,
    pub lock_initialized: bool,
}

impl Default for TrackingState {
    fn default() -> Self {
        Self {
            last_valid: Vec::new(),
            stabilized: false,
            stable_frames: 0,
            last_scale: 1.0,
            static_lock: BTreeMap::new(),
            lock_initialized: false,
        }
    }
}

impl TrackingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
