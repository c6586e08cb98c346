use log::{debug, info};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use crate::annotation::Role;
use crate::state::TrackingState;
use crate::transfer::TransferResult;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FusionParams {
    /// Transfer and template candidates closer than this blend; farther
    /// apart, the more trustworthy method wins outright.
    pub blend_distance: f32,
    /// Transfer-engine blend weight when the minimum-match bar was met.
    pub feature_weight_strong: f32,
    /// Transfer-engine blend weight when it was not.
    pub feature_weight_weak: f32,
    /// Per-frame displacement below this is accepted as-is.
    pub jitter_threshold: f32,
    /// Another keypoint counts as "moving" above this displacement.
    pub coordinated_min_motion: f32,
    /// Minimum number of other moving keypoints required as evidence of
    /// genuine garment motion.
    pub coordinated_min_points: usize,
    /// Mean cosine similarity of displacement vectors required to accept a
    /// large displacement.
    pub coordinated_cosine: f32,
    /// Structural minimum keypoint count before the static-lock map may be
    /// initialized.
    pub lock_min_keypoints: usize,
    /// Consecutive all-valid frames before the session counts as
    /// stabilized (display cue only).
    pub stable_frames_required: u32,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            blend_distance: 25.0,
            feature_weight_strong: 0.7,
            feature_weight_weak: 0.4,
            jitter_threshold: 17.0,
            coordinated_min_motion: 5.0,
            coordinated_min_points: 2,
            coordinated_cosine: 0.7,
            lock_min_keypoints: 18,
            stable_frames_required: 2,
        }
    }
}

/// Merge per-method candidates into one position per keypoint according to
/// its role. `feature_trusted` reflects whether the transfer engine met its
/// minimum-match bar this frame.
pub fn fuse_by_role(
    params: &FusionParams,
    roles: &[Role],
    transfer: &TransferResult,
    template: &[Option<Point2<f32>>],
    corner: &[Option<Point2<f32>>],
    feature_trusted: bool,
    state: &TrackingState,
) -> Vec<Option<Point2<f32>>> {
    let get = |v: &[Option<Point2<f32>>], i: usize| v.get(i).copied().flatten();

    roles
        .iter()
        .enumerate()
        .map(|(i, &role)| {
            let feat = get(&transfer.points, i);
            let tmpl = get(template, i);

            match role {
                Role::Corner => get(corner, i).or(feat).or(tmpl),
                Role::Perpendicular => {
                    // Locked wins unconditionally; until the lock exists the
                    // point is fused like a normal one.
                    if let Some(&locked) = state.static_lock.get(&i) {
                        Some(locked)
                    } else {
                        fuse_normal(params, feat, tmpl, feature_trusted)
                    }
                }
                Role::Normal => fuse_normal(params, feat, tmpl, feature_trusted),
            }
        })
        .collect()
}

fn fuse_normal(
    params: &FusionParams,
    feat: Option<Point2<f32>>,
    tmpl: Option<Point2<f32>>,
    feature_trusted: bool,
) -> Option<Point2<f32>> {
    match (feat, tmpl) {
        (Some(f), Some(t)) => {
            if (f - t).norm() < params.blend_distance {
                let wf = if feature_trusted {
                    params.feature_weight_strong
                } else {
                    params.feature_weight_weak
                };
                let wt = 1.0 - wf;
                Some(Point2::new(f.x * wf + t.x * wt, f.y * wf + t.y * wt))
            } else if feature_trusted {
                Some(f)
            } else {
                Some(t)
            }
        }
        (Some(f), None) => Some(f),
        (None, Some(t)) => Some(t),
        (None, None) => None,
    }
}

/// Temporal smoothing: invalid points fall back to the previous frame's
/// value; large displacements are accepted only with coordinated-motion
/// evidence from other keypoints. Updates `last_valid` and the stability
/// counter in place.
pub fn stabilize(
    params: &FusionParams,
    state: &mut TrackingState,
    mut fused: Vec<Option<Point2<f32>>>,
) -> Vec<Option<Point2<f32>>> {
    if state.last_valid.len() != fused.len() {
        // First frame (or cardinality change on reset): accept as-is.
        state.last_valid = fused.clone();
        return fused;
    }

    // Locked indices pass through unchanged whatever the candidates said.
    for (&idx, &locked) in &state.static_lock {
        if idx < fused.len() {
            fused[idx] = Some(locked);
        }
    }

    let previous = state.last_valid.clone();
    let mut out = Vec::with_capacity(fused.len());
    let mut valid_count = 0usize;

    for (i, (&new, &last)) in fused.iter().zip(&previous).enumerate() {
        let accepted = match (new, last) {
            (None, _) => None,
            (Some(p), _) if state.static_lock.contains_key(&i) => {
                valid_count += 1;
                Some(p)
            }
            (Some(p), None) => {
                valid_count += 1;
                Some(p)
            }
            (Some(p), Some(prev)) => {
                let displacement = (p - prev).norm();
                if displacement < params.jitter_threshold
                    || is_coordinated_movement(params, &fused, &previous, i)
                {
                    valid_count += 1;
                    Some(p)
                } else {
                    debug!(
                        "keypoint {i}: {displacement:.1} px jump held (no coordinated motion)"
                    );
                    None
                }
            }
        };

        match accepted {
            Some(p) => out.push(Some(p)),
            None => out.push(last),
        }
    }

    state.last_valid = out.clone();

    if valid_count == fused.len() {
        state.stable_frames += 1;
        if state.stable_frames >= params.stable_frames_required {
            state.stabilized = true;
        }
    } else {
        state.stable_frames = 0;
        state.stabilized = false;
    }

    out
}

/// A large single-point displacement is genuine garment motion only when at
/// least `coordinated_min_points` *other* keypoints moved in a consistent
/// direction.
fn is_coordinated_movement(
    params: &FusionParams,
    new: &[Option<Point2<f32>>],
    previous: &[Option<Point2<f32>>],
    changed_index: usize,
) -> bool {
    let mut displacements: Vec<Vector2<f32>> = Vec::new();

    for (i, (n, p)) in new.iter().zip(previous).enumerate() {
        if i == changed_index {
            continue;
        }
        if let (Some(n), Some(p)) = (n, p) {
            let d = n - p;
            if d.norm() > params.coordinated_min_motion {
                displacements.push(d);
            }
        }
    }

    if displacements.len() < params.coordinated_min_points {
        return false;
    }

    let mean = displacements
        .iter()
        .fold(Vector2::zeros(), |acc, d| acc + d)
        / displacements.len() as f32;
    let mean_norm = mean.norm();
    if mean_norm < 1e-6 {
        return false;
    }

    let consistency: f32 = displacements
        .iter()
        .map(|d| {
            let n = d.norm();
            if n > 0.0 {
                d.dot(&mean) / (n * mean_norm)
            } else {
                0.0
            }
        })
        .sum::<f32>()
        / displacements.len() as f32;

    consistency > params.coordinated_cosine
}

/// One-time static-lock initialization: freeze every perpendicular-role
/// keypoint's current position once all of them are simultaneously valid
/// (and the annotation is structurally large enough).
pub fn try_initialize_lock(
    params: &FusionParams,
    state: &mut TrackingState,
    roles: &[Role],
    stabilized: &[Option<Point2<f32>>],
) {
    if state.lock_initialized || stabilized.len() < params.lock_min_keypoints {
        return;
    }

    let perp_indices: Vec<usize> = roles
        .iter()
        .enumerate()
        .filter_map(|(i, &r)| (r == Role::Perpendicular).then_some(i))
        .collect();
    if perp_indices.is_empty() {
        return;
    }

    let mut frozen = Vec::with_capacity(perp_indices.len());
    for &idx in &perp_indices {
        match stabilized.get(idx).copied().flatten() {
            Some(p) => frozen.push((idx, p)),
            None => return, // not all valid yet; retry next frame
        }
    }

    for (idx, p) in frozen {
        state.static_lock.insert(idx, p);
    }
    state.lock_initialized = true;
    info!("perpendicular keypoints now static: {perp_indices:?}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferResult;

    fn pt(x: f32, y: f32) -> Option<Point2<f32>> {
        Some(Point2::new(x, y))
    }

    fn transfer_with(points: Vec<Option<Point2<f32>>>) -> TransferResult {
        TransferResult {
            points,
            match_count: 20,
            method: None,
        }
    }

    #[test]
    fn corner_prefers_corner_chain_then_transfer_then_template() {
        let params = FusionParams::default();
        let roles = [Role::Corner];
        let state = TrackingState::new();

        let fused = fuse_by_role(
            &params,
            &roles,
            &transfer_with(vec![pt(10.0, 10.0)]),
            &[pt(20.0, 20.0)],
            &[pt(30.0, 30.0)],
            true,
            &state,
        );
        assert_eq!(fused[0], pt(30.0, 30.0));

        let fused = fuse_by_role(
            &params,
            &roles,
            &transfer_with(vec![pt(10.0, 10.0)]),
            &[pt(20.0, 20.0)],
            &[None],
            true,
            &state,
        );
        assert_eq!(fused[0], pt(10.0, 10.0));

        let fused = fuse_by_role(
            &params,
            &roles,
            &transfer_with(vec![None]),
            &[pt(20.0, 20.0)],
            &[None],
            true,
            &state,
        );
        assert_eq!(fused[0], pt(20.0, 20.0));
    }

    #[test]
    fn normal_blends_close_candidates_by_trust() {
        let params = FusionParams::default();
        let roles = [Role::Normal];
        let state = TrackingState::new();

        // 10 px apart: blended 0.7/0.3 when the match bar was met.
        let fused = fuse_by_role(
            &params,
            &roles,
            &transfer_with(vec![pt(100.0, 0.0)]),
            &[pt(110.0, 0.0)],
            &[None],
            true,
            &state,
        );
        let p = fused[0].expect("blended");
        assert!((p.x - 103.0).abs() < 1e-3);

        // Same candidates with an untrusted transfer: weaker 0.4/0.6 blend.
        let fused = fuse_by_role(
            &params,
            &roles,
            &transfer_with(vec![pt(100.0, 0.0)]),
            &[pt(110.0, 0.0)],
            &[None],
            false,
            &state,
        );
        let p = fused[0].expect("blended");
        assert!((p.x - 106.0).abs() < 1e-3);
    }

    #[test]
    fn normal_disagreement_picks_trusted_method() {
        let params = FusionParams::default();
        let roles = [Role::Normal];
        let state = TrackingState::new();

        // 50 px apart: beyond blending; trusted transfer wins.
        let fused = fuse_by_role(
            &params,
            &roles,
            &transfer_with(vec![pt(100.0, 0.0)]),
            &[pt(150.0, 0.0)],
            &[None],
            true,
            &state,
        );
        assert_eq!(fused[0], pt(100.0, 0.0));

        let fused = fuse_by_role(
            &params,
            &roles,
            &transfer_with(vec![pt(100.0, 0.0)]),
            &[pt(150.0, 0.0)],
            &[None],
            false,
            &state,
        );
        assert_eq!(fused[0], pt(150.0, 0.0));
    }

    #[test]
    fn locked_perpendicular_ignores_all_candidates() {
        let params = FusionParams::default();
        let roles = [Role::Perpendicular];
        let mut state = TrackingState::new();
        state.static_lock.insert(0, Point2::new(42.0, 24.0));
        state.lock_initialized = true;

        // Adversarial candidates everywhere: the locked value must win.
        let fused = fuse_by_role(
            &params,
            &roles,
            &transfer_with(vec![pt(-500.0, 900.0)]),
            &[pt(1.0, 1.0)],
            &[pt(7.0, 7.0)],
            true,
            &state,
        );
        assert_eq!(fused[0], pt(42.0, 24.0));
    }

    #[test]
    fn small_displacement_passes_through() {
        let params = FusionParams::default();
        let mut state = TrackingState::new();

        let frame1 = vec![pt(100.0, 100.0), pt(200.0, 200.0)];
        stabilize(&params, &mut state, frame1);

        // 10 px < 17 px jitter threshold.
        let frame2 = vec![pt(110.0, 100.0), pt(200.0, 200.0)];
        let out = stabilize(&params, &mut state, frame2);
        assert_eq!(out[0], pt(110.0, 100.0));
    }

    #[test]
    fn lone_spike_is_held() {
        let params = FusionParams::default();
        let mut state = TrackingState::new();

        let frame1 = vec![pt(100.0, 100.0), pt(200.0, 200.0), pt(300.0, 300.0)];
        stabilize(&params, &mut state, frame1);

        // One point jumps 60 px while everything else stays put: no
        // coordinated-motion evidence, so the previous value is held.
        let frame2 = vec![pt(160.0, 100.0), pt(200.0, 200.0), pt(300.0, 300.0)];
        let out = stabilize(&params, &mut state, frame2);
        assert_eq!(out[0], pt(100.0, 100.0));
    }

    #[test]
    fn coordinated_motion_is_accepted() {
        let params = FusionParams::default();
        let mut state = TrackingState::new();

        let frame1 = vec![pt(100.0, 100.0), pt(200.0, 200.0), pt(300.0, 300.0)];
        stabilize(&params, &mut state, frame1);

        // The whole garment shifts +40 px in x: two other moving points
        // agree in direction, so the jump is genuine.
        let frame2 = vec![pt(140.0, 100.0), pt(240.0, 200.0), pt(340.0, 300.0)];
        let out = stabilize(&params, &mut state, frame2);
        assert_eq!(out[0], pt(140.0, 100.0));
        assert_eq!(out[1], pt(240.0, 200.0));
        assert_eq!(out[2], pt(340.0, 300.0));
    }

    #[test]
    fn invalid_point_reuses_previous_value() {
        let params = FusionParams::default();
        let mut state = TrackingState::new();

        let frame1 = vec![pt(100.0, 100.0), pt(200.0, 200.0)];
        stabilize(&params, &mut state, frame1);

        let frame2 = vec![None, pt(200.0, 200.0)];
        let out = stabilize(&params, &mut state, frame2);
        assert_eq!(out[0], pt(100.0, 100.0));
    }

    #[test]
    fn stability_counter_needs_two_consecutive_valid_frames() {
        let params = FusionParams::default();
        let mut state = TrackingState::new();

        stabilize(&params, &mut state, vec![pt(1.0, 1.0)]);
        assert!(!state.stabilized); // first frame only seeds last_valid

        stabilize(&params, &mut state, vec![pt(2.0, 2.0)]);
        assert!(!state.stabilized);

        stabilize(&params, &mut state, vec![pt(3.0, 3.0)]);
        assert!(state.stabilized);

        stabilize(&params, &mut state, vec![None]);
        assert!(!state.stabilized);
        assert_eq!(state.stable_frames, 0);
    }

    #[test]
    fn lock_initializes_once_when_all_perp_valid() {
        let params = FusionParams::default();
        let mut state = TrackingState::new();

        let mut roles = vec![Role::Normal; 18];
        for role in roles.iter_mut().take(18).skip(12) {
            *role = Role::Perpendicular;
        }

        // Frame with index 13 invalid: no lock yet.
        let mut points: Vec<Option<Point2<f32>>> =
            (0..18).map(|i| pt(i as f32 * 10.0, 5.0)).collect();
        points[13] = None;
        try_initialize_lock(&params, &mut state, &roles, &points);
        assert!(!state.lock_initialized);
        assert!(state.static_lock.is_empty());

        // All perpendicular indices valid: freeze them.
        let points: Vec<Option<Point2<f32>>> =
            (0..18).map(|i| pt(i as f32 * 10.0, 5.0)).collect();
        try_initialize_lock(&params, &mut state, &roles, &points);
        assert!(state.lock_initialized);
        assert_eq!(state.static_lock.len(), 6);
        assert_eq!(state.static_lock[&12], Point2::new(120.0, 5.0));

        // A later frame cannot re-freeze different values.
        let moved: Vec<Option<Point2<f32>>> =
            (0..18).map(|i| pt(i as f32 * 10.0 + 99.0, 5.0)).collect();
        try_initialize_lock(&params, &mut state, &roles, &moved);
        assert_eq!(state.static_lock[&12], Point2::new(120.0, 5.0));
    }

    #[test]
    fn too_few_keypoints_never_lock() {
        let params = FusionParams::default();
        let mut state = TrackingState::new();
        let roles = vec![Role::Perpendicular; 4];
        let points: Vec<Option<Point2<f32>>> = (0..4).map(|i| pt(i as f32, 0.0)).collect();
        try_initialize_lock(&params, &mut state, &roles, &points);
        assert!(!state.lock_initialized);
    }
}
