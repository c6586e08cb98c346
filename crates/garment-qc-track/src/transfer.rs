use garment_qc_core::{estimate_homography_ransac, RansacParams};
use garment_qc_features::{match_descriptors, FeatureSet};
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::state::TrackingState;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TransferParams {
    /// Lowe ratio for descriptor matching.
    pub match_ratio: f32,
    /// Below this many good matches the engine reports no mapping at all.
    pub min_matches: usize,
    /// Homography is attempted only with at least this many matches.
    pub homography_min_matches: usize,
    pub ransac: RansacParams,
    /// Accepted |det H| band; outside it the homography is physically
    /// implausible and rejected.
    pub det_band: (f64, f64),
    /// Locally-weighted warp needs at least this many matches.
    pub local_min_matches: usize,
    /// Pairwise reference distances below this are too noisy for scale
    /// estimation.
    pub scale_noise_floor: f32,
    /// EMA factor for the smoothed scale estimate.
    pub scale_smoothing: f32,
}

impl Default for TransferParams {
    fn default() -> Self {
        Self {
            match_ratio: 0.75,
            min_matches: 15,
            homography_min_matches: 20,
            ransac: RansacParams::default(),
            det_band: (0.1, 10.0),
            local_min_matches: 4,
            scale_noise_floor: 10.0,
            scale_smoothing: 0.3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferMethod {
    Homography,
    LocalWarp,
}

/// Per-frame transfer output: one candidate (or none) per annotated
/// keypoint, plus the evidence the fusion stage needs to weigh it.
#[derive(Clone, Debug)]
pub struct TransferResult {
    pub points: Vec<Option<Point2<f32>>>,
    pub match_count: usize,
    pub method: Option<TransferMethod>,
}

impl TransferResult {
    pub fn no_mapping(len: usize, match_count: usize) -> Self {
        Self {
            points: vec![None; len],
            match_count,
            method: None,
        }
    }
}

/// Map every annotated keypoint from reference space into the current frame
/// using sparse feature correspondences.
///
/// Also refreshes `state.last_scale` whenever enough matches exist, so the
/// template fallback sees a current scale estimate even on frames where the
/// geometric transform fails.
pub fn transfer_keypoints(
    params: &TransferParams,
    annotated: &[Point2<f32>],
    reference: &FeatureSet,
    current: &FeatureSet,
    state: &mut TrackingState,
) -> TransferResult {
    if reference.is_empty() || current.is_empty() {
        return TransferResult::no_mapping(annotated.len(), 0);
    }

    let matches = match_descriptors(
        &reference.descriptors,
        &current.descriptors,
        params.match_ratio,
    );
    let match_count = matches.len();

    if match_count < params.min_matches {
        debug!("transfer: {match_count} matches below minimum, no mapping");
        return TransferResult::no_mapping(annotated.len(), match_count);
    }

    let src: Vec<Point2<f32>> = matches
        .iter()
        .map(|m| reference.keypoints[m.query].position)
        .collect();
    let dst: Vec<Point2<f32>> = matches
        .iter()
        .map(|m| current.keypoints[m.train].position)
        .collect();

    state.last_scale = estimate_scale(params, &src, &dst, state.last_scale);

    if match_count >= params.homography_min_matches {
        if let Some(points) = homography_transfer(params, annotated, &src, &dst) {
            return TransferResult {
                points,
                match_count,
                method: Some(TransferMethod::Homography),
            };
        }
    }

    if match_count >= params.local_min_matches {
        let points = local_warp_transfer(annotated, &src, &dst);
        return TransferResult {
            points,
            match_count,
            method: Some(TransferMethod::LocalWarp),
        };
    }

    TransferResult::no_mapping(annotated.len(), match_count)
}

fn homography_transfer(
    params: &TransferParams,
    annotated: &[Point2<f32>],
    src: &[Point2<f32>],
    dst: &[Point2<f32>],
) -> Option<Vec<Option<Point2<f32>>>> {
    let (h, _inliers) = estimate_homography_ransac(src, dst, &params.ransac)?;

    let det = h.determinant().abs();
    let (lo, hi) = params.det_band;
    if det <= lo || det >= hi {
        debug!("transfer: homography rejected, |det| = {det:.4} outside plausibility band");
        return None;
    }

    Some(annotated.iter().map(|&p| Some(h.apply(p))).collect())
}

/// Locally-weighted warp for non-rigid deformation: each annotated point is
/// the inverse-squared-distance weighted average of the matches' current
/// positions, weighted by proximity in reference space.
fn local_warp_transfer(
    annotated: &[Point2<f32>],
    src: &[Point2<f32>],
    dst: &[Point2<f32>],
) -> Vec<Option<Point2<f32>>> {
    const NEAR_WEIGHT: f32 = 1e6;

    annotated
        .iter()
        .map(|p| {
            let mut total = 0.0f32;
            let mut wx = 0.0f32;
            let mut wy = 0.0f32;
            for (s, d) in src.iter().zip(dst) {
                let dist_sq = (p - s).norm_squared();
                let w = if dist_sq < 1e-12 {
                    NEAR_WEIGHT
                } else {
                    (1.0 / dist_sq).min(NEAR_WEIGHT)
                };
                total += w;
                wx += w * d.x;
                wy += w * d.y;
            }
            (total > 0.0).then(|| Point2::new(wx / total, wy / total))
        })
        .collect()
}

/// Median of pairwise distance ratios (current / reference) over all match
/// pairs whose reference span exceeds the noise floor, EMA-smoothed against
/// the previous estimate.
fn estimate_scale(
    params: &TransferParams,
    src: &[Point2<f32>],
    dst: &[Point2<f32>],
    last_scale: f32,
) -> f32 {
    let mut ratios = Vec::new();
    for i in 0..src.len() {
        for j in (i + 1)..src.len() {
            let ref_dist = (src[i] - src[j]).norm();
            if ref_dist > params.scale_noise_floor {
                ratios.push((dst[i] - dst[j]).norm() / ref_dist);
            }
        }
    }

    if ratios.is_empty() {
        return last_scale;
    }

    ratios.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = ratios[ratios.len() / 2];

    last_scale * (1.0 - params.scale_smoothing) + median * params.scale_smoothing
}

#[cfg(test)]
mod tests {
    use super::*;
    use garment_qc_features::{BinaryDescriptor, FeatureKeypoint};

    fn kp(x: f32, y: f32) -> FeatureKeypoint {
        FeatureKeypoint {
            position: Point2::new(x, y),
            response: 1.0,
            size: 7.0,
        }
    }

    /// Synthetic feature set on a grid; each keypoint gets a unique
    /// descriptor so matching is exact and unambiguous.
    fn grid_set(offset_x: f32, offset_y: f32, spacing: f32, n: usize) -> FeatureSet {
        let mut set = FeatureSet::default();
        for i in 0..n {
            for j in 0..n {
                let idx = i * n + j;
                let mut bytes = [0u8; 32];
                bytes[idx % 32] = 1 << (idx / 32 % 8);
                bytes[(idx * 7 + 3) % 32] |= 1 << (idx % 8);
                set.keypoints.push(kp(
                    offset_x + j as f32 * spacing,
                    offset_y + i as f32 * spacing,
                ));
                set.descriptors.push(BinaryDescriptor(bytes));
            }
        }
        set
    }

    #[test]
    fn translation_is_recovered_via_homography() {
        let reference = grid_set(100.0, 100.0, 40.0, 5); // 25 keypoints
        let current = grid_set(130.0, 80.0, 40.0, 5);

        let annotated = vec![Point2::new(120.0, 140.0), Point2::new(260.0, 220.0)];
        let mut state = TrackingState::new();
        let result = transfer_keypoints(
            &TransferParams::default(),
            &annotated,
            &reference,
            &current,
            &mut state,
        );

        assert_eq!(result.method, Some(TransferMethod::Homography));
        let p0 = result.points[0].expect("mapped");
        assert!((p0.x - 150.0).abs() < 1.0, "x = {}", p0.x);
        assert!((p0.y - 120.0).abs() < 1.0, "y = {}", p0.y);
    }

    #[test]
    fn below_min_matches_reports_no_mapping() {
        let reference = grid_set(100.0, 100.0, 40.0, 3); // 9 keypoints < 15
        let current = grid_set(110.0, 100.0, 40.0, 3);

        let annotated = vec![Point2::new(120.0, 140.0)];
        let mut state = TrackingState::new();
        let result = transfer_keypoints(
            &TransferParams::default(),
            &annotated,
            &reference,
            &current,
            &mut state,
        );

        assert!(result.method.is_none());
        assert!(result.points.iter().all(|p| p.is_none()));
        assert_eq!(result.match_count, 9);
    }

    #[test]
    fn local_warp_used_when_homography_unavailable() {
        // 16 matches: above min_matches (15) but below the homography bar
        // (20), so only the local warp can run.
        let reference = grid_set(100.0, 100.0, 40.0, 4);
        let current = grid_set(120.0, 100.0, 40.0, 4);

        let annotated = vec![Point2::new(160.0, 160.0)];
        let mut state = TrackingState::new();
        let result = transfer_keypoints(
            &TransferParams::default(),
            &annotated,
            &reference,
            &current,
            &mut state,
        );

        assert_eq!(result.method, Some(TransferMethod::LocalWarp));
        let p = result.points[0].expect("mapped");
        assert!((p.x - 180.0).abs() < 2.0, "x = {}", p.x);
        assert!((p.y - 160.0).abs() < 2.0, "y = {}", p.y);
    }

    #[test]
    fn scale_estimate_is_smoothed() {
        // Current frame at 2x scale; the EMA must move toward 2.0 but not
        // jump there in one frame.
        let reference = grid_set(100.0, 100.0, 40.0, 5);
        let current = grid_set(100.0, 100.0, 80.0, 5);

        let annotated = vec![Point2::new(120.0, 140.0)];
        let mut state = TrackingState::new();
        transfer_keypoints(
            &TransferParams::default(),
            &annotated,
            &reference,
            &current,
            &mut state,
        );

        assert!((state.last_scale - 1.3).abs() < 0.01, "scale = {}", state.last_scale);
    }

    #[test]
    fn empty_feature_sets_yield_no_mapping() {
        let annotated = vec![Point2::new(0.0, 0.0)];
        let mut state = TrackingState::new();
        let result = transfer_keypoints(
            &TransferParams::default(),
            &annotated,
            &FeatureSet::default(),
            &FeatureSet::default(),
            &mut state,
        );
        assert!(result.points[0].is_none());
        assert_eq!(result.match_count, 0);
    }
}
