use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    #[inline]
    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        let v = self.h * Vector3::new(p.x as f64, p.y as f64, 1.0);
        let w = v[2];
        Point2::new((v[0] / w) as f32, (v[1] / w) as f32)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    /// Determinant of the h33-normalized matrix. Physically implausible
    /// solutions (extreme scale or reflection) fall outside (0.1, 10.0) in
    /// absolute value.
    pub fn determinant(&self) -> f64 {
        self.h.determinant()
    }
}

fn hartley_normalization(cx: f64, cy: f64, mean_dist: f64) -> Matrix3<f64> {
    let s = if mean_dist > 1e-12 {
        (2.0_f64).sqrt() / mean_dist
    } else {
        1.0
    };

    Matrix3::<f64>::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

fn normalize_points(pts: &[Point2<f32>]) -> (Vec<Point2<f64>>, Matrix3<f64>) {
    // Hartley normalization: translate to centroid, scale so mean distance = sqrt(2)
    let n = pts.len() as f64;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for p in pts {
        cx += p.x as f64;
        cy += p.y as f64;
    }
    cx /= n;
    cy /= n;

    let mut mean_dist = 0.0;
    for p in pts {
        let dx = p.x as f64 - cx;
        let dy = p.y as f64 - cy;
        mean_dist += (dx * dx + dy * dy).sqrt();
    }
    mean_dist /= n;

    let t = hartley_normalization(cx, cy, mean_dist);

    let mut out = Vec::with_capacity(pts.len());
    for p in pts {
        let v = t * Vector3::new(p.x as f64, p.y as f64, 1.0);
        out.push(Point2::new(v[0], v[1]));
    }
    (out, t)
}

fn normalize_homography(h: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let s = h[(2, 2)];
    if s.abs() < 1e-12 {
        return None;
    }
    Some(h / s)
}

fn denormalize_homography(
    hn: Matrix3<f64>,
    t_src: Matrix3<f64>,
    t_dst: Matrix3<f64>,
) -> Option<Matrix3<f64>> {
    let t_dst_inv = t_dst.try_inverse()?;
    Some(t_dst_inv * hn * t_src)
}

/// Estimate H such that: p_dst ~ H * p_src, by normalized DLT over all
/// correspondences. Needs at least 4 points.
pub fn estimate_homography(src_pts: &[Point2<f32>], dst_pts: &[Point2<f32>]) -> Option<Homography> {
    if src_pts.len() != dst_pts.len() || src_pts.len() < 4 {
        return None;
    }

    if src_pts.len() == 4 {
        let src: &[Point2<f32>; 4] = src_pts.try_into().ok()?;
        let dst: &[Point2<f32>; 4] = dst_pts.try_into().ok()?;
        return homography_from_4pt(src, dst);
    }

    let (s, ts) = normalize_points(src_pts);
    let (d, td) = normalize_points(dst_pts);

    // Build A (2N x 9)
    let n = src_pts.len();
    let rows = 2 * n;
    let mut a = DMatrix::<f64>::zeros(rows, 9);

    for k in 0..n {
        let x = s[k].x;
        let y = s[k].y;
        let u = d[k].x;
        let v = d[k].y;

        // [ -x -y -1   0  0  0   u*x u*y u ]
        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        // [ 0  0  0  -x -y -1   v*x v*y v ]
        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    // Solve Ah = 0 -> h is right singular vector with smallest singular value
    let svd = a.svd(true, true);
    let vt = svd.v_t?;
    let last = vt.nrows().checked_sub(1)?;
    let h = vt.row(last); // last row of V^T = last column of V

    let hn =
        Matrix3::<f64>::from_row_slice(&[h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]]);

    // Denormalize: H = Td^{-1} * Hn * Ts
    let h_den = denormalize_homography(hn, ts, td)?;
    let h_den = normalize_homography(h_den)?;

    Some(Homography::new(h_den))
}

/// Compute H such that: dst ~ H * src (projective), using exactly 4 point
/// correspondences. Corner order must be consistent between `src` and `dst`.
pub fn homography_from_4pt(src: &[Point2<f32>; 4], dst: &[Point2<f32>; 4]) -> Option<Homography> {
    // Unknowns: [h11 h12 h13 h21 h22 h23 h31 h32], with h33 = 1
    // For each correspondence (x,y)->(u,v):
    // h11 x + h12 y + h13 - u h31 x - u h32 y = u
    // h21 x + h22 y + h23 - v h31 x - v h32 y = v
    let (src_n, t_src) = normalize_points(src);
    let (dst_n, t_dst) = normalize_points(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for k in 0..4 {
        let x = src_n[k].x;
        let y = src_n[k].y;
        let u = dst_n[k].x;
        let v = dst_n[k].y;

        // row 2k
        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        // row 2k+1
        let r1 = 2 * k + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a.lu().solve(&b)?;

    let hn = Matrix3::<f64>::new(
        x[0], x[1], x[2], //
        x[3], x[4], x[5], //
        x[6], x[7], 1.0,
    );

    let h_den = denormalize_homography(hn, t_src, t_dst)?;
    let h_den = normalize_homography(h_den)?;

    Some(Homography::new(h_den))
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RansacParams {
    /// Maximum reprojection error (px) for a correspondence to count as an
    /// inlier.
    pub inlier_threshold: f32,
    pub iterations: usize,
    /// Minimum inliers for the consensus set to be accepted.
    pub min_inliers: usize,
    /// Seed for the sampling RNG; fixed so a given match set always yields
    /// the same model.
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            inlier_threshold: 5.0,
            iterations: 512,
            min_inliers: 8,
            seed: 0x6a72_11d3,
        }
    }
}

/// RANSAC homography: repeatedly fit a 4-point model on random minimal
/// samples, score by reprojection inliers, then refit on the best consensus
/// set with the full DLT.
pub fn estimate_homography_ransac(
    src_pts: &[Point2<f32>],
    dst_pts: &[Point2<f32>],
    params: &RansacParams,
) -> Option<(Homography, Vec<bool>)> {
    let n = src_pts.len();
    if n != dst_pts.len() || n < 4 {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let thresh_sq = params.inlier_threshold * params.inlier_threshold;

    let mut best_inliers: Vec<bool> = Vec::new();
    let mut best_count = 0usize;

    for _ in 0..params.iterations {
        let sample = sample_distinct4(&mut rng, n);
        let src = [
            src_pts[sample[0]],
            src_pts[sample[1]],
            src_pts[sample[2]],
            src_pts[sample[3]],
        ];
        let dst = [
            dst_pts[sample[0]],
            dst_pts[sample[1]],
            dst_pts[sample[2]],
            dst_pts[sample[3]],
        ];

        if sample_is_degenerate(&src) || sample_is_degenerate(&dst) {
            continue;
        }
        let Some(model) = homography_from_4pt(&src, &dst) else {
            continue;
        };

        let mut inliers = vec![false; n];
        let mut count = 0usize;
        for i in 0..n {
            let p = model.apply(src_pts[i]);
            let dx = p.x - dst_pts[i].x;
            let dy = p.y - dst_pts[i].y;
            if dx * dx + dy * dy <= thresh_sq {
                inliers[i] = true;
                count += 1;
            }
        }

        if count > best_count {
            best_count = count;
            best_inliers = inliers;
        }
    }

    if best_count < params.min_inliers.max(4) {
        return None;
    }

    let src_in: Vec<Point2<f32>> = src_pts
        .iter()
        .zip(&best_inliers)
        .filter_map(|(&p, &ok)| ok.then_some(p))
        .collect();
    let dst_in: Vec<Point2<f32>> = dst_pts
        .iter()
        .zip(&best_inliers)
        .filter_map(|(&p, &ok)| ok.then_some(p))
        .collect();

    let refined = estimate_homography(&src_in, &dst_in)?;
    Some((refined, best_inliers))
}

/// A minimal sample is unusable when any three of its points are (nearly)
/// collinear.
fn sample_is_degenerate(pts: &[Point2<f32>; 4]) -> bool {
    const MIN_TWICE_AREA: f32 = 1.0; // px^2
    for skip in 0..4 {
        let tri: Vec<&Point2<f32>> = pts
            .iter()
            .enumerate()
            .filter_map(|(i, p)| (i != skip).then_some(p))
            .collect();
        let twice_area = ((tri[1].x - tri[0].x) * (tri[2].y - tri[0].y)
            - (tri[2].x - tri[0].x) * (tri[1].y - tri[0].y))
            .abs();
        if twice_area < MIN_TWICE_AREA {
            return true;
        }
    }
    false
}

fn sample_distinct4(rng: &mut StdRng, n: usize) -> [usize; 4] {
    let mut out = [0usize; 4];
    let mut filled = 0;
    while filled < 4 {
        let idx = rng.gen_range(0..n);
        if !out[..filled].contains(&idx) {
            out[filled] = idx;
            filled += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point2<f32>, b: Point2<f32>, tol: f32) {
        let dx = (a.x - b.x).abs();
        let dy = (a.y - b.y).abs();
        assert!(
            dx < tol && dy < tol,
            "expected ({:.6},{:.6}) ~ ({:.6},{:.6}) within {}",
            a.x,
            a.y,
            b.x,
            b.y,
            tol
        );
    }

    fn ground_truth() -> Homography {
        Homography::new(Matrix3::new(
            0.9, 0.05, 40.0, //
            -0.03, 1.1, 25.0, //
            0.0004, -0.0002, 1.0,
        ))
    }

    #[test]
    fn inverse_round_trips_points() {
        let h = Homography::new(Matrix3::new(
            1.2, 0.1, 5.0, //
            -0.05, 0.9, 3.0, //
            0.001, 0.0005, 1.0,
        ));
        let inv = h.inverse().expect("invertible");

        for p in [
            Point2::new(0.0_f32, 0.0),
            Point2::new(50.0_f32, -20.0),
            Point2::new(320.0_f32, 200.0),
        ] {
            let q = h.apply(p);
            let back = inv.apply(q);
            assert_close(back, p, 1e-3);
        }
    }

    #[test]
    fn four_point_specialization_recovers_h() {
        let truth = ground_truth();
        let src = [
            Point2::new(0.0_f32, 0.0),
            Point2::new(180.0_f32, 0.0),
            Point2::new(180.0_f32, 130.0),
            Point2::new(0.0_f32, 130.0),
        ];
        let dst = src.map(|p| truth.apply(p));

        let recovered = homography_from_4pt(&src, &dst).expect("recoverable");

        for p in [
            Point2::new(0.0_f32, 0.0),
            Point2::new(60.0, 40.0),
            Point2::new(150.0, 120.0),
        ] {
            assert_close(recovered.apply(p), truth.apply(p), 1e-3);
        }
    }

    #[test]
    fn dlt_handles_overdetermined_case() {
        let truth = ground_truth();
        let src: Vec<Point2<f32>> = (0..4)
            .flat_map(|y| (0..4).map(move |x| Point2::new(x as f32 * 40.0, y as f32 * 50.0)))
            .collect();
        let dst: Vec<Point2<f32>> = src.iter().map(|&p| truth.apply(p)).collect();

        let estimated = estimate_homography(&src, &dst).expect("estimate");
        for p in [
            Point2::new(0.0_f32, 0.0),
            Point2::new(60.0, 40.0),
            Point2::new(80.0, 100.0),
        ] {
            assert_close(estimated.apply(p), truth.apply(p), 1e-3);
        }
    }

    #[test]
    fn mismatched_input_lengths_fail() {
        let src = [Point2::new(0.0_f32, 0.0); 4];
        let dst = [Point2::new(1.0_f32, 1.0); 3];
        assert!(estimate_homography(&src, &dst).is_none());
    }

    #[test]
    fn ransac_survives_outliers() {
        let truth = ground_truth();
        let mut src: Vec<Point2<f32>> = (0..6)
            .flat_map(|y| (0..6).map(move |x| Point2::new(x as f32 * 30.0, y as f32 * 30.0)))
            .collect();
        let mut dst: Vec<Point2<f32>> = src.iter().map(|&p| truth.apply(p)).collect();

        // Corrupt a quarter of the correspondences.
        for i in (0..src.len()).step_by(4) {
            dst[i] = Point2::new(dst[i].x + 200.0, dst[i].y - 150.0);
        }
        src.truncate(36);
        dst.truncate(36);

        let (model, inliers) =
            estimate_homography_ransac(&src, &dst, &RansacParams::default()).expect("model");

        let inlier_count = inliers.iter().filter(|&&b| b).count();
        assert!(inlier_count >= 24, "too few inliers: {inlier_count}");

        for p in [Point2::new(15.0_f32, 15.0), Point2::new(120.0, 90.0)] {
            assert_close(model.apply(p), truth.apply(p), 0.5);
        }
    }

    #[test]
    fn ransac_rejects_degenerate_input() {
        // All points collinear: no valid model should survive.
        let src: Vec<Point2<f32>> = (0..10).map(|i| Point2::new(i as f32, 0.0)).collect();
        let dst = src.clone();
        assert!(estimate_homography_ransac(&src, &dst, &RansacParams::default()).is_none());
    }
}
