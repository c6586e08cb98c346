use garment_qc_core::{GrayImage, GrayImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TemplateParams {
    /// Patch side (px, at scale 1) cropped around each reference keypoint.
    pub roi_size: usize,
    /// Minimum normalized correlation to accept a generic match.
    pub match_threshold: f32,
    /// Search window half-extent as a multiple of the patch side.
    pub search_multiplier: f32,
    /// Larger patch for corner-role keypoints.
    pub corner_roi_size: usize,
    pub corner_threshold: f32,
    pub corner_search_multiplier: f32,
    /// Side of the window used by the corner-detection fallbacks.
    pub corner_window: usize,
    /// Harris response floor for the last-resort fallback.
    pub harris_min_response: f32,
    pub harris_k: f32,
}

impl Default for TemplateParams {
    fn default() -> Self {
        Self {
            roi_size: 85,
            match_threshold: 0.70,
            search_multiplier: 2.0,
            corner_roi_size: 150,
            corner_threshold: 0.6,
            corner_search_multiplier: 2.5,
            corner_window: 150,
            harris_min_response: 0.01,
            harris_k: 0.04,
        }
    }
}

const MIN_TEMPLATE_SIDE: i32 = 10;
const MIN_CORNER_TEMPLATE_SIDE: i32 = 20;
const MIN_CORNER_WINDOW_SIDE: i32 = 50;

#[derive(Clone, Copy)]
enum MatchMetric {
    /// Zero-mean normalized cross-correlation (robust to brightness shift).
    ZeroMeanNcc,
    /// Plain normalized cross-correlation.
    Ncc,
}

/// Re-locates keypoints independently of sparse features by correlating
/// reference patches against a search window in the current frame. Corner
/// keypoints get a specialized chain: template match, then Shi-Tomasi, then
/// a Harris response maximum.
#[derive(Clone, Debug)]
pub struct TemplateMatcher {
    params: TemplateParams,
}

impl TemplateMatcher {
    pub fn new(params: TemplateParams) -> Self {
        Self { params }
    }

    /// Generic template match for one keypoint. `scale` is the smoothed
    /// scale-change estimate from the transfer engine.
    pub fn match_point(
        &self,
        reference: &GrayImageView<'_>,
        current: &GrayImageView<'_>,
        keypoint: Point2<f32>,
        scale: f32,
    ) -> Option<Point2<f32>> {
        self.correlate(
            reference,
            current,
            keypoint,
            scale,
            self.params.roi_size,
            self.params.search_multiplier,
            MIN_TEMPLATE_SIDE,
            self.params.match_threshold,
            &[MatchMetric::ZeroMeanNcc],
        )
    }

    /// Corner chain: template match with a larger patch and two correlation
    /// metrics, then Shi-Tomasi, then Harris. Earlier methods win.
    pub fn match_corner(
        &self,
        reference: &GrayImageView<'_>,
        current: &GrayImageView<'_>,
        keypoint: Point2<f32>,
        scale: f32,
    ) -> Option<Point2<f32>> {
        self.correlate(
            reference,
            current,
            keypoint,
            scale,
            self.params.corner_roi_size,
            self.params.corner_search_multiplier,
            MIN_CORNER_TEMPLATE_SIDE,
            self.params.corner_threshold,
            &[MatchMetric::ZeroMeanNcc, MatchMetric::Ncc],
        )
        .or_else(|| self.shi_tomasi_search(current, keypoint, scale))
        .or_else(|| self.harris_search(current, keypoint, scale))
    }

    #[allow(clippy::too_many_arguments)]
    fn correlate(
        &self,
        reference: &GrayImageView<'_>,
        current: &GrayImageView<'_>,
        keypoint: Point2<f32>,
        scale: f32,
        roi_size: usize,
        search_multiplier: f32,
        min_side: i32,
        threshold: f32,
        metrics: &[MatchMetric],
    ) -> Option<Point2<f32>> {
        let x = keypoint.x.round() as i32;
        let y = keypoint.y.round() as i32;
        let template_size = (roi_size as f32 * scale) as i32;
        let half = template_size / 2;

        let template = clamped_crop(reference, x - half, y - half, x + half, y + half, min_side)?;

        let search_half = (template_size as f32 * search_multiplier * scale) as i32;
        let ex = (keypoint.x * scale).round() as i32;
        let ey = (keypoint.y * scale).round() as i32;
        let rx0 = (ex - search_half).max(0);
        let ry0 = (ey - search_half).max(0);
        let region = clamped_crop(
            current,
            ex - search_half,
            ey - search_half,
            ex + search_half,
            ey + search_half,
            1,
        )?;
        if region.width < template.width || region.height < template.height {
            return None;
        }

        let mut best: Option<(usize, usize, f32)> = None;
        for &metric in metrics {
            if let Some((bx, by, score)) = best_correlation(&region, &template, metric) {
                if best.map(|(_, _, s)| score > s).unwrap_or(true) {
                    best = Some((bx, by, score));
                }
            }
        }

        let (bx, by, score) = best?;
        if score <= threshold {
            return None;
        }
        Some(Point2::new(
            (rx0 + bx as i32 + template.width as i32 / 2) as f32,
            (ry0 + by as i32 + template.height as i32 / 2) as f32,
        ))
    }

    fn corner_search_region(
        &self,
        current: &GrayImageView<'_>,
        keypoint: Point2<f32>,
        scale: f32,
    ) -> Option<(GrayImage, i32, i32)> {
        let cx = (keypoint.x * scale).round() as i32;
        let cy = (keypoint.y * scale).round() as i32;
        let half = ((self.params.corner_window as f32 * scale) as i32) / 2;
        let rx0 = (cx - half).max(0);
        let ry0 = (cy - half).max(0);
        let region = clamped_crop(
            current,
            cx - half,
            cy - half,
            cx + half,
            cy + half,
            MIN_CORNER_WINDOW_SIDE,
        )?;
        Some((region, rx0, ry0))
    }

    fn shi_tomasi_search(
        &self,
        current: &GrayImageView<'_>,
        keypoint: Point2<f32>,
        scale: f32,
    ) -> Option<Point2<f32>> {
        let (region, rx0, ry0) = self.corner_search_region(current, keypoint, scale)?;
        let (x, y, response) = strongest_response(&region, |a, b, c| {
            // Minimum eigenvalue of the structure tensor [[a, b], [b, c]].
            let half_trace = 0.5 * (a + c);
            let radius = (0.25 * (a - c) * (a - c) + b * b).sqrt();
            half_trace - radius
        })?;
        (response > 1e-6).then(|| Point2::new((rx0 + x as i32) as f32, (ry0 + y as i32) as f32))
    }

    fn harris_search(
        &self,
        current: &GrayImageView<'_>,
        keypoint: Point2<f32>,
        scale: f32,
    ) -> Option<Point2<f32>> {
        let (region, rx0, ry0) = self.corner_search_region(current, keypoint, scale)?;
        let k = self.params.harris_k;
        let (x, y, response) =
            strongest_response(&region, |a, b, c| (a * c - b * b) - k * (a + c) * (a + c))?;
        (response > self.params.harris_min_response)
            .then(|| Point2::new((rx0 + x as i32) as f32, (ry0 + y as i32) as f32))
    }
}

/// Crop with the window shrinking (not sliding) at image borders; rejects
/// windows smaller than `min_side` on either axis.
fn clamped_crop(
    src: &GrayImageView<'_>,
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
    min_side: i32,
) -> Option<GrayImage> {
    let cx0 = x0.max(0);
    let cy0 = y0.max(0);
    let cx1 = x1.min(src.width as i32);
    let cy1 = y1.min(src.height as i32);
    if cx1 - cx0 < min_side || cy1 - cy0 < min_side {
        return None;
    }
    src.crop(cx0, cy0, (cx1 - cx0) as usize, (cy1 - cy0) as usize)
}

/// Exhaustive correlation of `template` over every placement inside
/// `region`; returns the best top-left offset and score.
fn best_correlation(
    region: &GrayImage,
    template: &GrayImage,
    metric: MatchMetric,
) -> Option<(usize, usize, f32)> {
    let (tw, th) = (template.width, template.height);
    let (rw, rh) = (region.width, region.height);
    if rw < tw || rh < th || tw == 0 || th == 0 {
        return None;
    }

    let n = (tw * th) as f32;
    let t_sum: f32 = template.data.iter().map(|&v| v as f32).sum();
    let t_sq_sum: f32 = template.data.iter().map(|&v| (v as f32) * (v as f32)).sum();
    let t_mean = t_sum / n;
    let t_centered_norm_sq = (t_sq_sum - n * t_mean * t_mean).max(0.0);

    // A flat template correlates with nothing.
    let template_norm = match metric {
        MatchMetric::ZeroMeanNcc => t_centered_norm_sq,
        MatchMetric::Ncc => t_sq_sum,
    };
    if template_norm < 1e-6 {
        return None;
    }

    let mut best: Option<(usize, usize, f32)> = None;

    for oy in 0..=(rh - th) {
        for ox in 0..=(rw - tw) {
            let mut s_w = 0.0f32;
            let mut s_ww = 0.0f32;
            let mut s_tw = 0.0f32;
            for ty in 0..th {
                let r_row = (oy + ty) * rw + ox;
                let t_row = ty * tw;
                for tx in 0..tw {
                    let w = region.data[r_row + tx] as f32;
                    let t = template.data[t_row + tx] as f32;
                    s_w += w;
                    s_ww += w * w;
                    s_tw += t * w;
                }
            }

            let score = match metric {
                MatchMetric::ZeroMeanNcc => {
                    let w_mean = s_w / n;
                    let w_norm_sq = (s_ww - n * w_mean * w_mean).max(0.0);
                    let denom = (t_centered_norm_sq * w_norm_sq).sqrt();
                    if denom < 1e-6 {
                        continue;
                    }
                    (s_tw - t_mean * s_w) / denom
                }
                MatchMetric::Ncc => {
                    let denom = (t_sq_sum * s_ww).sqrt();
                    if denom < 1e-6 {
                        continue;
                    }
                    s_tw / denom
                }
            };

            if best.map(|(_, _, s)| score > s).unwrap_or(true) {
                best = Some((ox, oy, score));
            }
        }
    }

    best
}

/// Scan a corner-response functional of the 3x3-windowed structure tensor
/// over the region interior and return the strongest location.
fn strongest_response(
    region: &GrayImage,
    response: impl Fn(f32, f32, f32) -> f32,
) -> Option<(usize, usize, f32)> {
    let (w, h) = (region.width, region.height);
    if w < 5 || h < 5 {
        return None;
    }

    // Central-difference gradients on [0,1] intensities.
    let at = |x: usize, y: usize| region.data[y * w + x] as f32 / 255.0;
    let mut ixx = vec![0.0f32; w * h];
    let mut iyy = vec![0.0f32; w * h];
    let mut ixy = vec![0.0f32; w * h];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = 0.5 * (at(x + 1, y) - at(x - 1, y));
            let gy = 0.5 * (at(x, y + 1) - at(x, y - 1));
            ixx[y * w + x] = gx * gx;
            iyy[y * w + x] = gy * gy;
            ixy[y * w + x] = gx * gy;
        }
    }

    let mut best: Option<(usize, usize, f32)> = None;
    for y in 2..h - 2 {
        for x in 2..w - 2 {
            let mut a = 0.0f32;
            let mut c = 0.0f32;
            let mut b = 0.0f32;
            for dy in 0..3 {
                for dx in 0..3 {
                    let idx = (y + dy - 1) * w + (x + dx - 1);
                    a += ixx[idx];
                    c += iyy[idx];
                    b += ixy[idx];
                }
            }
            let r = response(a, b, c);
            if best.map(|(_, _, s)| r > s).unwrap_or(true) {
                best = Some((x, y, r));
            }
        }
    }
    best
}
