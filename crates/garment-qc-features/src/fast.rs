use garment_qc_core::GrayImageView;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// A detected feature location with its corner response and nominal patch
/// size, both in the coordinate space of the image it was detected on.
#[derive(Clone, Copy, Debug)]
pub struct FeatureKeypoint {
    pub position: Point2<f32>,
    pub response: f32,
    pub size: f32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FastParams {
    /// Intensity difference a circle pixel must exceed to vote.
    pub threshold: u8,
    /// Keep at most this many keypoints, ranked by response. 0 = unbounded.
    pub max_keypoints: usize,
}

impl Default for FastParams {
    fn default() -> Self {
        Self {
            threshold: 20,
            max_keypoints: 3500,
        }
    }
}

/// Bresenham circle of radius 3 around the candidate pixel, clockwise from
/// 12 o'clock.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

const ARC_LENGTH: usize = 9;
const NOMINAL_SIZE: f32 = 7.0;

/// FAST-9 corner detection with 3x3 non-maximum suppression and a response
/// budget.
pub fn detect_fast(img: &GrayImageView<'_>, params: &FastParams) -> Vec<FeatureKeypoint> {
    let (w, h) = (img.width as i32, img.height as i32);
    if w < 7 || h < 7 {
        return Vec::new();
    }

    let mut scores = vec![0f32; img.width * img.height];
    let t = params.threshold as i16;

    for y in 3..h - 3 {
        for x in 3..w - 3 {
            let center = img.get(x as usize, y as usize) as i16;

            // Cardinal pre-test: a 9-long arc always covers at least 2 of
            // the 4 compass pixels on one side of the threshold.
            let compass = [
                img.get(x as usize, (y - 3) as usize) as i16,
                img.get((x + 3) as usize, y as usize) as i16,
                img.get(x as usize, (y + 3) as usize) as i16,
                img.get((x - 3) as usize, y as usize) as i16,
            ];
            let brighter = compass.iter().filter(|&&v| v > center + t).count();
            let darker = compass.iter().filter(|&&v| v < center - t).count();
            if brighter < 2 && darker < 2 {
                continue;
            }

            if let Some(score) = corner_score(img, x, y, center, t) {
                scores[y as usize * img.width + x as usize] = score;
            }
        }
    }

    // 3x3 non-maximum suppression.
    let mut keypoints = Vec::new();
    for y in 3..h - 3 {
        for x in 3..w - 3 {
            let s = scores[y as usize * img.width + x as usize];
            if s <= 0.0 {
                continue;
            }
            let mut is_max = true;
            'nms: for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let n = scores[(y + dy) as usize * img.width + (x + dx) as usize];
                    if n > s || (n == s && (dy < 0 || (dy == 0 && dx < 0))) {
                        is_max = false;
                        break 'nms;
                    }
                }
            }
            if is_max {
                keypoints.push(FeatureKeypoint {
                    position: Point2::new(x as f32, y as f32),
                    response: s,
                    size: NOMINAL_SIZE,
                });
            }
        }
    }

    if params.max_keypoints > 0 && keypoints.len() > params.max_keypoints {
        keypoints.sort_by(|a, b| {
            b.response
                .partial_cmp(&a.response)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        keypoints.truncate(params.max_keypoints);
    }

    keypoints
}

/// Segment test: a contiguous arc of at least 9 circle pixels all brighter
/// than center+t or all darker than center-t. Returns the corner response
/// (summed absolute contrast over threshold-passing pixels) when the test
/// holds.
fn corner_score(img: &GrayImageView<'_>, x: i32, y: i32, center: i16, t: i16) -> Option<f32> {
    let mut values = [0i16; 16];
    for (i, &(dx, dy)) in CIRCLE.iter().enumerate() {
        values[i] = img.get((x + dx) as usize, (y + dy) as usize) as i16;
    }

    let has_arc = |pred: &dyn Fn(i16) -> bool| -> bool {
        let mut run = 0usize;
        // Walk the circle twice to handle arcs wrapping the start index.
        for i in 0..32 {
            if pred(values[i % 16]) {
                run += 1;
                if run >= ARC_LENGTH {
                    return true;
                }
            } else {
                run = 0;
            }
        }
        false
    };

    let bright = |v: i16| v > center + t;
    let dark = |v: i16| v < center - t;

    if !has_arc(&bright) && !has_arc(&dark) {
        return None;
    }

    let score: i32 = values
        .iter()
        .map(|&v| {
            let d = (v - center).abs() as i32;
            if d > t as i32 {
                d - t as i32
            } else {
                0
            }
        })
        .sum();
    Some(score as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use garment_qc_core::GrayImage;

    /// White square on black background: corners of the square are FAST
    /// corners, edge midpoints are not.
    fn square_image() -> GrayImage {
        let mut img = GrayImage::new(64, 64);
        for y in 20..44 {
            for x in 20..44 {
                img.set(x, y, 255);
            }
        }
        img
    }

    #[test]
    fn detects_square_corners() {
        let img = square_image();
        let kps = detect_fast(&img.view(), &FastParams::default());
        assert!(!kps.is_empty());

        let near = |cx: f32, cy: f32| {
            kps.iter().any(|k| {
                (k.position.x - cx).abs() <= 2.0 && (k.position.y - cy).abs() <= 2.0
            })
        };
        assert!(near(20.0, 20.0), "missing top-left corner");
        assert!(near(43.0, 43.0), "missing bottom-right corner");
    }

    #[test]
    fn flat_image_has_no_corners() {
        let img = GrayImage::new(64, 64);
        let kps = detect_fast(&img.view(), &FastParams::default());
        assert!(kps.is_empty());
    }

    #[test]
    fn budget_limits_keypoint_count() {
        let img = square_image();
        let params = FastParams {
            threshold: 20,
            max_keypoints: 2,
        };
        let kps = detect_fast(&img.view(), &params);
        assert!(kps.len() <= 2);
    }

    #[test]
    fn tiny_image_is_rejected() {
        let img = GrayImage::new(5, 5);
        assert!(detect_fast(&img.view(), &FastParams::default()).is_empty());
    }
}
