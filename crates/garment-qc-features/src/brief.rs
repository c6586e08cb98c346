use std::sync::OnceLock;

use garment_qc_core::{GrayImageView, IntegralImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::fast::FeatureKeypoint;

/// Keypoints closer than this to an image edge cannot be described (test
/// pattern radius plus smoothing window).
pub const BRIEF_BORDER: i32 = 16;

const DESCRIPTOR_BYTES: usize = 32; // 256 bits
const PATTERN_RADIUS: i32 = 13;
const SMOOTH_HALF: i32 = 2; // 5x5 box smoothing via integral image
const PATTERN_SEED: u64 = 0x9e37_79b9;

/// 256-bit binary descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BinaryDescriptor(pub [u8; DESCRIPTOR_BYTES]);

impl BinaryDescriptor {
    #[inline]
    pub fn hamming(&self, other: &BinaryDescriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// The fixed intensity-comparison pattern: 256 point pairs inside a
/// (2*PATTERN_RADIUS+1)^2 patch, drawn once from a seeded RNG so every
/// image is described identically.
fn test_pattern() -> &'static [((i32, i32), (i32, i32)); 256] {
    static PATTERN: OnceLock<[((i32, i32), (i32, i32)); 256]> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let draw = |rng: &mut StdRng| {
            (
                rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
                rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
            )
        };
        std::array::from_fn(|_| (draw(&mut rng), draw(&mut rng)))
    })
}

#[inline]
fn smoothed(integral: &IntegralImage, x: i32, y: i32) -> f32 {
    integral.rect_mean(x - SMOOTH_HALF, y - SMOOTH_HALF, x + SMOOTH_HALF + 1, y + SMOOTH_HALF + 1)
}

/// Compute descriptors for the keypoints that fit inside the describable
/// border; keypoints too close to an edge are dropped. Returns surviving
/// keypoints with their descriptors, order-aligned.
pub fn compute_descriptors(
    img: &GrayImageView<'_>,
    keypoints: &[FeatureKeypoint],
) -> (Vec<FeatureKeypoint>, Vec<BinaryDescriptor>) {
    let (w, h) = (img.width as i32, img.height as i32);
    if w <= 2 * BRIEF_BORDER || h <= 2 * BRIEF_BORDER {
        return (Vec::new(), Vec::new());
    }

    let integral = IntegralImage::build(img);
    let pattern = test_pattern();

    let mut kept = Vec::with_capacity(keypoints.len());
    let mut descriptors = Vec::with_capacity(keypoints.len());

    for kp in keypoints {
        let cx = kp.position.x.round() as i32;
        let cy = kp.position.y.round() as i32;
        if cx < BRIEF_BORDER || cy < BRIEF_BORDER || cx >= w - BRIEF_BORDER || cy >= h - BRIEF_BORDER
        {
            continue;
        }

        let mut bytes = [0u8; DESCRIPTOR_BYTES];
        for (bit, &((px, py), (qx, qy))) in pattern.iter().enumerate() {
            let a = smoothed(&integral, cx + px, cy + py);
            let b = smoothed(&integral, cx + qx, cy + qy);
            if a < b {
                bytes[bit / 8] |= 1 << (bit % 8);
            }
        }

        kept.push(*kp);
        descriptors.push(BinaryDescriptor(bytes));
    }

    (kept, descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use garment_qc_core::GrayImage;
    use nalgebra::Point2;

    fn textured_image(offset: u8) -> GrayImage {
        let mut img = GrayImage::new(80, 80);
        for y in 0..80 {
            for x in 0..80 {
                let v = ((x * 7 + y * 13) % 200) as u8;
                img.set(x, y, v.saturating_add(offset));
            }
        }
        img
    }

    fn kp(x: f32, y: f32) -> FeatureKeypoint {
        FeatureKeypoint {
            position: Point2::new(x, y),
            response: 1.0,
            size: 7.0,
        }
    }

    #[test]
    fn identical_patches_give_zero_distance() {
        let img = textured_image(0);
        let (kept, descs) = compute_descriptors(&img.view(), &[kp(40.0, 40.0), kp(40.0, 40.0)]);
        assert_eq!(kept.len(), 2);
        assert_eq!(descs[0].hamming(&descs[1]), 0);
    }

    #[test]
    fn border_keypoints_are_dropped() {
        let img = textured_image(0);
        let (kept, descs) = compute_descriptors(&img.view(), &[kp(2.0, 2.0), kp(40.0, 40.0)]);
        assert_eq!(kept.len(), 1);
        assert_eq!(descs.len(), 1);
        assert_eq!(kept[0].position, Point2::new(40.0, 40.0));
    }

    #[test]
    fn descriptor_survives_brightness_shift() {
        // BRIEF compares intensities, so a global offset leaves most bits
        // unchanged.
        let a = textured_image(0);
        let b = textured_image(30);
        let (_, da) = compute_descriptors(&a.view(), &[kp(40.0, 40.0)]);
        let (_, db) = compute_descriptors(&b.view(), &[kp(40.0, 40.0)]);
        assert!(da[0].hamming(&db[0]) <= 16);
    }

    #[test]
    fn tiny_image_yields_nothing() {
        let img = GrayImage::new(20, 20);
        let (kept, descs) = compute_descriptors(&img.view(), &[kp(10.0, 10.0)]);
        assert!(kept.is_empty() && descs.is_empty());
    }
}
