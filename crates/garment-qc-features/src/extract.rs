use garment_qc_core::{downscale_factor_to_cap, resample_bilinear, GrayImageView};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::brief::{compute_descriptors, BinaryDescriptor};
use crate::fast::{detect_fast, FastParams, FeatureKeypoint};
use crate::pyramid::{detect_multi_scale, PyramidParams};

/// Keypoints and descriptors, order-aligned (`descriptors[i]` describes
/// `keypoints[i]`). Coordinates are always in the original image space.
#[derive(Clone, Debug, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<FeatureKeypoint>,
    pub descriptors: Vec<BinaryDescriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ExtractorParams {
    /// Inputs whose longer side exceeds this are downscaled before detection.
    pub max_dimension: usize,
    /// Single-scale detector, tuned for a large feature budget.
    pub fast: FastParams,
    /// Complementary multi-scale detector.
    pub pyramid: PyramidParams,
}

impl Default for ExtractorParams {
    fn default() -> Self {
        Self {
            max_dimension: 800,
            fast: FastParams::default(),
            pyramid: PyramidParams::default(),
        }
    }
}

/// Runs both detectors on a (possibly downscaled) grayscale frame and
/// concatenates their feature sets, rescaling coordinates back to the
/// original resolution.
#[derive(Clone, Debug, Default)]
pub struct FeatureExtractor {
    params: ExtractorParams,
}

impl FeatureExtractor {
    pub fn new(params: ExtractorParams) -> Self {
        Self { params }
    }

    pub fn extract(&self, img: &GrayImageView<'_>) -> FeatureSet {
        let factor = downscale_factor_to_cap(img.width, img.height, self.params.max_dimension);
        let downscaled = (factor < 1.0).then(|| resample_bilinear(img, factor));
        let work = match downscaled.as_ref() {
            Some(small) => small.view(),
            None => *img,
        };

        let mut set = FeatureSet::default();

        // Single-scale pass. Zero features here must not abort the pyramid
        // pass, and vice versa.
        let kps = detect_fast(&work, &self.params.fast);
        let (kept, descs) = compute_descriptors(&work, &kps);
        set.keypoints.extend(kept);
        set.descriptors.extend(descs);

        let (pyr_kps, pyr_descs) = detect_multi_scale(&work, &self.params.pyramid);
        set.keypoints.extend(pyr_kps);
        set.descriptors.extend(pyr_descs);

        if factor < 1.0 {
            let upscale = 1.0 / factor;
            for kp in &mut set.keypoints {
                kp.position.x *= upscale;
                kp.position.y *= upscale;
                kp.size *= upscale;
            }
        }

        debug!(
            "extracted {} features ({}x{}, downscale {:.3})",
            set.len(),
            img.width,
            img.height,
            factor
        );
        set
    }
}
