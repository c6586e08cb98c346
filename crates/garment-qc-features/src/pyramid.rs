use garment_qc_core::{resample_bilinear, GrayImageView};
use serde::{Deserialize, Serialize};

use crate::brief::{compute_descriptors, BinaryDescriptor};
use crate::fast::{detect_fast, FastParams, FeatureKeypoint};

/// Multi-scale detection settings. This is the complementary second detector:
/// it trades keypoint budget for coverage across garment scale change.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PyramidParams {
    pub levels: usize,
    /// Downscale step between levels (>1).
    pub scale_step: f32,
    pub fast_threshold: u8,
    /// Keypoint budget per level.
    pub level_budget: usize,
}

impl Default for PyramidParams {
    fn default() -> Self {
        Self {
            levels: 4,
            scale_step: 1.2,
            fast_threshold: 20,
            level_budget: 1000,
        }
    }
}

/// Detect-and-describe across a resampled pyramid; keypoint coordinates and
/// sizes are mapped back into level-0 space.
pub fn detect_multi_scale(
    img: &GrayImageView<'_>,
    params: &PyramidParams,
) -> (Vec<FeatureKeypoint>, Vec<BinaryDescriptor>) {
    let mut all_kps = Vec::new();
    let mut all_descs = Vec::new();

    let fast = FastParams {
        threshold: params.fast_threshold,
        max_keypoints: params.level_budget,
    };

    let mut level_scale = 1.0f32;
    let mut owned_level: Option<garment_qc_core::GrayImage> = None;

    for level in 0..params.levels.max(1) {
        let view = match owned_level.as_ref() {
            None => *img,
            Some(level_img) => level_img.view(),
        };

        let kps = detect_fast(&view, &fast);
        let (kept, descs) = compute_descriptors(&view, &kps);

        let upscale = level_scale;
        all_kps.extend(kept.into_iter().map(|mut kp| {
            kp.position.x *= upscale;
            kp.position.y *= upscale;
            kp.size *= upscale;
            kp
        }));
        all_descs.extend(descs);

        if level + 1 < params.levels {
            let next = resample_bilinear(&view, 1.0 / params.scale_step);
            if next.width < 32 || next.height < 32 {
                break;
            }
            level_scale *= params.scale_step;
            owned_level = Some(next);
        }
    }

    (all_kps, all_descs)
}
