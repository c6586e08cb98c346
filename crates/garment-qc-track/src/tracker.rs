use garment_qc_core::{GrayImage, GrayImageView};
use garment_qc_features::{ExtractorParams, FeatureExtractor, FeatureSet};
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::annotation::{AnnotationSet, Role};
use crate::fusion::{fuse_by_role, stabilize, try_initialize_lock, FusionParams};
use crate::state::TrackingState;
use crate::template::{TemplateMatcher, TemplateParams};
use crate::transfer::{transfer_keypoints, TransferParams};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TrackerParams {
    pub extractor: ExtractorParams,
    pub transfer: TransferParams,
    pub template: TemplateParams,
    pub fusion: FusionParams,
}

/// The per-side tracking engine. Immutable once built: reference features
/// are extracted at construction, and all frame-to-frame data lives in the
/// caller-owned [`TrackingState`].
pub struct KeypointTracker {
    params: TrackerParams,
    annotation: AnnotationSet,
    reference: GrayImage,
    extractor: FeatureExtractor,
    matcher: TemplateMatcher,
    reference_features: FeatureSet,
}

impl KeypointTracker {
    pub fn new(reference: GrayImage, annotation: AnnotationSet, params: TrackerParams) -> Self {
        let extractor = FeatureExtractor::new(params.extractor);
        let reference_features = extractor.extract(&reference.view());
        debug!(
            "reference prepared: {} keypoints annotated, {} features",
            annotation.len(),
            reference_features.len()
        );
        Self {
            matcher: TemplateMatcher::new(params.template),
            params,
            annotation,
            reference,
            extractor,
            reference_features,
        }
    }

    pub fn annotation(&self) -> &AnnotationSet {
        &self.annotation
    }

    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    /// Re-locate every annotated keypoint in the current frame.
    ///
    /// Runs the transfer engine and the template/corner fallbacks
    /// independently, fuses candidates by role, applies temporal
    /// stabilization, and (once) initializes the static-lock map. Any
    /// method producing nothing simply contributes no candidate.
    pub fn track(
        &self,
        frame: &GrayImageView<'_>,
        state: &mut TrackingState,
    ) -> Vec<Option<Point2<f32>>> {
        let current_features = self.extractor.extract(frame);

        let transfer = transfer_keypoints(
            &self.params.transfer,
            &self.annotation.keypoints,
            &self.reference_features,
            &current_features,
            state,
        );
        let scale = state.last_scale;

        let reference = self.reference.view();
        let template: Vec<Option<Point2<f32>>> = self
            .annotation
            .keypoints
            .iter()
            .map(|&kp| self.matcher.match_point(&reference, frame, kp, scale))
            .collect();

        let corner: Vec<Option<Point2<f32>>> = self
            .annotation
            .keypoints
            .iter()
            .zip(&self.annotation.roles)
            .map(|(&kp, &role)| {
                (role == Role::Corner)
                    .then(|| self.matcher.match_corner(&reference, frame, kp, scale))
                    .flatten()
            })
            .collect();

        let feature_trusted = transfer.match_count >= self.params.transfer.min_matches;
        let fused = fuse_by_role(
            &self.params.fusion,
            &self.annotation.roles,
            &transfer,
            &template,
            &corner,
            feature_trusted,
            state,
        );

        let stabilized = stabilize(&self.params.fusion, state, fused);
        try_initialize_lock(
            &self.params.fusion,
            state,
            &self.annotation.roles,
            &stabilized,
        );

        stabilized
    }
}
