//! Sparse binary features for the garment measurement engine.
//!
//! Two complementary detectors feed the transfer engine: a single-scale
//! FAST-9 detector with a large keypoint budget, and a multi-scale pyramid
//! variant that recovers features under garment scale change. Both describe
//! keypoints with 256-bit BRIEF descriptors matched by Hamming distance.

mod brief;
mod extract;
mod fast;
mod matching;
mod pyramid;

pub use brief::{compute_descriptors, BinaryDescriptor, BRIEF_BORDER};
pub use extract::{ExtractorParams, FeatureExtractor, FeatureSet};
pub use fast::{detect_fast, FastParams, FeatureKeypoint};
pub use matching::{match_descriptors, FeatureMatch};
pub use pyramid::{detect_multi_scale, PyramidParams};
