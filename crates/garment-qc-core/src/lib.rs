//! Core image and geometry primitives for garment measurement.
//!
//! This crate is intentionally small and free of file-format and detector
//! concerns: grayscale buffers, sampling, integral images, and homography
//! estimation. Everything that reads files or tracks state lives upstream.

mod homography;
mod image;
mod logger;

pub use homography::{
    estimate_homography, estimate_homography_ransac, homography_from_4pt, Homography,
    RansacParams,
};
pub use image::{
    downscale_factor_to_cap, resample_bilinear, sample_bilinear, sample_bilinear_u8, GrayImage,
    GrayImageView, IntegralImage,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
