//! Image file I/O at the engine boundary, including recovery for corrupted
//! reference files.

use std::fs;
use std::path::{Path, PathBuf};

use garment_qc_core::GrayImage;
use log::warn;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to read image file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
}

const JPEG_MAGIC: &[u8] = &[0xff, 0xd8, 0xff];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// A decoded reference image plus whether corruption recovery was needed.
/// Suspect files decode but carried leading garbage before the image
/// signature; they should be flagged for re-registration.
#[derive(Clone, Debug)]
pub struct LoadedImage {
    pub gray: GrayImage,
    pub suspect: bool,
}

/// Decode a grayscale image from disk.
///
/// A file that fails to decode outright gets one bounded recovery attempt:
/// scan for a known image-format signature (JPEG SOI / PNG) at a later
/// offset and retry the decode from there. This handles reference files
/// with a garbage prefix from interrupted writes.
pub fn load_gray_image(path: &Path) -> Result<LoadedImage, DecodeError> {
    let bytes = fs::read(path).map_err(|source| DecodeError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    match image::load_from_memory(&bytes) {
        Ok(img) => Ok(LoadedImage {
            gray: to_core_gray(img.to_luma8()),
            suspect: false,
        }),
        Err(first_err) => {
            if let Some(offset) = find_magic_offset(&bytes) {
                if let Ok(img) = image::load_from_memory(&bytes[offset..]) {
                    warn!(
                        "image {path:?} decoded only after skipping {offset} garbage bytes; \
                         file is suspect"
                    );
                    return Ok(LoadedImage {
                        gray: to_core_gray(img.to_luma8()),
                        suspect: true,
                    });
                }
            }
            Err(DecodeError::Decode {
                path: path.to_path_buf(),
                source: first_err,
            })
        }
    }
}

/// First offset past zero where a known image signature begins.
fn find_magic_offset(bytes: &[u8]) -> Option<usize> {
    let find = |magic: &[u8]| -> Option<usize> {
        bytes
            .windows(magic.len())
            .skip(1)
            .position(|w| w == magic)
            .map(|p| p + 1)
    };
    match (find(JPEG_MAGIC), find(PNG_MAGIC)) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Convert an `image` crate buffer into the engine's lightweight gray type.
pub fn to_core_gray(img: image::GrayImage) -> GrayImage {
    let (w, h) = (img.width() as usize, img.height() as usize);
    GrayImage {
        width: w,
        height: h,
        data: img.into_raw(),
    }
}

/// Borrow an `image` crate buffer as an engine view without copying.
pub fn gray_view(img: &image::GrayImage) -> garment_qc_core::GrayImageView<'_> {
    garment_qc_core::GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}
