use crate::core::fingerprint::{Fingerprint, Fingerprinter};
use crate::core::grid::{GridError, PixelGrid};
use image::{DynamicImage, ImageReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error for {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Unusable image {path}: {source}")]
    Grid {
        path: PathBuf,
        #[source]
        source: GridError,
    },
}

/// Convert a decoded image into a [`PixelGrid`].
///
/// Grayscale images keep a single channel; everything else is flattened to
/// 8-bit RGB. Alpha is discarded.
pub fn grid_from_image(img: &DynamicImage) -> Result<PixelGrid, GridError> {
    if img.color().has_color() {
        let rgb = img.to_rgb8();
        PixelGrid::rgb(rgb.width(), rgb.height(), rgb.as_raw())
    } else {
        let luma = img.to_luma8();
        PixelGrid::luma(luma.width(), luma.height(), luma.as_raw())
    }
}

/// Open and decode the image at `path`, sniffing the format from its content.
pub fn load_grid(path: &Path) -> Result<PixelGrid, DecodeError> {
    let img = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .decode()
        .map_err(|source| DecodeError::Image {
            path: path.to_path_buf(),
            source,
        })?;

    grid_from_image(&img).map_err(|source| DecodeError::Grid {
        path: path.to_path_buf(),
        source,
    })
}

/// Decode the image at `path` and fingerprint it.
pub fn fingerprint_file(
    fingerprinter: &Fingerprinter,
    path: &Path,
) -> Result<Fingerprint, DecodeError> {
    let grid = load_grid(path)?;
    Ok(fingerprinter.fingerprint(&grid))
}
