use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("Invalid grid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Sample count mismatch: expected {expected}, got {actual}")]
    SampleCount { expected: usize, actual: usize },

    #[error("Hash grid of {cells} cells does not fit in 64 bits")]
    TooManyCells { cells: u64 },
}

/// Channel layout of a [`PixelGrid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channels {
    Luma,
    Rgb,
}

impl Channels {
    pub fn count(self) -> usize {
        match self {
            Channels::Luma => 1,
            Channels::Rgb => 3,
        }
    }
}

/// A decoded image held as interleaved samples in the 0..=255 range.
///
/// Samples are `f64` so that resampled grids keep fractional averages;
/// grids built from 8-bit buffers hold whole numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelGrid {
    width: u32,
    height: u32,
    channels: Channels,
    samples: Vec<f64>,
}

impl PixelGrid {
    /// Build a single-channel grid from row-major 8-bit luminance values.
    pub fn luma(width: u32, height: u32, data: &[u8]) -> Result<Self, GridError> {
        Self::from_u8(width, height, Channels::Luma, data)
    }

    /// Build an RGB grid from row-major, interleaved 8-bit `r, g, b` values.
    pub fn rgb(width: u32, height: u32, data: &[u8]) -> Result<Self, GridError> {
        Self::from_u8(width, height, Channels::Rgb, data)
    }

    fn from_u8(
        width: u32,
        height: u32,
        channels: Channels,
        data: &[u8],
    ) -> Result<Self, GridError> {
        let samples = data.iter().map(|&v| f64::from(v)).collect();
        Self::from_samples(width, height, channels, samples)
    }

    pub fn from_samples(
        width: u32,
        height: u32,
        channels: Channels,
        samples: Vec<f64>,
    ) -> Result<Self, GridError> {
        if width == 0 || height == 0 {
            return Err(GridError::InvalidDimensions { width, height });
        }

        let expected = width as usize * height as usize * channels.count();
        if samples.len() != expected {
            return Err(GridError::SampleCount {
                expected,
                actual: samples.len(),
            });
        }

        Ok(Self {
            width,
            height,
            channels,
            samples,
        })
    }

    /// Wrap samples produced by the sampler, which already match the layout.
    pub(crate) fn from_resampled(
        width: u32,
        height: u32,
        channels: Channels,
        samples: Vec<f64>,
    ) -> Self {
        debug_assert_eq!(
            samples.len(),
            width as usize * height as usize * channels.count()
        );
        Self {
            width,
            height,
            channels,
            samples,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> Channels {
        self.channels
    }

    /// Number of cells (pixels), independent of the channel count.
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Channel values of the cell at `(x, y)`. Callers keep `(x, y)` in range.
    pub(crate) fn cell(&self, x: u32, y: u32) -> &[f64] {
        let stride = self.channels.count();
        let start = (y as usize * self.width as usize + x as usize) * stride;
        &self.samples[start..start + stride]
    }

    /// Iterate over cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = &[f64]> {
        self.samples.chunks_exact(self.channels.count())
    }
}
