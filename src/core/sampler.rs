//! Area-average resampling.
//!
//! Every output cell maps back to a rectangle of the source grid and takes
//! the coverage-weighted mean of the source pixels under it, per channel.
//! The kernel is part of the persisted fingerprint format: changing it
//! invalidates every stored snapshot, so [`KERNEL_ID`] must change with it.

use crate::core::grid::{GridError, PixelGrid};
use std::num::NonZeroU32;

/// Identifier of the resampling kernel and luminance quantization, stored
/// alongside fingerprints. Bumped whenever either changes.
pub const KERNEL_ID: &str = "area-average-v2";

/// Resize `grid` to exactly `width` x `height` cells.
///
/// Works for both downsampling and upsampling. Zero target dimensions are
/// rejected rather than clamped.
pub fn resize(grid: &PixelGrid, width: u32, height: u32) -> Result<PixelGrid, GridError> {
    match (NonZeroU32::new(width), NonZeroU32::new(height)) {
        (Some(w), Some(h)) => Ok(resample(grid, w, h)),
        _ => Err(GridError::InvalidDimensions { width, height }),
    }
}

pub(crate) fn resample(grid: &PixelGrid, width: NonZeroU32, height: NonZeroU32) -> PixelGrid {
    let (width, height) = (width.get(), height.get());
    if grid.width() == width && grid.height() == height {
        return grid.clone();
    }

    let columns = axis_coverage(grid.width(), width);
    let rows = axis_coverage(grid.height(), height);
    let stride = grid.channels().count();

    let mut samples = Vec::with_capacity(width as usize * height as usize * stride);
    let mut acc = vec![0.0f64; stride];

    for row in &rows {
        let row_weight: f64 = row.iter().map(|&(_, w)| w).sum();
        for column in &columns {
            let column_weight: f64 = column.iter().map(|&(_, w)| w).sum();
            acc.iter_mut().for_each(|a| *a = 0.0);

            for &(sy, wy) in row {
                for &(sx, wx) in column {
                    let weight = wy * wx;
                    for (a, v) in acc.iter_mut().zip(grid.cell(sx, sy)) {
                        *a += v * weight;
                    }
                }
            }

            let total = row_weight * column_weight;
            samples.extend(acc.iter().map(|a| a / total));
        }
    }

    PixelGrid::from_resampled(width, height, grid.channels(), samples)
}

/// For each of the `dst` output positions along one axis, the source indices
/// it covers and how much of each (in source-pixel units).
fn axis_coverage(src: u32, dst: u32) -> Vec<Vec<(u32, f64)>> {
    let scale = f64::from(src) / f64::from(dst);

    (0..dst)
        .map(|o| {
            let start = f64::from(o) * scale;
            let end = f64::from(o + 1) * scale;
            let first = start.floor() as u32;
            let last = (end.ceil() as u32).min(src);

            (first..last)
                .filter_map(|i| {
                    let i_start = f64::from(i);
                    let cover = end.min(i_start + 1.0) - start.max(i_start);
                    (cover > 0.0).then_some((i, cover))
                })
                .collect()
        })
        .collect()
}
