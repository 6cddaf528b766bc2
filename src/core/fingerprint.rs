//! Average-hash fingerprinting.
//!
//! The grid is reduced to `width x height` cells with the area-average
//! sampler, each cell is converted to luminance, and every cell at or above
//! the mean luminance sets its bit. Cells are visited in row-major order;
//! with `n` cells, cell `i` sets bit `n - 1 - i`.
//!
//! Resampled channel values are rounded to fixed point with
//! [`SAMPLE_FRACTION_BITS`] fractional bits and weighted with integer
//! coefficients, so the mean comparison (`v * n >= sum`) is exact.

use crate::core::distance;
use crate::core::grid::{GridError, PixelGrid};
use crate::core::sampler;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use thiserror::Error;

/// A 64-bit perceptual fingerprint.
///
/// Only comparable with fingerprints produced under the same [`HashConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn distance(self, other: Fingerprint) -> u32 {
        distance::distance(self, other)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("Invalid fingerprint {input:?}: expected up to 16 hex digits")]
pub struct ParseFingerprintError {
    input: String,
}

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.is_empty() || digits.len() > 16 {
            return Err(ParseFingerprintError { input: s.to_string() });
        }
        u64::from_str_radix(digits, 16)
            .map(Fingerprint)
            .map_err(|_| ParseFingerprintError { input: s.to_string() })
    }
}

/// Fractional bits kept when rounding resampled channel values.
pub const SAMPLE_FRACTION_BITS: u32 = 8;

fn quantize(sample: f64) -> u64 {
    (sample * f64::from(1u32 << SAMPLE_FRACTION_BITS)).round() as u64
}

/// Weighting used to collapse RGB cells into a single luminance value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LumaWeights {
    /// ITU-R BT.601: 0.299 R + 0.587 G + 0.114 B
    #[default]
    Rec601,
    /// ITU-R BT.709: 0.2126 R + 0.7152 G + 0.0722 B
    Rec709,
}

impl LumaWeights {
    fn coefficients(self) -> (u64, u64, u64) {
        match self {
            LumaWeights::Rec601 => (299, 587, 114),
            LumaWeights::Rec709 => (2126, 7152, 722),
        }
    }

    /// Fixed-point luminance of one cell. Single-channel cells are already
    /// luminance. Only comparable with other cells of the same layout.
    pub fn luminance(self, cell: &[f64]) -> u64 {
        match *cell {
            [r, g, b] => {
                let (wr, wg, wb) = self.coefficients();
                wr * quantize(r) + wg * quantize(g) + wb * quantize(b)
            }
            [v, ..] => quantize(v),
            [] => 0,
        }
    }
}

impl fmt::Display for LumaWeights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LumaWeights::Rec601 => f.write_str("rec601"),
            LumaWeights::Rec709 => f.write_str("rec709"),
        }
    }
}

impl FromStr for LumaWeights {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rec601" | "601" => Ok(LumaWeights::Rec601),
            "rec709" | "709" => Ok(LumaWeights::Rec709),
            other => Err(format!("unknown luma weighting '{other}' (expected rec601 or rec709)")),
        }
    }
}

/// Parameters that determine fingerprint values.
///
/// Persisted with every index snapshot; fingerprints made under different
/// configurations are not comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashConfig {
    width: NonZeroU32,
    height: NonZeroU32,
    luma: LumaWeights,
}

impl HashConfig {
    pub fn new(width: u32, height: u32, luma: LumaWeights) -> Result<Self, GridError> {
        let (Some(w), Some(h)) = (NonZeroU32::new(width), NonZeroU32::new(height)) else {
            return Err(GridError::InvalidDimensions { width, height });
        };

        let cells = u64::from(width) * u64::from(height);
        if cells > u64::from(distance::MAX_DISTANCE) {
            return Err(GridError::TooManyCells { cells });
        }

        Ok(Self {
            width: w,
            height: h,
            luma,
        })
    }

    /// Re-check the invariants of a configuration read from disk.
    pub fn validate(self) -> Result<Self, GridError> {
        Self::new(self.width.get(), self.height.get(), self.luma)
    }

    pub fn width(&self) -> u32 {
        self.width.get()
    }

    pub fn height(&self) -> u32 {
        self.height.get()
    }

    pub fn luma(&self) -> LumaWeights {
        self.luma
    }

    pub fn with_luma(mut self, luma: LumaWeights) -> Self {
        self.luma = luma;
        self
    }
}

impl Default for HashConfig {
    fn default() -> Self {
        const EIGHT: NonZeroU32 = match NonZeroU32::new(8) {
            Some(n) => n,
            None => panic!("8 is non-zero"),
        };
        Self {
            width: EIGHT,
            height: EIGHT,
            luma: LumaWeights::Rec601,
        }
    }
}

impl fmt::Display for HashConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.luma)
    }
}

/// Computes average-hash fingerprints under a fixed [`HashConfig`].
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    config: HashConfig,
}

impl Fingerprinter {
    pub fn new(config: HashConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> HashConfig {
        self.config
    }

    pub fn fingerprint(&self, grid: &PixelGrid) -> Fingerprint {
        let small = sampler::resample(grid, self.config.width, self.config.height);
        let luma = self.config.luma;

        let values: Vec<u64> = small.cells().map(|cell| luma.luminance(cell)).collect();
        let count = values.len() as u64;
        let sum: u64 = values.iter().sum();

        // v >= sum / count, without the division
        let bits = values
            .iter()
            .fold(0u64, |acc, &v| (acc << 1) | u64::from(v * count >= sum));

        Fingerprint(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn luma_grid(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> PixelGrid {
        let data: Vec<u8> = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        PixelGrid::luma(width, height, &data).unwrap()
    }

    #[test]
    fn test_config_limits() {
        assert!(HashConfig::new(8, 8, LumaWeights::Rec601).is_ok());
        assert!(HashConfig::new(4, 16, LumaWeights::Rec709).is_ok());
        assert_eq!(
            HashConfig::new(9, 8, LumaWeights::Rec601),
            Err(GridError::TooManyCells { cells: 72 })
        );
        assert_eq!(
            HashConfig::new(0, 8, LumaWeights::Rec601),
            Err(GridError::InvalidDimensions {
                width: 0,
                height: 8
            })
        );
    }

    #[test]
    fn test_bit_order_is_row_major_msb_first() {
        // Only the top-left cell is bright.
        let grid = luma_grid(8, 8, |x, y| if x == 0 && y == 0 { 255 } else { 0 });
        let hash = Fingerprinter::default().fingerprint(&grid);
        assert_eq!(hash.bits(), 1 << 63);

        // Left half bright: the top four bits of every byte are set.
        let grid = luma_grid(8, 8, |x, _| if x < 4 { 200 } else { 10 });
        let hash = Fingerprinter::default().fingerprint(&grid);
        assert_eq!(hash.bits(), 0xf0f0_f0f0_f0f0_f0f0);
    }

    #[test]
    fn test_uniform_grid_sets_every_bit() {
        let grid = luma_grid(16, 16, |_, _| 128);
        let hash = Fingerprinter::default().fingerprint(&grid);
        assert_eq!(hash.bits(), u64::MAX);
    }

    #[test]
    fn test_small_config_uses_low_bits() {
        let config = HashConfig::new(2, 2, LumaWeights::Rec601).unwrap();
        let grid = luma_grid(4, 4, |x, y| if x < 2 && y < 2 { 255 } else { 0 });
        let hash = Fingerprinter::new(config).fingerprint(&grid);
        assert_eq!(hash.bits(), 0b1000);
    }

    #[test]
    fn test_rgb_uses_luma_weights() {
        // Pure green is brighter than pure blue under both weightings.
        let mut data = Vec::new();
        for y in 0..8 {
            for _ in 0..8 {
                data.extend_from_slice(if y % 2 == 0 { &[0, 255, 0] } else { &[0, 0, 255] });
            }
        }
        let grid = PixelGrid::rgb(8, 8, &data).unwrap();
        let rec601 = Fingerprinter::default().fingerprint(&grid);
        let rec709 = Fingerprinter::new(HashConfig::default().with_luma(LumaWeights::Rec709))
            .fingerprint(&grid);
        assert_eq!(rec601.bits(), 0xff00_ff00_ff00_ff00);
        assert_eq!(rec601, rec709);
    }

    #[test]
    fn test_brightness_shift_keeps_fingerprint() {
        let base = |x: u32, y: u32| ((x * 11 + y * 5) % 180) as u8;
        let grid = luma_grid(16, 16, base);
        let brighter = luma_grid(16, 16, |x, y| base(x, y) + 40);

        let fp = Fingerprinter::default();
        assert_eq!(fp.fingerprint(&grid).distance(fp.fingerprint(&brighter)), 0);
    }

    #[test]
    fn test_rgb_brightness_shift_is_close() {
        let pixel = |x: u32, y: u32| {
            [
                ((x * 9) % 150) as u8,
                ((y * 7) % 150) as u8,
                ((x * y) % 150) as u8,
            ]
        };
        let build = |shift: u8| {
            let data: Vec<u8> = (0..32)
                .flat_map(|y| (0..32).map(move |x| (x, y)))
                .flat_map(|(x, y)| pixel(x, y).map(|c| c + shift))
                .collect();
            PixelGrid::rgb(32, 32, &data).unwrap()
        };

        let fp = Fingerprinter::default();
        assert!(fp.fingerprint(&build(0)).distance(fp.fingerprint(&build(30))) <= 2);
    }

    #[test]
    fn test_rescaled_copy_is_close() {
        let big = luma_grid(128, 96, |x, y| ((x / 16 + y / 12) * 30 % 256) as u8);
        let small = sampler::resize(&big, 40, 30).unwrap();

        let fp = Fingerprinter::default();
        assert!(fp.fingerprint(&big).distance(fp.fingerprint(&small)) <= 3);
    }

    fn flat_rgb(width: u32, height: u32, rgb: [u8; 3]) -> PixelGrid {
        let data: Vec<u8> = (0..width * height).flat_map(|_| rgb).collect();
        PixelGrid::rgb(width, height, &data).unwrap()
    }

    #[test]
    fn test_flat_rgb_sets_every_bit() {
        let weightings = [LumaWeights::Rec601, LumaWeights::Rec709];
        let sizes = [(8, 8), (16, 16), (20, 13), (37, 23), (3, 5)];

        for luma in weightings {
            let fp = Fingerprinter::new(HashConfig::default().with_luma(luma));
            for &(w, h) in &sizes {
                for r in (0..=255u8).step_by(17) {
                    for g in (0..=255u8).step_by(51) {
                        for b in [0u8, 1, 50, 51, 128, 254, 255] {
                            let hash = fp.fingerprint(&flat_rgb(w, h, [r, g, b]));
                            assert_eq!(
                                hash.bits(),
                                u64::MAX,
                                "{w}x{h} ({r}, {g}, {b}) under {luma} gave {hash}"
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_flat_colors_one_step_apart_match() {
        let fp = Fingerprinter::default();
        let a = fp.fingerprint(&flat_rgb(16, 16, [0, 0, 50]));
        let b = fp.fingerprint(&flat_rgb(16, 16, [0, 0, 51]));
        assert_eq!(a.distance(b), 0);
    }

    #[test]
    fn test_display_and_parse() {
        let hash = Fingerprint::from_bits(0x00ff_1234_abcd_0001);
        assert_eq!(hash.to_string(), "00ff1234abcd0001");
        assert_eq!("00ff1234abcd0001".parse::<Fingerprint>(), Ok(hash));
        assert_eq!("0xff1234abcd0001".parse::<Fingerprint>(), Ok(hash));
        assert!("".parse::<Fingerprint>().is_err());
        assert!("xyz".parse::<Fingerprint>().is_err());
        assert!("1ffffffffffffffff".parse::<Fingerprint>().is_err());
    }

    #[test]
    fn test_luma_parse() {
        assert_eq!("Rec709".parse::<LumaWeights>(), Ok(LumaWeights::Rec709));
        assert_eq!("601".parse::<LumaWeights>(), Ok(LumaWeights::Rec601));
        assert!("srgb".parse::<LumaWeights>().is_err());
    }

    proptest! {
        #[test]
        fn prop_fingerprint_deterministic(
            w in 1u32..48, h in 1u32..48, seed: u64
        ) {
            let grid = luma_grid(w, h, |x, y| {
                (seed.wrapping_mul(u64::from(x * 31 + y * 17 + 1)) >> 56) as u8
            });
            let fp = Fingerprinter::default();
            prop_assert_eq!(fp.fingerprint(&grid), fp.fingerprint(&grid.clone()));
        }
    }
}
