//! Fingerprinting pipeline: pixel grids, resampling, average hash and
//! Hamming distance, plus the boundary with the `image` decoder.

pub mod distance;
pub mod fingerprint;
pub mod grid;
pub mod image;
pub mod sampler;

pub use distance::{distance, MAX_DISTANCE};
pub use fingerprint::{Fingerprint, Fingerprinter, HashConfig, LumaWeights};
pub use grid::{Channels, GridError, PixelGrid};
