//! Perceptual image fingerprints and an incremental similarity index.
//!
//! - [`core`]: pixel grids, area-average resampling, 64-bit average hash and
//!   Hamming distance.
//! - [`index`]: the persisted path -> fingerprint store with staleness checks
//!   and threshold queries.
//! - [`scanner`]: walks a directory tree and keeps an index up to date.

pub mod config;
pub mod core;
pub mod index;
pub mod scanner;

pub use crate::core::image::{fingerprint_file, load_grid, DecodeError};
pub use crate::core::{
    distance, Channels, Fingerprint, Fingerprinter, GridError, HashConfig, LumaWeights,
    PixelGrid, MAX_DISTANCE,
};
pub use config::ScanOptions;
pub use index::{IndexEntry, IndexError, IndexStore, Match};
pub use scanner::{ScanError, ScanReport, Scanner};
