//! Runtime configuration: where the index lives and what a scan picks up.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the index snapshot.
pub const DB_ENV: &str = "IMGHASH_DB";

/// Extensions indexed when none are configured.
pub const DEFAULT_EXTENSIONS: [&str; 8] = ["png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "webp"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No index location given and no data directory found; pass --db or set {DB_ENV}")]
    NoDataDir,
}

/// `<data dir>/imghash/index.json`, if the platform has a data directory.
pub fn default_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("imghash").join("index.json"))
}

/// Pick the snapshot location: an explicit path (flag or [`DB_ENV`]) wins,
/// otherwise the per-user default.
pub fn resolve_db_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    explicit
        .or_else(default_db_path)
        .ok_or(ConfigError::NoDataDir)
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Lower-case extensions without the leading dot.
    pub extensions: HashSet<String>,
    pub follow_links: bool,
    /// Worker threads for fingerprinting; 0 lets rayon decide.
    pub jobs: usize,
}

impl ScanOptions {
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        self
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_lowercase()))
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            follow_links: false,
            jobs: 0,
        }
    }
}
