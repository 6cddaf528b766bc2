//! Persistent mapping from root-relative image paths to fingerprints.
//!
//! The store is loaded and saved as a whole (see [`snapshot`]) and is only
//! mutated through [`IndexStore::upsert`], which takes `&mut self`: sharing a
//! store across threads therefore needs an external lock, and the scanner
//! funnels every write through a single owning thread instead.

mod snapshot;

use crate::core::distance::{distance, MAX_DISTANCE};
use crate::core::fingerprint::{Fingerprint, HashConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index snapshot not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Index snapshot {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Index {path} was built with {stored}, not {requested}")]
    ConfigMismatch {
        path: PathBuf,
        stored: String,
        requested: String,
    },

    #[error("Index {path} covers {stored}, not {requested}")]
    RootMismatch {
        path: PathBuf,
        stored: PathBuf,
        requested: PathBuf,
    },

    #[error("{path} is not inside index root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

impl IndexError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        IndexError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// True when the snapshot simply does not exist yet.
    pub fn is_not_found(&self) -> bool {
        matches!(self, IndexError::NotFound { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Last-modified time of the source file, in whole seconds since the epoch.
    pub modified: i64,
    pub fingerprint: Fingerprint,
}

/// One hit of [`IndexStore::find`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub key: String,
    pub distance: u32,
}

#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
    config: HashConfig,
    entries: BTreeMap<String, IndexEntry>,
}

impl IndexStore {
    /// Create an empty store for images under `root`.
    pub fn new(root: impl AsRef<Path>, config: HashConfig) -> Result<Self, IndexError> {
        let root = root.as_ref();
        let root = std::path::absolute(root).map_err(|e| IndexError::io(root, e))?;

        Ok(Self {
            root,
            config,
            entries: BTreeMap::new(),
        })
    }

    /// Read the snapshot at `path`.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let store = snapshot::read(path)?;
        log::info!(
            "Loaded {} index entries for {} from {}",
            store.len(),
            store.root.display(),
            path.display()
        );
        Ok(store)
    }

    /// Load the snapshot at `path`, or start an empty store if there is none.
    ///
    /// An existing snapshot must have been built for the same `root` and with
    /// the same `config`, otherwise its keys or fingerprints would not line up
    /// with what the caller is about to add.
    pub fn open_or_create(
        path: &Path,
        root: impl AsRef<Path>,
        config: HashConfig,
    ) -> Result<Self, IndexError> {
        let fresh = Self::new(root, config)?;

        let store = match Self::load(path) {
            Ok(store) => store,
            Err(e) if e.is_not_found() => {
                log::info!("No index at {}; starting empty", path.display());
                return Ok(fresh);
            }
            Err(e) => return Err(e),
        };

        if store.config != config {
            return Err(IndexError::ConfigMismatch {
                path: path.to_path_buf(),
                stored: store.config.to_string(),
                requested: config.to_string(),
            });
        }

        if store.root != fresh.root {
            return Err(IndexError::RootMismatch {
                path: path.to_path_buf(),
                stored: store.root,
                requested: fresh.root,
            });
        }

        Ok(store)
    }

    /// Atomically replace the snapshot at `path` with the current contents.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        snapshot::write(path, self)?;
        log::info!("Saved {} index entries to {}", self.len(), path.display());
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> HashConfig {
        self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.entries.get(key)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether `key` needs (re)fingerprinting: it is unknown, or it was
    /// indexed with a different modification time.
    pub fn is_stale(&self, key: &str, modified: i64) -> bool {
        self.entries
            .get(key)
            .is_none_or(|entry| entry.modified != modified)
    }

    pub fn upsert(&mut self, key: impl Into<String>, modified: i64, fingerprint: Fingerprint) {
        self.entries.insert(
            key.into(),
            IndexEntry {
                modified,
                fingerprint,
            },
        );
    }

    /// All entries within `max_distance` of `query`, nearest first.
    ///
    /// Entries at equal distance come out in key order. Thresholds above 64
    /// are clamped to 64.
    pub fn find(&self, query: Fingerprint, max_distance: u32) -> Vec<Match> {
        let max_distance = max_distance.min(MAX_DISTANCE);

        let mut matches: Vec<Match> = self
            .entries
            .iter()
            .filter_map(|(key, entry)| {
                let d = distance(entry.fingerprint, query);
                (d <= max_distance).then(|| Match {
                    key: key.clone(),
                    distance: d,
                })
            })
            .collect();

        matches.sort_by_key(|m| m.distance);
        matches
    }

    /// The key under which `path` is stored: its location relative to the
    /// root, with components joined by `/`.
    pub fn key_for(&self, path: &Path) -> Result<String, IndexError> {
        let outside = || IndexError::OutsideRoot {
            path: path.to_path_buf(),
            root: self.root.clone(),
        };

        let absolute = std::path::absolute(path).map_err(|e| IndexError::io(path, e))?;
        let relative = absolute.strip_prefix(&self.root).map_err(|_| outside())?;

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy()),
                Component::CurDir => {}
                _ => return Err(outside()),
            }
        }

        if parts.is_empty() {
            return Err(outside());
        }
        Ok(parts.join("/"))
    }

    /// Absolute path of the file stored under `key`.
    pub fn resolve(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fingerprint::LumaWeights;
    use std::fs;
    use tempfile::TempDir;

    fn fp(bits: u64) -> Fingerprint {
        Fingerprint::from_bits(bits)
    }

    fn store(root: &Path) -> IndexStore {
        IndexStore::new(root, HashConfig::default()).unwrap()
    }

    #[test]
    fn test_is_stale() {
        let temp_dir = TempDir::new().unwrap();
        let mut index = store(temp_dir.path());

        assert!(index.is_stale("a.png", 100));
        index.upsert("a.png", 100, fp(1));
        assert!(!index.is_stale("a.png", 100));
        assert!(index.is_stale("a.png", 101));
        assert!(index.is_stale("b.png", 100));
    }

    #[test]
    fn test_upsert_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let mut index = store(temp_dir.path());

        index.upsert("a.png", 1, fp(1));
        index.upsert("a.png", 2, fp(2));

        assert_eq!(index.len(), 1);
        assert_eq!(
            index.get("a.png"),
            Some(&IndexEntry {
                modified: 2,
                fingerprint: fp(2)
            })
        );
    }

    #[test]
    fn test_find_exact_match_only() {
        let temp_dir = TempDir::new().unwrap();
        let mut index = store(temp_dir.path());
        index.upsert("same.png", 1, fp(0xabcd));
        index.upsert("near.png", 1, fp(0xabcf));

        let matches = index.find(fp(0xabcd), 0);
        assert_eq!(
            matches,
            vec![Match {
                key: "same.png".to_string(),
                distance: 0
            }]
        );
    }

    #[test]
    fn test_find_orders_by_distance_then_key() {
        let temp_dir = TempDir::new().unwrap();
        let mut index = store(temp_dir.path());
        index.upsert("far.png", 1, fp(0b1111));
        index.upsert("b.png", 1, fp(0b0001));
        index.upsert("a.png", 1, fp(0b0010));
        index.upsert("exact.png", 1, fp(0));

        let keys: Vec<(String, u32)> = index
            .find(fp(0), 64)
            .into_iter()
            .map(|m| (m.key, m.distance))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("exact.png".to_string(), 0),
                ("a.png".to_string(), 1),
                ("b.png".to_string(), 1),
                ("far.png".to_string(), 4),
            ]
        );
    }

    #[test]
    fn test_find_threshold_is_inclusive() {
        let temp_dir = TempDir::new().unwrap();
        let mut index = store(temp_dir.path());
        index.upsert("three.png", 1, fp(0b111));

        assert!(index.find(fp(0), 2).is_empty());
        assert_eq!(index.find(fp(0), 3).len(), 1);
    }

    #[test]
    fn test_find_max_returns_everything_and_clamps() {
        let temp_dir = TempDir::new().unwrap();
        let mut index = store(temp_dir.path());
        index.upsert("zero.png", 1, fp(0));
        index.upsert("ones.png", 1, fp(u64::MAX));

        assert_eq!(index.find(fp(0), 64).len(), 2);
        assert_eq!(index.find(fp(0), 1000).len(), 2);
        assert_eq!(index.find(fp(0), 63).len(), 1);
    }

    #[test]
    fn test_find_on_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let index = store(temp_dir.path());
        for max in [0, 5, 64] {
            assert!(index.find(fp(42), max).is_empty());
        }
    }

    #[test]
    fn test_key_normalization() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let index = store(&root);

        let file = root.join("holiday").join("beach.jpg");
        assert_eq!(index.key_for(&file).unwrap(), "holiday/beach.jpg");
        assert_eq!(index.resolve("holiday/beach.jpg"), file);

        assert!(matches!(
            index.key_for(&root),
            Err(IndexError::OutsideRoot { .. })
        ));
        let elsewhere = root.parent().unwrap().join("other.jpg");
        assert!(matches!(
            index.key_for(&elsewhere),
            Err(IndexError::OutsideRoot { .. })
        ));
    }

    #[test]
    fn test_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let db = temp_dir.path().join("index.json");
        let mut index = store(temp_dir.path());
        index.upsert("a.png", 10, fp(0x0123_4567_89ab_cdef));
        index.upsert("dir/b.gif", -5, fp(u64::MAX));
        index.upsert("dir/c.jpg", 1_700_000_000, fp(0));
        index.save(&db).unwrap();

        let loaded = IndexStore::load(&db).unwrap();
        assert_eq!(loaded.root(), index.root());
        assert_eq!(loaded.config(), index.config());
        assert_eq!(
            loaded.iter().collect::<Vec<_>>(),
            index.iter().collect::<Vec<_>>()
        );

        for (key, entry) in index.iter() {
            assert!(!loaded.is_stale(key, entry.modified));
            assert!(loaded.find(entry.fingerprint, 0).iter().any(|m| m.key == key));
        }
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let err = IndexStore::load(&temp_dir.path().join("missing.json")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_open_or_create_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        let db = temp_dir.path().join("missing.json");
        let index = IndexStore::open_or_create(&db, temp_dir.path(), HashConfig::default()).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_open_or_create_checks_root_and_config() {
        let temp_dir = TempDir::new().unwrap();
        let photos = temp_dir.path().join("photos");
        let scans = temp_dir.path().join("scans");
        fs::create_dir_all(&photos).unwrap();
        fs::create_dir_all(&scans).unwrap();
        let db = temp_dir.path().join("index.json");

        let mut index = store(&photos);
        index.upsert("a.png", 1, fp(1));
        index.save(&db).unwrap();

        let reopened = IndexStore::open_or_create(&db, &photos, HashConfig::default()).unwrap();
        assert_eq!(reopened.len(), 1);

        assert!(matches!(
            IndexStore::open_or_create(&db, &scans, HashConfig::default()),
            Err(IndexError::RootMismatch { .. })
        ));

        let rec709 = HashConfig::default().with_luma(LumaWeights::Rec709);
        assert!(matches!(
            IndexStore::open_or_create(&db, &photos, rec709),
            Err(IndexError::ConfigMismatch { .. })
        ));
    }
}
