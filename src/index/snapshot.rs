//! On-disk form of an [`IndexStore`].
//!
//! A snapshot is a single JSON document. Its `checksum` is the BLAKE3 hash of
//! the canonical JSON encoding of everything that determines lookups (kernel,
//! root, hash config, entries), so truncation or hand edits are reported as
//! corruption instead of loading a partial mapping.

use super::{IndexEntry, IndexError, IndexStore};
use crate::core::fingerprint::HashConfig;
use crate::core::sampler::KERNEL_ID;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

const FORMAT: &str = "imghash-index";
const VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    format: String,
    version: u32,
    kernel: String,
    root: PathBuf,
    config: HashConfig,
    saved_at: String,
    checksum: String,
    entries: BTreeMap<String, IndexEntry>,
}

#[derive(Serialize)]
struct Checksummed<'a> {
    kernel: &'a str,
    root: &'a Path,
    config: &'a HashConfig,
    entries: &'a BTreeMap<String, IndexEntry>,
}

fn checksum(
    kernel: &str,
    root: &Path,
    config: &HashConfig,
    entries: &BTreeMap<String, IndexEntry>,
) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(&Checksummed {
        kernel,
        root,
        config,
        entries,
    })?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

pub(super) fn read(path: &Path) -> Result<IndexStore, IndexError> {
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => IndexError::NotFound {
            path: path.to_path_buf(),
        },
        _ => IndexError::io(path, e),
    })?;

    let corrupt = |reason: String| IndexError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let snapshot: Snapshot =
        serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;

    if snapshot.format != FORMAT {
        return Err(corrupt(format!("unexpected format {:?}", snapshot.format)));
    }
    if snapshot.version != VERSION {
        return Err(corrupt(format!(
            "unsupported version {} (expected {VERSION})",
            snapshot.version
        )));
    }

    let config = snapshot
        .config
        .validate()
        .map_err(|e| corrupt(e.to_string()))?;

    let computed = checksum(
        &snapshot.kernel,
        &snapshot.root,
        &config,
        &snapshot.entries,
    )?;
    if computed != snapshot.checksum {
        return Err(corrupt("checksum mismatch".to_string()));
    }

    if snapshot.kernel != KERNEL_ID {
        return Err(IndexError::ConfigMismatch {
            path: path.to_path_buf(),
            stored: format!("{} {}", snapshot.kernel, config),
            requested: format!("{KERNEL_ID} {config}"),
        });
    }

    Ok(IndexStore {
        root: snapshot.root,
        config,
        entries: snapshot.entries,
    })
}

pub(super) fn write(path: &Path, store: &IndexStore) -> Result<(), IndexError> {
    let snapshot = Snapshot {
        format: FORMAT.to_string(),
        version: VERSION,
        kernel: KERNEL_ID.to_string(),
        root: store.root.clone(),
        config: store.config,
        saved_at: Utc::now().to_rfc3339(),
        checksum: checksum(KERNEL_ID, &store.root, &store.config, &store.entries)?,
        entries: store.entries.clone(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| IndexError::io(parent, e))?;
    }

    // Write next to the target, then rename over it.
    let temp_path = temp_path(path);
    let result = write_file(&temp_path, &snapshot)
        .and_then(|()| fs::rename(&temp_path, path).map_err(|e| IndexError::io(path, e)));

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_file(path: &Path, snapshot: &Snapshot) -> Result<(), IndexError> {
    let file = File::create(path).map_err(|e| IndexError::io(path, e))?;
    let mut writer = BufWriter::new(file);

    serde_json::to_writer(&mut writer, snapshot)?;
    writer.flush().map_err(|e| IndexError::io(path, e))?;

    let file = writer
        .into_inner()
        .map_err(|e| IndexError::io(path, e.into_error()))?;
    file.sync_all().map_err(|e| IndexError::io(path, e))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("index"));
    name.push(".tmp");
    path.with_file_name(name)
}
