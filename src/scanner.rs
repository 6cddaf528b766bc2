use crate::config::ScanOptions;
use crate::core::fingerprint::{Fingerprint, Fingerprinter};
use crate::core::image::{fingerprint_file, DecodeError};
use crate::index::{IndexError, IndexStore};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::fs::Metadata;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid root: {path}")]
    InvalidRoot { path: PathBuf },

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Discovery,
    Hashing,
    Complete,
}

#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub files_processed: usize,
    pub total_files: usize,
    pub current_file: String,
    pub phase: ScanPhase,
}

pub type ProgressCallback = Box<dyn Fn(ScanProgress) + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Image files found under the root.
    pub discovered: usize,
    /// Files whose stored modification time still matched.
    pub skipped: usize,
    pub hashed: usize,
    pub failed: usize,
    /// Total size of the files that were hashed.
    pub bytes: u64,
    pub elapsed: Duration,
}

/// A file found under the root, before deciding whether to hash it.
#[derive(Debug)]
struct Candidate {
    path: PathBuf,
    key: String,
    modified: i64,
    size: u64,
}

/// Brings an [`IndexStore`] up to date with the images under its root.
///
/// Discovery and staleness checks run on the calling thread. Stale files are
/// fingerprinted on a rayon pool and the results are sent back to the calling
/// thread, which is the only one that writes to the store.
pub struct Scanner {
    options: ScanOptions,
    progress_callback: Option<ProgressCallback>,
    cancellation_token: Arc<AtomicBool>,
}

impl Scanner {
    pub fn new(options: ScanOptions) -> Self {
        Self {
            options,
            progress_callback: None,
            cancellation_token: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn get_cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    /// Stop handing out new files. Fingerprints already computed are still
    /// written to the store before [`Scanner::scan`] returns.
    pub fn cancel_scan(&self) {
        self.cancellation_token.store(true, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation_token.load(Ordering::Relaxed)
    }

    fn send_progress(&self, progress: ScanProgress) {
        if let Some(callback) = &self.progress_callback {
            callback(progress);
        }
    }

    pub fn scan(&self, store: &mut IndexStore) -> Result<ScanReport, ScanError> {
        let start = Instant::now();
        let root = store.root().to_path_buf();

        if !root.is_dir() {
            return Err(ScanError::InvalidRoot { path: root });
        }
        if self.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        self.send_progress(ScanProgress {
            files_processed: 0,
            total_files: 0,
            current_file: "Discovering files...".to_string(),
            phase: ScanPhase::Discovery,
        });

        let candidates = self.discover_files(store)?;
        let discovered = candidates.len();

        let (stale, fresh): (Vec<Candidate>, Vec<Candidate>) = candidates
            .into_iter()
            .partition(|c| store.is_stale(&c.key, c.modified));
        for candidate in &fresh {
            log::debug!("Unchanged: {}", candidate.key);
        }

        let mut report = ScanReport {
            discovered,
            skipped: fresh.len(),
            ..ScanReport::default()
        };

        self.hash_files(store, &stale, &mut report)?;
        report.elapsed = start.elapsed();

        if self.is_cancelled() {
            log::info!(
                "Scan of {} cancelled after {} of {} file(s)",
                root.display(),
                report.hashed + report.failed,
                stale.len()
            );
            return Err(ScanError::Cancelled);
        }

        self.send_progress(ScanProgress {
            files_processed: stale.len(),
            total_files: stale.len(),
            current_file: "Scan complete".to_string(),
            phase: ScanPhase::Complete,
        });

        log::info!(
            "Scanned {}: {} found, {} unchanged, {} hashed, {} failed",
            root.display(),
            report.discovered,
            report.skipped,
            report.hashed,
            report.failed
        );
        Ok(report)
    }

    fn discover_files(&self, store: &IndexStore) -> Result<Vec<Candidate>, ScanError> {
        let mut discovered = Vec::new();

        let walker = WalkDir::new(store.root())
            .follow_links(self.options.follow_links)
            .sort_by_file_name();

        for entry in walker {
            if self.is_cancelled() {
                return Err(ScanError::Cancelled);
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            if !self.options.is_supported(path) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    log::warn!("Could not read metadata for {}: {}", path.display(), e);
                    continue;
                }
            };
            let modified = match modified_marker(&metadata) {
                Ok(modified) => modified,
                Err(e) => {
                    log::warn!("No modification time for {}: {}", path.display(), e);
                    continue;
                }
            };

            discovered.push(Candidate {
                path: path.to_path_buf(),
                key: store.key_for(path)?,
                modified,
                size: metadata.len(),
            });
        }

        Ok(discovered)
    }

    fn hash_files(
        &self,
        store: &mut IndexStore,
        files: &[Candidate],
        report: &mut ScanReport,
    ) -> Result<(), ScanError> {
        if files.is_empty() {
            return Ok(());
        }

        let mut builder = rayon::ThreadPoolBuilder::new();
        if self.options.jobs > 0 {
            builder = builder.num_threads(self.options.jobs);
        }
        let pool = builder.build()?;

        let fingerprinter = Fingerprinter::new(store.config());
        let (sender, receiver) = mpsc::channel::<(usize, Result<Fingerprint, DecodeError>)>();
        let total_files = files.len();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                pool.install(|| {
                    files
                        .par_iter()
                        .enumerate()
                        .for_each_with(sender, |sender, (index, candidate)| {
                            if self.is_cancelled() {
                                return;
                            }
                            let result = fingerprint_file(&fingerprinter, &candidate.path);
                            // The receiver outlives every worker.
                            let _ = sender.send((index, result));
                        });
                });
            });

            for (processed, (index, result)) in receiver.into_iter().enumerate() {
                let candidate = &files[index];
                match result {
                    Ok(fingerprint) => {
                        log::debug!("Hashed {} -> {}", candidate.key, fingerprint);
                        store.upsert(candidate.key.clone(), candidate.modified, fingerprint);
                        report.hashed += 1;
                        report.bytes += candidate.size;
                    }
                    Err(e) => {
                        log::warn!("Skipping {}: {}", candidate.path.display(), e);
                        report.failed += 1;
                    }
                }

                self.send_progress(ScanProgress {
                    files_processed: processed + 1,
                    total_files,
                    current_file: candidate.path.to_string_lossy().to_string(),
                    phase: ScanPhase::Hashing,
                });
            }
        });

        Ok(())
    }
}

/// Modification time of a file in whole seconds since the Unix epoch.
pub fn modified_marker(metadata: &Metadata) -> std::io::Result<i64> {
    let modified: DateTime<Utc> = metadata.modified()?.into();
    Ok(modified.timestamp())
}
