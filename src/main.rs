use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imghash::config::{self, ScanOptions};
use imghash::scanner::{ScanPhase, Scanner};
use imghash::{fingerprint_file, Fingerprint, Fingerprinter, HashConfig, IndexStore, LumaWeights};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "imghash", version, about = "Find visually similar images")]
struct Cli {
    /// Location of the hash index (default: <data dir>/imghash/index.json)
    #[arg(long, global = true, value_name = "FILE", env = config::DB_ENV)]
    db: Option<PathBuf>,

    /// Log per-file decisions
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Hash every image under a directory and update the index
    Index {
        /// Directory to index
        #[arg(value_name = "DIR")]
        path: PathBuf,
        /// Worker threads (0 = one per CPU)
        #[arg(short, long, default_value_t = 0)]
        jobs: usize,
        /// Only index these extensions (comma separated)
        #[arg(long = "ext", value_delimiter = ',', value_name = "EXT")]
        extensions: Vec<String>,
        /// Follow symbolic links while walking
        #[arg(long)]
        follow_links: bool,
        /// Luminance weighting for new indexes
        #[arg(long, default_value_t = LumaWeights::Rec601)]
        luma: LumaWeights,
    },

    /// List indexed images similar to a query image
    Find {
        /// Query image
        #[arg(value_name = "IMAGE", required_unless_present = "fingerprint")]
        image: Option<PathBuf>,
        /// Query with a known fingerprint instead of an image
        #[arg(long, conflicts_with = "image", value_name = "HEX")]
        fingerprint: Option<Fingerprint>,
        /// Maximum Hamming distance, 0 (identical) to 64 (everything)
        #[arg(short, long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(0..=64))]
        dist: u32,
    },

    /// Print the fingerprint of each image
    Hash {
        #[arg(value_name = "IMAGE", required = true)]
        images: Vec<PathBuf>,
        #[arg(long, default_value_t = LumaWeights::Rec601)]
        luma: LumaWeights,
    },

    /// Print the distance between two images
    Compare {
        first: PathBuf,
        second: PathBuf,
        #[arg(long, default_value_t = LumaWeights::Rec601)]
        luma: LumaWeights,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Index {
            path,
            jobs,
            extensions,
            follow_links,
            luma,
        } => {
            let root = path
                .canonicalize()
                .with_context(|| format!("Cannot index {}", path.display()))?;
            let db_path = config::resolve_db_path(cli.db)?;

            let mut options = ScanOptions {
                jobs,
                follow_links,
                ..ScanOptions::default()
            };
            if !extensions.is_empty() {
                options = options.with_extensions(&extensions);
            }

            let hash_config = HashConfig::default().with_luma(luma);
            let mut store = IndexStore::open_or_create(&db_path, &root, hash_config)
                .with_context(|| format!("Failed to open index {}", db_path.display()))?;

            println!("▶ Indexing {}", root.display());
            index_directory(&mut store, &db_path, options)?;
        }

        Commands::Find {
            image,
            fingerprint,
            dist,
        } => {
            let db_path = config::resolve_db_path(cli.db)?;
            let store = IndexStore::load(&db_path)
                .with_context(|| format!("Failed to load index {}", db_path.display()))?;

            let query = match (fingerprint, image) {
                (Some(fingerprint), _) => fingerprint,
                (None, Some(image)) => {
                    let fingerprinter = Fingerprinter::new(store.config());
                    fingerprint_file(&fingerprinter, &image)
                        .with_context(|| format!("Failed to hash {}", image.display()))?
                }
                (None, None) => anyhow::bail!("Pass an image or --fingerprint"),
            };

            let matches = store.find(query, dist);
            if matches.is_empty() {
                println!("No matches were found.");
            } else {
                for m in matches {
                    println!("{} {}", m.distance, store.resolve(&m.key).display());
                }
            }
        }

        Commands::Hash { images, luma } => {
            let fingerprinter = Fingerprinter::new(HashConfig::default().with_luma(luma));
            let mut failed = 0;
            for image in &images {
                match fingerprint_file(&fingerprinter, image) {
                    Ok(fingerprint) => println!("{}  {}", fingerprint, image.display()),
                    Err(err) => {
                        eprintln!("⚠️  {}", err);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{} of {} image(s) could not be hashed", failed, images.len());
            }
        }

        Commands::Compare {
            first,
            second,
            luma,
        } => {
            let fingerprinter = Fingerprinter::new(HashConfig::default().with_luma(luma));
            let a = hash_one(&fingerprinter, &first)?;
            let b = hash_one(&fingerprinter, &second)?;
            println!("{}  {}", a, first.display());
            println!("{}  {}", b, second.display());
            println!("distance: {}", a.distance(b));
        }
    }

    Ok(())
}

/// Scan `store`'s root, then save whatever was indexed, even if the scan
/// stopped early.
fn index_directory(store: &mut IndexStore, db_path: &Path, options: ScanOptions) -> Result<()> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{bar:30}] {pos}/{len} {wide_msg}",
    )?);
    bar.enable_steady_tick(Duration::from_millis(100));

    let progress_bar = bar.clone();
    let scanner = Scanner::new(options).with_progress(Box::new(move |progress| {
        match progress.phase {
            ScanPhase::Discovery => progress_bar.set_message("Scanning for images…"),
            ScanPhase::Hashing => {
                progress_bar.set_length(progress.total_files as u64);
                progress_bar.set_position(progress.files_processed as u64);
                progress_bar.set_message(progress.current_file);
            }
            ScanPhase::Complete => progress_bar.set_message("Done"),
        }
    }));

    let outcome = benchmark("indexing", || scanner.scan(store));
    bar.finish_and_clear();

    store
        .save(db_path)
        .with_context(|| format!("Failed to save index {}", db_path.display()))?;
    let report = outcome.context("Indexing failed")?;

    println!(
        "✅ {} image(s) ({}) hashed, {} unchanged, {} failed",
        report.hashed,
        HumanBytes(report.bytes),
        report.skipped,
        report.failed
    );
    println!("   Index {} holds {} image(s)", db_path.display(), store.len());
    Ok(())
}

fn hash_one(fingerprinter: &Fingerprinter, path: &Path) -> Result<Fingerprint> {
    fingerprint_file(fingerprinter, path).with_context(|| format!("Failed to hash {}", path.display()))
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_find_distance_range() {
        assert!(Cli::try_parse_from(["imghash", "find", "q.png", "--dist", "64"]).is_ok());
        assert!(Cli::try_parse_from(["imghash", "find", "q.png", "--dist", "65"]).is_err());
    }

    #[test]
    fn test_find_by_fingerprint() {
        let cli = Cli::try_parse_from(["imghash", "find", "--fingerprint", "0xff"]).unwrap();
        match cli.command {
            Commands::Find {
                image, fingerprint, ..
            } => {
                assert!(image.is_none());
                assert_eq!(fingerprint, Some(Fingerprint::from_bits(0xff)));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["imghash", "find"]).is_err());
    }
}
