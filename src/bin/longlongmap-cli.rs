//! longlongmap CLI
//!
//! Loads a synthetic node-id stream into a map variant and reports write and
//! read throughput, or estimates the footprint of a variant up front.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use longlongmap::{
    estimate_usage, LongLongMap, LongMap, MapConfig, MapKind, StorageKind,
    MISSING_VALUE,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::process;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    /// Parallel key/value columns, binary search
    SortedTable,
    /// Paged values, O(1) lookup
    SparseArray,
    /// Sparse file addressed by key
    Direct,
}

impl From<KindArg> for MapKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::SortedTable => MapKind::SortedTable,
            KindArg::SparseArray => MapKind::SparseArray,
            KindArg::Direct => MapKind::Direct,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageArg {
    Ram,
    Mmap,
}

impl From<StorageArg> for StorageKind {
    fn from(storage: StorageArg) -> Self {
        match storage {
            StorageArg::Ram => StorageKind::Ram,
            StorageArg::Mmap => StorageKind::Mmap,
        }
    }
}

#[derive(Parser)]
#[command(name = "longlongmap-cli")]
#[command(about = "Benchmark and size node ID maps", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a synthetic ascending key stream, then look every key up
    Bench {
        #[arg(long, value_enum, default_value = "sparse-array")]
        kind: KindArg,

        #[arg(long, value_enum, default_value = "ram")]
        storage: StorageArg,

        /// Directory for backing files (mmap storage and direct)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Load settings from a JSON config instead of the flags above
        #[arg(long, conflicts_with_all = ["kind", "storage"])]
        config: Option<PathBuf>,

        /// Number of keys to write
        #[arg(long, default_value = "10000000")]
        entries: u64,

        /// Average gap between consecutive keys
        #[arg(long, default_value = "2")]
        stride: u64,

        /// log2 of keys per page (sparse-array, direct)
        #[arg(long, default_value = "10")]
        page_bits: u32,

        /// Shuffle lookup keys instead of reading them in write order
        #[arg(long)]
        shuffle: bool,

        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Print the expected memory and disk footprint of a variant
    Estimate {
        #[arg(long, value_enum, default_value = "sparse-array")]
        kind: KindArg,

        #[arg(long, value_enum, default_value = "ram")]
        storage: StorageArg,

        #[arg(long)]
        entries: u64,

        #[arg(long)]
        max_key: u64,

        #[arg(long, default_value = "10")]
        page_bits: u32,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Bench {
            kind,
            storage,
            path,
            config,
            entries,
            stride,
            page_bits,
            shuffle,
            seed,
        } => {
            let config = match config {
                Some(file) => MapConfig::from_json_file(&file)
                    .with_context(|| format!("failed to load config {}", file.display()))?,
                None => {
                    let mut config = MapConfig::new(kind.into())
                        .with_storage(storage.into())
                        .with_page_bits(page_bits);
                    if let Some(path) = path {
                        config = config.with_path(path);
                    }
                    config
                }
            };
            bench(&config, entries, stride, shuffle, seed)
        }
        Command::Estimate {
            kind,
            storage,
            entries,
            max_key,
            page_bits,
        } => {
            let config = MapConfig::new(kind.into())
                .with_storage(storage.into())
                .with_page_bits(page_bits);
            let estimate = estimate_usage(&config, entries, max_key);
            println!("kind:    {}", config.kind);
            println!("storage: {}", config.storage);
            println!("memory:  {}", format_bytes(estimate.memory_bytes));
            println!("disk:    {}", format_bytes(estimate.disk_bytes));
            Ok(())
        }
    }
}

fn bench(config: &MapConfig, entries: u64, stride: u64, shuffle: bool, seed: u64) -> anyhow::Result<()> {
    if stride == 0 {
        bail!("stride must be at least 1");
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut map = LongLongMap::new(config).context("failed to create map")?;

    let mut keys = Vec::with_capacity(entries as usize);
    let mut values = Vec::with_capacity(entries as usize);
    let mut key = 0i64;

    let started = Instant::now();
    for _ in 0..entries {
        key += rng.gen_range(1..=2 * stride - 1) as i64;
        let value = rng.gen_range(MISSING_VALUE + 1..=i64::MAX);
        map.put(key, value)
            .with_context(|| format!("put failed at key {}", key))?;
        keys.push(key);
        values.push(value);
    }
    let write_elapsed = started.elapsed();

    let mut order: Vec<usize> = (0..keys.len()).collect();
    if shuffle {
        order.shuffle(&mut rng);
    }
    let lookup: Vec<i64> = order.iter().map(|&i| keys[i]).collect();

    let started = Instant::now();
    let found = map.multi_get(&lookup);
    let read_elapsed = started.elapsed();

    let mismatches = order
        .iter()
        .zip(&found)
        .filter(|&(&i, &value)| values[i] != value)
        .count();

    println!("kind:        {} ({})", config.kind, config.storage);
    println!("entries:     {}", map.len());
    println!("max key:     {}", key);
    println!(
        "write:       {:.2?} ({:.0} puts/s)",
        write_elapsed,
        entries as f64 / write_elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!(
        "read:        {:.2?} ({:.0} gets/s)",
        read_elapsed,
        lookup.len() as f64 / read_elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("memory:      {}", format_bytes(map.estimate_memory_usage_bytes()));
    println!("disk:        {}", format_bytes(map.disk_usage_bytes()));

    map.close().context("failed to close map")?;

    if mismatches > 0 {
        bail!("{} of {} lookups returned the wrong value", mismatches, lookup.len());
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
