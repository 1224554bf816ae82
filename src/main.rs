//! Rangecache Workload Driver
//!
//! Runs a concurrent, skewed read/populate/invalidate workload against one
//! read cache and prints the resulting statistics as JSON.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Workload Driver                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Worker 0   │    │   Worker 1   │ .. │   Worker N   │       │
//! │  │ query / add  │    │ query / add  │    │ query / add  │       │
//! │  │ remove_range │    │ remove_range │    │ remove_range │       │
//! │  └──────┬───────┘    └──────┬───────┘    └──────┬───────┘       │
//! │         └───────────────────┼───────────────────┘               │
//! │                             ▼                                   │
//! │                     ReadCache (shared)                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use clap::Parser;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rangecache::cache::{
    CacheStats, EvictionStatus, FileId, MetricsSnapshot, ReadCache, ReadCacheConfig,
};
use rangecache::Result;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Rangecache - LRU-K byte-range read cache workload driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Total cache budget in bytes
    #[arg(long, env = "CACHE_TOTAL_SIZE", default_value = "67108864")]
    total_cache_size: u64,

    /// Burst tier target in bytes
    #[arg(long, env = "CACHE_BURST_TARGET_SIZE", default_value = "16777216")]
    target_burst_cache_size: u64,

    /// Correlated reference window in seconds
    #[arg(long, env = "CACHE_CORRELATED_TIMEOUT_SECONDS", default_value = "0")]
    correlated_timeout_seconds: u64,

    /// Concurrent workers
    #[arg(long, env = "WORKLOAD_WORKERS", default_value = "8")]
    workers: usize,

    /// Operations per worker
    #[arg(long, env = "WORKLOAD_OPERATIONS", default_value = "100000")]
    operations: u64,

    /// Distinct files
    #[arg(long, env = "WORKLOAD_FILES", default_value = "16")]
    files: usize,

    /// Ranges per file
    #[arg(long, env = "WORKLOAD_RANGES_PER_FILE", default_value = "1024")]
    ranges_per_file: u64,

    /// Size of each cached range in bytes
    #[arg(long, env = "WORKLOAD_RANGE_SIZE", default_value = "4096")]
    range_size: usize,

    /// Share of accesses going to the hot set (0.0 - 1.0)
    #[arg(long, env = "WORKLOAD_HOT_RATIO", default_value = "0.8", value_parser = parse_ratio)]
    hot_ratio: f64,

    /// Share of operations that invalidate instead of read (0.0 - 1.0)
    #[arg(long, env = "WORKLOAD_INVALIDATE_RATIO", default_value = "0.01", value_parser = parse_ratio)]
    invalidate_ratio: f64,

    /// Random seed (derived from the clock when absent)
    #[arg(long, env = "WORKLOAD_SEED")]
    seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

/// Probability argument: a finite number within [0.0, 1.0]
fn parse_ratio(value: &str) -> std::result::Result<f64, String> {
    let ratio: f64 = value
        .parse()
        .map_err(|e| format!("invalid ratio '{value}': {e}"))?;
    if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
        return Err(format!("ratio must be between 0.0 and 1.0, got '{value}'"));
    }
    Ok(ratio)
}

// =============================================================================
// Report
// =============================================================================

#[derive(Debug, Default, Serialize)]
struct WorkerReport {
    queries: u64,
    adds: u64,
    invalidations: u64,
    watched_evicted: u64,
    watched_canceled: u64,
}

#[derive(Debug, Serialize)]
struct Report {
    config: ReadCacheConfig,
    elapsed_ms: u128,
    workers: Vec<WorkerReport>,
    stats: CacheStats,
    metrics: MetricsSnapshot,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting rangecache workload");
    info!("  Total cache size: {} bytes", args.total_cache_size);
    info!("  Burst target: {} bytes", args.target_burst_cache_size);
    info!("  Correlated timeout: {}s", args.correlated_timeout_seconds);
    info!("  Workers: {}", args.workers);
    info!("  Operations per worker: {}", args.operations);

    let config = ReadCacheConfig::new(
        args.total_cache_size,
        args.target_burst_cache_size,
        args.correlated_timeout_seconds,
    );
    let cache = Arc::new(ReadCache::new(config.clone())?);

    let files: Arc<Vec<FileId>> = Arc::new((0..args.files.max(1)).map(|_| FileId::new_v4()).collect());
    let base_seed = args.seed.unwrap_or_else(|| rand::thread_rng().gen());
    let args = Arc::new(args);

    let started = Instant::now();
    let handles: Vec<_> = (0..args.workers.max(1))
        .map(|worker| {
            let cache = Arc::clone(&cache);
            let files = Arc::clone(&files);
            let args = Arc::clone(&args);
            let seed = base_seed.wrapping_add(worker as u64);
            tokio::spawn(async move { run_worker(worker, cache, files, args, seed).await })
        })
        .collect();

    let mut workers = Vec::with_capacity(handles.len());
    for (worker, outcome) in join_all(handles).await.into_iter().enumerate() {
        match outcome {
            Ok(Ok(report)) => workers.push(report),
            Ok(Err(e)) => error!(worker, "Worker failed: {}", e),
            Err(e) => error!(worker, "Worker task panicked: {}", e),
        }
    }
    let elapsed = started.elapsed();

    cache.verify_invariants()?;
    info!(
        "Workload finished in {:?}, hit ratio {:.3}",
        elapsed,
        cache.metrics().hit_ratio()
    );

    let report = Report {
        config,
        elapsed_ms: elapsed.as_millis(),
        workers,
        stats: cache.stats(),
        metrics: cache.metrics().snapshot(),
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("Failed to encode report: {}", e),
    }

    Ok(())
}

// =============================================================================
// Worker
// =============================================================================

async fn run_worker(
    worker: usize,
    cache: Arc<ReadCache>,
    files: Arc<Vec<FileId>>,
    args: Arc<Args>,
    seed: u64,
) -> Result<WorkerReport> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut report = WorkerReport::default();
    let range_size = args.range_size.max(1) as u64;
    let ranges = args.ranges_per_file.max(1);
    let hot_ranges = (ranges / 10).max(1);
    let payload = Bytes::from(vec![worker as u8; range_size as usize]);

    // Watch one hot range for the whole run
    let watched_file = files[worker % files.len()];
    cache.add(watched_file, 0, payload.clone())?;
    let waiter = cache.allocate_register_for_eviction()?;
    let watched = cache.register_for_eviction_notified(&waiter, watched_file, 0)?;

    for op in 0..args.operations {
        let file_id = files[rng.gen_range(0..files.len())];
        let index = if rng.gen_bool(args.hot_ratio) {
            rng.gen_range(0..hot_ranges)
        } else {
            rng.gen_range(0..ranges)
        };
        let offset = index * range_size;

        if rng.gen_bool(args.invalidate_ratio) {
            let span = rng.gen_range(1..=8) * range_size;
            cache.remove_range(file_id, offset, span);
            report.invalidations += 1;
        } else {
            report.queries += 1;
            if cache.query(file_id, offset).is_none() {
                cache.add(file_id, offset, payload.clone())?;
                report.adds += 1;
            }
        }

        if waiter.is_registered() && op % 64 == 0 {
            cache.touch(&waiter);
        }
        if op % 1024 == 0 {
            tokio::task::yield_now().await;
        }
    }

    cache.cancel(&waiter);
    match tokio::time::timeout(Duration::from_secs(5), watched).await {
        Ok(Ok(EvictionStatus::Evicted)) => report.watched_evicted += 1,
        Ok(Ok(EvictionStatus::Canceled)) => report.watched_canceled += 1,
        Ok(Err(_)) => warn!(worker, "Eviction waiter dropped without completing"),
        Err(_) => warn!(worker, "Timed out waiting for eviction waiter"),
    }

    Ok(report)
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so the JSON report on stdout stays parseable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Tests
// =============================================================================
