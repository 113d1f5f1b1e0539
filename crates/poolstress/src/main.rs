//! Pool stress driver - many threads mounting one pinned statement

mod memory;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use stmtpool::{StatementPool, StatsSnapshot};
use tracing::{error, info, warn};

use crate::memory::{MemoryConnection, MemoryStatement};

const PINNED_KEY: &str = "q1";
const PINNED_QUERY: &str = "SELECT * FROM one";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of mounting threads
    #[arg(short, long, default_value_t = 64)]
    threads: usize,

    /// Mounts performed by each thread
    #[arg(short, long, default_value_t = 10_000)]
    mounts: usize,

    /// Pool capacity (number of statements, 0 for unbounded)
    #[arg(short, long, default_value_t = 10)]
    capacity: usize,

    /// Statement TTL in milliseconds, 0 for no expiry
    #[arg(long, default_value_t = 100)]
    ttl_ms: u64,

    /// Statements built after the pinned one to force evictions
    #[arg(short, long, default_value_t = 32)]
    filler: usize,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Default)]
struct Counters {
    succeeded: AtomicU64,
    mismatched: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Serialize)]
struct Report {
    threads: usize,
    mounts_per_thread: usize,
    succeeded: u64,
    mismatched: u64,
    failed: u64,
    pinned_statement_id: u64,
    pinned_prepares: usize,
    total_prepares: usize,
    pool_len: usize,
    elapsed_ms: u128,
    mounts_per_sec: f64,
    stats: StatsSnapshot,
}

impl Report {
    fn is_clean(&self) -> bool {
        self.mismatched == 0 && self.failed == 0 && self.pinned_prepares == 1
    }
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!("Starting poolstress v{}", env!("CARGO_PKG_VERSION"));
    info!("Pool capacity: {}, TTL: {}ms", args.capacity, args.ttl_ms);
    info!("Threads: {}, mounts per thread: {}", args.threads, args.mounts);

    let pool: Arc<StatementPool<MemoryStatement>> = Arc::new(StatementPool::new(
        args.capacity,
        Duration::from_millis(args.ttl_ms),
    ));
    let conn = MemoryConnection::new();

    let pinned = pool
        .build(PINNED_KEY, PINNED_QUERY, &conn, true, true)
        .context("failed to build pinned statement")?;
    let expected = Arc::clone(pinned.statement());

    for i in 0..args.filler {
        let key = format!("filler-{}", i);
        let query = format!("SELECT * FROM t{}", i);
        pool.build(&key, &query, &conn, true, false)
            .with_context(|| format!("failed to build {}", key))?;
    }
    info!("Built {} filler statements, pool holds {}", args.filler, pool.len());

    if args.ttl_ms > 0 {
        // Give the sweeper a full TTL to expire the filler
        thread::sleep(Duration::from_millis(args.ttl_ms * 2));
    }

    let counters = Arc::new(Counters::default());
    let start = Instant::now();

    let handles: Vec<_> = (0..args.threads)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let expected = Arc::clone(&expected);
            let counters = Arc::clone(&counters);
            let mounts = args.mounts;
            thread::spawn(move || {
                for _ in 0..mounts {
                    match pool.mount(PINNED_KEY) {
                        Ok(stmt) if Arc::ptr_eq(&stmt, &expected) => {
                            counters.succeeded.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(_) => {
                            counters.mismatched.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            warn!("Mount failed: {}", e);
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        if handle.join().is_err() {
            bail!("mount thread panicked");
        }
    }
    let elapsed = start.elapsed();

    let succeeded = counters.succeeded.load(Ordering::Relaxed);
    let report = Report {
        threads: args.threads,
        mounts_per_thread: args.mounts,
        succeeded,
        mismatched: counters.mismatched.load(Ordering::Relaxed),
        failed: counters.failed.load(Ordering::Relaxed),
        pinned_statement_id: expected.id(),
        pinned_prepares: conn.prepared_count(PINNED_QUERY),
        total_prepares: conn.total_prepared(),
        pool_len: pool.len(),
        elapsed_ms: elapsed.as_millis(),
        mounts_per_sec: succeeded as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        stats: pool.stats().snapshot(),
    };

    pool.unmount(PINNED_KEY);
    pool.close();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Execution time:   {:.3}s", elapsed.as_secs_f64());
        println!("Mounts succeeded: {}", report.succeeded);
        println!("Mounts mismatched: {}", report.mismatched);
        println!("Mounts failed:    {}", report.failed);
        println!("Pinned prepares:  {}", report.pinned_prepares);
        println!("Pool size:        {}", report.pool_len);
        println!("Throughput:       {:.0} mounts/s", report.mounts_per_sec);
        println!("Cache hit ratio:  {:.3}", report.stats.hit_ratio);
    }

    if !report.is_clean() {
        error!(
            "Stress run failed: {} mismatched, {} failed, {} prepares of the pinned query",
            report.mismatched, report.failed, report.pinned_prepares
        );
        bail!("stress run failed");
    }

    info!("Stress run completed");
    Ok(())
}
