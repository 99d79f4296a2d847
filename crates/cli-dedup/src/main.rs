mod command;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dedup::scan::{scan_library, ScanResult};
use dedup::{
    open_metadata_store, CompressionStats, DecisionEngine, DedupConfig, DispatchOptions,
    Dispatcher, FsItemStore, ItemId, ProcessingRegistry, SystemClock, Trigger, WorkItem,
};
use humansize::{format_size, DECIMAL};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::command::CommandCompressor;

const QUEUE_CAPACITY: usize = 256;

/// Photo compression daemon that never compresses the same photo twice
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Scan once, wait for the queue to drain and exit
    #[arg(long)]
    once: bool,

    /// Only report what would be compressed
    #[arg(long)]
    dry_run: bool,

    /// Photos to compress right away, even with automatic processing off
    paths: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if args.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.format_timestamp_secs().init();

    let cfg = DedupConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    info!("Photo compression daemon starting");
    info!("Configuration loaded:");
    info!("  Library roots: {:?}", cfg.library_roots);
    info!("  App directory: {}", cfg.app_dir_name);
    info!("  Output directory: {:?}", cfg.output_dir);
    info!("  Quality: {:?} ({})", cfg.quality, cfg.quality.value());
    info!("  Replace in place: {}", cfg.replace_in_place);
    info!("  Marker storage: {:?}", cfg.marker_storage);
    info!("  Optimum size: {}", format_size(cfg.optimum_size_bytes, DECIMAL));
    info!("  Staleness tolerance: {}s", cfg.staleness_tolerance_secs);
    info!("  Scan interval: {}s", cfg.scan_interval_secs);
    info!("  Max concurrent: {}", cfg.max_concurrent);

    for root in &cfg.library_roots {
        if root.exists() {
            info!("  ✓ Library root exists: {}", root.display());
        } else {
            warn!("  ✗ Library root does not exist: {}", root.display());
        }
    }

    let items = Arc::new(FsItemStore::new(cfg.output_dir.clone()));
    let metadata = open_metadata_store(cfg.marker_storage);
    let engine = Arc::new(DecisionEngine::from_config(&cfg, items, metadata.clone()));

    if args.dry_run {
        return dry_run(&cfg, &engine, &args.paths).await;
    }

    let clock = Arc::new(SystemClock);
    let registry = Arc::new(ProcessingRegistry::with_clock(clock.clone(), cfg.in_flight_ttl()));
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        engine,
        metadata,
        Arc::new(CommandCompressor::from_config(&cfg)),
        clock,
        DispatchOptions::from_config(&cfg),
    ));

    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let worker = tokio::spawn(Arc::clone(&dispatcher).run(rx, cfg.max_concurrent));

    let pruner = {
        let registry = registry.clone();
        let every = Duration::from_secs(cfg.prune_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let removed = registry.prune_expired();
                if removed > 0 {
                    debug!("Pruned {} expired registry entries", removed);
                }
            }
        })
    };

    for path in &args.paths {
        let item = WorkItem::new(ItemId::from_path(path), Trigger::Manual);
        tx.send(item).await.context("Dispatcher stopped unexpectedly")?;
    }

    loop {
        info!("Starting library scan...");
        let scan_cfg = cfg.clone();
        let results = tokio::task::spawn_blocking(move || scan_library(&scan_cfg))
            .await
            .context("Scan task panicked")?
            .context("Failed to scan library")?;

        let mut queued = 0usize;
        for result in results {
            match result {
                ScanResult::Candidate(id, size) => {
                    debug!("Queueing {} ({})", id, format_size(size, DECIMAL));
                    tx.send(WorkItem::new(id, Trigger::PeriodicScan))
                        .await
                        .context("Dispatcher stopped unexpectedly")?;
                    queued += 1;
                }
                ScanResult::Skipped(path, reason) => {
                    debug!("Skipped {}: {}", path.display(), reason);
                }
            }
        }
        info!("Queued {} candidate(s)", queued);

        if args.once {
            break;
        }

        log_summary(&dispatcher.take_stats());
        info!("Sleeping for {} seconds before next scan", cfg.scan_interval_secs);
        tokio::time::sleep(Duration::from_secs(cfg.scan_interval_secs)).await;
    }

    drop(tx);
    if let Err(e) = worker.await {
        error!("Dispatcher task failed: {}", e);
    }
    pruner.abort();

    log_summary(&dispatcher.take_stats());
    Ok(())
}

async fn dry_run(cfg: &DedupConfig, engine: &Arc<DecisionEngine>, paths: &[PathBuf]) -> Result<()> {
    let mut targets: Vec<(ItemId, bool)> =
        paths.iter().map(|p| (ItemId::from_path(p), true)).collect();

    if paths.is_empty() {
        let scan_cfg = cfg.clone();
        let results = tokio::task::spawn_blocking(move || scan_library(&scan_cfg))
            .await
            .context("Scan task panicked")?
            .context("Failed to scan library")?;
        targets.extend(results.into_iter().filter_map(|r| match r {
            ScanResult::Candidate(id, _) => Some((id, false)),
            ScanResult::Skipped(..) => None,
        }));
    }

    let engine = Arc::clone(engine);
    let verdicts = tokio::task::spawn_blocking(move || {
        targets
            .into_iter()
            .map(|(id, force)| {
                let decision = engine.evaluate(&id, force);
                (id, decision)
            })
            .collect::<Vec<_>>()
    })
    .await
    .context("Evaluation task panicked")?;

    let mut by_reason: BTreeMap<String, usize> = BTreeMap::new();
    for (id, decision) in &verdicts {
        if decision.processing_required {
            info!("would compress {} ({})", id, decision.detail);
            *by_reason.entry("would compress".to_string()).or_default() += 1;
        } else {
            match decision.marker.compressed_at_datetime() {
                Some(at) => info!(
                    "skip {}: {} ({}, compressed {})",
                    id, decision.reason, decision.detail, at
                ),
                None => info!("skip {}: {} ({})", id, decision.reason, decision.detail),
            }
            *by_reason.entry(decision.reason.to_string()).or_default() += 1;
        }
    }

    info!("Dry run over {} photo(s):", verdicts.len());
    for (reason, count) in by_reason {
        info!("  {}: {}", reason, count);
    }
    Ok(())
}

fn log_summary(stats: &CompressionStats) {
    if stats.processed == 0 {
        return;
    }
    info!(
        "Processed {} photo(s): {} compressed, {} skipped, {} failed",
        stats.processed, stats.success, stats.skipped, stats.failed
    );
    for (reason, count) in &stats.skipped_reasons {
        info!("  skipped ({}): {}", reason, count);
    }
    if stats.success > 0 {
        info!(
            "  {} -> {}, saved {} ({:.1}%)",
            format_size(stats.original_size_total, DECIMAL),
            format_size(stats.compressed_size_total, DECIMAL),
            format_size(stats.saved_bytes(), DECIMAL),
            stats.saved_percent()
        );
    }
}
