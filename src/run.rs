//! Run orchestration.
//!
//! Coordinates a full run: seed table → prefetch → sequential row
//! processing → workbook, failed-URL file and statistics. The content cache
//! lives exactly as long as the run and is deleted at the end unless
//! `cache.keep` is set.

use anyhow::{Context, Result};
use chrono::Local;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::cache::ContentCache;
use crate::config::Config;
use crate::fetch::{Fetcher, HttpTransport, Transport};
use crate::models::{Modified, ResultRow};
use crate::prefetch::prefetch;
use crate::process::{RowProcessor, RunContext};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::sources;
use crate::stats::RunStats;
use crate::workbook::{self, Sheet};

pub const SHEET_RESULTS: &str = "Resultados";
pub const SHEET_MODIFICATIONS: &str = "Modificacion";
pub const SHEET_AWARDS: &str = "Adjudicacion";

/// `licita run` against the live portal.
pub async fn run(
    config: &Config,
    limit: Option<usize>,
    progress: &dyn ProgressReporter,
) -> Result<RunStats> {
    let transport = Arc::new(HttpTransport::new(&config.fetch)?);
    run_with_transport(config, transport, limit, progress).await
}

pub async fn run_with_transport(
    config: &Config,
    transport: Arc<dyn Transport>,
    limit: Option<usize>,
    progress: &dyn ProgressReporter,
) -> Result<RunStats> {
    let started_at = Local::now();
    let started = Instant::now();
    let limit = config.input.effective_limit(limit);
    let seeds = sources::read_seeds(config, limit).await?;
    if seeds.is_empty() {
        error!("No rows found in table '{}'", config.input.table);
        eprintln!(
            "Error: no rows found in table '{}' of {}",
            config.input.table,
            config.input.db.display()
        );
        return Ok(RunStats::default());
    }
    info!("Processing {} seed rows", seeds.len());

    let cache = ContentCache::open(&config.cache.path).await?;
    let fetcher = Fetcher::new(transport, cache.clone(), &config.fetch);

    let seed_urls: Vec<String> = seeds.iter().map(|s| s.detail_url.clone()).collect();
    let report = prefetch(&fetcher, &seed_urls, progress).await;
    info!(
        "Prefetch complete: {} fetched, {} failed",
        report.fetched(),
        report.failed()
    );

    let processor = RowProcessor::new(&fetcher);
    let mut ctx = RunContext::default();
    let mut results: Vec<ResultRow> = Vec::with_capacity(seeds.len());
    let total = seeds.len() as u64;
    for (i, seed) in seeds.iter().enumerate() {
        results.push(processor.process(seed, &mut ctx).await);
        progress.report(ProgressEvent::Processing {
            n: i as u64 + 1,
            total,
        });
    }

    let written = write_outputs(config, &results, &ctx, &fetcher.failed_urls());

    let stats = RunStats {
        started_at: Some(started_at),
        cache: cache.stats(),
        fetch: fetcher.stats(),
        prefetch: Some(report),
        rows: results.len(),
        modified_rows: results.iter().filter(|r| r.modified == Modified::Yes).count(),
        error_rows: results.iter().filter(|r| r.modified.is_error()).count(),
        modification_records: ctx.modifications.len(),
        award_records: ctx.awards.len(),
        elapsed: started.elapsed(),
    };
    stats.print();

    drop(fetcher);
    finish_cache(cache, config.cache.keep).await;

    written?;
    println!("run complete");
    println!("  rows processed: {}", results.len());
    println!("  workbook: {}", config.output.workbook.display());
    Ok(stats)
}

fn write_outputs(
    config: &Config,
    results: &[ResultRow],
    ctx: &RunContext,
    failed_urls: &[String],
) -> Result<()> {
    let sheets = vec![
        Sheet::new(SHEET_RESULTS, results.iter().map(ResultRow::to_row).collect()),
        Sheet::new(
            SHEET_MODIFICATIONS,
            ctx.modifications.iter().map(|r| r.to_row()).collect(),
        ),
        Sheet::new(SHEET_AWARDS, ctx.awards.iter().map(|r| r.to_row()).collect()),
    ];
    write_results(
        &config.output.workbook,
        &sheets,
        &config.output.failed_urls,
        failed_urls,
    )
}

/// Write the failed-URL list and the workbook. Neither write depends on the
/// other; a workbook error wins when both fail.
pub(crate) fn write_results(
    workbook_path: &Path,
    sheets: &[Sheet],
    failed_path: &Path,
    failed_urls: &[String],
) -> Result<()> {
    let failed = write_failed_urls(failed_path, failed_urls);
    if let Err(e) = &failed {
        error!("{:#}", e);
    }

    workbook::write_workbook(workbook_path, sheets)
        .with_context(|| format!("Failed to write workbook: {}", workbook_path.display()))?;
    info!("Results saved to {}", workbook_path.display());

    failed
}

/// One URL per line; nothing is written when there were no failures.
pub fn write_failed_urls(path: &Path, urls: &[String]) -> Result<()> {
    if urls.is_empty() {
        return Ok(());
    }
    let mut body = urls.join("\n");
    body.push('\n');
    std::fs::write(path, body)
        .with_context(|| format!("Failed to write failed URL list: {}", path.display()))?;
    info!("Failed URLs saved to {}", path.display());
    Ok(())
}

pub(crate) async fn finish_cache(cache: ContentCache, keep: bool) {
    if keep {
        info!("Keeping cache file '{}'", cache.path().display());
        cache.close().await;
    } else if let Err(e) = cache.discard().await {
        warn!("Failed to delete cache file: {:#}", e);
    }
}

/// `licita prefetch`: warm the cache and keep it for a later run.
pub async fn run_prefetch(
    config: &Config,
    limit: Option<usize>,
    progress: &dyn ProgressReporter,
) -> Result<RunStats> {
    let started_at = Local::now();
    let started = Instant::now();
    let seeds = sources::read_seeds(config, config.input.effective_limit(limit)).await?;
    if seeds.is_empty() {
        eprintln!("Error: no rows found in table '{}'", config.input.table);
        return Ok(RunStats::default());
    }

    let transport = Arc::new(HttpTransport::new(&config.fetch)?);
    let cache = ContentCache::open(&config.cache.path).await?;
    let fetcher = Fetcher::new(transport, cache.clone(), &config.fetch);

    let seed_urls: Vec<String> = seeds.iter().map(|s| s.detail_url.clone()).collect();
    let report = prefetch(&fetcher, &seed_urls, progress).await;

    let stats = RunStats {
        started_at: Some(started_at),
        cache: cache.stats(),
        fetch: fetcher.stats(),
        prefetch: Some(report),
        elapsed: started.elapsed(),
        ..Default::default()
    };
    stats.print();
    let cached = cache.len().await.unwrap_or(0);
    let failed = fetcher.failed_urls();
    drop(fetcher);
    cache.close().await;

    write_failed_urls(&config.output.failed_urls, &failed)?;
    println!("prefetch complete");
    println!("  cached pages: {}", cached);
    println!("  cache: {}", config.cache.path.display());
    Ok(stats)
}
