//! `licita criteria`: adjudication criteria over the seed table.
//!
//! For each seed the notice page is fetched (cache-first) and its first link
//! to the document servlet is followed. The criteria found there go to
//! the "Criterios Detallados" sheet, one summary row per document to
//! "Resumen por Licitación". The flow stops once `criteria.max_documents`
//! documents have produced criteria rows.

use anyhow::Result;
use chrono::Local;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::cache::ContentCache;
use crate::config::Config;
use crate::extract::criteria::CriteriaCollector;
use crate::fetch::{Fetcher, HttpTransport, Transport};
use crate::html;
use crate::portal;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::run::{finish_cache, write_results};
use crate::sources;
use crate::stats::RunStats;
use crate::workbook::Sheet;

pub const SHEET_DETAILS: &str = "Criterios Detallados";
pub const SHEET_SUMMARY: &str = "Resumen por Licitación";

pub async fn run_criteria(
    config: &Config,
    limit: Option<usize>,
    progress: &dyn ProgressReporter,
) -> Result<RunStats> {
    let transport = Arc::new(HttpTransport::new(&config.fetch)?);
    run_criteria_with_transport(config, transport, limit, progress).await
}

pub async fn run_criteria_with_transport(
    config: &Config,
    transport: Arc<dyn Transport>,
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

    let cache = ContentCache::open(&config.cache.path).await?;
    let fetcher = Fetcher::new(transport, cache.clone(), &config.fetch);
    let mut collector = CriteriaCollector::new();
    let mut documents_with_data = 0usize;
    let total = seeds.len() as u64;

    for (i, seed) in seeds.iter().enumerate() {
        if documents_with_data >= config.criteria.max_documents {
            info!(
                "Limit of {} documents with criteria reached",
                config.criteria.max_documents
            );
            break;
        }
        progress.report(ProgressEvent::Processing {
            n: i as u64 + 1,
            total,
        });

        let link = seed.detail_url.as_str();
        let page = match fetcher.get_or_fetch(link).await {
            Ok(page) => page,
            Err(e) => {
                error!("Error accessing {}: {}", link, e);
                continue;
            }
        };
        let document_url = {
            let doc = html::parse(&page, link);
            portal::servlet_document_link(&doc, link)
        };
        let Some(document_url) = document_url else {
            warn!("No adjudication document link on {}", link);
            continue;
        };

        let content = match fetcher.get_or_fetch(&document_url).await {
            Ok(content) => content,
            Err(e) => {
                error!("Error accessing {}: {}", document_url, e);
                continue;
            }
        };
        let doc = html::parse(&content, &document_url);
        if collector.collect(&doc, link, &seed.identifier) {
            documents_with_data += 1;
            info!("Document #{} with criteria: {}", documents_with_data, link);
        }
    }

    let sheets = vec![
        Sheet::new(
            SHEET_DETAILS,
            collector.records().iter().map(|r| r.to_row()).collect(),
        ),
        Sheet::new(
            SHEET_SUMMARY,
            collector.summaries().iter().map(|s| s.to_row()).collect(),
        ),
    ];
    let written = write_results(
        &config.criteria.workbook,
        &sheets,
        &config.output.failed_urls,
        &fetcher.failed_urls(),
    );

    let stats = RunStats {
        started_at: Some(started_at),
        cache: cache.stats(),
        fetch: fetcher.stats(),
        rows: collector.summaries().len(),
        elapsed: started.elapsed(),
        ..Default::default()
    };
    stats.print();

    drop(fetcher);
    finish_cache(cache, config.cache.keep).await;

    written?;
    println!("criteria complete");
    println!("  documents with criteria: {}", documents_with_data);
    println!("  criteria rows: {}", collector.records().len());
    println!("  workbook: {}", config.criteria.workbook.display());
    Ok(stats)
}
