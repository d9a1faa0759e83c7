//! Three-phase cache warm-up run before row processing.
//!
//! 1. Fetch every seed page not already cached.
//! 2. Parse each cached seed page and collect amendment/award viewer links.
//! 3. Fetch every discovered link not already cached.
//!
//! Both fetch phases use the fetcher's bounded concurrent mode. Failures are
//! recorded by the fetcher and never abort the warm-up.

use tracing::info;

use crate::fetch::Fetcher;
use crate::html;
use crate::portal;
use crate::progress::{ProgressEvent, ProgressReporter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// Unique seed URLs.
    pub seeds: usize,
    pub seeds_fetched: usize,
    pub seeds_failed: usize,
    /// Unique detail URLs found on cached seed pages.
    pub discovered: usize,
    pub details_fetched: usize,
    pub details_failed: usize,
}

impl PrefetchReport {
    pub fn fetched(&self) -> usize {
        self.seeds_fetched + self.details_fetched
    }

    pub fn failed(&self) -> usize {
        self.seeds_failed + self.details_failed
    }
}

fn unique(urls: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for url in urls {
        if !out.contains(&url) {
            out.push(url);
        }
    }
    out
}

async fn uncached(fetcher: &Fetcher, urls: &[String]) -> Vec<String> {
    let mut pending = Vec::new();
    for url in urls {
        if fetcher.cache().contains(url).await {
            info!("Using cache for {}, skipping prefetch", url);
        } else {
            info!("Cache miss for {}, queued for prefetch", url);
            pending.push(url.clone());
        }
    }
    pending
}

async fn fetch_phase(
    fetcher: &Fetcher,
    phase: &str,
    urls: &[String],
    progress: &dyn ProgressReporter,
) -> (usize, usize) {
    if urls.is_empty() {
        return (0, 0);
    }
    info!("Prefetching {} {} URLs", urls.len(), phase);
    let report = fetcher
        .fetch_all(urls, |n, total| {
            progress.report(ProgressEvent::Fetching {
                phase: phase.to_string(),
                n: n as u64,
                total: total as u64,
            })
        })
        .await;
    (report.fetched, report.failed)
}

pub async fn prefetch(
    fetcher: &Fetcher,
    seed_urls: &[String],
    progress: &dyn ProgressReporter,
) -> PrefetchReport {
    let seeds = unique(seed_urls.iter().cloned());
    let mut report = PrefetchReport {
        seeds: seeds.len(),
        ..Default::default()
    };

    let pending = uncached(fetcher, &seeds).await;
    (report.seeds_fetched, report.seeds_failed) =
        fetch_phase(fetcher, "seeds", &pending, progress).await;

    progress.report(ProgressEvent::Discovering {
        pages: seeds.len() as u64,
    });
    let mut discovered = Vec::new();
    for seed in &seeds {
        let Some(content) = fetcher.cache().peek(seed).await else {
            continue;
        };
        let links = {
            let document = html::parse(&content, seed);
            portal::discover_detail_links(&document, seed)
        };
        discovered.extend(links);
    }
    let discovered = unique(discovered);
    report.discovered = discovered.len();
    info!("Discovered {} detail URLs", discovered.len());

    let pending = uncached(fetcher, &discovered).await;
    (report.details_fetched, report.details_failed) =
        fetch_phase(fetcher, "details", &pending, progress).await;

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ContentCache;
    use crate::fetch::testing::{fast_config, StubTransport};
    use crate::progress::testing::RecordingProgress;
    use std::sync::Arc;
    use tempfile::TempDir;

    const SEED: &str = r#"<table id="myTablaDetalleVISUOE">
      <tr><td>01/02/2023</td><td>Modificación</td>
          <td><a href="/doc/mod1" title="Este documento se abrirá en una nueva ventana" target="_blank">Html</a></td></tr>
      <tr><td>03/02/2023</td><td>Adjudicación</td>
          <td><a href="/doc/adj1" title="Este documento se abrirá en una nueva ventana" target="_blank">Html</a></td></tr>
    </table>"#;

    #[tokio::test]
    async fn warms_seed_and_detail_pages() {
        let tmp = TempDir::new().unwrap();
        let stub = Arc::new(StubTransport::with_pages(&[
            ("https://p.example/n/1", SEED),
            ("https://p.example/doc/mod1", "<h3>Modificación</h3>"),
        ]));
        let cache = ContentCache::open(&tmp.path().join("cache.db")).await.unwrap();
        let fetcher = Fetcher::new(stub.clone(), cache, &fast_config());
        let progress = RecordingProgress::default();

        let seeds = vec![
            "https://p.example/n/1".to_string(),
            "https://p.example/n/1".to_string(),
            "https://p.example/n/down".to_string(),
        ];
        let report = prefetch(&fetcher, &seeds, &progress).await;

        assert_eq!(report.seeds, 2);
        assert_eq!(report.seeds_fetched, 1);
        assert_eq!(report.seeds_failed, 1);
        assert_eq!(report.discovered, 2);
        assert_eq!(report.details_fetched, 1);
        assert_eq!(report.details_failed, 1);
        assert_eq!(stub.calls_to("https://p.example/n/1"), 1);
        assert!(fetcher.cache().contains("https://p.example/doc/mod1").await);
        assert_eq!(
            fetcher.failed_urls(),
            vec![
                "https://p.example/n/down".to_string(),
                "https://p.example/doc/adj1".to_string()
            ]
        );
        assert!(!progress.events.lock().unwrap().is_empty());
        assert_eq!(fetcher.cache().stats().hits, 0);
    }

    #[tokio::test]
    async fn cached_pages_are_not_fetched_again() {
        let tmp = TempDir::new().unwrap();
        let stub = Arc::new(StubTransport::default());
        let cache = ContentCache::open(&tmp.path().join("cache.db")).await.unwrap();
        cache.put("https://p.example/n/1", "<p>no table</p>").await;
        let fetcher = Fetcher::new(stub.clone(), cache, &fast_config());

        let report = prefetch(
            &fetcher,
            &["https://p.example/n/1".to_string()],
            &RecordingProgress::default(),
        )
        .await;

        assert_eq!(report.fetched(), 0);
        assert_eq!(report.failed(), 0);
        assert_eq!(stub.total_calls(), 0);
    }
}
