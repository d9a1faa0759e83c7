//! End-of-run statistics.
//!
//! Printed to stdout after every run, successful or not, and mirrored in the
//! run log.

use chrono::{DateTime, Local};
use std::time::Duration;
use tracing::info;

use crate::cache::CacheStats;
use crate::fetch::FetchStats;
use crate::prefetch::PrefetchReport;
use crate::progress::format_number;

#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub started_at: Option<DateTime<Local>>,
    pub cache: CacheStats,
    pub fetch: FetchStats,
    pub prefetch: Option<PrefetchReport>,
    pub rows: usize,
    pub modified_rows: usize,
    pub error_rows: usize,
    pub modification_records: usize,
    pub award_records: usize,
    pub elapsed: Duration,
}

impl RunStats {
    /// Summary lines, without the banner.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(started) = &self.started_at {
            lines.push(format!("Started:       {}", started.format("%Y-%m-%d %H:%M:%S")));
        }
        if let Some(p) = &self.prefetch {
            lines.push(format!(
                "Prefetch:      {} seeds, {} detail links, {} fetched, {} failed",
                format_number(p.seeds as u64),
                format_number(p.discovered as u64),
                format_number(p.fetched() as u64),
                format_number(p.failed() as u64)
            ));
        }
        if self.rows > 0 {
            lines.push(format!(
                "Rows:          {} ({} modified, {} errors)",
                format_number(self.rows as u64),
                format_number(self.modified_rows as u64),
                format_number(self.error_rows as u64)
            ));
            lines.push(format!(
                "Records:       {} modifications, {} adjudications",
                format_number(self.modification_records as u64),
                format_number(self.award_records as u64)
            ));
        }
        lines.push(format!("Cache hits:    {}", format_number(self.cache.hits)));
        lines.push(format!("Cache misses:  {}", format_number(self.cache.misses)));
        lines.push(format!("Cache hit rate: {:.2}%", self.cache.hit_rate()));
        lines.push(format!("Total retries: {}", format_number(self.fetch.retries)));
        lines.push(format!(
            "Network calls: {}",
            format_number(self.fetch.network_calls)
        ));
        lines.push(format!(
            "Failed URLs:   {}",
            format_number(self.fetch.failed_urls as u64)
        ));
        lines.push(format!("Elapsed:       {:.1}s", self.elapsed.as_secs_f64()));
        lines
    }

    pub fn print(&self) {
        println!();
        println!("Run statistics");
        println!("==============");
        for line in self.lines() {
            info!("{}", line);
            println!("  {}", line);
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_has_two_decimals() {
        let stats = RunStats {
            cache: CacheStats { hits: 2, misses: 1 },
            ..Default::default()
        };
        let lines = stats.lines();
        assert!(lines.contains(&"Cache hit rate: 66.67%".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("Rows:")));
        assert!(!lines.iter().any(|l| l.starts_with("Started:")));
    }

    #[test]
    fn includes_prefetch_and_rows_when_present() {
        let stats = RunStats {
            prefetch: Some(PrefetchReport {
                seeds: 3,
                discovered: 4,
                seeds_fetched: 2,
                details_fetched: 4,
                seeds_failed: 1,
                ..Default::default()
            }),
            rows: 3,
            modified_rows: 1,
            error_rows: 1,
            ..Default::default()
        };
        let lines = stats.lines();
        assert!(lines[0].contains("6 fetched, 1 failed"));
        assert!(lines[1].contains("3 (1 modified, 1 errors)"));
    }
}
