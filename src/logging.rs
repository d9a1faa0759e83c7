//! Run log setup.
//!
//! All `tracing` events go to the run log file (appended, no ANSI colours).
//! The filter comes from `RUST_LOG` and defaults to `info` with sqlx quietened.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info,sqlx=warn,html5ever=error,selectors=error";

/// Install the run log as the global subscriber.
pub fn init(log_path: &Path) -> Result<()> {
    subscriber(log_path)?
        .try_init()
        .context("Failed to install log subscriber")?;
    Ok(())
}

/// Build the run log subscriber without installing it.
pub fn subscriber(log_path: &Path) -> Result<impl Subscriber + Send + Sync + 'static> {
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;

    Ok(tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ContentCache;
    use tempfile::TempDir;

    #[tokio::test]
    async fn cache_hits_and_misses_reach_the_run_log() {
        let tmp = TempDir::new().unwrap();
        let log_path = tmp.path().join("logs/run.log");
        let guard = tracing::subscriber::set_default(subscriber(&log_path).unwrap());

        let cache = ContentCache::open(&tmp.path().join("cache.db")).await.unwrap();
        cache.put("https://p.example/n/1", "<p>x</p>").await;
        assert!(cache.get("https://p.example/n/1").await.is_some());
        assert!(cache.get("https://p.example/n/2").await.is_none());
        drop(guard);

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("INFO Using cache for https://p.example/n/1"), "log: {}", log);
        assert!(log.contains("WARN Cache miss for https://p.example/n/2"), "log: {}", log);
        assert!(!log.contains('\u{1b}'));
    }
}
