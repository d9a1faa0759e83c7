//! Run-scoped content cache.
//!
//! Maps a URL to the raw body fetched for it. Backed by a single SQLite
//! table opened once per run and shared by every fetch, concurrent or not.
//! There is no eviction: the whole file is discarded when the run ends.

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::db;

/// Hit/miss counters for [`ContentCache::get`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 * 100.0 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Cheap to clone; clones share the pool and the counters.
#[derive(Clone)]
pub struct ContentCache {
    pool: SqlitePool,
    path: PathBuf,
    counters: Arc<Counters>,
}

impl ContentCache {
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache (
                url TEXT PRIMARY KEY,
                content TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache")
            .fetch_one(&pool)
            .await?;
        if existing > 0 {
            info!("Reusing {} cached pages from {}", existing, path.display());
        }

        Ok(Self {
            pool,
            path: path.to_path_buf(),
            counters: Arc::new(Counters::default()),
        })
    }

    /// Look up a URL, counting a hit or a miss. Store errors read as a miss.
    pub async fn get(&self, url: &str) -> Option<String> {
        let result: Result<Option<String>, sqlx::Error> =
            sqlx::query_scalar("SELECT content FROM cache WHERE url = ?")
                .bind(url)
                .fetch_optional(&self.pool)
                .await;

        match result {
            Ok(Some(content)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                info!("Using cache for {}", url);
                Some(content)
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                warn!("Cache miss for {}", url);
                None
            }
            Err(e) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                error!("SQLite error reading cache for {}: {}", url, e);
                None
            }
        }
    }

    /// Uncounted read, for warm-up passes over already cached pages.
    pub async fn peek(&self, url: &str) -> Option<String> {
        sqlx::query_scalar("SELECT content FROM cache WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .unwrap_or_else(|e| {
                error!("SQLite error reading cache for {}: {}", url, e);
                None
            })
    }

    /// Presence check that leaves the hit/miss counters alone.
    pub async fn contains(&self, url: &str) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM cache WHERE url = ?")
            .bind(url)
            .fetch_one(&self.pool)
            .await
            .map(|n| n > 0)
            .unwrap_or(false)
    }

    /// Insert or overwrite. Failures are logged and swallowed.
    pub async fn put(&self, url: &str, content: &str) {
        let result = sqlx::query(
            r#"
            INSERT INTO cache (url, content) VALUES (?, ?)
            ON CONFLICT(url) DO UPDATE SET content = excluded.content
            "#,
        )
        .bind(url)
        .bind(content)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            error!("SQLite error saving cache for {}: {}", url, e);
        }
    }

    pub async fn len(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the pool and delete the cache file with its WAL side files.
    pub async fn discard(self) -> Result<()> {
        self.pool.close().await;

        let mut removed = false;
        for suffix in ["", "-wal", "-shm"] {
            let mut name = self.path.clone().into_os_string();
            name.push(suffix);
            let file = PathBuf::from(name);
            if file.exists() {
                std::fs::remove_file(&file)?;
                removed = true;
            }
        }

        if removed {
            info!("Cache file '{}' deleted", self.path.display());
        } else {
            warn!("Cache file '{}' did not exist, nothing to delete", self.path.display());
        }
        Ok(())
    }

    /// Close the pool, keeping the file on disk.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_then_get_counts_hit_and_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = ContentCache::open(&tmp.path().join("cache.db")).await.unwrap();

        assert_eq!(cache.get("https://a.example/1").await, None);
        cache.put("https://a.example/1", "<html>one</html>").await;
        assert_eq!(
            cache.get("https://a.example/1").await.as_deref(),
            Some("<html>one</html>")
        );
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[tokio::test]
    async fn last_write_wins() {
        let tmp = TempDir::new().unwrap();
        let cache = ContentCache::open(&tmp.path().join("cache.db")).await.unwrap();

        cache.put("u", "first").await;
        cache.put("u", "second").await;
        assert_eq!(cache.get("u").await.as_deref(), Some("second"));
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn contains_does_not_touch_counters() {
        let tmp = TempDir::new().unwrap();
        let cache = ContentCache::open(&tmp.path().join("cache.db")).await.unwrap();
        cache.put("u", "x").await;

        assert!(cache.contains("u").await);
        assert!(!cache.contains("v").await);
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn discard_removes_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache.db");
        let cache = ContentCache::open(&path).await.unwrap();
        cache.put("u", "x").await;
        assert!(path.exists());

        cache.discard().await.unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn hit_rate_of_empty_stats_is_zero() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        assert_eq!(CacheStats { hits: 3, misses: 1 }.hit_rate(), 75.0);
    }
}
