//! HTTP fetch layer: retry with exponential backoff, write-through caching,
//! and a bounded concurrent mode for bulk prefetching.
//!
//! The network side sits behind the [`Transport`] trait. [`HttpTransport`]
//! is the production implementation: reqwest with TLS certificate checks
//! disabled and a fixed desktop-browser user-agent, which is what the
//! portal tolerates.
//!
//! # Retry Strategy
//!
//! - Timeout, connection, TLS, non-2xx and body-read errors → retry
//! - Unparsable URL → fail immediately
//! - Backoff after failed attempt `k` (0-based): `base * 2^k`
//!   (0.3 s, 0.6 s with the default base)
//! - After the last attempt the URL is added to the failed set once

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::error::Error as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;

use crate::cache::ContentCache;
use crate::config::FetchConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("timed out fetching {0}")]
    Timeout(String),
    #[error("TLS error fetching {url}: {message}")]
    Tls { url: String, message: String },
    #[error("connection error fetching {url}: {message}")]
    Connect { url: String, message: String },
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("request error fetching {url}: {message}")]
    Request { url: String, message: String },
    #[error("invalid URL '{0}'")]
    InvalidUrl(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::InvalidUrl(_))
    }
}

/// One network GET returning the decoded body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<String, FetchError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<String, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| classify(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| classify(url, &e))
    }
}

fn classify(url: &str, err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout(url.to_string());
    }

    // The TLS cause is only visible in the source chain.
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    classify_message(url, message, err.is_connect())
}

fn classify_message(url: &str, message: String, is_connect: bool) -> FetchError {
    let lower = message.to_lowercase();
    if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
        FetchError::Tls {
            url: url.to_string(),
            message,
        }
    } else if is_connect {
        FetchError::Connect {
            url: url.to_string(),
            message,
        }
    } else {
        FetchError::Request {
            url: url.to_string(),
            message,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.backoff_base(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Failed attempts, whether or not a later attempt succeeded.
    pub retries: u64,
    pub network_calls: u64,
    pub failed_urls: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchBatchReport {
    pub requested: usize,
    pub fetched: usize,
    pub failed: usize,
}

pub struct Fetcher {
    transport: Arc<dyn Transport>,
    cache: ContentCache,
    policy: RetryPolicy,
    timeout: Duration,
    concurrency: usize,
    failed: Mutex<Vec<String>>,
    retries: AtomicU64,
    network_calls: AtomicU64,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, cache: ContentCache, config: &FetchConfig) -> Self {
        Self {
            transport,
            cache,
            policy: RetryPolicy::from(config),
            timeout: config.timeout(),
            concurrency: config.concurrency.max(1),
            failed: Mutex::new(Vec::new()),
            retries: AtomicU64::new(0),
            network_calls: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Network fetch with retries; writes through to the cache on success.
    ///
    /// Never panics. On exhaustion the URL joins the failed set and the
    /// last attempt's error is returned.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let mut last_err = None;

        for attempt in 0..self.policy.max_attempts {
            self.network_calls.fetch_add(1, Ordering::Relaxed);

            let outcome = match tokio::time::timeout(self.timeout, self.transport.get(url)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(url.to_string())),
            };

            match outcome {
                Ok(content) => {
                    self.cache.put(url, &content).await;
                    info!("Fetched content from {}", url);
                    return Ok(content);
                }
                Err(e) => {
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    warn!("Attempt {} failed for {}: {}", attempt + 1, url, e);
                    let again = e.is_retryable() && attempt + 1 < self.policy.max_attempts;
                    last_err = Some(e);
                    if !again {
                        break;
                    }
                    tokio::time::sleep(self.policy.delay_for(attempt)).await;
                }
            }
        }

        let err = last_err.unwrap_or_else(|| FetchError::Request {
            url: url.to_string(),
            message: "no attempt was made".to_string(),
        });
        error!(
            "Failed to fetch {} after {} attempts: {}",
            url, self.policy.max_attempts, err
        );
        self.record_failure(url);
        Err(err)
    }

    /// Cache-first fetch.
    pub async fn get_or_fetch(&self, url: &str) -> Result<String, FetchError> {
        if let Some(content) = self.cache.get(url).await {
            return Ok(content);
        }
        self.fetch(url).await
    }

    /// Fetch every URL with at most `concurrency` requests in flight.
    ///
    /// `on_complete(done, total)` is called after each URL settles.
    pub async fn fetch_all<F>(&self, urls: &[String], mut on_complete: F) -> FetchBatchReport
    where
        F: FnMut(usize, usize),
    {
        let total = urls.len();
        let mut report = FetchBatchReport {
            requested: total,
            ..Default::default()
        };

        let mut results = stream::iter(urls.iter())
            .map(|url| async move { self.fetch(url).await.is_ok() })
            .buffer_unordered(self.concurrency);

        let mut done = 0;
        while let Some(ok) = results.next().await {
            done += 1;
            if ok {
                report.fetched += 1;
            } else {
                report.failed += 1;
            }
            on_complete(done, total);
        }

        report
    }

    fn record_failure(&self, url: &str) {
        let mut failed = self.failed.lock().unwrap_or_else(|p| p.into_inner());
        if !failed.iter().any(|u| u == url) {
            failed.push(url.to_string());
        }
    }

    /// Permanently failed URLs in first-failure order.
    pub fn failed_urls(&self) -> Vec<String> {
        self.failed.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn stats(&self) -> FetchStats {
        FetchStats {
            retries: self.retries.load(Ordering::Relaxed),
            network_calls: self.network_calls.load(Ordering::Relaxed),
            failed_urls: self.failed.lock().unwrap_or_else(|p| p.into_inner()).len(),
        }
    }
}
