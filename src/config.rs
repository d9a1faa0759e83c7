use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Desktop browser user-agent the portal expects.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub input: InputConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub criteria: CriteriaConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub db: PathBuf,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_link_column")]
    pub link_column: String,
    /// Maximum number of seed rows to process; 0 means no limit.
    #[serde(default = "default_row_limit")]
    pub row_limit: usize,
}

fn default_table() -> String {
    "licitaciones".to_string()
}
fn default_id_column() -> String {
    "Identificador".to_string()
}
fn default_link_column() -> String {
    "Link licitación".to_string()
}
fn default_row_limit() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            concurrency: default_concurrency(),
            user_agent: default_user_agent(),
            accept_invalid_certs: default_accept_invalid_certs(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    300
}
fn default_concurrency() -> usize {
    10
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_accept_invalid_certs() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// Keep the cache file after the run instead of deleting it.
    #[serde(default)]
    pub keep: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            keep: false,
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("url_cache.db")
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_workbook")]
    pub workbook: PathBuf,
    #[serde(default = "default_failed_urls")]
    pub failed_urls: PathBuf,
    #[serde(default = "default_log")]
    pub log: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            workbook: default_workbook(),
            failed_urls: default_failed_urls(),
            log: default_log(),
        }
    }
}

fn default_workbook() -> PathBuf {
    PathBuf::from("resultados_licitaciones.xlsx")
}
fn default_failed_urls() -> PathBuf {
    PathBuf::from("failed_urls.txt")
}
fn default_log() -> PathBuf {
    PathBuf::from("licitaciones.log")
}

#[derive(Debug, Deserialize, Clone)]
pub struct CriteriaConfig {
    #[serde(default = "default_criteria_workbook")]
    pub workbook: PathBuf,
    /// Stop after this many documents produced criteria rows.
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
}

impl Default for CriteriaConfig {
    fn default() -> Self {
        Self {
            workbook: default_criteria_workbook(),
            max_documents: default_max_documents(),
        }
    }
}

fn default_criteria_workbook() -> PathBuf {
    PathBuf::from("resultados_criterios_licitaciones.xlsx")
}
fn default_max_documents() -> usize {
    6000
}

impl InputConfig {
    /// Effective row limit after an optional CLI override; `None` means all rows.
    pub fn effective_limit(&self, cli_limit: Option<usize>) -> Option<usize> {
        match cli_limit.unwrap_or(self.row_limit) {
            0 => None,
            n => Some(n),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.fetch.max_attempts == 0 {
        anyhow::bail!("fetch.max_attempts must be >= 1");
    }

    if config.fetch.concurrency == 0 {
        anyhow::bail!("fetch.concurrency must be >= 1");
    }

    if config.fetch.timeout_secs == 0 {
        anyhow::bail!("fetch.timeout_secs must be >= 1");
    }

    if config.input.table.trim().is_empty() {
        anyhow::bail!("input.table must not be empty");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_everything_but_the_input_db() {
        let cfg = parse_config("[input]\ndb = \"licitaciones.db\"\n").unwrap();
        assert_eq!(cfg.input.table, "licitaciones");
        assert_eq!(cfg.input.link_column, "Link licitación");
        assert_eq!(cfg.input.row_limit, 100);
        assert_eq!(cfg.fetch.max_attempts, 3);
        assert_eq!(cfg.fetch.concurrency, 10);
        assert_eq!(cfg.fetch.backoff_base(), Duration::from_millis(300));
        assert!(cfg.fetch.accept_invalid_certs);
        assert!(!cfg.cache.keep);
        assert_eq!(cfg.criteria.max_documents, 6000);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = parse_config("[input]\ndb = \"x.db\"\n[fetch]\nconcurrency = 0\n").unwrap_err();
        assert!(err.to_string().contains("fetch.concurrency"));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = parse_config("[input]\ndb = \"x.db\"\n[fetch]\nmax_attempts = 0\n").unwrap_err();
        assert!(err.to_string().contains("fetch.max_attempts"));
    }

    #[test]
    fn row_limit_zero_means_unbounded() {
        let cfg = parse_config("[input]\ndb = \"x.db\"\nrow_limit = 0\n").unwrap();
        assert_eq!(cfg.input.effective_limit(None), None);
        assert_eq!(cfg.input.effective_limit(Some(5)), Some(5));
    }
}
