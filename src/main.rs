//! # Licita CLI (`licita`)
//!
//! ## Usage
//!
//! ```bash
//! licita --config ./config/licita.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `licita run` | Prefetch, process every seed row and write the results workbook |
//! | `licita prefetch` | Only warm the content cache, keeping it for a later run |
//! | `licita criteria` | Extract adjudication criteria into their own workbook |
//! | `licita check` | Validate the config, the input table and its columns |
//!
//! ## Examples
//!
//! ```bash
//! # First ten rows, machine-readable progress
//! licita run --limit 10 --progress json
//!
//! # Every row (overrides input.row_limit)
//! licita run --limit 0
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use licita::progress::ProgressMode;
use licita::{config, criteria, logging, run, sources};

/// Licita: procurement notice scraper.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/licita.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "licita",
    about = "Licita: scrapes procurement notices into a spreadsheet",
    version,
    long_about = "Licita reads seed notices from a SQLite table, fetches each notice and the \
    amendment and award documents it links to, and writes the extracted fields to an XLSX \
    workbook together with a list of URLs that could not be fetched."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/licita.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a terminal, `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the seed rows and write the results workbook.
    ///
    /// Fetches every notice and linked document into the content cache,
    /// then processes rows in table order. The cache is deleted at the end
    /// unless `cache.keep` is set.
    Run {
        /// Maximum number of seed rows; 0 processes all of them.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Warm the content cache without processing rows.
    ///
    /// The cache is kept so the next `run` starts from it.
    Prefetch {
        /// Maximum number of seed rows; 0 processes all of them.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Extract adjudication criteria into their own workbook.
    Criteria {
        /// Maximum number of seed rows; 0 processes all of them.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Validate the configuration and the input table.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.output.log)?;

    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    match cli.command {
        Commands::Run { limit } => {
            run::run(&cfg, limit, progress.as_ref()).await?;
        }
        Commands::Prefetch { limit } => {
            run::run_prefetch(&cfg, limit, progress.as_ref()).await?;
        }
        Commands::Criteria { limit } => {
            criteria::run_criteria(&cfg, limit, progress.as_ref()).await?;
        }
        Commands::Check => {
            sources::run_check(&cfg).await?;
        }
    }

    Ok(())
}
