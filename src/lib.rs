//! # Licita
//!
//! Scrapes public procurement notices and turns them into a spreadsheet.
//!
//! Seed rows (an identifier plus a notice URL) come from a SQLite table. Every
//! notice page and the documents it links to are fetched concurrently into a
//! per-run content cache, then each row is processed in order: amendment
//! ("modificación") and award ("adjudicación") documents are parsed and their
//! fields flattened into a results sheet plus one sheet per document kind.
//! A separate command extracts adjudication criteria.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌─────────────┐   ┌──────────┐
//! │  SQLite  │──▶│ Prefetch  │──▶│ Row process │──▶│   XLSX   │
//! │  seeds   │   │ (cache)   │   │ (extract)   │   │ workbook │
//! └──────────┘   └───────────┘   └─────────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! licita check                   # validate config and input table
//! licita run --limit 10          # scrape the first ten notices
//! licita prefetch                # warm the cache and keep it
//! licita criteria                # adjudication criteria workbook
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Seed, record and result row types |
//! | [`db`] | SQLite connections |
//! | [`sources`] | Seed table reading and `check` |
//! | [`cache`] | Per-run content cache |
//! | [`fetch`] | HTTP transport, retries and bounded concurrency |
//! | [`html`] | Tolerant HTML navigation helpers |
//! | [`portal`] | Notice page conventions (detail table, links, dates) |
//! | [`extract`] | Extraction strategies for each document kind |
//! | [`prefetch`] | Concurrent cache warm-up |
//! | [`process`] | Per-row processing |
//! | [`workbook`] | XLSX writing and reading |
//! | [`run`] | `run` and `prefetch` orchestration |
//! | [`criteria`] | `criteria` orchestration |
//! | [`stats`] | End-of-run statistics |
//! | [`progress`] | Progress reporting on stderr |
//! | [`logging`] | Run log setup |

pub mod cache;
pub mod config;
pub mod criteria;
pub mod db;
pub mod extract;
pub mod fetch;
pub mod html;
pub mod logging;
pub mod models;
pub mod portal;
pub mod prefetch;
pub mod process;
pub mod progress;
pub mod run;
pub mod sources;
pub mod stats;
pub mod workbook;
