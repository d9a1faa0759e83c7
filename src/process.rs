//! Per-seed processing of a notice page into one [`ResultRow`].
//!
//! The notice's detail table is read into plain [`TableEntry`] values first,
//! then each amendment and award document is fetched (cache-first) and run
//! through its extractor. Every failure is reported inline on the row or on
//! the instance (`Mod N/Error`, `Adj N/Error`); nothing escapes a row.

use futures::FutureExt;
use indexmap::IndexMap;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{error, info, warn};

use crate::extract::{award, modification};
use crate::fetch::{FetchError, Fetcher};
use crate::html;
use crate::models::{Category, ExtractionRecord, FieldMap, Modified, ResultRow, RowError, SeedRecord};
use crate::portal::{self, DocumentKind};

pub const ERR_NO_VIEWER_LINK: &str = "Html link not found";
pub const ERR_NO_DATA: &str = "No data found in leftCol or rigCol";
pub const ERR_NO_OFFERS_HEADING: &str = "No <h5/h4/h3> found for Información Sobre las Ofertas";
pub const ERR_REFETCH_FAILED: &str = "Failed to re-fetch modification page";
pub const ERR_NO_HEADING_AFTER_REFETCH: &str = "No <h3> found after re-fetch";

/// Records accumulated across rows, destined for the secondary sheets.
#[derive(Debug, Default)]
pub struct RunContext {
    pub modifications: Vec<ExtractionRecord>,
    pub awards: Vec<ExtractionRecord>,
}

/// One dated row of the detail table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub date: String,
    pub kind: DocumentKind,
    /// Resolved viewer URL, looked up for amendments and awards only.
    pub viewer_url: Option<String>,
}

/// Dated rows of the notice's detail table, or `None` without a table.
pub fn read_detail_table(content: &str, page_url: &str) -> Option<Vec<TableEntry>> {
    let document = html::parse(content, page_url);
    let table = portal::detail_table(&document)?;

    let mut entries = Vec::new();
    for row in html::find_all(table, "tr") {
        let cells: Vec<_> = html::find_all(row, "td").collect();
        if cells.len() < 2 {
            continue;
        }
        let date = html::strip_text(&cells[0]);
        if !portal::is_dated(&date) {
            continue;
        }
        let kind = portal::classify(&html::strip_text(&cells[1]));
        let viewer_url = match kind {
            DocumentKind::Other(_) => None,
            _ => portal::viewer_href(&document, cells[1])
                .and_then(|href| portal::resolve(page_url, href)),
        };
        entries.push(TableEntry {
            date,
            kind,
            viewer_url,
        });
    }
    Some(entries)
}

/// Outcome of one amendment or award instance.
enum Instance {
    Fields(FieldMap),
    Failed(String),
}

pub struct RowProcessor<'a> {
    fetcher: &'a Fetcher,
}

impl<'a> RowProcessor<'a> {
    pub fn new(fetcher: &'a Fetcher) -> Self {
        Self { fetcher }
    }

    /// Process one seed. A panic while extracting is reported on the row as
    /// `Error - <message>` and the run moves on to the next seed.
    pub async fn process(&self, seed: &SeedRecord, ctx: &mut RunContext) -> ResultRow {
        info!("Processing link: {}", seed.detail_url);
        match AssertUnwindSafe(self.try_process(seed, ctx))
            .catch_unwind()
            .await
        {
            Ok(row) => row,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Unexpected error processing {}: {}", seed.detail_url, message);
                ResultRow::new(seed, Modified::Error(RowError::Other(message)))
            }
        }
    }

    async fn try_process(&self, seed: &SeedRecord, ctx: &mut RunContext) -> ResultRow {
        let link = seed.detail_url.as_str();

        let content = match self.fetcher.get_or_fetch(link).await {
            Ok(content) => content,
            Err(e) => {
                error!("Failed to fetch main page {}: {}", link, e);
                let reason = match e {
                    FetchError::Tls { .. } => RowError::SslVerification,
                    FetchError::InvalidUrl(_) => RowError::Request,
                    _ => RowError::MainPage,
                };
                return ResultRow::new(seed, Modified::Error(reason));
            }
        };

        let Some(entries) = read_detail_table(&content, link) else {
            warn!("Table {} not found on {}", portal::DETAIL_TABLE_ID, link);
            return ResultRow::new(seed, Modified::No);
        };
        info!("Table {} found on {}", portal::DETAIL_TABLE_ID, link);

        let mut mod_fields = FieldMap::new();
        let mut adj_fields = FieldMap::new();
        let mut dates: IndexMap<String, Vec<String>> = IndexMap::new();
        let mut modified = Modified::No;
        let (mut mod_count, mut adj_count) = (0usize, 0usize);

        for entry in entries {
            let (category, count, fields) = match &entry.kind {
                DocumentKind::Other(label) => {
                    info!("Date found on {}: {}, Document: {}", link, entry.date, label);
                    dates.entry(label.clone()).or_default().push(entry.date);
                    continue;
                }
                DocumentKind::Modification => {
                    modified = Modified::Yes;
                    mod_count += 1;
                    (Category::Modification, mod_count, &mut mod_fields)
                }
                DocumentKind::Award => {
                    adj_count += 1;
                    (Category::Award, adj_count, &mut adj_fields)
                }
            };

            let label = category.document_label();
            info!("Date found on {}: {}, Document: {}", link, entry.date, label);
            dates.entry(label.to_string()).or_default().push(entry.date.clone());

            let prefix = format!("{} {}", category.prefix_stem(), count);
            let outcome = match &entry.viewer_url {
                None => {
                    warn!("Html link not found for {} on {}", prefix, link);
                    Instance::Failed(ERR_NO_VIEWER_LINK.to_string())
                }
                Some(url) => self.extract_instance(category, url).await,
            };

            match outcome {
                Instance::Fields(extracted) => {
                    for (key, value) in &extracted {
                        info!("Column on {}: {}/{} = {}", link, prefix, key, value);
                        fields.insert(format!("{}/{}", prefix, key), value.clone());
                    }
                    let record = ExtractionRecord {
                        fields: extracted,
                        ..ExtractionRecord::new(link, &seed.identifier, category)
                    };
                    match category {
                        Category::Award => ctx.awards.push(record),
                        _ => ctx.modifications.push(record),
                    }
                }
                Instance::Failed(message) => {
                    fields.insert(format!("{}/Error", prefix), message);
                }
            }
        }

        let mut row = ResultRow::new(seed, modified);
        row.fields.extend(mod_fields);
        row.fields.extend(adj_fields);
        for (label, list) in dates {
            row.fields.insert(format!("Fecha {}", label), list.join(", "));
        }
        row
    }

    async fn extract_instance(&self, category: Category, url: &str) -> Instance {
        info!("Accessing {} link: {}", category.document_label(), url);
        let content = match self.fetcher.get_or_fetch(url).await {
            Ok(content) => content,
            Err(e) => {
                error!("Failed to fetch {} page {}: {}", category.document_label(), url, e);
                let what = match category {
                    Category::Award => "adjudication",
                    _ => "modification",
                };
                return Instance::Failed(format!("Failed to fetch {} page", what));
            }
        };

        match category {
            Category::Award => self.extract_award(&content, url),
            _ => self.extract_modification(content, url).await,
        }
    }

    async fn extract_modification(&self, content: String, url: &str) -> Instance {
        let first = {
            let document = html::parse(&content, url);
            modification::extract(&document, url)
        };

        let result = match first {
            Err(modification::ModificationError::MissingHeading) => {
                info!("Forcing re-fetch of {} to bypass cache", url);
                let fresh = match self.fetcher.fetch(url).await {
                    Ok(fresh) => fresh,
                    Err(e) => {
                        error!("Failed to re-fetch modification page {}: {}", url, e);
                        return Instance::Failed(ERR_REFETCH_FAILED.to_string());
                    }
                };
                let document = html::parse(&fresh, url);
                match modification::extract(&document, url) {
                    Err(modification::ModificationError::MissingHeading) => {
                        error!("Still no <h3> matched 'Modificaci.*' after re-fetch on {}", url);
                        return Instance::Failed(ERR_NO_HEADING_AFTER_REFETCH.to_string());
                    }
                    other => other,
                }
            }
            other => other,
        };

        match result {
            Ok(fields) => Instance::Fields(fields),
            Err(e) => Instance::Failed(e.to_string()),
        }
    }

    fn extract_award(&self, content: &str, url: &str) -> Instance {
        let document = html::parse(content, url);
        let result = award::extract(&document, url);
        if !result.fields.is_empty() {
            return Instance::Fields(result.fields);
        }

        warn!("No data found in column containers on {}", url);
        let mut message = ERR_NO_DATA.to_string();
        if !result.heading_found {
            message.push_str("; ");
            message.push_str(ERR_NO_OFFERS_HEADING);
        }
        Instance::Failed(message)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic while processing row".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ContentCache;
    use crate::fetch::testing::{fast_config, StubTransport};
    use crate::fetch::Transport;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::TempDir;

    const VIEWER: &str = r#"title="Este documento se abrirá en una nueva ventana" target="_blank""#;

    fn notice() -> String {
        format!(
            r#"<html><body><table id="myTablaDetalleVISUOE">
              <tr><th>Fecha</th><th>Documento</th></tr>
              <tr><td>10/01/2023 12:00</td><td>Anuncio de licitación</td><td></td></tr>
              <tr><td>11/01/2023</td><td>Anuncio de licitación</td><td></td></tr>
              <tr><td>05/06/2023</td><td>Modificación de contrato</td><td><a href="/doc/mod1" {v}>Html</a></td></tr>
              <tr><td>07/06/2023</td><td>Modificación de contrato</td><td><a href="/doc/mod2" {v}>Html</a></td></tr>
              <tr><td>09/06/2023</td><td>Modificación de contrato</td><td>sin enlace</td></tr>
              <tr><td>02/03/2023</td><td>Adjudicación</td><td><a href="/doc/adj1" {v}>Html</a></td></tr>
              <tr><td>sin fecha</td><td>Modificación</td><td></td></tr>
            </table></body></html>"#,
            v = VIEWER
        )
    }

    const MOD1: &str = r#"<h3>Modificación del contrato</h3><ul><li><span>Importe</span> 1.000</li></ul>"#;
    const ADJ1: &str = r#"<div class="boxWithBackground"><h5>Información sobre las ofertas</h5>
        <div class="leftCol"><ul><li><span>Adjudicatario</span> ACME</li></ul></div></div>"#;

    async fn fetcher(pages: &[(&str, &str)], tmp: &TempDir) -> (Arc<StubTransport>, Fetcher) {
        let stub = Arc::new(StubTransport::with_pages(pages));
        let cache = ContentCache::open(&tmp.path().join("cache.db")).await.unwrap();
        (stub.clone(), Fetcher::new(stub, cache, &fast_config()))
    }

    #[tokio::test]
    async fn counts_instances_and_groups_dates() {
        let tmp = TempDir::new().unwrap();
        let notice = notice();
        let (stub, fetcher) = fetcher(
            &[
                ("https://p.example/n/1", notice.as_str()),
                ("https://p.example/doc/mod1", MOD1),
                ("https://p.example/doc/adj1", ADJ1),
            ],
            &tmp,
        )
        .await;
        let processor = RowProcessor::new(&fetcher);
        let mut ctx = RunContext::default();
        let seed = SeedRecord::new("EXP-1", "https://p.example/n/1");

        let row = processor.process(&seed, &mut ctx).await;

        assert_eq!(row.modified, Modified::Yes);
        assert_eq!(row.instance_count("Mod"), 3);
        assert_eq!(row.instance_count("Adj"), 1);
        assert_eq!(row.field("Mod 1/Importe"), Some("1.000"));
        assert_eq!(row.field("Mod 2/Error"), Some("Failed to fetch modification page"));
        assert_eq!(row.field("Mod 3/Error"), Some(ERR_NO_VIEWER_LINK));
        assert_eq!(row.field("Adj 1/Adjudicatario"), Some("ACME"));
        assert_eq!(
            row.field("Fecha Anuncio de licitación"),
            Some("10/01/2023 12:00, 11/01/2023")
        );
        assert_eq!(
            row.field("Fecha Modificación"),
            Some("05/06/2023, 07/06/2023, 09/06/2023")
        );
        assert_eq!(ctx.modifications.len(), 1);
        assert_eq!(ctx.awards.len(), 1);
        assert_eq!(ctx.awards[0].field("Adjudicatario"), "ACME");
        assert_eq!(stub.calls_to("https://p.example/doc/mod2"), 3);

        let keys: Vec<&str> = row.fields.keys().map(String::as_str).collect();
        let first_date = keys.iter().position(|k| k.starts_with("Fecha")).unwrap();
        let last_adj = keys.iter().rposition(|k| k.starts_with("Adj")).unwrap();
        assert!(last_adj < first_date);
    }

    #[tokio::test]
    async fn missing_table_means_not_modified() {
        let tmp = TempDir::new().unwrap();
        let (_, fetcher) = fetcher(&[("https://p.example/n/2", "<p>sin tabla</p>")], &tmp).await;
        let mut ctx = RunContext::default();
        let row = RowProcessor::new(&fetcher)
            .process(&SeedRecord::new("EXP-2", "https://p.example/n/2"), &mut ctx)
            .await;
        assert_eq!(row.modified, Modified::No);
        assert!(row.fields.is_empty());
    }

    #[tokio::test]
    async fn unreachable_main_page_is_reported_on_the_row() {
        let tmp = TempDir::new().unwrap();
        let (_, fetcher) = fetcher(&[], &tmp).await;
        let mut ctx = RunContext::default();
        let row = RowProcessor::new(&fetcher)
            .process(&SeedRecord::new("EXP-3", "https://p.example/down"), &mut ctx)
            .await;
        assert_eq!(row.modified.to_string(), "Error - Failed to fetch main page");
        assert_eq!(fetcher.failed_urls(), vec!["https://p.example/down".to_string()]);
    }

    #[tokio::test]
    async fn missing_heading_triggers_one_refetch() {
        let tmp = TempDir::new().unwrap();
        let notice = format!(
            r#"<table id="myTablaDetalleVISUOE"><tr><td>05/06/2023</td><td>Modificación</td>
               <td><a href="/doc/m" {}>Html</a></td></tr></table>"#,
            VIEWER
        );
        let (stub, fetcher) = fetcher(
            &[
                ("https://p.example/n/4", notice.as_str()),
                ("https://p.example/doc/m", "<h3>Otro</h3>"),
            ],
            &tmp,
        )
        .await;
        let mut ctx = RunContext::default();
        let row = RowProcessor::new(&fetcher)
            .process(&SeedRecord::new("EXP-4", "https://p.example/n/4"), &mut ctx)
            .await;

        assert_eq!(row.field("Mod 1/Error"), Some(ERR_NO_HEADING_AFTER_REFETCH));
        assert_eq!(stub.calls_to("https://p.example/doc/m"), 2);
        assert!(ctx.modifications.is_empty());
    }

    #[tokio::test]
    async fn award_without_data_or_heading_reports_both() {
        let tmp = TempDir::new().unwrap();
        let notice = format!(
            r#"<table id="myTablaDetalleVISUOE"><tr><td>02/03/2023</td><td>Adjudicación</td>
               <td><a href="/doc/a" {}>Html</a></td></tr></table>"#,
            VIEWER
        );
        let (_, fetcher) = fetcher(
            &[
                ("https://p.example/n/5", notice.as_str()),
                ("https://p.example/doc/a", "<p>vacío</p>"),
            ],
            &tmp,
        )
        .await;
        let mut ctx = RunContext::default();
        let row = RowProcessor::new(&fetcher)
            .process(&SeedRecord::new("EXP-5", "https://p.example/n/5"), &mut ctx)
            .await;

        assert_eq!(row.modified, Modified::No);
        assert_eq!(
            row.field("Adj 1/Error"),
            Some("No data found in leftCol or rigCol; No <h5/h4/h3> found for Información Sobre las Ofertas")
        );
        assert!(ctx.awards.is_empty());
    }

    async fn process_with(stub: StubTransport, url: &str, tmp: &TempDir) -> (ResultRow, Fetcher) {
        let cache = ContentCache::open(&tmp.path().join("cache.db")).await.unwrap();
        let fetcher = Fetcher::new(Arc::new(stub), cache, &fast_config());
        let mut ctx = RunContext::default();
        let row = RowProcessor::new(&fetcher)
            .process(&SeedRecord::new("EXP-T", url), &mut ctx)
            .await;
        (row, fetcher)
    }

    #[tokio::test]
    async fn certificate_failure_on_main_page_is_an_ssl_error() {
        let tmp = TempDir::new().unwrap();
        let url = "https://p.example/tls";
        let stub = StubTransport::default().with_failure(
            url,
            FetchError::Tls {
                url: url.to_string(),
                message: "invalid peer certificate: UnknownIssuer".to_string(),
            },
        );
        let (row, fetcher) = process_with(stub, url, &tmp).await;

        assert_eq!(row.modified, Modified::Error(RowError::SslVerification));
        assert_eq!(row.modified.to_string(), "Error - SSL Verification Failed");
        assert!(row.fields.is_empty());
        assert_eq!(fetcher.failed_urls(), vec![url.to_string()]);
    }

    #[tokio::test]
    async fn malformed_main_url_is_a_plain_error() {
        let tmp = TempDir::new().unwrap();
        let url = "notice/without/scheme";
        let stub = StubTransport::default()
            .with_failure(url, FetchError::InvalidUrl(url.to_string()));
        let (row, _) = process_with(stub, url, &tmp).await;

        assert_eq!(row.modified, Modified::Error(RowError::Request));
        assert_eq!(row.modified.to_string(), "Error");
    }

    /// Serves a notice whose document fetch panics.
    struct Exploding;

    #[async_trait]
    impl Transport for Exploding {
        async fn get(&self, url: &str) -> Result<String, FetchError> {
            if url.ends_with("/doc/boom") {
                panic!("parser blew up on {}", url);
            }
            Ok(format!(
                r#"<table id="myTablaDetalleVISUOE"><tr><td>05/06/2023</td><td>Modificación</td>
                   <td><a href="/doc/boom" {}>Html</a></td></tr></table>"#,
                VIEWER
            ))
        }
    }

    #[tokio::test]
    async fn panic_during_extraction_is_reported_on_the_row() {
        let tmp = TempDir::new().unwrap();
        let cache = ContentCache::open(&tmp.path().join("cache.db")).await.unwrap();
        let fetcher = Fetcher::new(Arc::new(Exploding), cache, &fast_config());
        let mut ctx = RunContext::default();

        let row = RowProcessor::new(&fetcher)
            .process(&SeedRecord::new("EXP-P", "https://p.example/n/p"), &mut ctx)
            .await;

        assert_eq!(
            row.modified.to_string(),
            "Error - parser blew up on https://p.example/doc/boom"
        );
        assert!(ctx.modifications.is_empty());

        let next = RowProcessor::new(&fetcher)
            .process(&SeedRecord::new("EXP-Q", "https://p.example/n/q"), &mut ctx)
            .await;
        assert!(matches!(next.modified, Modified::Error(RowError::Other(_))));
    }
}
