//! Markup conventions of the procurement portal's notice pages.
//!
//! A notice page carries a detail table (`#myTablaDetalleVISUOE`) listing
//! dated documents. Amendment ("Modificación") and award ("Adjudicación")
//! rows link to an HTML rendering through a viewer anchor in the next cell.

use regex::Regex;
use scraper::{ElementRef, Html};
use std::sync::LazyLock;
use tracing::{debug, info};
use url::Url;

use crate::html;

pub const DETAIL_TABLE_ID: &str = "myTablaDetalleVISUOE";
pub const VIEWER_TITLE: &str = "Este documento se abrirá en una nueva ventana";
pub const VIEWER_LABEL: &str = "Html";
/// Href fragment of the servlet serving adjudication documents.
pub const DOCUMENT_SERVLET: &str = "GetDocumentByIdServlet";

static RE_MODIFICATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)Modificaci").unwrap());
static RE_AWARD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)Adjudicaci").unwrap());
static RE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d{2}/\d{2}/\d{4}\s*\d{2}:\d{2}(?::\d{2})?|\d{2}/\d{2}/\d{4})").unwrap()
});

/// Document type named in the second cell of a detail-table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentKind {
    Modification,
    Award,
    Other(String),
}

pub fn classify(label: &str) -> DocumentKind {
    if RE_MODIFICATION.is_match(label) {
        DocumentKind::Modification
    } else if RE_AWARD.is_match(label) {
        DocumentKind::Award
    } else {
        DocumentKind::Other(label.to_string())
    }
}

/// `dd/mm/yyyy`, optionally followed by `hh:mm[:ss]`.
pub fn is_dated(text: &str) -> bool {
    RE_DATE.is_match(text)
}

/// Resolve an href against the page it was found on.
pub fn resolve(base: &str, href: &str) -> Option<String> {
    Url::parse(base).ok()?.join(href).ok().map(String::from)
}

pub fn detail_table(document: &Html) -> Option<ElementRef<'_>> {
    html::elements(document.root_element())
        .find(|el| html::is_tag(el, "table") && el.value().attr("id") == Some(DETAIL_TABLE_ID))
}

fn is_viewer_anchor(el: &ElementRef<'_>) -> bool {
    html::is_tag(el, "a")
        && el.value().attr("title") == Some(VIEWER_TITLE)
        && el.value().attr("target") == Some("_blank")
        && html::sole_string(el).is_some_and(|s| s.trim() == VIEWER_LABEL)
}

/// Href of the "Html" viewer anchor in the cell following `cell`.
pub fn viewer_href<'a>(document: &'a Html, cell: ElementRef<'a>) -> Option<&'a str> {
    let next_cell = html::find_next(document, cell, |e| html::is_tag(e, "td"))?;
    html::elements(next_cell)
        .find(is_viewer_anchor)
        .and_then(|a| a.value().attr("href"))
}

/// Absolute URLs of every amendment and award viewer link on a notice page,
/// deduplicated in first-seen order.
pub fn discover_detail_links(document: &Html, page_url: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    for cell in html::find_all(document.root_element(), "td") {
        let kind = if html::string_matches(&cell, &RE_MODIFICATION) {
            "modification"
        } else if html::string_matches(&cell, &RE_AWARD) {
            "adjudication"
        } else {
            continue;
        };

        let Some(href) = viewer_href(document, cell) else {
            debug!("No viewer link next to {} cell on {}", kind, page_url);
            continue;
        };

        if let Some(url) = resolve(page_url, href) {
            if !found.contains(&url) {
                info!("Found {} URL: {}", kind, url);
                found.push(url);
            }
        }
    }

    found
}

/// First link to the adjudication document servlet, resolved.
pub fn servlet_document_link(document: &Html, page_url: &str) -> Option<String> {
    html::find_all(document.root_element(), "a")
        .filter_map(|a| a.value().attr("href"))
        .find(|href| href.contains(DOCUMENT_SERVLET))
        .and_then(|href| resolve(page_url, href))
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const NOTICE: &str = r#"<html><body>
    <table id="myTablaDetalleVISUOE">
      <tr><td>10/01/2023 12:00</td><td>Anuncio de licitación</td><td></td></tr>
      <tr><td>02/03/2023</td><td>Adjudicación</td>
          <td><a href="doc?id=adj1" title="Este documento se abrirá en una nueva ventana" target="_blank">Html</a>
              <a href="doc?id=adj1.pdf" target="_blank">Pdf</a></td></tr>
      <tr><td>05/06/2023 09:30:00</td><td>Modificación de contrato</td>
          <td><a href="/wps/doc?id=mod1" title="Este documento se abrirá en una nueva ventana" target="_blank">Html</a></td></tr>
    </table></body></html>"#;

    #[test]
    fn classifies_document_labels() {
        assert_eq!(classify("MODIFICACIÓN de contrato"), DocumentKind::Modification);
        assert_eq!(classify("Adjudicación"), DocumentKind::Award);
        assert_eq!(
            classify("Anuncio de licitación"),
            DocumentKind::Other("Anuncio de licitación".into())
        );
    }

    #[test]
    fn date_pattern_accepts_both_shapes() {
        assert!(is_dated("05/06/2023"));
        assert!(is_dated("05/06/2023 09:30"));
        assert!(is_dated("05/06/2023 09:30:15"));
        assert!(!is_dated("Fecha"));
        assert!(!is_dated("5/6/2023"));
    }

    #[test]
    fn discovers_viewer_links_resolved_against_page() {
        let doc = Html::parse_document(NOTICE);
        let links = discover_detail_links(&doc, "https://portal.example/wps/notice?id=1");
        assert_eq!(
            links,
            vec![
                "https://portal.example/wps/doc?id=adj1".to_string(),
                "https://portal.example/wps/doc?id=mod1".to_string(),
            ]
        );
    }

    #[test]
    fn finds_servlet_link() {
        let doc = Html::parse_document(
            r#"<a href="/x">x</a><a href="https://portal.example/GetDocumentByIdServlet?id=7">doc</a>"#,
        );
        assert_eq!(
            servlet_document_link(&doc, "https://portal.example/notice").as_deref(),
            Some("https://portal.example/GetDocumentByIdServlet?id=7")
        );
    }
}
