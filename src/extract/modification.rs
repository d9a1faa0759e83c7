//! Contract amendment documents.
//!
//! The data sits in the first list after an `<h3>` titled "Modificación…":
//! each item is a label `<span>` followed by loose text, optionally with a
//! nested list of `div.noremarca` values.

use regex::Regex;
use scraper::{ElementRef, Html};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use super::{flatten_nested, text_run_after, Attempt, Chain, Strategy};
use crate::html;
use crate::models::FieldMap;

static RE_HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)Modificaci.*").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModificationError {
    #[error("No <h3> found")]
    MissingHeading,
    #[error("No <ul> found")]
    MissingList,
}

pub fn heading(document: &Html) -> Option<ElementRef<'_>> {
    html::find_all(document.root_element(), "h3").find(|h| html::string_matches(h, &RE_HEADING))
}

struct HeadingList;

impl Strategy<FieldMap> for HeadingList {
    fn name(&self) -> &'static str {
        "heading-list"
    }

    fn apply(&self, document: &Html) -> Attempt<FieldMap> {
        let Some(h3) = heading(document) else {
            return Attempt::miss();
        };
        let Some(list) = html::find_next(document, h3, |e| html::is_tag(e, "ul")) else {
            return Attempt::miss();
        };
        Attempt::hit(read_list(list))
    }
}

fn read_list(list: ElementRef<'_>) -> FieldMap {
    let mut fields = FieldMap::new();
    for item in html::children_named(list, "li") {
        let Some(span) = html::find_first(item, "span") else {
            continue;
        };
        let label = html::strip_text(&span);
        let value = text_run_after(span);
        if value.is_empty() {
            debug!("No direct value for '{}'", label);
        } else {
            fields.insert(label.clone(), value);
        }
        flatten_nested(item, &label, &mut fields);
    }
    fields
}

pub fn chain() -> Chain<FieldMap> {
    Chain::new("modification").with(HeadingList)
}

/// Fields of an amendment document, keyed by their label.
pub fn extract(document: &Html, url: &str) -> Result<FieldMap, ModificationError> {
    if let Some(hit) = chain().run(document, url) {
        info!("Section Modificación del contrato found on {}", url);
        return Ok(hit.value);
    }

    if heading(document).is_some() {
        warn!("No <ul> after the Modificación heading on {}", url);
        Err(ModificationError::MissingList)
    } else {
        let headings: Vec<String> = html::find_all(document.root_element(), "h3")
            .map(|h| html::strip_text(&h))
            .collect();
        warn!(
            "No <h3> matched 'Modificaci.*' on {}. Found {} <h3> tags: {:?}",
            url,
            headings.len(),
            headings
        );
        Err(ModificationError::MissingHeading)
    }
}
