//! Award documents ("Información sobre las ofertas").
//!
//! Values live in column containers (`leftCol`, `rigCol` and their `…Co1`
//! misspellings) inside the box that holds the offers heading. The heading
//! is advisory: when it is missing the first classed box, then the page
//! body, is searched instead.

use regex::Regex;
use scraper::{ElementRef, Html};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use super::{flatten_nested, value_after, Attempt, Chain, Strategy};
use crate::html;
use crate::models::FieldMap;

static RE_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(Informaci|Datos).*Oferta.*").unwrap());

pub const HEADING_LEVELS: [&str; 3] = ["h5", "h4", "h3"];
pub const COLUMN_CLASSES: [&str; 4] = ["leftCol", "rigCol", "leftCo1", "rigCo1"];
const BOX_CLASS: &str = "boxWithBackground";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwardExtraction {
    pub fields: FieldMap,
    pub heading_found: bool,
}

/// Offers heading, trying `h5`, then `h4`, then `h3`.
pub fn heading(document: &Html) -> Option<ElementRef<'_>> {
    HEADING_LEVELS.iter().find_map(|&level| {
        html::find_all(document.root_element(), level).find(|h| {
            html::sole_string(h).is_some_and(|s| RE_HEADING.is_match(&html::normalize_ws(&s)))
        })
    })
}

fn read_columns(container: ElementRef<'_>) -> FieldMap {
    let mut fields = FieldMap::new();
    for class in COLUMN_CLASSES {
        let Some(column) = html::find_with_class(container, "div", class) else {
            debug!("No <div class='{}'> in container", class);
            continue;
        };
        for list in html::children_named(column, "ul") {
            for item in html::children_named(list, "li") {
                let Some(span) = html::find_first(item, "span") else {
                    continue;
                };
                let label = html::strip_text(&span);
                match value_after(span).filter(|v| !v.is_empty()) {
                    Some(value) => {
                        debug!("Field in {}: {} = {}", class, label, value);
                        fields.insert(label.clone(), value);
                    }
                    None => debug!("No value for span '{}' in {}", label, class),
                }
                flatten_nested(item, &label, &mut fields);
            }
        }
    }
    fields
}

fn found_if_any(fields: FieldMap) -> Attempt<FieldMap> {
    if fields.is_empty() {
        Attempt::miss()
    } else {
        Attempt::hit(fields)
    }
}

struct HeadingBox;

impl Strategy<FieldMap> for HeadingBox {
    fn name(&self) -> &'static str {
        "offers-heading"
    }

    fn apply(&self, document: &Html) -> Attempt<FieldMap> {
        let Some(h) = heading(document) else {
            return Attempt::miss();
        };
        let container = html::enclosing(h, |a| html::is_tag(a, "div") && html::has_class(a, BOX_CLASS))
            .or_else(|| html::enclosing(h, |a| html::is_tag(a, "div")));
        match container {
            Some(container) => found_if_any(read_columns(container)),
            None => Attempt::miss(),
        }
    }
}

struct FirstBox;

impl Strategy<FieldMap> for FirstBox {
    fn name(&self) -> &'static str {
        "first-box"
    }

    fn apply(&self, document: &Html) -> Attempt<FieldMap> {
        match html::find_with_class(document.root_element(), "div", BOX_CLASS) {
            Some(container) => found_if_any(read_columns(container)),
            None => Attempt::miss(),
        }
    }
}

struct PageBody;

impl Strategy<FieldMap> for PageBody {
    fn name(&self) -> &'static str {
        "page-body"
    }

    fn apply(&self, document: &Html) -> Attempt<FieldMap> {
        match html::find_first(document.root_element(), "body") {
            Some(body) => found_if_any(read_columns(body)),
            None => Attempt::miss(),
        }
    }
}

pub fn chain() -> Chain<FieldMap> {
    Chain::new("award")
        .with(HeadingBox)
        .with(FirstBox)
        .with(PageBody)
}

pub fn extract(document: &Html, url: &str) -> AwardExtraction {
    let heading_found = heading(document).is_some();
    if heading_found {
        info!("Información Sobre las Ofertas heading found on {}", url);
    } else {
        let texts: Vec<String> = html::elements(document.root_element())
            .filter(|e| HEADING_LEVELS.iter().any(|level| html::is_tag(e, level)))
            .map(|h| html::strip_text(&h))
            .collect();
        warn!("No h5/h4/h3 offers heading on {}. Headings: {:?}", url, texts);
    }

    let fields = chain()
        .run(document, url)
        .map(|hit| hit.value)
        .unwrap_or_default();

    AwardExtraction {
        fields,
        heading_found,
    }
}
