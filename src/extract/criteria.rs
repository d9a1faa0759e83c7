//! Adjudication criteria documents.
//!
//! Criteria are listed under a "Criterios de adjudicación" heading, grouped by
//! sub-headings for formula-based and value-judgement criteria. Each list
//! item is either a criterion name or a labelled detail (subtype, weight,
//! minimum, maximum, formula). A record is emitted once both subtype and
//! weight are known. Pages without the heading fall back to table rows.

use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use super::{Attempt, Chain, Strategy};
use crate::html;
use crate::models::{Category, CriteriaSummary, ExtractionRecord, FieldMap};

pub const CATEGORY_FORMULAS: &str = "Criterios evaluables mediante aplicación de fórmulas";
pub const CATEGORY_VALUE_JUDGEMENT: &str = "Criterios evaluables mediante un juicio de valor";
pub const CATEGORY_TABLE: &str = "Desconocida (Tabla)";
pub const NO_SECTION_ERROR: &str = "No se encontró sección de criterios";

pub const FIELD_CATEGORY: &str = "Categoría";
pub const FIELD_CRITERION: &str = "Criterio";
pub const FIELD_SUBTYPE: &str = "Subtipo Criterio";
pub const FIELD_WEIGHT: &str = "Ponderación";
pub const FIELD_MIN: &str = "Cantidad Mínima";
pub const FIELD_MAX: &str = "Cantidad Máxima";
pub const FIELD_FORMULA: &str = "Fórmula o Detalle";

const SECTION_TAGS: [&str; 7] = ["h1", "h2", "h3", "h4", "h5", "h6", "div"];
const GROUP_TAGS: [&str; 3] = ["h6", "h5", "h4"];

macro_rules! re {
    ($name:ident, $pattern:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($pattern).unwrap());
    };
}

re!(RE_SECTION, r"(?i)criterios\s*(de\s*adjudicación|adjudicación|evaluables|evaluación)");
re!(RE_GROUP, r"(?i)juicio\s*de\s*valor|fórmulas|evaluables");
re!(RE_FORMULAS, r"(?i)fórmulas");
re!(RE_VALUE_JUDGEMENT, r"(?i)juicio\s*de\s*valor");
re!(RE_SUBTYPE, r"(?i)subtipo\s*criterio");
re!(RE_WEIGHT, r"(?i)ponderación");
re!(RE_MIN, r"(?i)(puntuación|cantidad)\s*mínima");
re!(RE_MAX, r"(?i)(puntuación|cantidad)\s*máxima");
re!(RE_FORMULA, r"(?i)(expresión\s*de\s*evaluación|fórmula)|^P\s*=");
re!(RE_TABLE_ROW, r"(?i)criterios|ponderación|subtipo");
re!(RE_TABLE_CRITERION, r"(?i)criterio");
re!(RE_TABLE_SUBTYPE, r"(?i)subtipo");
re!(RE_TABLE_FORMULA, r"(?i)fórmula|evaluación");

/// The criterion being assembled while walking the lists.
#[derive(Debug, Clone, Default)]
struct Entry {
    category: String,
    criterion: String,
    subtype: String,
    weight: String,
    min: String,
    max: String,
    formula: String,
}

impl Entry {
    fn is_complete(&self) -> bool {
        !self.subtype.is_empty() && !self.weight.is_empty()
    }

    fn clear_details(&mut self) {
        self.subtype.clear();
        self.weight.clear();
        self.min.clear();
        self.max.clear();
        self.formula.clear();
    }

    fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert(FIELD_CATEGORY.to_string(), self.category.clone());
        fields.insert(FIELD_CRITERION.to_string(), self.criterion.clone());
        fields.insert(FIELD_SUBTYPE.to_string(), self.subtype.clone());
        fields.insert(FIELD_WEIGHT.to_string(), self.weight.clone());
        fields.insert(FIELD_MIN.to_string(), self.min.clone());
        fields.insert(FIELD_MAX.to_string(), self.max.clone());
        fields.insert(FIELD_FORMULA.to_string(), self.formula.clone());
        fields
    }
}

/// Criteria found in one document, before de-duplication.
#[derive(Debug, Clone, Default)]
pub struct Findings {
    pub entries: Vec<FieldMap>,
    pub has_value_judgement: bool,
    pub has_formulas: bool,
}

pub fn section_heading(document: &Html) -> Option<ElementRef<'_>> {
    SECTION_TAGS.iter().find_map(|&tag| {
        html::find_all(document.root_element(), tag).find(|h| html::string_matches(h, &RE_SECTION))
    })
}

/// First text node, `div` or `span` after the label; text is taken even
/// when blank.
fn detail_value(span: ElementRef<'_>) -> String {
    for node in span.next_siblings() {
        match node.value() {
            Node::Text(text) => return text.trim().to_string(),
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(node) {
                    if html::is_tag(&el, "div") || html::is_tag(&el, "span") {
                        return html::strip_text(&el);
                    }
                }
            }
            _ => {}
        }
    }
    String::new()
}

struct Section;

impl Strategy<Findings> for Section {
    fn name(&self) -> &'static str {
        "criteria-section"
    }

    fn apply(&self, document: &Html) -> Attempt<Findings> {
        let Some(heading) = section_heading(document) else {
            return Attempt::miss();
        };
        let container = heading
            .parent()
            .and_then(ElementRef::wrap)
            .unwrap_or_else(|| document.root_element());

        let mut findings = Findings::default();
        let mut entry = Entry::default();
        let mut current_criterion = String::new();

        for list in html::find_all(container, "ul") {
            let group = html::find_previous(document, list, |e| {
                GROUP_TAGS.iter().any(|&t| html::is_tag(e, t)) && html::string_matches(e, &RE_GROUP)
            });
            if let Some(group) = group {
                let text = html::strip_text(&group);
                if RE_FORMULAS.is_match(&text) {
                    findings.has_formulas = true;
                    entry.category = CATEGORY_FORMULAS.to_string();
                } else if RE_VALUE_JUDGEMENT.is_match(&text) {
                    findings.has_value_judgement = true;
                    entry.category = CATEGORY_VALUE_JUDGEMENT.to_string();
                } else {
                    continue;
                }
            }

            for item in html::children_named(list, "li") {
                let body = html::elements(item)
                    .skip(1)
                    .find(|e| {
                        html::is_tag(e, "div")
                            && (html::has_class(e, "noremarca") || html::has_class(e, "content"))
                    })
                    .unwrap_or(item);

                let Some(span) = html::find_first(body, "span") else {
                    current_criterion = html::strip_text(&body);
                    entry.criterion = current_criterion.clone();
                    debug!("Criterion: {}", current_criterion);
                    continue;
                };

                let label = html::strip_text(&span);
                let value = detail_value(span);
                if RE_SUBTYPE.is_match(&label) {
                    entry.subtype = value;
                } else if RE_WEIGHT.is_match(&label) {
                    entry.weight = value;
                } else if RE_MIN.is_match(&label) {
                    entry.min = value;
                } else if RE_MAX.is_match(&label) {
                    entry.max = value;
                } else if RE_FORMULA.is_match(&label) {
                    entry.formula = value;
                }

                if entry.is_complete() {
                    findings.entries.push(entry.to_fields());
                    entry.criterion = current_criterion.clone();
                    entry.clear_details();
                }
            }
        }

        Attempt::hit(findings)
    }
}

struct TableRows;

impl Strategy<Findings> for TableRows {
    fn name(&self) -> &'static str {
        "table-rows"
    }

    fn apply(&self, document: &Html) -> Attempt<Findings> {
        let mut findings = Findings::default();

        for table in html::find_all(document.root_element(), "table") {
            for row in html::find_all(table, "tr") {
                let cells: Vec<String> = html::elements(row)
                    .filter(|e| html::is_tag(e, "td") || html::is_tag(e, "th"))
                    .map(|c| html::strip_text(&c))
                    .collect();
                if !cells.iter().any(|c| RE_TABLE_ROW.is_match(c)) {
                    continue;
                }

                let mut entry = Entry {
                    category: CATEGORY_TABLE.to_string(),
                    ..Default::default()
                };
                for text in cells {
                    let slot = if RE_TABLE_CRITERION.is_match(&text) {
                        &mut entry.criterion
                    } else if RE_TABLE_SUBTYPE.is_match(&text) {
                        &mut entry.subtype
                    } else if RE_WEIGHT.is_match(&text) {
                        &mut entry.weight
                    } else if RE_MIN.is_match(&text) {
                        &mut entry.min
                    } else if RE_MAX.is_match(&text) {
                        &mut entry.max
                    } else if RE_TABLE_FORMULA.is_match(&text) {
                        &mut entry.formula
                    } else {
                        continue;
                    };
                    *slot = text;
                }

                if !entry.criterion.is_empty() || !entry.subtype.is_empty() {
                    findings.entries.push(entry.to_fields());
                }
            }
        }

        if findings.entries.is_empty() {
            Attempt::miss()
        } else {
            Attempt::hit(findings)
        }
    }
}

pub fn chain() -> Chain<Findings> {
    Chain::new("criteria").with(Section).with(TableRows)
}

/// Accumulates criteria records across documents, never storing two with
/// the same (link, criterion, subtype).
#[derive(Debug, Default)]
pub struct CriteriaCollector {
    records: Vec<ExtractionRecord>,
    summaries: Vec<CriteriaSummary>,
}

impl CriteriaCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_duplicate(&self, record: &ExtractionRecord) -> bool {
        self.records.iter().any(|r| {
            r.link == record.link
                && r.field(FIELD_CRITERION) == record.field(FIELD_CRITERION)
                && r.field(FIELD_SUBTYPE) == record.field(FIELD_SUBTYPE)
        })
    }

    /// Extract one document. Returns whether any new record was stored.
    pub fn collect(&mut self, document: &Html, link: &str, identifier: &str) -> bool {
        let hit = chain().run(document, link);
        let section_found = hit.as_ref().is_some_and(|h| h.strategy == "criteria-section");
        if !section_found {
            warn!("No criteria section on {}, tried table rows", link);
        }
        let findings = hit.map(|h| h.value).unwrap_or_default();

        let mut added = false;
        for fields in findings.entries {
            let record = ExtractionRecord {
                fields,
                ..ExtractionRecord::new(link, identifier, Category::Criteria)
            };
            if self.is_duplicate(&record) {
                debug!(
                    "Skipping duplicate criterion '{}' / '{}' on {}",
                    record.field(FIELD_CRITERION),
                    record.field(FIELD_SUBTYPE),
                    link
                );
                continue;
            }
            info!(
                "Criterion added for {}: {} / {}",
                link,
                record.field(FIELD_CATEGORY),
                record.field(FIELD_CRITERION)
            );
            self.records.push(record);
            added = true;
        }

        self.summaries.push(CriteriaSummary {
            link: link.to_string(),
            identifier: identifier.to_string(),
            has_value_judgement: findings.has_value_judgement,
            has_formulas: findings.has_formulas,
            error: (!section_found).then(|| NO_SECTION_ERROR.to_string()),
        });

        added
    }

    pub fn records(&self) -> &[ExtractionRecord] {
        &self.records
    }

    pub fn summaries(&self) -> &[CriteriaSummary] {
        &self.summaries
    }
}
