//! Best-effort field extraction from amendment, award and criteria documents.
//!
//! The portal renders the same information with several markup variants.
//! Each category is an ordered [`Chain`] of [`Strategy`] matchers; the first
//! one that reports `found` wins and every fallback is logged.
//!
//! | Module | Document |
//! |--------|----------|
//! | [`modification`] | "Modificación del contrato" pages |
//! | [`award`] | "Información sobre las ofertas" award pages |
//! | [`criteria`] | adjudication criteria documents |

pub mod award;
pub mod criteria;
pub mod modification;

use scraper::{ElementRef, Html};
use tracing::{debug, info};

use crate::html::{self, Sibling};
use crate::models::FieldMap;

/// Partial result of one strategy.
#[derive(Debug, Clone, Default)]
pub struct Attempt<T> {
    pub value: T,
    pub found: bool,
}

impl<T: Default> Attempt<T> {
    pub fn miss() -> Self {
        Self {
            value: T::default(),
            found: false,
        }
    }

    pub fn hit(value: T) -> Self {
        Self { value, found: true }
    }
}

pub trait Strategy<T> {
    fn name(&self) -> &'static str;
    fn apply(&self, document: &Html) -> Attempt<T>;
}

/// The winning strategy and its value.
#[derive(Debug, Clone)]
pub struct Hit<T> {
    pub strategy: &'static str,
    pub value: T,
}

/// Ordered strategies for one document category.
pub struct Chain<T> {
    category: &'static str,
    strategies: Vec<Box<dyn Strategy<T> + Send + Sync>>,
}

impl<T> Chain<T> {
    pub fn new(category: &'static str) -> Self {
        Self {
            category,
            strategies: Vec::new(),
        }
    }

    pub fn with(mut self, strategy: impl Strategy<T> + Send + Sync + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Evaluate strategies in order until one reports `found`.
    pub fn run(&self, document: &Html, url: &str) -> Option<Hit<T>> {
        for (i, strategy) in self.strategies.iter().enumerate() {
            let attempt = strategy.apply(document);
            if attempt.found {
                if i > 0 {
                    info!(
                        "{} extraction fell back to '{}' on {}",
                        self.category,
                        strategy.name(),
                        url
                    );
                }
                return Some(Hit {
                    strategy: strategy.name(),
                    value: attempt.value,
                });
            }
            debug!(
                "{} strategy '{}' found nothing on {}",
                self.category,
                strategy.name(),
                url
            );
        }
        None
    }
}

/// Concatenated trimmed text nodes following `span`, up to the next `span`.
fn text_run_after(span: ElementRef<'_>) -> String {
    let mut out = String::new();
    for sibling in html::following_siblings(span) {
        match sibling {
            Sibling::Text(t) => out.push_str(t.trim()),
            Sibling::Element(el) if html::is_tag(&el, "span") => break,
            Sibling::Element(_) => {}
        }
    }
    out.trim().to_string()
}

/// First usable value after a label span: a non-empty text node, a
/// `div.noremarca`, or another `span`.
fn value_after(span: ElementRef<'_>) -> Option<String> {
    for sibling in html::following_siblings(span) {
        match sibling {
            Sibling::Text(t) => {
                let t = t.trim();
                if !t.is_empty() && t != "== $0" {
                    return Some(t.to_string());
                }
            }
            Sibling::Element(el) if html::is_tag(&el, "div") && html::has_class(&el, "noremarca") => {
                return Some(html::strip_text(&el));
            }
            Sibling::Element(el) if html::is_tag(&el, "span") => {
                return Some(html::strip_text(&el));
            }
            Sibling::Element(_) => {}
        }
    }
    None
}

/// Flatten the first list nested in `item` into `fields`.
///
/// Items with a label span and a `div.noremarca` are stored under their own
/// label; items with only the div are stored under `outer_label`.
fn flatten_nested(item: ElementRef<'_>, outer_label: &str, fields: &mut FieldMap) {
    let Some(nested) = html::elements(item)
        .skip(1)
        .find(|e| html::is_tag(e, "ul"))
    else {
        return;
    };
    debug!("Nested <ul> found under {}", outer_label);

    for li in html::children_named(nested, "li") {
        let span = html::find_first(li, "span");
        let Some(div) = html::find_with_class(li, "div", "noremarca") else {
            continue;
        };
        let value = html::strip_text(&div);
        if value.is_empty() {
            continue;
        }
        let label = match span {
            Some(span) => html::strip_text(&span),
            None => outer_label.to_string(),
        };
        debug!("Nested field {} = {}", label, value);
        fields.insert(label, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, bool);

    impl Strategy<u32> for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }
        fn apply(&self, _document: &Html) -> Attempt<u32> {
            if self.1 {
                Attempt::hit(7)
            } else {
                Attempt::miss()
            }
        }
    }

    #[test]
    fn chain_returns_first_found() {
        let doc = Html::parse_document("<p></p>");
        let chain = Chain::new("test")
            .with(Fixed("first", false))
            .with(Fixed("second", true))
            .with(Fixed("third", true));
        let hit = chain.run(&doc, "u").unwrap();
        assert_eq!(hit.strategy, "second");
        assert_eq!(hit.value, 7);

        let empty: Chain<u32> = Chain::new("none").with(Fixed("only", false));
        assert!(empty.run(&doc, "u").is_none());
    }

    #[test]
    fn value_after_skips_devtools_marker() {
        let doc = Html::parse_document(
            r#"<li><span>Importe</span> == $0 <div class="noremarca">100 EUR</div></li>"#,
        );
        let span = html::find_first(doc.root_element(), "span").unwrap();
        assert_eq!(value_after(span).as_deref(), Some("100 EUR"));
    }

    #[test]
    fn text_run_stops_at_next_span() {
        let doc = Html::parse_document(
            r#"<li><span>Motivo</span> Ampliación <b>x</b> de plazo <span>Otro</span> no</li>"#,
        );
        let span = html::find_first(doc.root_element(), "span").unwrap();
        assert_eq!(text_run_after(span), "Ampliaciónde plazo");
    }
}
