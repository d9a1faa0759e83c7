//! Tree-walking helpers over a parsed [`scraper::Html`] document.
//!
//! The portal's markup is matched by tag name, class and text rather than
//! by CSS selectors, so these helpers mirror the handful of navigation
//! primitives the extractors need: document-order search forwards and
//! backwards, direct children, enclosing ancestors and text flattening.

use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html};
use tracing::debug;

/// Parse a page. html5ever never rejects input; recovered markup errors
/// are logged so malformed pages can be spotted in the run log.
pub fn parse(content: &str, url: &str) -> Html {
    let document = Html::parse_document(content);
    if !document.errors.is_empty() {
        debug!(
            "Recovered from {} markup errors while parsing {}",
            document.errors.len(),
            url
        );
    }
    document
}

/// All elements at or under `root`, in document order.
pub fn elements<'a>(root: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    root.descendants().filter_map(ElementRef::wrap)
}

pub fn is_tag(el: &ElementRef<'_>, name: &str) -> bool {
    el.value().name().eq_ignore_ascii_case(name)
}

pub fn has_class(el: &ElementRef<'_>, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}

pub fn find_first<'a>(root: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    elements(root).find(|el| is_tag(el, name))
}

pub fn find_all<'a>(root: ElementRef<'a>, name: &'a str) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    elements(root).filter(move |el| is_tag(el, name))
}

pub fn find_with_class<'a>(root: ElementRef<'a>, name: &str, class: &str) -> Option<ElementRef<'a>> {
    elements(root).find(|el| is_tag(el, name) && has_class(el, class))
}

/// Direct element children with the given tag.
pub fn children_named<'a>(el: ElementRef<'a>, name: &'a str) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    el.children()
        .filter_map(ElementRef::wrap)
        .filter(move |c| is_tag(c, name))
}

/// Nearest enclosing element matching `pred`, excluding `el` itself.
pub fn enclosing<'a, F>(el: ElementRef<'a>, pred: F) -> Option<ElementRef<'a>>
where
    F: Fn(&ElementRef<'a>) -> bool,
{
    el.ancestors().filter_map(ElementRef::wrap).find(|a| pred(a))
}

/// First element after `el` in document order (its descendants included).
pub fn find_next<'a, F>(document: &'a Html, el: ElementRef<'a>, pred: F) -> Option<ElementRef<'a>>
where
    F: Fn(&ElementRef<'a>) -> bool,
{
    elements(document.root_element())
        .skip_while(|e| e.id() != el.id())
        .skip(1)
        .find(|e| pred(e))
}

/// Last element before `el` in document order.
pub fn find_previous<'a, F>(document: &'a Html, el: ElementRef<'a>, pred: F) -> Option<ElementRef<'a>>
where
    F: Fn(&ElementRef<'a>) -> bool,
{
    elements(document.root_element())
        .take_while(|e| e.id() != el.id())
        .filter(|e| pred(e))
        .last()
}

/// Text nodes trimmed and concatenated, whitespace-only nodes dropped.
pub fn strip_text(el: &ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("")
}

/// Text of an element whose content is a single string, descending through
/// single-child wrappers. `None` for mixed content.
pub fn sole_string(el: &ElementRef<'_>) -> Option<String> {
    let mut children = el.children();
    let only = children.next()?;
    if children.next().is_some() {
        return None;
    }
    match only.value() {
        Node::Text(text) => Some(String::from(&**text)),
        Node::Element(_) => ElementRef::wrap(only).and_then(|child| sole_string(&child)),
        _ => None,
    }
}

/// Whether the element's sole string matches `re`.
pub fn string_matches(el: &ElementRef<'_>, re: &Regex) -> bool {
    sole_string(el).is_some_and(|s| re.is_match(&s))
}

/// Collapse runs of whitespace (including non-breaking spaces) to one space.
pub fn normalize_ws(text: &str) -> String {
    text.split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A sibling following a label: either a text node or an element.
pub enum Sibling<'a> {
    Text(String),
    Element(ElementRef<'a>),
}

pub fn following_siblings<'a>(el: ElementRef<'a>) -> impl Iterator<Item = Sibling<'a>> + 'a {
    el.next_siblings().filter_map(|node| match node.value() {
        Node::Text(text) => Some(Sibling::Text(String::from(&**text))),
        Node::Element(_) => ElementRef::wrap(node).map(Sibling::Element),
        _ => None,
    })
}
