//! Small scraping helpers shared by the transport, the form parsers and the
//! workflows.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{CalpadsError, Result};

/// Parse a CSS selector that is a compile-time literal.
pub(crate) fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("literal selector is valid")
}

/// Visible text of an element with whitespace collapsed and non-breaking
/// spaces folded to plain spaces.
pub(crate) fn element_text(el: &ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<Vec<_>>().join(" "))
}

pub(crate) fn normalize_text(raw: &str) -> String {
    raw.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolve an `href`/`action`/`src` value against the page it came from.
///
/// An empty value resolves to the page itself, as browsers do for forms.
pub(crate) fn resolve_url(base: &Url, raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(base.clone());
    }
    Ok(base.join(raw)?)
}

/// `value` attribute of the first `input` with the given `name`.
pub(crate) fn input_value_by_name(doc: &Html, name: &str) -> Option<String> {
    doc.select(&sel("input"))
        .find(|el| el.value().attr("name") == Some(name))
        .map(|el| el.value().attr("value").unwrap_or("").to_string())
}

/// `value` attribute of the `input` with the given `id`.
pub(crate) fn input_value_by_id(doc: &Html, id: &str) -> Option<String> {
    doc.select(&sel("input"))
        .find(|el| el.value().id() == Some(id))
        .map(|el| el.value().attr("value").unwrap_or("").to_string())
}

/// Every named `input` beneath `root`, in document order.
pub(crate) fn named_inputs(root: &ElementRef<'_>) -> Vec<(String, String)> {
    root.select(&sel("input[name]"))
        .filter_map(|el| {
            let name = el.value().attr("name")?;
            Some((
                name.to_string(),
                el.value().attr("value").unwrap_or("").to_string(),
            ))
        })
        .collect()
}

/// Resolved `action` of a form, falling back to the page URL.
pub(crate) fn form_action(form: &ElementRef<'_>, page_url: &Url) -> Result<Url> {
    resolve_url(page_url, form.value().attr("action").unwrap_or(""))
}

/// Whether `el` or any of its descendants carries a class containing `needle`.
pub(crate) fn has_class_containing(el: &ElementRef<'_>, needle: &str) -> bool {
    el.descendants()
        .filter_map(ElementRef::wrap)
        .any(|e| e.value().classes().any(|c| c.to_ascii_lowercase().contains(needle)))
}

/// Parse a caller-configured selector, reporting a readable error.
pub(crate) fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| CalpadsError::Config(format!("invalid selector {css:?}: {e}")))
}
