//! Parameter-block report forms.
//!
//! The report viewer renders each report parameter inside a container that
//! carries a `data-parametername` attribute. What sits beneath the container
//! decides the kind:
//!
//! | markup under the container            | kind                          |
//! |---------------------------------------|-------------------------------|
//! | a `select`                            | single select                 |
//! | radio inputs                          | single select over the radios |
//! | a `{id}_divDropDown` checkbox list    | multi select, index-encoded   |
//! | a text input (with a calendar widget) | text (date)                   |
//! | only labels                           | fixed text, read-only         |
//!
//! The checkbox list never submits its checkboxes. The viewer posts a
//! generated hidden `...HiddenIndices` input instead, whose value lists the
//! zero-based positions of the checked boxes.

use scraper::{ElementRef, Html};
use url::Url;

use super::schema::{FieldKind, FormFieldDescriptor, FormSchema, MultiEncoding, SelectOption};
use crate::error::Result;
use crate::html::{element_text, form_action, has_class_containing, normalize_text, sel};

const SELECT_PLACEHOLDER: &str = "<Select a Value>";
const SELECT_ALL: &str = "(Select All)";
const STATE_FIELDS: [&str; 5] = [
    "__VIEWSTATE",
    "__VIEWSTATEGENERATOR",
    "__EVENTVALIDATION",
    "__EVENTTARGET",
    "__EVENTARGUMENT",
];
const STATE_SUFFIXES: [&str; 3] = ["HiddenIndices", "txtValue", "ddValue"];

/// Parse the report viewer page into a schema keyed by parameter name.
pub fn parse_report_form(html: &str, page_url: &Url) -> Result<FormSchema> {
    let doc = Html::parse_document(html);

    let action = match doc.select(&sel("form")).next() {
        Some(form) => Some(form_action(&form, page_url)?),
        None => None,
    };
    let mut schema = FormSchema::new(action);

    for container in doc.select(&sel("[data-parametername]")) {
        let Some(name) = container.value().attr("data-parametername") else {
            continue;
        };
        match classify(&doc, &container) {
            Some(field) => schema.insert(name, field),
            None => tracing::debug!(param = name, "report parameter with no recognizable control"),
        }
    }

    for (name, value) in state_snapshot(&doc) {
        schema.defaults_mut().append(name, value);
    }

    Ok(schema)
}

fn classify(doc: &Html, container: &ElementRef<'_>) -> Option<FormFieldDescriptor> {
    if let Some(select) = container.select(&sel("select")).next() {
        let wire_name = select.value().attr("name")?;
        let labels: Vec<SelectOption> = select
            .select(&sel("option"))
            .map(|o| {
                let label = element_text(&o);
                let value = o.value().attr("value").map(normalize_text).unwrap_or_else(|| label.clone());
                SelectOption::new(label, value)
            })
            .collect();
        let has_placeholder = labels.iter().any(|o| o.label == SELECT_PLACEHOLDER);
        let options = labels.into_iter().filter(|o| o.label != SELECT_PLACEHOLDER).collect();
        return Some(
            FormFieldDescriptor::new(wire_name, FieldKind::SingleSelect { options }).required(has_placeholder),
        );
    }

    let radios: Vec<ElementRef<'_>> = container.select(&sel(r#"input[type="radio"]"#)).collect();
    if let Some(first) = radios.first() {
        let wire_name = first.value().attr("name")?;
        let options = radios
            .iter()
            .map(|r| {
                let value = r.value().attr("value").unwrap_or("").to_string();
                let label = r
                    .value()
                    .id()
                    .and_then(|id| label_for(doc, id))
                    .unwrap_or_else(|| value.clone());
                SelectOption::new(label, value)
            })
            .collect();
        return Some(FormFieldDescriptor::new(wire_name, FieldKind::SingleSelect { options }).required(true));
    }

    if let Some(field) = container.value().id().and_then(|id| checkbox_group(doc, id)) {
        return Some(field);
    }

    let text_input = container.select(&sel("input")).find(|i| {
        matches!(
            i.value().attr("type").map(|t| t.to_ascii_lowercase()).as_deref(),
            None | Some("text")
        )
    });
    if let Some(input) = text_input {
        let wire_name = input.value().attr("name")?;
        let kind = if has_class_containing(container, "calendar") {
            FieldKind::Date
        } else {
            FieldKind::Text
        };
        return Some(FormFieldDescriptor::new(wire_name, kind).required(!has_null_toggle(container)));
    }

    if container.select(&sel("label, span")).next().is_some() {
        return Some(FormFieldDescriptor::new("", FieldKind::Text).read_only());
    }

    None
}

/// The custom dropdown of checkboxes. Each option's wire value is its
/// position among the labels, `(Select All)` excluded.
fn checkbox_group(doc: &Html, container_id: &str) -> Option<FormFieldDescriptor> {
    let dropdown_id = format!("{container_id}_divDropDown");

    let options: Vec<SelectOption> = doc
        .select(&sel("label[for]"))
        .filter(|l| l.value().attr("for").is_some_and(|f| f.contains(&dropdown_id)))
        .map(|l| element_text(&l))
        .filter(|label| label != SELECT_ALL)
        .enumerate()
        .map(|(idx, label)| SelectOption::new(label, idx.to_string()))
        .collect();
    if options.is_empty() {
        return None;
    }

    let carrier = doc
        .select(&sel(r#"input[type="hidden"]"#))
        .find(|i| i.value().id().is_some_and(|id| id.contains(&dropdown_id)))?;
    let wire_name = carrier.value().attr("name")?;

    Some(
        FormFieldDescriptor::new(
            wire_name,
            FieldKind::MultiSelect {
                options,
                encoding: MultiEncoding::IndexList,
            },
        )
        .required(true),
    )
}

fn label_for(doc: &Html, id: &str) -> Option<String> {
    doc.select(&sel("label[for]"))
        .find(|l| l.value().attr("for") == Some(id))
        .map(|l| element_text(&l))
}

/// Nullable parameters render a "NULL" checkbox next to the input.
fn has_null_toggle(container: &ElementRef<'_>) -> bool {
    container
        .select(&sel(r#"input[type="checkbox"]"#))
        .any(|c| c.value().attr("name").is_some_and(|n| n.ends_with("cbNull")))
}

/// View-state tokens and the viewer's own per-parameter carriers.
fn state_snapshot(doc: &Html) -> Vec<(String, String)> {
    doc.select(&sel("[name]"))
        .filter_map(|el| {
            let name = el.value().attr("name")?;
            let keep = STATE_FIELDS.contains(&name) || STATE_SUFFIXES.iter().any(|s| name.ends_with(s));
            if !keep {
                return None;
            }
            let value = if el.value().name() == "select" {
                selected_or_first(&el)
            } else {
                el.value().attr("value").unwrap_or("").to_string()
            };
            Some((name.to_string(), value))
        })
        .collect()
}

fn selected_or_first(select: &ElementRef<'_>) -> String {
    let options: Vec<ElementRef<'_>> = select.select(&sel("option")).collect();
    options
        .iter()
        .find(|o| o.value().attr("selected").is_some())
        .or_else(|| options.first())
        .and_then(|o| o.value().attr("value"))
        .unwrap_or("")
        .to_string()
}
