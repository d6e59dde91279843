//! Generic named-field forms (extract requests, file uploads).
//!
//! Every element with a `name` attribute is a candidate parameter, keyed by
//! that name. Hidden inputs are never parameters; they only feed the
//! defaults snapshot together with whatever the page pre-filled.

use scraper::ElementRef;
use url::Url;

use super::schema::{FieldKind, FormFieldDescriptor, FormSchema, MultiEncoding, SelectOption};
use crate::error::Result;
use crate::html::{element_text, form_action, sel};

/// Which flavour of named form is being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedProfile {
    /// Extract request forms. `RecordType` and `ReportingLEA` are filled in
    /// by the workflow, not the caller.
    Extract,
    /// File upload forms. Every select must be chosen; text is optional.
    Upload,
}

const EXTRACT_CONTEXT_TEXT: &str = "RecordType";
const EXTRACT_CONTEXT_SELECT: &str = "ReportingLEA";
/// Submitted for a checked box that declares no `value`.
const CHECKBOX_DEFAULT: &str = "on";

/// Parse one `<form>` element.
pub fn parse_named_form(form: &ElementRef<'_>, page_url: &Url, profile: NamedProfile) -> Result<FormSchema> {
    let mut schema = FormSchema::new(Some(form_action(form, page_url)?));

    for el in form.select(&sel("[name]")) {
        let Some(name) = el.value().attr("name") else {
            continue;
        };
        if let Some(field) = classify(&el, name, profile) {
            schema.insert(name, field);
        }
        for value in prefilled(&el) {
            schema.defaults_mut().append(name, value);
        }
    }

    Ok(schema)
}

fn classify(el: &ElementRef<'_>, name: &str, profile: NamedProfile) -> Option<FormFieldDescriptor> {
    let attrs = el.value();
    let declared_required = attrs.attr("required").is_some() || attrs.attr("data-val-required").is_some();

    match attrs.name() {
        "input" => match input_type(el).as_str() {
            "text" | "date" => {
                if profile == NamedProfile::Extract && name == EXTRACT_CONTEXT_TEXT {
                    return None;
                }
                let kind = if name.to_lowercase().contains("date") {
                    FieldKind::Date
                } else {
                    FieldKind::Text
                };
                let required = profile == NamedProfile::Extract && declared_required;
                Some(FormFieldDescriptor::new(name, kind).required(required))
            }
            "checkbox" => Some(FormFieldDescriptor::new(
                name,
                FieldKind::Boolean {
                    checked_value: attrs.attr("value").unwrap_or(CHECKBOX_DEFAULT).to_string(),
                },
            )),
            _ => None,
        },
        "textarea" => Some(FormFieldDescriptor::new(name, FieldKind::Text).required(declared_required)),
        "select" => {
            let options = options(el);
            let required = match profile {
                NamedProfile::Upload => true,
                NamedProfile::Extract => declared_required,
            };
            if attrs.attr("multiple").is_some() {
                return Some(
                    FormFieldDescriptor::new(
                        name,
                        FieldKind::MultiSelect {
                            options,
                            encoding: MultiEncoding::Repeated,
                        },
                    )
                    .required(required),
                );
            }
            if profile == NamedProfile::Extract && name == EXTRACT_CONTEXT_SELECT {
                return None;
            }
            Some(FormFieldDescriptor::new(name, FieldKind::SingleSelect { options }).required(required))
        }
        _ => None,
    }
}

fn input_type(el: &ElementRef<'_>) -> String {
    el.value().attr("type").unwrap_or("text").to_ascii_lowercase()
}

fn options(select: &ElementRef<'_>) -> Vec<SelectOption> {
    select
        .select(&sel("option"))
        .map(|o| {
            let label = element_text(&o);
            let value = o.value().attr("value").map(str::to_string).unwrap_or_else(|| label.clone());
            SelectOption::new(label, value)
        })
        .collect()
}

/// What a browser would submit for this element untouched.
fn prefilled(el: &ElementRef<'_>) -> Vec<String> {
    let attrs = el.value();
    match attrs.name() {
        "input" => {
            let value = attrs.attr("value").unwrap_or("");
            match input_type(el).as_str() {
                "hidden" => vec![value.to_string()],
                "checkbox" | "radio" if attrs.attr("checked").is_some() => {
                    vec![attrs.attr("value").unwrap_or(CHECKBOX_DEFAULT).to_string()]
                }
                "text" | "date" | "number" | "email" if !value.is_empty() => vec![value.to_string()],
                _ => Vec::new(),
            }
        }
        "textarea" => {
            let text: String = el.text().collect();
            if text.is_empty() {
                Vec::new()
            } else {
                vec![text]
            }
        }
        "select" => {
            let opts: Vec<ElementRef<'_>> = el.select(&sel("option")).collect();
            let value_of = |o: &ElementRef<'_>| {
                o.value()
                    .attr("value")
                    .map(str::to_string)
                    .unwrap_or_else(|| element_text(o))
            };
            let selected: Vec<String> = opts
                .iter()
                .filter(|o| o.value().attr("selected").is_some())
                .map(value_of)
                .collect();
            if !selected.is_empty() || attrs.attr("multiple").is_some() {
                selected
            } else {
                opts.first().map(value_of).into_iter().collect()
            }
        }
        _ => Vec::new(),
    }
}
