//! Translate caller-facing values into wire pairs.
//!
//! Unknown parameters and values that match no option are dropped with a
//! `warn!` diagnostic rather than failing: the remote forms change shape on
//! their own schedule, and the server's validation response is the single
//! source of truth for what it accepts. Required fields are not checked here
//! for the same reason.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::warn;

use super::schema::{FieldKind, FormFieldDescriptor, FormSchema, MultiEncoding, SelectOption};
use super::wire::WireForm;

/// A value supplied by the caller for one parameter.
///
/// Deserializes from plain JSON: `true`, `"Lincoln High"`,
/// `["Grade 9", "Grade 10"]` or `{"Grade 9": true, "Grade 10": false}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Flag(bool),
    Text(String),
    Choices(Vec<String>),
    Selection(BTreeMap<String, bool>),
}

impl ParamValue {
    /// Build a selection from `(label, selected)` pairs.
    pub fn selection<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        ParamValue::Selection(pairs.into_iter().map(|(l, b)| (l.into(), b)).collect())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Flag(value)
    }
}

impl From<NaiveDate> for ParamValue {
    fn from(value: NaiveDate) -> Self {
        ParamValue::Text(value.format("%Y-%m-%d").to_string())
    }
}

enum Encoded {
    One(String),
    Many(Vec<String>),
    Absent(String),
}

/// Start from the schema's defaults and overlay `values` in order.
///
/// Each parameter replaces whatever its wire key held, so a parameter given
/// twice ends up with its last value.
pub fn merge(schema: &FormSchema, values: &[(String, ParamValue)]) -> WireForm {
    let mut wire = schema.defaults().clone();

    for (name, value) in values {
        let Some(field) = schema.get(name) else {
            warn!(param = %name, "parameter not present on the live form; dropped");
            continue;
        };
        if field.read_only {
            warn!(param = %name, "parameter is fixed by the form; dropped");
            continue;
        }

        match encode(field, value) {
            Some(Encoded::One(v)) => wire.set(field.wire_name.as_str(), v),
            Some(Encoded::Many(vs)) => {
                wire.remove(&field.wire_name);
                for v in vs {
                    wire.append(field.wire_name.as_str(), v);
                }
            }
            Some(Encoded::Absent(checked)) => wire.remove_value(&field.wire_name, &checked),
            None => warn!(param = %name, ?value, "value not accepted by the live form; dropped"),
        }
    }

    wire
}

fn encode(field: &FormFieldDescriptor, value: &ParamValue) -> Option<Encoded> {
    match (&field.kind, value) {
        (FieldKind::Text, ParamValue::Text(s)) => Some(Encoded::One(s.clone())),
        (FieldKind::Text, ParamValue::Flag(b)) => Some(Encoded::One(b.to_string())),
        (FieldKind::Date, ParamValue::Text(s)) => Some(Encoded::One(wire_date(s))),
        (FieldKind::Boolean { checked_value }, value) => match truthiness(value)? {
            true => Some(Encoded::One(checked_value.clone())),
            false => Some(Encoded::Absent(checked_value.clone())),
        },
        (FieldKind::SingleSelect { options }, ParamValue::Text(label)) => {
            find_option(options, label).map(|idx| Encoded::One(options[idx].value.clone()))
        }
        (FieldKind::MultiSelect { options, encoding }, value) => {
            let labels: Vec<&str> = match value {
                ParamValue::Text(s) => vec![s.as_str()],
                ParamValue::Choices(list) => list.iter().map(String::as_str).collect(),
                ParamValue::Selection(map) => map
                    .iter()
                    .filter(|(_, selected)| **selected)
                    .map(|(label, _)| label.as_str())
                    .collect(),
                ParamValue::Flag(_) => return None,
            };
            encode_multi(options, *encoding, &labels)
        }
        _ => None,
    }
}

/// Matched option positions go on the wire in ascending order, whatever
/// order the caller listed them in.
fn encode_multi(options: &[SelectOption], encoding: MultiEncoding, labels: &[&str]) -> Option<Encoded> {
    let mut indices: Vec<usize> = Vec::new();
    for label in labels {
        match find_option(options, label) {
            Some(idx) => indices.push(idx),
            None => warn!(option = %label, "option not offered by the live form; dropped"),
        }
    }
    if indices.is_empty() {
        return None;
    }
    indices.sort_unstable();
    indices.dedup();

    let values: Vec<String> = indices.into_iter().map(|i| options[i].value.clone()).collect();
    Some(match encoding {
        MultiEncoding::IndexList => Encoded::One(values.join(",")),
        MultiEncoding::Repeated => Encoded::Many(values),
    })
}

fn find_option(options: &[SelectOption], label: &str) -> Option<usize> {
    let wanted = label.trim().to_lowercase();
    options.iter().position(|o| o.label.to_lowercase() == wanted)
}

fn truthiness(value: &ParamValue) -> Option<bool> {
    match value {
        ParamValue::Flag(b) => Some(*b),
        ParamValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// ISO dates are re-rendered the way the forms expect; anything else is
/// passed through for the server to judge.
fn wire_date(raw: &str) -> String {
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(date) => date.format("%m/%d/%Y").to_string(),
        Err(_) => raw.to_string(),
    }
}
