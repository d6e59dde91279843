//! Typed description of a live form.

use std::collections::BTreeMap;

use serde::Serialize;
use url::Url;

use super::mapper::{self, ParamValue};
use super::wire::WireForm;

/// One entry of a select's domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    /// Text shown to the user.
    pub label: String,
    /// Value submitted on the wire.
    pub value: String,
}

impl SelectOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// How several selections of one field are put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MultiEncoding {
    /// One pair whose value is the ascending, comma-joined option indices.
    IndexList,
    /// One pair per selected value (plain `select[multiple]`).
    Repeated,
}

/// What a field accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Date,
    /// Present with `checked_value` when true, absent when false.
    Boolean { checked_value: String },
    SingleSelect { options: Vec<SelectOption> },
    MultiSelect {
        options: Vec<SelectOption>,
        encoding: MultiEncoding,
    },
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Date => "date",
            FieldKind::Boolean { .. } => "boolean",
            FieldKind::SingleSelect { .. } => "single_select",
            FieldKind::MultiSelect { .. } => "multi_select",
        }
    }

    /// Select domain, empty for non-select kinds.
    pub fn options(&self) -> &[SelectOption] {
        match self {
            FieldKind::SingleSelect { options } | FieldKind::MultiSelect { options, .. } => options,
            _ => &[],
        }
    }
}

/// A caller-facing parameter and where it goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormFieldDescriptor {
    pub wire_name: String,
    pub kind: FieldKind,
    /// Advisory only; the server's own validation decides.
    pub required: bool,
    /// Rendered as fixed text; caller values are ignored.
    pub read_only: bool,
}

impl FormFieldDescriptor {
    pub fn new(wire_name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            wire_name: wire_name.into(),
            kind,
            required: false,
            read_only: false,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Accepted values for one parameter, as reported by a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamDescription {
    pub required: bool,
    pub kind: &'static str,
    pub domain: Domain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Domain {
    /// Free-form input with a hint about the expected shape.
    Hint(String),
    /// Every option in document order.
    Options(Vec<SelectOption>),
}

/// Parameters of one live form plus the values the page pre-filled.
///
/// Built fresh from every page: the pre-filled snapshot carries single-use
/// view-state and anti-forgery tokens.
#[derive(Debug, Clone)]
pub struct FormSchema {
    /// Where the form submits to.
    pub action: Option<Url>,
    params: Vec<(String, FormFieldDescriptor)>,
    defaults: WireForm,
}

impl FormSchema {
    pub fn new(action: Option<Url>) -> Self {
        Self {
            action,
            params: Vec::new(),
            defaults: WireForm::new(),
        }
    }

    /// Add a parameter; a repeated name replaces the earlier descriptor.
    pub fn insert(&mut self, name: impl Into<String>, field: FormFieldDescriptor) {
        let name = name.into();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = field,
            None => self.params.push((name, field)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FormFieldDescriptor> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// Parameters in document order.
    pub fn params(&self) -> impl Iterator<Item = (&str, &FormFieldDescriptor)> {
        self.params.iter().map(|(n, f)| (n.as_str(), f))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Page-supplied values that must be echoed back.
    pub fn defaults(&self) -> &WireForm {
        &self.defaults
    }

    pub(crate) fn defaults_mut(&mut self) -> &mut WireForm {
        &mut self.defaults
    }

    /// What each parameter accepts.
    pub fn describe(&self) -> BTreeMap<String, ParamDescription> {
        self.params
            .iter()
            .map(|(name, field)| {
                let domain = match &field.kind {
                    FieldKind::Text if field.read_only => Domain::Hint("fixed by the report".to_string()),
                    FieldKind::Text => Domain::Hint("any text".to_string()),
                    FieldKind::Date => Domain::Hint("date as MM/DD/YYYY or YYYY-MM-DD".to_string()),
                    FieldKind::Boolean { .. } => Domain::Hint("true or false".to_string()),
                    FieldKind::SingleSelect { options } | FieldKind::MultiSelect { options, .. } => {
                        Domain::Options(options.clone())
                    }
                };
                (
                    name.clone(),
                    ParamDescription {
                        required: field.required,
                        kind: field.kind.name(),
                        domain,
                    },
                )
            })
            .collect()
    }

    /// Defaults overlaid with caller values; see [`mapper::merge`].
    pub fn merge(&self, values: &[(String, ParamValue)]) -> WireForm {
        mapper::merge(self, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_reports_domains_in_order() {
        let mut schema = FormSchema::new(None);
        schema.insert(
            "School",
            FormFieldDescriptor::new(
                "ddSchool",
                FieldKind::SingleSelect {
                    options: vec![SelectOption::new("Lincoln", "10"), SelectOption::new("Adams", "11")],
                },
            )
            .required(true),
        );
        schema.insert("AsOf", FormFieldDescriptor::new("txtAsOf", FieldKind::Date));

        let described = schema.describe();
        assert_eq!(described.len(), 2);
        let school = &described["School"];
        assert!(school.required);
        assert_eq!(school.kind, "single_select");
        assert_eq!(
            school.domain,
            Domain::Options(vec![SelectOption::new("Lincoln", "10"), SelectOption::new("Adams", "11")])
        );
        assert_eq!(described["AsOf"].kind, "date");

        let json = serde_json::to_value(&described).unwrap();
        assert_eq!(json["School"]["domain"][1]["label"], "Adams");
    }

    #[test]
    fn test_insert_replaces_same_name() {
        let mut schema = FormSchema::new(None);
        schema.insert("A", FormFieldDescriptor::new("a1", FieldKind::Text));
        schema.insert("A", FormFieldDescriptor::new("a2", FieldKind::Text));
        assert_eq!(schema.len(), 1);
        assert_eq!(schema.get("A").unwrap().wire_name, "a2");
    }
}
