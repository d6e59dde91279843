//! Form interpretation: markup in, typed schema out, wire pairs back.
//!
//! Two parsing profiles produce the same [`FormSchema`]:
//!
//! 1. **Report forms** ([`report`]): parameter blocks rendered by the
//!    report viewer, keyed by their declared parameter name.
//! 2. **Named forms** ([`named`]): ordinary forms (extracts, uploads),
//!    keyed by each control's `name`.
//!
//! [`FormSchema::describe`] is what a dry run returns; [`FormSchema::merge`]
//! turns caller values into the submission.

pub mod mapper;
pub mod named;
pub mod report;
pub mod schema;
pub mod wire;

pub use mapper::{merge, ParamValue};
pub use named::{parse_named_form, NamedProfile};
pub use report::parse_report_form;
pub use schema::{
    Domain, FieldKind, FormFieldDescriptor, FormSchema, MultiEncoding, ParamDescription, SelectOption,
};
pub use wire::WireForm;

/// Caller-supplied parameters in submission order.
pub type ParamValues = Vec<(String, ParamValue)>;
