//! End-to-end operations: navigate, interpret the form, submit, and read
//! the outcome.
//!
//! Every step receives the page it works on from the step before it; no
//! workflow looks at the transport's history.
//!
//! Workflows report "the server said no" and "the job never finished" as
//! `false` / `None`. Errors are reserved for caller mistakes (bad format
//! name, missing file), a not-connected client, transport failures and
//! pages that no longer look the way the workflow expects.

pub mod extract;
pub mod poll;
pub mod report;
pub mod upload;

pub use extract::{ExtractRequestOutcome, ExtractRequestSpec, ExtractType, ExtractVariant};
pub use poll::{poll_until, Clock, PollOptions, PollStep, SystemClock};
pub use report::{find_export_url_template, ReportCategory, ReportFormat, ReportOutcome, ReportRequest};
pub use upload::{FileUpload, PostFileSpec};

use std::path::Path;

use scraper::Html;
use tracing::info;

use crate::error::Result;
use crate::html::{element_text, sel};
use crate::transport::Page;

/// Server-side validation messages rendered on a result page.
pub(crate) fn validation_errors(page: &Page) -> Vec<String> {
    let doc = Html::parse_document(&page.text());
    doc.select(&sel(".validation-summary-errors li, .field-validation-error"))
        .map(|el| element_text(&el))
        .filter(|text| !text.is_empty())
        .collect()
}

/// Persist downloaded bytes when the caller named a destination.
pub(crate) fn save(destination: Option<&Path>, bytes: &[u8]) -> Result<()> {
    if let Some(path) = destination {
        std::fs::write(path, bytes)?;
        info!(path = %path.display(), bytes = bytes.len(), "saved download");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn page(body: &str) -> Page {
        Page {
            url: Url::parse("https://www.calpads.org/FileSubmission/FileUpload").unwrap(),
            status: 200,
            content_type: Some("text/html".to_string()),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_validation_errors_collects_messages() {
        let errors = validation_errors(&page(
            r#"<div class="validation-summary-errors"><ul><li>File type is required</li><li></li></ul></div>
               <span class="field-validation-error">Select a file</span>"#,
        ));
        assert_eq!(errors, vec!["File type is required", "Select a file"]);
        assert!(validation_errors(&page("<p>Upload complete</p>")).is_empty());
    }

    #[test]
    fn test_save_writes_only_with_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        save(None, b"ignored").unwrap();
        assert!(!path.exists());
        save(Some(&path), b"a,b\n").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"a,b\n");
    }
}
