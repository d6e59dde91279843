//! List endpoints and their `{Data: [...], Total: n}` JSON convention.

use serde::{Deserialize, Deserializer};

use crate::client::CalpadsClient;
use crate::endpoints;
use crate::error::Result;
use crate::form::SelectOption;
use crate::html::{element_text, sel};

/// One page of a list endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ListPage<T> {
    #[serde(rename = "Data", default)]
    pub data: Vec<T>,
    #[serde(rename = "Total", alias = "TotalCount", alias = "Count", default)]
    pub total: u64,
}

impl<T> ListPage<T> {
    /// The first entry is the most recent.
    pub fn latest(&self) -> Option<&T> {
        self.data.first()
    }
}

/// Some endpoints wrap their rows, some return a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum Rows<T> {
    Page(ListPage<T>),
    Bare(Vec<T>),
}

impl<T> Rows<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Rows::Page(page) => page.data,
            Rows::Bare(rows) => rows,
        }
    }
}

/// Lifecycle of an extract job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ExtractStatus {
    #[default]
    Pending,
    Complete,
    Failed,
}

impl From<String> for ExtractStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "complete" | "completed" => ExtractStatus::Complete,
            "failed" | "error" | "cancelled" => ExtractStatus::Failed,
            _ => ExtractStatus::Pending,
        }
    }
}

/// A row of the requested-extracts listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractRequestEntry {
    #[serde(rename = "ExtractRequestID", alias = "RequestID", default, deserialize_with = "opt_id")]
    request_id: Option<String>,
    #[serde(rename = "ExtractType", alias = "ExtractName", default)]
    pub extract_type: Option<String>,
    #[serde(rename = "ReportingLEA", alias = "LEA", default, deserialize_with = "opt_id")]
    pub lea: Option<String>,
    #[serde(rename = "ExtractStatus", alias = "Status", default)]
    pub status: ExtractStatus,
}

impl ExtractRequestEntry {
    /// The request id, once the extract is ready to download.
    pub fn completed_request_id(&self) -> Option<&str> {
        match self.status {
            ExtractStatus::Complete => self.request_id.as_deref(),
            _ => None,
        }
    }
}

/// A row of the file-submission job listing.
#[derive(Debug, Clone, Deserialize)]
pub struct JobEntry {
    #[serde(rename = "JobID", alias = "JobId", deserialize_with = "id")]
    pub job_id: String,
    #[serde(rename = "JobStatus", alias = "Status", default)]
    pub status: String,
    #[serde(rename = "SubmitterID", alias = "SubmitterId", default, deserialize_with = "opt_id")]
    pub submitter_id: Option<String>,
    #[serde(rename = "RejectedRecords", alias = "RejectedRecordCount", alias = "TotalRejected", default)]
    pub rejected: u64,
}

impl JobEntry {
    pub fn is_ready_for_review(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("ready for review")
    }

    pub fn is_failed(&self) -> bool {
        let status = self.status.to_ascii_lowercase();
        status.contains("fail") || status.contains("error")
    }
}

/// A selectable job submitter.
#[derive(Debug, Clone, Deserialize)]
pub struct Submitter {
    #[serde(rename = "Value", alias = "SubmitterID", deserialize_with = "id")]
    pub id: String,
    #[serde(rename = "Text", alias = "Name", default)]
    pub name: String,
}

/// Ids arrive as numbers on some endpoints and strings on others.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Num(i64),
    Str(String),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Num(n) => n.to_string(),
            RawId::Str(s) => s,
        }
    }
}

fn id<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    RawId::deserialize(d).map(String::from)
}

fn opt_id<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<RawId>::deserialize(d)?.map(String::from))
}

impl CalpadsClient {
    /// Extract requests for `lea`, most recent first.
    pub fn requested_extracts(&mut self, lea: &str) -> Result<ListPage<ExtractRequestEntry>> {
        let url = endpoints::extract_requests(self.config(), lea)?;
        self.get_json(url)
    }

    /// File-submission jobs for `lea`, most recent first.
    pub fn jobs(&mut self, lea: &str) -> Result<ListPage<JobEntry>> {
        let url = endpoints::jobs(self.config(), lea)?;
        self.get_json(url)
    }

    pub fn submitter_names(&mut self, lea: &str) -> Result<Vec<Submitter>> {
        let url = endpoints::submitter_names(self.config(), lea)?;
        Ok(self.get_json::<Rows<Submitter>>(url)?.into_vec())
    }

    /// Organizations the signed-in user may act for, from the landing page's
    /// LEA picker.
    pub fn leas(&mut self) -> Result<Vec<SelectOption>> {
        self.ensure_connected()?;
        let root = self.config().host_url()?;
        let page = self.transport_mut().get(root)?;
        let doc = scraper::Html::parse_document(&page.text());
        Ok(doc
            .select(&sel(r#"select[name="SelectedLEA"] option"#))
            .filter_map(|o| {
                let value = o.value().attr("value")?.trim();
                (!value.is_empty()).then(|| SelectOption::new(element_text(&o), value))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_page_convention() {
        let page: ListPage<ExtractRequestEntry> = serde_json::from_str(
            r#"{"Data": [
                {"ExtractRequestID": 981, "ExtractType": "SENR", "ExtractStatus": "Complete"},
                {"ExtractRequestID": "970", "ExtractType": "SINF", "ExtractStatus": "In Process"}
            ], "Total": 2}"#,
        )
        .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.latest().unwrap().completed_request_id(), Some("981"));
        assert_eq!(page.data[1].status, ExtractStatus::Pending);
        assert_eq!(page.data[1].completed_request_id(), None);
    }

    #[test]
    fn test_total_aliases_and_missing_fields() {
        let page: ListPage<JobEntry> =
            serde_json::from_str(r#"{"Data": [{"JobID": 5, "JobStatus": "Ready for Review"}], "TotalCount": 1}"#)
                .unwrap();
        assert_eq!(page.total, 1);
        let job = page.latest().unwrap();
        assert_eq!(job.job_id, "5");
        assert!(job.is_ready_for_review());
        assert_eq!(job.rejected, 0);
    }

    #[test]
    fn test_missing_data_is_empty_page() {
        let page: ListPage<ExtractRequestEntry> = serde_json::from_str(r#"{"Total": 0}"#).unwrap();
        assert!(page.latest().is_none());
        assert_eq!(ExtractStatus::default(), ExtractStatus::Pending);
    }

    #[test]
    fn test_rows_accept_bare_arrays() {
        let rows: Rows<Submitter> =
            serde_json::from_str(r#"[{"Value": 12, "Text": "Doe, Jane (jdoe@district.org)"}]"#).unwrap();
        let rows = rows.into_vec();
        assert_eq!(rows[0].id, "12");
    }

    #[test]
    fn test_extract_status_parsing() {
        assert_eq!(ExtractStatus::from("Completed".to_string()), ExtractStatus::Complete);
        assert_eq!(ExtractStatus::from("FAILED".to_string()), ExtractStatus::Failed);
        assert_eq!(ExtractStatus::from("Submitted".to_string()), ExtractStatus::Pending);
    }
}
