//! Extract requests and downloads.
//!
//! Requesting an extract submits one of the forms on the extract's landing
//! page. The server then builds the file in the background; downloading
//! polls the request listing until the newest request is complete.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use scraper::{ElementRef, Html};
use tracing::{debug, info, warn};

use super::poll::{poll_until, PollOptions, PollStep};
use super::save;
use crate::client::CalpadsClient;
use crate::endpoints;
use crate::error::{CalpadsError, Result};
use crate::form::{parse_named_form, NamedProfile, ParamDescription, ParamValues, WireForm};
use crate::html::{element_text, sel};
use crate::listing::ExtractStatus;
use crate::transport::Page;

/// Text shown after an extract request is accepted.
pub const EXTRACT_CONFIRMATION: &str =
    "Extract request made successfully. Please check back later for download.";

/// Extract type code as it appears in the extract URL, e.g. `SENR`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtractType(String);

impl ExtractType {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts scoped to a file-submission job need the submitter and job
    /// on the request.
    pub fn needs_job_context(&self) -> bool {
        matches!(self.0.as_str(), "SSID" | "REJECTEDRECORDS")
    }
}

impl FromStr for ExtractType {
    type Err = CalpadsError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() || !s.trim().chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CalpadsError::not_found("extract type", s));
        }
        Ok(Self::new(s))
    }
}

impl fmt::Display for ExtractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The near-duplicate request forms an extract page can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractVariant {
    #[default]
    Default,
    DateRange,
    AsOfDate,
}

impl ExtractVariant {
    /// Which variant a form is, judged by its action URL.
    pub fn of_action(action: &str) -> Self {
        let action = action.to_ascii_lowercase();
        if action.contains("daterange") {
            ExtractVariant::DateRange
        } else if action.contains("asofdate") {
            ExtractVariant::AsOfDate
        } else {
            ExtractVariant::Default
        }
    }

    /// The requested variant first, then Default, DateRange and AsOfDate.
    fn preference(self) -> Vec<ExtractVariant> {
        let mut order = vec![self];
        for v in [ExtractVariant::Default, ExtractVariant::DateRange, ExtractVariant::AsOfDate] {
            if v != self {
                order.push(v);
            }
        }
        order
    }
}

impl FromStr for ExtractVariant {
    type Err = CalpadsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "default" => Ok(ExtractVariant::Default),
            "daterange" => Ok(ExtractVariant::DateRange),
            "asofdate" => Ok(ExtractVariant::AsOfDate),
            _ => Err(CalpadsError::not_found("extract variant", s)),
        }
    }
}

/// One extract request.
#[derive(Debug, Clone)]
pub struct ExtractRequestSpec {
    pub lea: String,
    pub extract: ExtractType,
    pub variant: ExtractVariant,
    pub values: ParamValues,
    pub dry_run: bool,
}

impl ExtractRequestSpec {
    pub fn new(lea: impl Into<String>, extract: ExtractType) -> Self {
        Self {
            lea: lea.into(),
            extract,
            variant: ExtractVariant::Default,
            values: Vec::new(),
            dry_run: false,
        }
    }

    pub fn variant(mut self, variant: ExtractVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn values(mut self, values: ParamValues) -> Self {
        self.values = values;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractRequestOutcome {
    Described(BTreeMap<String, ParamDescription>),
    /// Whether the server confirmed the request.
    Submitted(bool),
}

const SUBMITTER_FIELD: &str = "SubmitterID";
const JOB_FIELD: &str = "JobID";

impl CalpadsClient {
    pub fn request_extract(&mut self, spec: &ExtractRequestSpec) -> Result<ExtractRequestOutcome> {
        self.ensure_connected()?;

        let url = endpoints::extract_page(self.config(), &spec.extract, &spec.lea)?;
        let page = self.get_page(url)?;
        let doc = Html::parse_document(&page.text());
        let (variant, form) = choose_form(&doc, spec.variant)?;
        if variant != spec.variant {
            info!(requested = ?spec.variant, using = ?variant, "requested extract form absent; falling back");
        }

        if !offers_lea(&form, &spec.lea) {
            return Err(CalpadsError::not_found("LEA", &spec.lea));
        }

        let schema = parse_named_form(&form, &page.url, NamedProfile::Extract)?;
        if spec.dry_run {
            return Ok(ExtractRequestOutcome::Described(schema.describe()));
        }

        let mut wire = schema.merge(&spec.values);
        wire.set("ReportingLEA", spec.lea.as_str());
        if spec.extract.needs_job_context() {
            self.inject_job_context(&spec.lea, &spec.values, &mut wire)?;
        }

        let action = schema.action.clone().unwrap_or_else(|| page.url.clone());
        let result = self.post_page(action, wire.into_pairs())?;
        let confirmed = is_confirmed(&result)?;
        if confirmed {
            info!(extract = %spec.extract, lea = %spec.lea, "extract requested");
        } else {
            warn!(extract = %spec.extract, lea = %spec.lea, "extract request was not confirmed");
        }
        Ok(ExtractRequestOutcome::Submitted(confirmed))
    }

    /// Poll the request listing until the newest request completes, then
    /// fetch its file. `None` when it failed or the timeout passed.
    pub fn download_extract(
        &mut self,
        lea: &str,
        poll: PollOptions,
        destination: Option<&Path>,
    ) -> Result<Option<Vec<u8>>> {
        self.ensure_connected()?;
        let poll = poll.clamped(self.config().min_poll_interval());
        let clock = self.clock();

        let request_id = poll_until(clock.as_ref(), poll, |attempt| {
            let listing = self.requested_extracts(lea)?;
            let Some(latest) = listing.latest() else {
                debug!(attempt, "no extract requests listed yet");
                return Ok(PollStep::Pending);
            };
            Ok(match latest.status {
                ExtractStatus::Failed => PollStep::Abandon,
                ExtractStatus::Pending => PollStep::Pending,
                ExtractStatus::Complete => match latest.completed_request_id() {
                    Some(id) => PollStep::Ready(id.to_string()),
                    None => {
                        warn!("completed extract has no request id");
                        PollStep::Pending
                    }
                },
            })
        })?;

        let Some(request_id) = request_id else {
            warn!(lea, "extract did not complete");
            return Ok(None);
        };

        let url = endpoints::extract_download(self.config(), lea, &request_id)?;
        let file = self.get_page(url)?;
        if !file.is_success() {
            return Err(CalpadsError::shape(format!("extract download answered {}", file.status)));
        }
        save(destination, &file.body)?;
        info!(lea, request_id = %request_id, bytes = file.body.len(), "extract downloaded");
        Ok(Some(file.body))
    }

    /// Fill `SubmitterID` and `JobID`, preferring caller values over lookups.
    fn inject_job_context(&mut self, lea: &str, values: &ParamValues, wire: &mut WireForm) -> Result<()> {
        let given = |key: &str| {
            values
                .iter()
                .rev()
                .find(|(k, _)| k == key)
                .and_then(|(_, v)| v.as_text())
                .map(str::to_string)
        };

        let submitter = match given(SUBMITTER_FIELD) {
            Some(id) => id,
            None => self.current_submitter_id(lea)?,
        };
        let job = match given(JOB_FIELD) {
            Some(id) => id,
            None => self.latest_job_id(lea, &submitter)?,
        };
        debug!(submitter = %submitter, job = %job, "injecting job context");
        wire.set(SUBMITTER_FIELD, submitter);
        wire.set(JOB_FIELD, job);
        Ok(())
    }

    fn current_submitter_id(&mut self, lea: &str) -> Result<String> {
        let username = self.username().to_ascii_lowercase();
        self.submitter_names(lea)?
            .into_iter()
            .find(|s| s.name.to_ascii_lowercase().contains(&username))
            .map(|s| s.id)
            .ok_or_else(|| CalpadsError::not_found("submitter", username))
    }

    fn latest_job_id(&mut self, lea: &str, submitter: &str) -> Result<String> {
        self.jobs(lea)?
            .data
            .into_iter()
            .find(|job| job.submitter_id.as_deref().map_or(true, |id| id == submitter))
            .map(|job| job.job_id)
            .ok_or_else(|| CalpadsError::not_found("job", lea))
    }
}

/// The request form for `wanted`, or the first present in fallback order.
fn choose_form<'a>(doc: &'a Html, wanted: ExtractVariant) -> Result<(ExtractVariant, ElementRef<'a>)> {
    let forms: Vec<(ExtractVariant, ElementRef<'a>)> = doc
        .select(&sel("form"))
        .filter(|form| form.select(&sel(r#"select[name="ReportingLEA"]"#)).next().is_some())
        .map(|form| (ExtractVariant::of_action(form.value().attr("action").unwrap_or("")), form))
        .collect();

    wanted
        .preference()
        .into_iter()
        .find_map(|v| forms.iter().find(|(fv, _)| *fv == v).copied())
        .ok_or_else(|| CalpadsError::shape("extract page has no request form"))
}

/// Whether the form's `ReportingLEA` picker lists `lea` as an option.
fn offers_lea(form: &ElementRef<'_>, lea: &str) -> bool {
    let lea = lea.trim();
    form.select(&sel(r#"select[name="ReportingLEA"] option"#))
        .any(|o| o.value().attr("value").map(str::trim) == Some(lea))
}

/// Whether the alert region carries the exact confirmation text.
fn is_confirmed(result: &Page) -> Result<bool> {
    let doc = Html::parse_document(&result.text());
    let regions: Vec<ElementRef<'_>> = doc.select(&sel(".alert, .validation-summary-errors")).collect();
    if regions.is_empty() {
        return Err(CalpadsError::shape(format!("no alert region on {}", result.url)));
    }
    Ok(regions.iter().any(|region| {
        element_text(region) == EXTRACT_CONFIRMATION
            || region.select(&sel("p, span")).any(|p| element_text(&p) == EXTRACT_CONFIRMATION)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{client_on, signed_in};
    use crate::form::ParamValue;
    use crate::transport::testing::{count, Reply, INTERSTITIAL, LOGIN_PAGE};
    use crate::transport::{AuthState, Method, PageRequest};
    use crate::workflow::poll::Clock;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    const SENR_PAGE: &str = r#"
        <html><body>
        <form method="post" action="/Extract/SENR">
          <input type="hidden" name="__RequestVerificationToken" value="tok-default" />
          <input type="text" name="RecordType" value="SENR" />
          <select name="ReportingLEA"><option value="0123456">0123456</option></select>
          <select name="AcademicYear"><option value="2024-2025">2024-2025</option></select>
        </form>
        <form method="post" action="/Extract/SENRDateRange">
          <input type="hidden" name="__RequestVerificationToken" value="tok-range" />
          <select name="ReportingLEA"><option value="0123456">0123456</option></select>
          <input type="text" name="EffectiveStartDate" />
          <input type="text" name="EffectiveEndDate" />
        </form>
        <form action="/Search"><input name="q" /></form>
        </body></html>
    "#;

    const SSID_PAGE: &str = r#"
        <html><body>
        <form method="post" action="/Extract/SSID">
          <input type="hidden" name="__RequestVerificationToken" value="tok" />
          <select name="ReportingLEA"><option value="0123456">0123456</option></select>
        </form>
        </body></html>
    "#;

    fn confirmation() -> Reply {
        Reply::html(&format!(
            r#"<html><body><div class="alert alert-success"><button>&times;</button><p>{EXTRACT_CONFIRMATION}</p></div></body></html>"#
        ))
    }

    fn last_post(log: &Rc<RefCell<Vec<PageRequest>>>) -> Vec<(String, String)> {
        log.borrow()
            .iter()
            .rev()
            .find(|r| r.method == Method::Post)
            .map(|r| r.form_fields().to_vec())
            .unwrap()
    }

    fn field<'a>(fields: &'a [(String, String)], key: &str) -> Option<&'a str> {
        fields.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_variant_of_action() {
        assert_eq!(ExtractVariant::of_action("/Extract/SENRDateRange"), ExtractVariant::DateRange);
        assert_eq!(ExtractVariant::of_action("/Extract/SPRGAsOfDate"), ExtractVariant::AsOfDate);
        assert_eq!(ExtractVariant::of_action("/Extract/SENR"), ExtractVariant::Default);
        assert_eq!("as-of-date".parse::<ExtractVariant>().unwrap(), ExtractVariant::AsOfDate);
    }

    #[test]
    fn test_request_picks_date_range_form() {
        let backend = signed_in()
            .route(Method::Get, "/Extract/SENR", vec![Reply::html(SENR_PAGE)])
            .route(Method::Post, "/Extract/SENRDateRange", vec![confirmation()]);
        let log = backend.log();
        let (mut client, _) = client_on(backend);

        let spec = ExtractRequestSpec::new("0123456", ExtractType::new("senr"))
            .variant(ExtractVariant::DateRange)
            .values(vec![
                ("EffectiveStartDate".to_string(), "2024-07-01".into()),
                ("EffectiveEndDate".to_string(), "2025-06-30".into()),
                ("Bogus".to_string(), "dropped".into()),
            ]);
        let outcome = client.request_extract(&spec).unwrap();
        assert_eq!(outcome, ExtractRequestOutcome::Submitted(true));

        let fields = last_post(&log);
        assert_eq!(field(&fields, "__RequestVerificationToken"), Some("tok-range"));
        assert_eq!(field(&fields, "ReportingLEA"), Some("0123456"));
        assert_eq!(field(&fields, "EffectiveStartDate"), Some("07/01/2024"));
        assert_eq!(field(&fields, "EffectiveEndDate"), Some("06/30/2025"));
        assert_eq!(field(&fields, "Bogus"), None);
    }

    #[test]
    fn test_missing_variant_falls_back_to_default() {
        let backend = signed_in()
            .route(Method::Get, "/Extract/SENR", vec![Reply::html(SENR_PAGE)])
            .route(Method::Post, "/Extract/SENR", vec![confirmation()]);
        let log = backend.log();
        let (mut client, _) = client_on(backend);

        let spec = ExtractRequestSpec::new("0123456", ExtractType::new("SENR")).variant(ExtractVariant::AsOfDate);
        assert_eq!(client.request_extract(&spec).unwrap(), ExtractRequestOutcome::Submitted(true));
        assert_eq!(count(&log, Method::Post, "/Extract/SENR"), 1);
        assert_eq!(field(&last_post(&log), "RecordType"), Some("SENR"));
    }

    #[test]
    fn test_dry_run_describes_chosen_form() {
        let backend = signed_in().route(Method::Get, "/Extract/SENR", vec![Reply::html(SENR_PAGE)]);
        let log = backend.log();
        let (mut client, _) = client_on(backend);

        let spec = ExtractRequestSpec::new("0123456", ExtractType::new("SENR"))
            .variant(ExtractVariant::DateRange)
            .dry_run(true);
        let ExtractRequestOutcome::Described(params) = client.request_extract(&spec).unwrap() else {
            panic!("expected a description");
        };
        let names: Vec<_> = params.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["EffectiveEndDate", "EffectiveStartDate"]);
        assert_eq!(params["EffectiveStartDate"].kind, "date");
        assert_eq!(log.borrow().iter().filter(|r| r.method == Method::Post).count(), 0);
    }

    #[test]
    fn test_unknown_lea_is_not_found() {
        let backend = signed_in()
            .route(Method::Get, "/Extract/SENR", vec![Reply::html(SENR_PAGE)])
            .route(Method::Post, "/Extract/SENR", vec![confirmation()]);
        let log = backend.log();
        let (mut client, _) = client_on(backend);

        let spec = ExtractRequestSpec::new("9999999", ExtractType::new("SENR"));
        let err = client.request_extract(&spec).unwrap_err();
        assert!(matches!(err, CalpadsError::NotFound { .. }));
        assert_eq!(count(&log, Method::Post, "/Extract/SENR"), 0);
    }

    #[test]
    fn test_expired_session_replays_login_mid_workflow() {
        let backend = signed_in()
            .route(
                Method::Get,
                "/Extract/SENR",
                vec![Reply::html(LOGIN_PAGE)
                    .landing_on("https://www.calpads.org/Account/Login?ReturnUrl=%2FExtract%2FSENR")],
            )
            .route(
                Method::Post,
                "/Account/Login",
                vec![Reply::html(INTERSTITIAL).landing_on("https://www.calpads.org/connect/authorize/callback")],
            )
            .route(
                Method::Post,
                "/signin-oidc",
                vec![Reply::html(SENR_PAGE).landing_on("https://www.calpads.org/Extract/SENR?SelectedLEA=0123456")],
            );
        let log = backend.log();
        let (mut client, _) = client_on(backend);
        assert!(client.is_connected());

        let spec = ExtractRequestSpec::new("0123456", ExtractType::new("SENR")).dry_run(true);
        let ExtractRequestOutcome::Described(params) = client.request_extract(&spec).unwrap() else {
            panic!("expected a description");
        };
        assert!(params.contains_key("AcademicYear"));
        assert_eq!(client.auth_state(), AuthState::Authenticated);

        let posts: Vec<String> = log
            .borrow()
            .iter()
            .filter(|r| r.method == Method::Post)
            .map(|r| r.url.path().to_string())
            .collect();
        assert_eq!(posts, vec!["/Account/Login", "/signin-oidc"]);
        assert_eq!(client.history().last().unwrap().url.path(), "/Extract/SENR");
    }

    #[test]
    fn test_job_context_is_resolved_for_ssid() {
        let backend = signed_in()
            .route(Method::Get, "/Extract/SSID", vec![Reply::html(SSID_PAGE)])
            .route(
                Method::Get,
                "/FileSubmission/GetJobSubmitterNames",
                vec![Reply::json(json!([
                    {"Value": 7, "Text": "Roe, Rick (rroe@district.org)"},
                    {"Value": 12, "Text": "Doe, Jane (JDoe@district.org)"}
                ]))],
            )
            .route(
                Method::Get,
                "/FileSubmission/GetJobs",
                vec![Reply::json(json!({"Data": [
                    {"JobID": 501, "JobStatus": "Posted", "SubmitterID": 7},
                    {"JobID": 498, "JobStatus": "Posted", "SubmitterID": 12}
                ], "Total": 2}))],
            )
            .route(Method::Post, "/Extract/SSID", vec![confirmation()]);
        let log = backend.log();
        let (mut client, _) = client_on(backend);

        let spec = ExtractRequestSpec::new("0123456", ExtractType::new("SSID"));
        assert_eq!(client.request_extract(&spec).unwrap(), ExtractRequestOutcome::Submitted(true));
        let fields = last_post(&log);
        assert_eq!(field(&fields, "SubmitterID"), Some("12"));
        assert_eq!(field(&fields, "JobID"), Some("498"));
    }

    #[test]
    fn test_caller_job_context_skips_lookups() {
        let backend = signed_in()
            .route(Method::Get, "/Extract/SSID", vec![Reply::html(SSID_PAGE)])
            .route(Method::Post, "/Extract/SSID", vec![confirmation()]);
        let log = backend.log();
        let (mut client, _) = client_on(backend);

        let spec = ExtractRequestSpec::new("0123456", ExtractType::new("SSID")).values(vec![
            ("SubmitterID".to_string(), ParamValue::from("3")),
            ("JobID".to_string(), ParamValue::from("77")),
        ]);
        client.request_extract(&spec).unwrap();
        let fields = last_post(&log);
        assert_eq!(field(&fields, "SubmitterID"), Some("3"));
        assert_eq!(field(&fields, "JobID"), Some("77"));
        assert_eq!(count(&log, Method::Get, "/FileSubmission/GetJobs"), 0);
    }

    #[test]
    fn test_unconfirmed_and_missing_alert() {
        let backend = signed_in()
            .route(Method::Get, "/Extract/SENR", vec![Reply::html(SENR_PAGE)])
            .route(
                Method::Post,
                "/Extract/SENR",
                vec![
                    Reply::html(r#"<div class="validation-summary-errors"><ul><li>Academic year is required</li></ul></div>"#),
                    Reply::html("<html><body><p>Something else</p></body></html>"),
                ],
            );
        let (mut client, _) = client_on(backend);
        let spec = ExtractRequestSpec::new("0123456", ExtractType::new("SENR"));

        assert_eq!(client.request_extract(&spec).unwrap(), ExtractRequestOutcome::Submitted(false));
        assert!(matches!(client.request_extract(&spec), Err(CalpadsError::UpstreamShapeChange(_))));
    }

    fn listing(status: &str) -> Reply {
        Reply::json(json!({"Data": [
            {"ExtractRequestID": 981, "ExtractType": "SENR", "ExtractStatus": status},
            {"ExtractRequestID": 970, "ExtractType": "SENR", "ExtractStatus": "Complete"}
        ], "Total": 2}))
    }

    #[test]
    fn test_download_after_two_pending_polls() {
        let backend = signed_in()
            .route(
                Method::Get,
                "/Extract/GetExtractRequests",
                vec![listing("Submitted"), listing("In Process"), listing("Complete")],
            )
            .route(Method::Get, "/Extract/DownloadExtract", vec![Reply::bytes(b"SENR|0123456|...")]);
        let log = backend.log();
        let (mut client, clock) = client_on(backend);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("senr.txt");

        let bytes = client
            .download_extract("0123456", PollOptions::from_secs(5, 12), Some(&dest))
            .unwrap();
        assert_eq!(bytes.as_deref(), Some(&b"SENR|0123456|..."[..]));
        assert_eq!(count(&log, Method::Get, "/Extract/GetExtractRequests"), 3);
        assert_eq!(clock.sleeps(), 2);
        assert_eq!(std::fs::read(&dest).unwrap(), b"SENR|0123456|...");

        let download = log.borrow().last().unwrap().url.clone();
        assert_eq!(download.query(), Some("SelectedLEA=0123456&requestId=981"));
    }

    #[test]
    fn test_download_times_out_after_deadline() {
        let backend = signed_in().route(Method::Get, "/Extract/GetExtractRequests", vec![listing("In Process")]);
        let log = backend.log();
        let (mut client, clock) = client_on(backend);

        let bytes = client
            .download_extract("0123456", PollOptions::from_secs(5, 12), None)
            .unwrap();
        assert_eq!(bytes, None);
        assert_eq!(count(&log, Method::Get, "/Extract/GetExtractRequests"), 3);
        assert!(clock.elapsed() > Duration::from_secs(12));
        assert_eq!(count(&log, Method::Get, "/Extract/DownloadExtract"), 0);
    }

    #[test]
    fn test_poll_interval_has_a_floor() {
        let backend = signed_in().route(Method::Get, "/Extract/GetExtractRequests", vec![listing("In Process")]);
        let log = backend.log();
        let (mut client, _) = client_on(backend);

        client.download_extract("0123456", PollOptions::from_secs(1, 12), None).unwrap();
        assert_eq!(count(&log, Method::Get, "/Extract/GetExtractRequests"), 3);
    }

    #[test]
    fn test_failed_extract_stops_early() {
        let backend = signed_in().route(Method::Get, "/Extract/GetExtractRequests", vec![listing("Failed")]);
        let (mut client, clock) = client_on(backend);
        assert_eq!(client.download_extract("0123456", PollOptions::from_secs(5, 60), None).unwrap(), None);
        assert_eq!(clock.sleeps(), 0);
    }
}
