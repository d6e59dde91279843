//! Report downloads: category page → report link → viewer frame → parameter
//! form → rendered report → export URL.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html};
use tracing::{debug, info, warn};
use url::Url;

use super::save;
use crate::client::CalpadsClient;
use crate::endpoints;
use crate::error::{CalpadsError, Result};
use crate::form::{parse_report_form, ParamDescription, ParamValues};
use crate::html::{element_text, resolve_url, sel};
use crate::transport::Page;

/// Report listing pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportCategory {
    /// Snapshot reports over certified data.
    Snapshot,
    /// Operational data store reports over live data.
    Ods,
}

impl ReportCategory {
    pub(crate) fn path(self) -> &'static str {
        match self {
            ReportCategory::Snapshot => "Report/Snapshot",
            ReportCategory::Ods => "Report/ODS",
        }
    }
}

impl FromStr for ReportCategory {
    type Err = CalpadsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "snapshot" => Ok(ReportCategory::Snapshot),
            "ods" => Ok(ReportCategory::Ods),
            _ => Err(CalpadsError::not_found("report category", s)),
        }
    }
}

/// Export formats offered by the report viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Csv,
    Word,
    Excel,
    PowerPoint,
    Pdf,
    Tiff,
    Mhtml,
    Xml,
    DataFeed,
}

impl ReportFormat {
    pub const ALL: [ReportFormat; 9] = [
        ReportFormat::Csv,
        ReportFormat::Word,
        ReportFormat::Excel,
        ReportFormat::PowerPoint,
        ReportFormat::Pdf,
        ReportFormat::Tiff,
        ReportFormat::Mhtml,
        ReportFormat::Xml,
        ReportFormat::DataFeed,
    ];

    /// Value of the export URL's `Format` parameter.
    pub fn wire_name(self) -> &'static str {
        match self {
            ReportFormat::Csv => "CSV",
            ReportFormat::Word => "WORDOPENXML",
            ReportFormat::Excel => "EXCELOPENXML",
            ReportFormat::PowerPoint => "PPTX",
            ReportFormat::Pdf => "PDF",
            ReportFormat::Tiff => "IMAGE",
            ReportFormat::Mhtml => "MHTML",
            ReportFormat::Xml => "XML",
            ReportFormat::DataFeed => "ATOM",
        }
    }

    /// Name callers use to pick the format.
    pub fn name(self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Word => "word",
            ReportFormat::Excel => "excel",
            ReportFormat::PowerPoint => "powerpoint",
            ReportFormat::Pdf => "pdf",
            ReportFormat::Tiff => "tiff",
            ReportFormat::Mhtml => "mhtml",
            ReportFormat::Xml => "xml",
            ReportFormat::DataFeed => "datafeed",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = CalpadsError;

    /// Accepts either the caller name (`excel`) or the wire name
    /// (`EXCELOPENXML`), case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(wanted) || f.wire_name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| CalpadsError::InvalidFormat(s.to_string()))
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What to download and how.
#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub lea: String,
    /// Code displayed next to the report on its category page, e.g. `1.1`.
    pub code: String,
    pub category: ReportCategory,
    pub format: ReportFormat,
    pub values: ParamValues,
    pub destination: Option<PathBuf>,
    pub dry_run: bool,
}

impl ReportRequest {
    pub fn new(lea: impl Into<String>, code: impl Into<String>, category: ReportCategory) -> Self {
        Self {
            lea: lea.into(),
            code: code.into(),
            category,
            format: ReportFormat::default(),
            values: Vec::new(),
            destination: None,
            dry_run: false,
        }
    }

    pub fn format(mut self, format: ReportFormat) -> Self {
        self.format = format;
        self
    }

    pub fn values(mut self, values: ParamValues) -> Self {
        self.values = values;
        self
    }

    pub fn destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination = Some(path.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// Dry run: the parameters the viewer accepts.
    Described(BTreeMap<String, ParamDescription>),
    /// The exported report.
    Downloaded(Vec<u8>),
}

const VIEW_REPORT: &str = "View Report";

impl CalpadsClient {
    pub fn download_report(&mut self, request: &ReportRequest) -> Result<ReportOutcome> {
        self.ensure_connected()?;

        let listing_url = endpoints::report_category(self.config(), request.category, &request.lea)?;
        let listing = self.get_page(listing_url)?;
        let report_url = find_report_link(&listing, &request.code)?;

        let report_page = self.get_page(report_url)?;
        let viewer_url = find_viewer_frame(&report_page)?;
        let viewer = self.get_page(viewer_url)?;

        let schema = parse_report_form(&viewer.text(), &viewer.url)?;
        if request.dry_run {
            return Ok(ReportOutcome::Described(schema.describe()));
        }

        let mut wire = schema.merge(&request.values);
        match view_report_button(&viewer) {
            Some(name) => wire.set(name, VIEW_REPORT),
            None => warn!(url = %viewer.url, "report viewer has no View Report button"),
        }
        let action = schema.action.clone().unwrap_or_else(|| viewer.url.clone());
        let rendered = self.post_page(action, wire.into_pairs())?;

        let template = find_export_url_template(&rendered.text())?;
        let export_url = export_url(&rendered.url, &template, request.format)?;
        debug!(url = %export_url, "exporting report");

        let export = self.get_page(export_url)?;
        if !export.is_success() {
            return Err(CalpadsError::shape(format!("report export answered {}", export.status)));
        }
        save(request.destination.as_deref(), &export.body)?;
        info!(code = %request.code, format = %request.format, bytes = export.body.len(), "report downloaded");
        Ok(ReportOutcome::Downloaded(export.body))
    }
}

/// Link of the report whose displayed code equals `code`.
fn find_report_link(listing: &Page, code: &str) -> Result<Url> {
    let doc = Html::parse_document(&listing.text());
    let wanted = code.trim();
    let href = doc
        .select(&sel(".num"))
        .filter(|el| element_text(el).eq_ignore_ascii_case(wanted))
        .find_map(|el| {
            el.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|a| a.value().name() == "a")
                .and_then(|a| a.value().attr("href"))
                .map(str::to_string)
        })
        .ok_or_else(|| CalpadsError::not_found("report", code))?;
    resolve_url(&listing.url, &href)
}

fn find_viewer_frame(report_page: &Page) -> Result<Url> {
    let doc = Html::parse_document(&report_page.text());
    let src = doc
        .select(&sel("iframe[src]"))
        .find_map(|el| el.value().attr("src").map(str::to_string))
        .ok_or_else(|| CalpadsError::shape(format!("no report viewer frame on {}", report_page.url)))?;
    resolve_url(&report_page.url, &src)
}

fn view_report_button(viewer: &Page) -> Option<String> {
    let doc = Html::parse_document(&viewer.text());
    doc.select(&sel(r#"input[type="submit"][name]"#))
        .find(|el| el.value().attr("value") == Some(VIEW_REPORT))
        .and_then(|el| el.value().attr("name"))
        .map(str::to_string)
}

/// Pull the export URL template out of the viewer's inline script state.
///
/// The template is a JSON string literal inside a script block, not an
/// attribute, so it is matched in the raw markup.
pub fn find_export_url_template(markup: &str) -> Result<String> {
    static EXPORT_URL_BASE: OnceLock<Regex> = OnceLock::new();
    let re = EXPORT_URL_BASE.get_or_init(|| {
        Regex::new(r#""ExportUrlBase"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("export url regex is valid")
    });
    let literal = re
        .captures(markup)
        .and_then(|c| c.get(1))
        .ok_or_else(|| CalpadsError::shape("rendered report has no ExportUrlBase"))?;
    let template: String = serde_json::from_str(&format!("\"{}\"", literal.as_str()))?;
    Ok(template)
}

/// Resolve the template against the rendered page and set its `Format`.
fn export_url(rendered: &Url, template: &str, format: ReportFormat) -> Result<Url> {
    let mut url = resolve_url(rendered, template)?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "Format")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("Format", format.wire_name());
    Ok(url)
}
