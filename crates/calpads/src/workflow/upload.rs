//! File submission: upload, wait for the job to be reviewed, then post it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use scraper::Html;
use tracing::{debug, info, warn};
use url::Url;

use super::extract::{ExtractRequestOutcome, ExtractRequestSpec, ExtractType};
use super::poll::{poll_until, PollOptions, PollStep};
use super::validation_errors;
use crate::client::CalpadsClient;
use crate::endpoints;
use crate::error::{CalpadsError, Result};
use crate::form::{parse_named_form, FormSchema, NamedProfile, ParamDescription, ParamValue, ParamValues};
use crate::html::{form_action, named_inputs, sel};
use crate::listing::JobEntry;
use crate::transport::{FilePart, PageRequest};

/// A file to submit for one LEA.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub lea: String,
    pub path: PathBuf,
    /// Upload form fields, e.g. the file type and academic year.
    pub values: ParamValues,
}

impl FileUpload {
    pub fn new(lea: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            lea: lea.into(),
            path: path.into(),
            values: Vec::new(),
        }
    }

    pub fn values(mut self, values: ParamValues) -> Self {
        self.values = values;
        self
    }

    fn check_file(&self) -> Result<()> {
        if self.path.is_file() {
            Ok(())
        } else {
            Err(CalpadsError::MissingFile(self.path.clone()))
        }
    }
}

/// Upload, wait for review and post.
#[derive(Debug, Clone)]
pub struct PostFileSpec {
    pub upload: FileUpload,
    pub poll: PollOptions,
    /// Post the job even when the server rejected some records.
    pub override_rejections: bool,
    /// Where to save the rejected-records extract when not posting.
    pub rejections_destination: Option<PathBuf>,
}

impl PostFileSpec {
    pub fn new(upload: FileUpload) -> Self {
        Self {
            upload,
            poll: PollOptions::default(),
            override_rejections: false,
            rejections_destination: None,
        }
    }

    pub fn poll(mut self, poll: PollOptions) -> Self {
        self.poll = poll;
        self
    }

    pub fn override_rejections(mut self, yes: bool) -> Self {
        self.override_rejections = yes;
        self
    }

    pub fn rejections_destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.rejections_destination = Some(path.into());
        self
    }
}

const READY_FOR_REVIEW: &str = "Ready for Review";

/// The upload form as found on the page.
struct UploadForm {
    action: Url,
    file_field: String,
    schema: FormSchema,
}

impl CalpadsClient {
    /// Parameters the upload form accepts for `lea`.
    pub fn describe_upload_form(&mut self, lea: &str) -> Result<BTreeMap<String, ParamDescription>> {
        Ok(self.upload_form(lea)?.schema.describe())
    }

    /// Submit a file. `false` when the server answered with validation
    /// errors.
    pub fn upload_file(&mut self, upload: &FileUpload) -> Result<bool> {
        upload.check_file()?;
        self.ensure_connected()?;

        let form = self.upload_form(&upload.lea)?;
        let fields = form.schema.merge(&upload.values).into_pairs();
        let file = FilePart {
            field: form.file_field,
            file_name: file_name(&upload.path),
            bytes: std::fs::read(&upload.path)?,
        };
        let size = file.bytes.len();

        let result = self.send(PageRequest::post_multipart(form.action, fields, file))?;
        let errors = validation_errors(&result);
        if !result.is_success() || !errors.is_empty() {
            warn!(status = result.status, ?errors, path = %upload.path.display(), "upload rejected");
            return Ok(false);
        }
        info!(lea = %upload.lea, path = %upload.path.display(), bytes = size, "file uploaded");
        Ok(true)
    }

    /// Upload, wait until the job is ready for review, then post it unless
    /// records were rejected and no override was given.
    ///
    /// Only a job newer than the newest one listed before the upload is
    /// considered. Returns whether the job was posted.
    pub fn post_file(&mut self, spec: &PostFileSpec) -> Result<bool> {
        spec.upload.check_file()?;
        self.ensure_connected()?;
        let lea = spec.upload.lea.as_str();
        let previous = self.jobs(lea)?.latest().map(|job| job.job_id.clone());

        if !self.upload_file(&spec.upload)? {
            return Ok(false);
        }
        let poll = spec.poll.clamped(self.config().min_poll_interval());
        let clock = self.clock();

        let job = poll_until(clock.as_ref(), poll, |attempt| {
            let jobs = self.jobs(lea)?;
            Ok(match jobs.latest() {
                Some(job) if previous.as_deref() == Some(job.job_id.as_str()) => {
                    debug!(attempt, job = %job.job_id, "uploaded job not listed yet");
                    PollStep::Pending
                }
                Some(job) if job.is_ready_for_review() => PollStep::Ready(job.clone()),
                Some(job) if job.is_failed() => PollStep::Abandon,
                _ => PollStep::Pending,
            })
        })?;
        let Some(job) = job else {
            warn!(lea, "job never reached {READY_FOR_REVIEW}");
            return Ok(false);
        };

        if job.rejected == 0 || spec.override_rejections {
            return self.finalize_job(lea, &job.job_id);
        }

        warn!(job = %job.job_id, rejected = job.rejected, "job has rejected records; not posting");
        if let Some(destination) = &spec.rejections_destination {
            self.fetch_rejections(lea, &job, destination, spec.poll)?;
        }
        Ok(false)
    }

    /// Submit the post form on a job's detail page.
    pub fn finalize_job(&mut self, lea: &str, job_id: &str) -> Result<bool> {
        self.ensure_connected()?;
        let url = endpoints::job_detail(self.config(), lea, job_id)?;
        let page = self.get_page(url)?;

        let (action, fields) = {
            let doc = Html::parse_document(&page.text());
            let form = doc
                .select(&sel("form[action]"))
                .find(|f| {
                    f.value()
                        .attr("action")
                        .is_some_and(|a| a.to_ascii_lowercase().contains("post"))
                })
                .ok_or_else(|| CalpadsError::shape(format!("job {job_id} has no post form")))?;
            (form_action(&form, &page.url)?, named_inputs(&form))
        };

        let result = self.post_page(action, fields)?;
        let errors = validation_errors(&result);
        let posted = result.is_success() && errors.is_empty();
        if posted {
            info!(job = %job_id, "job posted");
        } else {
            warn!(job = %job_id, status = result.status, ?errors, "job was not posted");
        }
        Ok(posted)
    }

    fn fetch_rejections(&mut self, lea: &str, job: &JobEntry, destination: &Path, poll: PollOptions) -> Result<()> {
        let mut values: ParamValues = vec![("JobID".to_string(), ParamValue::from(job.job_id.as_str()))];
        if let Some(submitter) = &job.submitter_id {
            values.push(("SubmitterID".to_string(), ParamValue::from(submitter.as_str())));
        }
        let request = ExtractRequestSpec::new(lea, ExtractType::new("REJECTEDRECORDS")).values(values);

        match self.request_extract(&request)? {
            ExtractRequestOutcome::Submitted(true) => {
                if self.download_extract(lea, poll, Some(destination))?.is_none() {
                    warn!(job = %job.job_id, "rejected records extract did not complete");
                }
            }
            _ => warn!(job = %job.job_id, "rejected records extract was not accepted"),
        }
        Ok(())
    }

    fn upload_form(&mut self, lea: &str) -> Result<UploadForm> {
        self.ensure_connected()?;
        let url = endpoints::file_upload(self.config(), lea)?;
        let page = self.get_page(url)?;
        let doc = Html::parse_document(&page.text());

        let form = doc
            .select(&sel("form"))
            .find(|f| f.select(&sel(r#"input[type="file"][name]"#)).next().is_some())
            .ok_or_else(|| CalpadsError::shape("upload page has no file form"))?;
        let file_field = form
            .select(&sel(r#"input[type="file"][name]"#))
            .find_map(|el| el.value().attr("name"))
            .unwrap_or("File")
            .to_string();
        let schema = parse_named_form(&form, &page.url, NamedProfile::Upload)?;
        let action = schema.action.clone().unwrap_or_else(|| page.url.clone());

        Ok(UploadForm {
            action,
            file_field,
            schema,
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.txt".to_string())
}
