//! The fixed navigation entry points. Everything else is discovered by
//! following links and form actions on these pages.

use url::Url;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::workflow::{ExtractType, ReportCategory};

fn with_lea(config: &ClientConfig, path: &str, lea: &str, extra: &[(&str, &str)]) -> Result<Url> {
    let mut url = config.endpoint(path)?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("SelectedLEA", lea);
        for (k, v) in extra {
            query.append_pair(k, v);
        }
    }
    Ok(url)
}

pub(crate) fn report_category(config: &ClientConfig, category: ReportCategory, lea: &str) -> Result<Url> {
    with_lea(config, category.path(), lea, &[])
}

pub(crate) fn extract_page(config: &ClientConfig, extract: &ExtractType, lea: &str) -> Result<Url> {
    with_lea(config, &format!("Extract/{}", extract.as_str()), lea, &[])
}

pub(crate) fn extract_requests(config: &ClientConfig, lea: &str) -> Result<Url> {
    with_lea(config, "Extract/GetExtractRequests", lea, &[("format", "JSON")])
}

pub(crate) fn extract_download(config: &ClientConfig, lea: &str, request_id: &str) -> Result<Url> {
    with_lea(config, "Extract/DownloadExtract", lea, &[("requestId", request_id)])
}

pub(crate) fn submitter_names(config: &ClientConfig, lea: &str) -> Result<Url> {
    with_lea(config, "FileSubmission/GetJobSubmitterNames", lea, &[("format", "JSON")])
}

pub(crate) fn jobs(config: &ClientConfig, lea: &str) -> Result<Url> {
    with_lea(config, "FileSubmission/GetJobs", lea, &[("format", "JSON")])
}

pub(crate) fn file_upload(config: &ClientConfig, lea: &str) -> Result<Url> {
    with_lea(config, "FileSubmission/FileUpload", lea, &[])
}

pub(crate) fn job_detail(config: &ClientConfig, lea: &str, job_id: &str) -> Result<Url> {
    with_lea(config, &format!("FileSubmission/Detail/{job_id}"), lea, &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lea_is_always_in_query() {
        let config = ClientConfig::default();
        let url = extract_download(&config, "0123456", "42").unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.calpads.org/Extract/DownloadExtract?SelectedLEA=0123456&requestId=42"
        );
        let url = extract_page(&config, &ExtractType::new("senr"), "0123456").unwrap();
        assert_eq!(url.as_str(), "https://www.calpads.org/Extract/SENR?SelectedLEA=0123456");
    }
}
