//! Blocking HTTP backend wrapping reqwest.
//!
//! Plain HTTP, no browser. Owns the session's cookie jar,
//! follows redirects, and retries idempotent requests on 5xx with
//! exponential backoff and on 429 honouring `Retry-After`.

use std::time::Duration;

use reqwest::blocking::multipart;

use super::{HttpBackend, Method, Page, PageRequest, RequestBody};
use crate::config::ClientConfig;
use crate::error::Result;

const MAX_RETRIES: u32 = 2;

/// reqwest-backed [`HttpBackend`] with a per-instance cookie store.
pub struct ReqwestBackend {
    client: reqwest::blocking::Client,
}

impl ReqwestBackend {
    /// Create a backend with its own cookie jar.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::limited(10))
            .cookie_store(true)
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self { client })
    }

    fn build(&self, request: &PageRequest) -> reqwest::blocking::RequestBuilder {
        let builder = match request.method {
            Method::Get => self.client.get(request.url.clone()),
            Method::Post => self.client.post(request.url.clone()),
        };

        match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Multipart { fields, file } => {
                let mut form = multipart::Form::new();
                for (name, value) in fields {
                    form = form.text(name.clone(), value.clone());
                }
                let part = multipart::Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
                builder.multipart(form.part(file.field.clone(), part))
            }
        }
    }
}

impl HttpBackend for ReqwestBackend {
    fn execute(&self, request: &PageRequest) -> Result<Page> {
        // POSTs are never retried: the server may already have acted on them.
        let retryable = request.method == Method::Get;
        let mut retries = 0u32;

        loop {
            let resp = match self.build(request).send() {
                Ok(resp) => resp,
                Err(e) if retryable && retries < MAX_RETRIES => {
                    retries += 1;
                    tracing::debug!(url = %request.url, error = %e, retries, "request failed, retrying");
                    std::thread::sleep(Duration::from_millis(500 * 2u64.pow(retries - 1)));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = resp.status().as_u16();

            // Retry on 5xx
            if retryable && status >= 500 && retries < MAX_RETRIES {
                retries += 1;
                std::thread::sleep(Duration::from_millis(500 * 2u64.pow(retries - 1)));
                continue;
            }

            // Backoff on 429
            if retryable && status == 429 && retries < MAX_RETRIES {
                retries += 1;
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(2);
                std::thread::sleep(Duration::from_secs(retry_after.min(10)));
                continue;
            }

            let url = resp.url().clone();
            let content_type = resp
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let body = resp.bytes()?.to_vec();

            tracing::debug!(%url, status, bytes = body.len(), "response received");

            return Ok(Page {
                url,
                status,
                content_type,
                body,
            });
        }
    }
}
