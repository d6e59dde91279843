//! Outbound HTTP plumbing.
//!
//! Every request the client makes goes through an [`AuthenticatingTransport`],
//! which sits on top of a pluggable [`HttpBackend`]. The backend only moves
//! bytes (and owns the cookie jar); the transport decides whether a response
//! is the page the caller asked for or a login/consent detour to replay.

pub mod history;
pub mod http_client;
pub mod replay;

pub use history::{History, VisitedPage};
pub use http_client::ReqwestBackend;
pub use replay::{AuthState, AuthenticatingTransport, ReplayRule, ReplayRules};

use url::Url;

use crate::error::Result;

/// HTTP method of a [`PageRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A file attached to a multipart submission.
#[derive(Debug, Clone)]
pub struct FilePart {
    /// Form field the file is submitted under.
    pub field: String,
    /// File name reported to the server.
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Request payload.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    /// `application/x-www-form-urlencoded` pairs, order preserved.
    Form(Vec<(String, String)>),
    /// `multipart/form-data` with text fields and one file.
    Multipart {
        fields: Vec<(String, String)>,
        file: FilePart,
    },
}

/// One outbound request.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub method: Method,
    pub url: Url,
    pub body: RequestBody,
}

impl PageRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            body: RequestBody::Empty,
        }
    }

    pub fn post_form(url: Url, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            url,
            body: RequestBody::Form(fields),
        }
    }

    pub fn post_multipart(url: Url, fields: Vec<(String, String)>, file: FilePart) -> Self {
        Self {
            method: Method::Post,
            url,
            body: RequestBody::Multipart { fields, file },
        }
    }

    /// Form pairs carried by the request, if any.
    pub fn form_fields(&self) -> &[(String, String)] {
        match &self.body {
            RequestBody::Form(fields) | RequestBody::Multipart { fields, .. } => fields,
            RequestBody::Empty => &[],
        }
    }
}

/// A response after redirects have been followed.
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects.
    pub url: Url,
    /// HTTP status code.
    pub status: u16,
    /// Content-Type header.
    pub content_type: Option<String>,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl Page {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can execute a [`PageRequest`] and follow redirects.
///
/// Implementations own the cookie jar; the transport never touches cookies
/// directly.
pub trait HttpBackend {
    fn execute(&self, request: &PageRequest) -> Result<Page>;
}
