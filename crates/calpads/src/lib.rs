//! Client for the CALPADS web application.
//!
//! The application has no public API. This crate drives its HTML pages the
//! way a browser would:
//!
//! - [`transport`] replays the login and OAuth consent detours on every
//!   request, so callers only ever see the page they asked for.
//! - [`form`] reads the application's forms into typed schemas and maps
//!   caller values back onto the exact wire fields.
//! - [`workflow`] strings navigation and submissions together into report
//!   downloads, extract requests/downloads and file submissions.
//!
//! ```no_run
//! use calpads::{CalpadsClient, ClientConfig, Credentials, ReportCategory, ReportRequest};
//!
//! # fn main() -> calpads::Result<()> {
//! let mut client = CalpadsClient::connect(ClientConfig::from_env(), Credentials::from_env()?)?;
//! if client.is_connected() {
//!     let request = ReportRequest::new("0123456", "1.1", ReportCategory::Snapshot).dry_run(true);
//!     println!("{:?}", client.download_report(&request)?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
mod endpoints;
pub mod error;
pub mod form;
mod html;
pub mod listing;
pub mod transport;
pub mod workflow;

pub use client::CalpadsClient;
pub use config::{ClientConfig, Credentials};
pub use error::{CalpadsError, Result};
pub use form::{FieldKind, FormSchema, ParamDescription, ParamValue, ParamValues};
pub use listing::{ExtractRequestEntry, ExtractStatus, JobEntry, ListPage, Submitter};
pub use transport::{AuthState, HttpBackend, Page, PageRequest};
pub use workflow::{
    Clock, ExtractRequestOutcome, ExtractRequestSpec, ExtractType, ExtractVariant, FileUpload, PollOptions,
    PostFileSpec, ReportCategory, ReportFormat, ReportOutcome, ReportRequest, SystemClock,
};
