//! Login and OAuth-consent replay.
//!
//! The remote application answers an unauthenticated request with a redirect
//! chain through its identity provider: a login form, then an auto-posting
//! OAuth interstitial, then the page originally asked for. Browsers complete
//! that chain with a human at the keyboard and a snippet of JavaScript; the
//! [`AuthenticatingTransport`] completes it by classifying each response
//! against a closed set of `{path, status}` rules and issuing the synthetic
//! POST the matching rule calls for.
//!
//! Classification only looks at the response itself, so the same transport
//! handles the first login and a mid-session re-challenge alike.

use scraper::Html;
use tracing::{debug, info, warn};

use super::{HttpBackend, Method, Page, PageRequest, VisitedPage};
use crate::config::{ClientConfig, Credentials};
use crate::error::{CalpadsError, Result};
use crate::html::{form_action, input_value_by_id, input_value_by_name, named_inputs, sel};
use crate::transport::History;

/// What a response asks the transport to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayRule {
    /// The identity provider's login form: submit credentials.
    LoginForm,
    /// The OAuth authorize/callback page: re-post its hidden form.
    OAuthInterstitial,
    /// Anything else: hand the page to the caller.
    Terminal,
}

/// Progress of the authentication handshake as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    AnonymousInit,
    LoginFormPresented,
    OAuthInterstitial,
    Authenticated,
}

/// The `{path, status}` rule table.
#[derive(Debug, Clone)]
pub struct ReplayRules {
    login_path: String,
    oauth_prefixes: Vec<String>,
}

impl ReplayRules {
    pub fn new(login_path: impl Into<String>, oauth_prefixes: Vec<String>) -> Self {
        Self {
            login_path: login_path.into().to_ascii_lowercase(),
            oauth_prefixes: oauth_prefixes
                .into_iter()
                .map(|p| p.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.login_path.clone(), config.oauth_path_prefixes.clone())
    }

    /// Classify one response. Non-2xx responses are always terminal.
    pub fn classify(&self, page: &Page) -> ReplayRule {
        if !page.is_success() {
            return ReplayRule::Terminal;
        }
        let path = page.url.path().to_ascii_lowercase();
        if path.trim_end_matches('/') == self.login_path.trim_end_matches('/') {
            ReplayRule::LoginForm
        } else if self.oauth_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            ReplayRule::OAuthInterstitial
        } else {
            ReplayRule::Terminal
        }
    }
}

/// Transport that settles every request on its intended destination.
pub struct AuthenticatingTransport {
    backend: Box<dyn HttpBackend>,
    credentials: Credentials,
    rules: ReplayRules,
    max_hops: usize,
    state: AuthState,
    history: History,
}

impl AuthenticatingTransport {
    pub fn new(backend: Box<dyn HttpBackend>, credentials: Credentials, config: &ClientConfig) -> Self {
        Self {
            backend,
            credentials,
            rules: ReplayRules::from_config(config),
            max_hops: config.max_replay_hops.max(1),
            state: AuthState::AnonymousInit,
            history: History::new(config.history_capacity),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    pub fn get(&mut self, url: url::Url) -> Result<Page> {
        self.send(PageRequest::get(url))
    }

    pub fn post_form(&mut self, url: url::Url, fields: Vec<(String, String)>) -> Result<Page> {
        self.send(PageRequest::post_form(url, fields))
    }

    /// Execute `request`, replaying any login/consent detour, and return the
    /// terminal page.
    ///
    /// A login form served in answer to our own credential POST means the
    /// credentials were rejected; it is returned as terminal rather than
    /// resubmitted.
    pub fn send(&mut self, request: PageRequest) -> Result<Page> {
        let mut request = request;
        let mut hops = 0usize;
        let mut posted_credentials = false;

        loop {
            debug!(method = ?request.method, url = %request.url, hops, "sending request");
            let page = self.backend.execute(&request)?;

            let rule = self.rules.classify(&page);
            let next = match rule {
                ReplayRule::LoginForm if posted_credentials => {
                    warn!(url = %page.url, "login form served again after credential replay; credentials rejected");
                    self.state = AuthState::LoginFormPresented;
                    return Ok(self.terminal(page));
                }
                ReplayRule::LoginForm => {
                    self.state = AuthState::LoginFormPresented;
                    posted_credentials = true;
                    self.login_request(&page)?
                }
                ReplayRule::OAuthInterstitial => {
                    self.state = AuthState::OAuthInterstitial;
                    interstitial_request(&page)?
                }
                ReplayRule::Terminal => {
                    if hops > 0 {
                        info!(url = %page.url, hops, "authentication replay complete");
                    }
                    self.state = AuthState::Authenticated;
                    return Ok(self.terminal(page));
                }
            };

            hops += 1;
            if hops > self.max_hops {
                return Err(CalpadsError::ReplayLimit(self.max_hops));
            }
            debug!(?rule, url = %next.url, "replaying handshake step");
            request = next;
        }
    }

    fn terminal(&mut self, page: Page) -> Page {
        self.history.push(VisitedPage {
            url: page.url.clone(),
            status: page.status,
        });
        page
    }

    /// Fill the login form. The credential bag lives only for this call.
    fn login_request(&self, page: &Page) -> Result<PageRequest> {
        let doc = Html::parse_document(&page.text());
        let token = input_value_by_name(&doc, "__RequestVerificationToken")
            .ok_or_else(|| CalpadsError::shape("login form has no __RequestVerificationToken input"))?;
        let return_url = input_value_by_id(&doc, "ReturnUrl")
            .ok_or_else(|| CalpadsError::shape("login form has no ReturnUrl input"))?;

        let fields = vec![
            ("Username".to_string(), self.credentials.username.clone()),
            ("Password".to_string(), self.credentials.password.clone()),
            ("__RequestVerificationToken".to_string(), token),
            ("ReturnUrl".to_string(), return_url),
            ("AgreementConfirmed".to_string(), "True".to_string()),
        ];
        Ok(PageRequest::post_form(page.url.clone(), fields))
    }
}

/// Re-post the interstitial's auto-submitting form with all of its inputs.
fn interstitial_request(page: &Page) -> Result<PageRequest> {
    let doc = Html::parse_document(&page.text());
    let form = doc
        .select(&sel("form"))
        .next()
        .ok_or_else(|| CalpadsError::shape("OAuth interstitial has no form"))?;
    let action = form_action(&form, &page.url)?;
    let fields = named_inputs(&form);
    Ok(PageRequest {
        method: Method::Post,
        url: action,
        body: super::RequestBody::Form(fields),
    })
}
