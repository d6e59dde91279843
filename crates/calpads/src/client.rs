//! The client handle: one authenticated session against one host.

use std::rc::Rc;

use scraper::Html;
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use url::Url;

use crate::config::{ClientConfig, Credentials};
use crate::error::{CalpadsError, Result};
use crate::html::{parse_selector, sel};
use crate::transport::{
    AuthState, AuthenticatingTransport, History, HttpBackend, Page, PageRequest, ReqwestBackend,
};
use crate::workflow::poll::{Clock, SystemClock};

/// A signed-in session.
///
/// Not `Send`: the remote application keeps per-session state (including
/// the selected LEA), so run independent clients for parallel work.
pub struct CalpadsClient {
    config: ClientConfig,
    transport: AuthenticatingTransport,
    clock: Rc<dyn Clock>,
    connected: bool,
}

impl CalpadsClient {
    /// Sign in over HTTPS.
    ///
    /// A rejected login is not an error: check [`Self::is_connected`].
    pub fn connect(config: ClientConfig, credentials: Credentials) -> Result<Self> {
        let backend = ReqwestBackend::new(&config)?;
        Self::with_backend(config, credentials, Box::new(backend), Rc::new(SystemClock::new()))
    }

    /// Sign in through an arbitrary backend and clock.
    pub fn with_backend(
        config: ClientConfig,
        credentials: Credentials,
        backend: Box<dyn HttpBackend>,
        clock: Rc<dyn Clock>,
    ) -> Result<Self> {
        let transport = AuthenticatingTransport::new(backend, credentials, &config);
        let mut client = Self {
            config,
            transport,
            clock,
            connected: false,
        };
        client.connected = client.check_connection()?;
        Ok(client)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Navigate to the host root again, replaying the login if the session
    /// expired. Only valid on a client whose first sign-in succeeded.
    pub fn reconnect(&mut self) -> Result<bool> {
        self.ensure_connected()?;
        self.connected = self.check_connection()?;
        Ok(self.connected)
    }

    pub fn auth_state(&self) -> AuthState {
        self.transport.state()
    }

    /// Recently reached pages, for diagnostics.
    pub fn history(&self) -> &History {
        self.transport.history()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn username(&self) -> &str {
        self.transport.username()
    }

    fn check_connection(&mut self) -> Result<bool> {
        let root = self.config.host_url()?;
        let marker = parse_selector(&self.config.authenticated_marker)?;

        let page = match self.transport.get(root.clone()) {
            Ok(page) => page,
            Err(err @ (CalpadsError::UpstreamShapeChange(_) | CalpadsError::ReplayLimit(_))) => {
                warn!(error = %err, "sign-in did not complete");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let doc = Html::parse_document(&page.text());
        let on_root = same_location(&page.url, &root);
        let marked = doc.select(&marker).next().is_some();
        let login_form = doc.select(&sel(r#"input[name="Password"]"#)).next().is_some();

        let connected = page.is_success() && on_root && marked && !login_form;
        if connected {
            info!(user = %self.transport.username(), host = %root, "connected");
        } else {
            warn!(url = %page.url, status = page.status, on_root, marked, login_form, "not connected");
        }
        Ok(connected)
    }

    pub(crate) fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(CalpadsError::NotConnected)
        }
    }

    pub(crate) fn clock(&self) -> Rc<dyn Clock> {
        Rc::clone(&self.clock)
    }

    pub(crate) fn transport_mut(&mut self) -> &mut AuthenticatingTransport {
        &mut self.transport
    }

    /// Send through the transport on a connected session.
    pub(crate) fn send(&mut self, request: PageRequest) -> Result<Page> {
        self.ensure_connected()?;
        self.transport.send(request)
    }

    pub(crate) fn get_page(&mut self, url: Url) -> Result<Page> {
        self.send(PageRequest::get(url))
    }

    pub(crate) fn post_page(&mut self, url: Url, fields: Vec<(String, String)>) -> Result<Page> {
        self.send(PageRequest::post_form(url, fields))
    }

    /// GET a list endpoint and decode its JSON body.
    pub(crate) fn get_json<T: DeserializeOwned>(&mut self, url: Url) -> Result<T> {
        let page = self.get_page(url)?;
        if !page.is_success() {
            return Err(CalpadsError::shape(format!(
                "list endpoint {} answered {}",
                page.url, page.status
            )));
        }
        Ok(serde_json::from_slice(&page.body)?)
    }
}

/// Same origin and path, ignoring query, fragment and a trailing slash.
fn same_location(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin() && a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
}


#[cfg(test)]
mod tests {
    use super::testing::{client_on, signed_in, HOME_PAGE};
    use super::*;
    use crate::transport::testing::{count, Reply, ScriptedBackend, INTERSTITIAL, LOGIN_PAGE};
    use crate::transport::Method;

    fn three_hop_backend() -> ScriptedBackend {
        ScriptedBackend::new()
            .route(
                Method::Get,
                "/",
                vec![
                    Reply::html(LOGIN_PAGE).landing_on("https://www.calpads.org/Account/Login?ReturnUrl=%2F"),
                    Reply::html(HOME_PAGE),
                ],
            )
            .route(
                Method::Post,
                "/Account/Login",
                vec![Reply::html(INTERSTITIAL).landing_on("https://www.calpads.org/connect/authorize/callback")],
            )
            .route(
                Method::Post,
                "/signin-oidc",
                vec![Reply::html(HOME_PAGE).landing_on("https://www.calpads.org/")],
            )
    }

    #[test]
    fn test_connect_through_login_chain() {
        let backend = three_hop_backend();
        let log = backend.log();
        let (client, _) = client_on(backend);

        assert!(client.is_connected());
        assert_eq!(client.auth_state(), AuthState::Authenticated);
        assert_eq!(count(&log, Method::Post, "/Account/Login"), 1);
        assert_eq!(count(&log, Method::Post, "/signin-oidc"), 1);
        assert_eq!(client.history().len(), 1);
    }

    #[test]
    fn test_reconnect_is_idempotent() {
        let backend = three_hop_backend();
        let log = backend.log();
        let (mut client, _) = client_on(backend);

        assert!(client.reconnect().unwrap());
        assert!(client.reconnect().unwrap());
        let posts = log.borrow().iter().filter(|r| r.method == Method::Post).count();
        assert_eq!(posts, 2);
        assert_eq!(client.auth_state(), AuthState::Authenticated);
    }

    #[test]
    fn test_rejected_login_is_not_connected() {
        let backend = ScriptedBackend::new()
            .route(
                Method::Get,
                "/",
                vec![Reply::html(LOGIN_PAGE).landing_on("https://www.calpads.org/Account/Login")],
            )
            .route(Method::Post, "/Account/Login", vec![Reply::html(LOGIN_PAGE)]);
        let (mut client, _) = client_on(backend);

        assert!(!client.is_connected());
        assert!(matches!(client.reconnect(), Err(CalpadsError::NotConnected)));
        assert!(matches!(client.jobs("0123456"), Err(CalpadsError::NotConnected)));
    }

    #[test]
    fn test_root_without_marker_is_not_connected() {
        let backend =
            ScriptedBackend::new().route(Method::Get, "/", vec![Reply::html("<html><body>Maintenance</body></html>")]);
        let (client, _) = client_on(backend);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_leas_from_landing_page() {
        let (mut client, _) = client_on(signed_in());
        let leas = client.leas().unwrap();
        assert_eq!(leas.len(), 2);
        assert_eq!(leas[0].value, "0123456");
        assert_eq!(leas[1].label, "0765432 - Example Elementary");
    }

    #[test]
    fn test_same_location_ignores_query_and_slash() {
        let root = Url::parse("https://www.calpads.org/").unwrap();
        assert!(same_location(&Url::parse("https://www.calpads.org/?x=1").unwrap(), &root));
        assert!(!same_location(&Url::parse("https://www.calpads.org/Home").unwrap(), &root));
        assert!(!same_location(&Url::parse("https://identity.calpads.org/").unwrap(), &root));
    }
}
