//! Client configuration and credential loading.
//!
//! Configuration is resolved in layers:
//! 1. Built-in defaults (every field has one)
//! 2. An optional JSON file passed to [`ClientConfig::load`]
//! 3. Environment overrides (`CALPADS_HOST`)
//!
//! Credentials never live in the config file. They come from the caller or
//! from `CALPADS_USERNAME` / `CALPADS_PASSWORD`.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{CalpadsError, Result};

const DEFAULT_HOST: &str = "https://www.calpads.org/";

/// Runtime settings for a [`crate::CalpadsClient`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Canonical host root. Reaching exactly this URL is part of the
    /// connected check.
    pub host: String,
    /// Path of the identity provider's login form.
    pub login_path: String,
    /// Path prefixes of the OAuth authorize/callback interstitial.
    pub oauth_path_prefixes: Vec<String>,
    /// User-Agent header sent on every request.
    pub user_agent: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Number of terminal pages kept in the diagnostic history.
    pub history_capacity: usize,
    /// Floor applied to every caller-supplied poll interval.
    pub min_poll_interval_secs: u64,
    /// Upper bound on synthetic POSTs issued while settling one request.
    pub max_replay_hops: usize,
    /// CSS selector that only matches on an authenticated page.
    pub authenticated_marker: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            login_path: "/Account/Login".to_string(),
            oauth_path_prefixes: vec!["/connect/authorize".to_string()],
            user_agent: format!("calpads-rs/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 60,
            history_capacity: 10,
            min_poll_interval_secs: 5,
            max_replay_hops: 10,
            authenticated_marker: r#"a[href*="Logout"], form[action*="Logout"]"#.to_string(),
        }
    }
}

impl ClientConfig {
    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Read a JSON config file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&raw)?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("CALPADS_HOST") {
            if !host.trim().is_empty() {
                self.host = host;
            }
        }
    }

    /// The host root as a parsed URL, always with a trailing slash.
    pub fn host_url(&self) -> Result<Url> {
        let mut host = self.host.trim().to_string();
        if !host.ends_with('/') {
            host.push('/');
        }
        Ok(Url::parse(&host)?)
    }

    /// Resolve a path against the host root.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.host_url()?.join(path.trim_start_matches('/'))?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_secs(self.min_poll_interval_secs)
    }
}

/// Login credentials replayed into the identity provider's form.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read `CALPADS_USERNAME` and `CALPADS_PASSWORD`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| CalpadsError::Config(format!("{key} is not set")))
        };
        Ok(Self::new(var("CALPADS_USERNAME")?, var("CALPADS_PASSWORD")?))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
