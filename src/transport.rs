//! Abstract HTTP transport.
//!
//! The login and confirmation protocols are written once against the
//! `Transport` trait; the blocking adapter and the test doubles reuse
//! that single implementation instead of duplicating state machines.
//! `ReqwestTransport` is the production implementation, owning the
//! cookie jar that spans both marketplace domains.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Community domain: confirmations, trade UI.
pub const COMMUNITY_URL: &str = "https://steamcommunity.com";
/// Store domain: login handshake.
pub const STORE_URL: &str = "https://store.steampowered.com";
/// Cookie carrying the session identifier on both domains.
pub const SESSION_COOKIE: &str = "sessionid";

/// Abstraction over the authenticated HTTP transport.
///
/// Implementors own the cookie jar; protocol code never touches
/// cookies except through this seam. Transport failures are surfaced
/// unmodified; no retry or backoff policy lives here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a form-encoded body and return the response body.
    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<String>;

    /// GET with query parameters and extra headers, returning the body.
    async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
    ) -> Result<String>;

    /// Read a cookie value scoped to `url`'s domain.
    fn cookie(&self, url: &str, name: &str) -> Option<String>;

    /// Set a cookie on `url`'s domain.
    fn set_cookie(&self, url: &str, name: &str, value: &str);
}

/// Production transport backed by `reqwest` with a shared cookie jar.
pub struct ReqwestTransport {
    http: Client,
    jar: Arc<Jar>,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let http = Client::builder()
            .cookie_provider(jar.clone())
            .timeout(Duration::from_secs(30))
            .user_agent("VIGIL/0.1.0 (marketplace-session-client)")
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, jar })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<String> {
        debug!(url = %url, "POST");
        let resp = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("POST {url} returned {status}: {body}");
        }
        resp.text()
            .await
            .with_context(|| format!("Failed to read response body from {url}"))
    }

    async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
    ) -> Result<String> {
        debug!(url = %url, "GET");
        let mut request = self.http.get(url).query(query);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let resp = request
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("GET {url} returned {status}: {body}");
        }
        resp.text()
            .await
            .with_context(|| format!("Failed to read response body from {url}"))
    }

    fn cookie(&self, url: &str, name: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let header = self.jar.cookies(&url)?;
        let raw = header.to_str().ok()?.to_string();
        raw.split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find_map(|(key, value)| (key == name).then(|| value.to_string()))
    }

    fn set_cookie(&self, url: &str, name: &str, value: &str) {
        if let Ok(url) = Url::parse(url) {
            let domain = url.host_str().unwrap_or_default().to_string();
            self.jar
                .add_cookie_str(&format!("{name}={value}; Domain={domain}; Path=/"), &url);
        }
    }
}
