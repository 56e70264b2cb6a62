//! Scripted transport for protocol integration tests.
//!
//! A deterministic `Transport` implementation: responses are queued
//! per URL fragment (the last queued response is sticky), every
//! request is recorded for assertions, and cookies live in an
//! in-memory per-host map. Optional triggers set a cookie when a
//! given endpoint is hit, standing in for server `Set-Cookie`
//! behavior during redirect finalization.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use vigil::transport::Transport;

/// Install a test subscriber so protocol traces show up under
/// `cargo test -- --nocapture`. Safe to call from every test.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    /// Form fields for POSTs, query parameters for GETs.
    pub params: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<Vec<(String, Vec<String>)>>,
    requests: Mutex<Vec<RecordedRequest>>,
    cookies: Mutex<HashMap<String, HashMap<String, String>>>,
    cookie_triggers: Mutex<Vec<(String, String, String, String)>>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for requests whose URL contains `fragment`.
    /// Queued responses are served in order; the last one is sticky.
    pub fn respond(&self, fragment: &str, body: impl Into<String>) {
        let mut responses = self.responses.lock().unwrap();
        if let Some((_, queue)) = responses.iter_mut().find(|(f, _)| f.as_str() == fragment) {
            queue.push(body.into());
        } else {
            responses.push((fragment.to_string(), vec![body.into()]));
        }
    }

    /// Set a cookie on `domain_url` whenever a request hits `fragment`.
    pub fn set_cookie_on(&self, fragment: &str, domain_url: &str, name: &str, value: &str) {
        self.cookie_triggers.lock().unwrap().push((
            fragment.to_string(),
            domain_url.to_string(),
            name.to_string(),
            value.to_string(),
        ));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_matching(&self, fragment: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.url.contains(fragment))
            .collect()
    }

    fn serve(
        &self,
        method: &'static str,
        url: &str,
        params: Vec<(String, String)>,
    ) -> Result<String> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            url: url.to_string(),
            params,
        });

        for (fragment, domain_url, name, value) in self.cookie_triggers.lock().unwrap().iter() {
            if url.contains(fragment.as_str()) {
                self.cookies
                    .lock()
                    .unwrap()
                    .entry(host_of(domain_url))
                    .or_default()
                    .insert(name.clone(), value.clone());
            }
        }

        let mut responses = self.responses.lock().unwrap();
        let (_, queue) = responses
            .iter_mut()
            .find(|(fragment, _)| url.contains(fragment.as_str()))
            .ok_or_else(|| anyhow!("unscripted request: {method} {url}"))?;
        Ok(if queue.len() > 1 {
            queue.remove(0)
        } else {
            queue[0].clone()
        })
    }
}

fn host_of(url: &str) -> String {
    let rest = url.split("://").nth(1).unwrap_or(url);
    rest.split('/').next().unwrap_or(rest).to_string()
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<String> {
        self.serve("POST", url, form.to_vec())
    }

    async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        _headers: &[(String, String)],
    ) -> Result<String> {
        self.serve("GET", url, query.to_vec())
    }

    fn cookie(&self, url: &str, name: &str) -> Option<String> {
        self.cookies
            .lock()
            .unwrap()
            .get(&host_of(url))
            .and_then(|jar| jar.get(name).cloned())
    }

    fn set_cookie(&self, url: &str, name: &str, value: &str) {
        self.cookies
            .lock()
            .unwrap()
            .entry(host_of(url))
            .or_default()
            .insert(name.to_string(), value.to_string());
    }
}
