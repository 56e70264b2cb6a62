//! Login protocol: RSA key fetch, password encryption, credential
//! exchange, redirect finalization.
//!
//! The handshake walks a fixed sequence of states: fetch a per-login
//! RSA key, submit encrypted credentials, branch on captcha/second
//! factor, then finalize the session by replaying transfer parameters
//! against every transfer URL and bridging the session cookie across
//! domains. Every credential submission re-fetches the key; the
//! server invalidates a key once it has seen it.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPublicKey};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::guard;
use crate::session::SessionCookieBridge;
use crate::transport::{Transport, STORE_URL};
use crate::types::{EstablishedSession, Result, VigilError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Total key-fetch round trips before giving up. Bounds worst-case
/// latency; each attempt is a fresh network call, never a cached key.
const MAX_KEY_FETCH_ATTEMPTS: u32 = 5;

/// How often a rejected second factor may be resubmitted. The server
/// contract leaves this unbounded; one resubmission is a policy
/// choice, overridable per protocol instance.
const DEFAULT_TWO_FACTOR_SUBMISSIONS: u32 = 1;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Response of `login/getrsakey/`. All fields must be present for the
/// key to be usable; anything less is a transient miss.
#[derive(Debug, Deserialize)]
struct RsaKeyResponse {
    #[serde(default)]
    publickey_mod: Option<String>,
    #[serde(default)]
    publickey_exp: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
}

/// A usable per-login RSA key.
#[derive(Debug, Clone)]
pub struct RsaKey {
    /// Modulus, hex-encoded as the server sends it.
    pub modulus_hex: String,
    /// Public exponent, hex-encoded.
    pub exponent_hex: String,
    /// Server-side issue timestamp, echoed back on `dologin`.
    pub timestamp: String,
}

/// Response of `login/dologin`.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    requires_twofactor: bool,
    #[serde(default)]
    captcha_needed: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    transfer_urls: Option<Vec<String>>,
    #[serde(default)]
    transfer_parameters: Option<serde_json::Map<String, Value>>,
}

// ---------------------------------------------------------------------------
// RSA key fetch
// ---------------------------------------------------------------------------

/// Fetch the per-login RSA public key for `username`.
///
/// Retries transient misses (network failure, unparseable body,
/// missing fields) with fresh round trips, up to
/// `MAX_KEY_FETCH_ATTEMPTS` total, then fails permanently.
pub async fn fetch_rsa_key(transport: &dyn Transport, username: &str) -> Result<RsaKey> {
    let url = format!("{STORE_URL}/login/getrsakey/");
    let form = [("username".to_string(), username.to_string())];

    for attempt in 1..=MAX_KEY_FETCH_ATTEMPTS {
        let body = match transport.post_form(&url, &form).await {
            Ok(body) => body,
            Err(e) => {
                warn!(attempt, error = %e, "RSA key fetch failed");
                continue;
            }
        };

        let response: RsaKeyResponse = match serde_json::from_str(&body) {
            Ok(response) => response,
            Err(e) => {
                warn!(attempt, error = %e, "RSA key response unparseable");
                continue;
            }
        };

        match (
            response.publickey_mod,
            response.publickey_exp,
            response.timestamp,
        ) {
            (Some(modulus_hex), Some(exponent_hex), Some(timestamp)) => {
                debug!(attempt, "obtained RSA login key");
                return Ok(RsaKey {
                    modulus_hex,
                    exponent_hex,
                    timestamp: match timestamp {
                        Value::String(s) => s,
                        other => other.to_string(),
                    },
                });
            }
            _ => warn!(attempt, "RSA key response incomplete, retrying"),
        }
    }

    Err(VigilError::KeyFetchFailed {
        attempts: MAX_KEY_FETCH_ATTEMPTS,
    })
}

// ---------------------------------------------------------------------------
// Password cipher
// ---------------------------------------------------------------------------

/// Encrypt `password` under the fetched key with RSA PKCS#1 v1.5 and
/// return the base64 ciphertext the login form expects.
pub fn encrypt_password(password: &str, key: &RsaKey) -> Result<String> {
    let modulus = BigUint::parse_bytes(key.modulus_hex.as_bytes(), 16).ok_or_else(|| {
        VigilError::MalformedResponse("RSA modulus is not valid hex".to_string())
    })?;
    let exponent = BigUint::parse_bytes(key.exponent_hex.as_bytes(), 16).ok_or_else(|| {
        VigilError::MalformedResponse("RSA exponent is not valid hex".to_string())
    })?;

    let public_key = RsaPublicKey::new(modulus, exponent)?;
    let ciphertext =
        public_key.encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, password.as_bytes())?;
    Ok(BASE64.encode(ciphertext))
}

// ---------------------------------------------------------------------------
// Login protocol
// ---------------------------------------------------------------------------

/// Drives one login attempt from credentials to an established session.
///
/// One instance per attempt; all per-attempt state (one-time code,
/// transfer data) is threaded through the calls rather than mutated in
/// place.
pub struct LoginProtocol {
    transport: Arc<dyn Transport>,
    username: String,
    password: SecretString,
    shared_secret: SecretString,
    max_two_factor_submissions: u32,
}

impl LoginProtocol {
    pub fn new(
        transport: Arc<dyn Transport>,
        username: impl Into<String>,
        password: SecretString,
        shared_secret: SecretString,
    ) -> Self {
        Self {
            transport,
            username: username.into(),
            password,
            shared_secret,
            max_two_factor_submissions: DEFAULT_TWO_FACTOR_SUBMISSIONS,
        }
    }

    /// Override how many times a rejected second factor is resubmitted.
    pub fn with_two_factor_limit(mut self, submissions: u32) -> Self {
        self.max_two_factor_submissions = submissions;
        self
    }

    /// Run the handshake to completion.
    pub async fn run(&self) -> Result<EstablishedSession> {
        info!(username = %self.username, "logging in");

        let mut response = self.submit_credentials("").await?;
        let mut resubmissions = 0;
        loop {
            if response.captcha_needed {
                return Err(VigilError::CaptchaRequired);
            }
            if response.requires_twofactor {
                if resubmissions >= self.max_two_factor_submissions {
                    return Err(VigilError::InvalidCredentials(
                        "second-factor code was not accepted".to_string(),
                    ));
                }
                resubmissions += 1;
                let code = guard::one_time_code(
                    self.shared_secret.expose_secret(),
                    guard::current_timestamp(),
                )?;
                debug!(attempt = resubmissions, "second factor required, resubmitting");
                // Strictly sequential: the prior response has been
                // observed before this resubmission goes out.
                response = self.submit_credentials(&code).await?;
                continue;
            }
            break;
        }

        if !response.success {
            return Err(VigilError::InvalidCredentials(
                response
                    .message
                    .unwrap_or_else(|| "login rejected".to_string()),
            ));
        }

        let (urls, parameters) = match (response.transfer_urls, response.transfer_parameters) {
            (Some(urls), Some(parameters)) if !urls.is_empty() => (urls, parameters),
            _ => return Err(VigilError::RedirectMissing),
        };
        self.perform_redirects(&urls, &parameters).await?;

        let session_id = SessionCookieBridge::new(self.transport.as_ref()).propagate()?;
        info!(username = %self.username, "session established");
        Ok(EstablishedSession { session_id })
    }

    /// One full credential submission: fresh key, fresh ciphertext,
    /// fresh anti-cache marker.
    async fn submit_credentials(&self, two_factor_code: &str) -> Result<LoginResponse> {
        let key = fetch_rsa_key(self.transport.as_ref(), &self.username).await?;
        let encrypted_password = encrypt_password(self.password.expose_secret(), &key)?;
        let donotcache = Utc::now().timestamp_millis().to_string();

        let form = [
            ("password", encrypted_password.as_str()),
            ("username", self.username.as_str()),
            ("twofactorcode", two_factor_code),
            ("emailauth", ""),
            ("loginfriendlyname", ""),
            ("captchagid", "-1"),
            ("captcha_text", ""),
            ("emailsteamid", ""),
            ("rsatimestamp", key.timestamp.as_str()),
            ("remember_login", "true"),
            ("donotcache", donotcache.as_str()),
        ]
        .map(|(name, value)| (name.to_string(), value.to_string()));

        let body = self
            .transport
            .post_form(&format!("{STORE_URL}/login/dologin"), &form)
            .await?;
        serde_json::from_str(&body)
            .map_err(|e| VigilError::MalformedResponse(format!("dologin response: {e}")))
    }

    /// POST the transfer parameters to every transfer URL in sequence,
    /// letting the server set its session cookies.
    async fn perform_redirects(
        &self,
        urls: &[String],
        parameters: &serde_json::Map<String, Value>,
    ) -> Result<()> {
        let form: Vec<(String, String)> = parameters
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect();

        for url in urls {
            debug!(url = %url, "finalizing transfer redirect");
            self.transport.post_form(url, &form).await?;
        }
        Ok(())
    }
}
