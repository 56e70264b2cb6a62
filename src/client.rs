//! Client facade tying the login and confirmation protocols together.

use secrecy::SecretString;
use std::sync::Arc;

use crate::config::GuardSecrets;
use crate::confirmation::ConfirmationMatcher;
use crate::login::LoginProtocol;
use crate::transport::{ReqwestTransport, Transport};
use crate::types::{EstablishedSession, Result};

/// Owns the transport (and with it the cookie jar), the credentials,
/// and the guard secrets for one account.
///
/// `login` establishes the session; `confirmations` hands out the
/// matcher for secondary approvals. The cookie jar lives inside the
/// transport and is dropped with the client.
pub struct SteamClient {
    transport: Arc<dyn Transport>,
    username: String,
    password: SecretString,
    secrets: GuardSecrets,
    session: Option<EstablishedSession>,
}

impl SteamClient {
    /// Create a client with the production HTTP transport.
    pub fn new(
        username: impl Into<String>,
        password: SecretString,
        secrets: GuardSecrets,
    ) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new()?);
        Ok(Self::with_transport(transport, username, password, secrets))
    }

    /// Create a client over an explicit transport (for testing).
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        username: impl Into<String>,
        password: SecretString,
        secrets: GuardSecrets,
    ) -> Self {
        Self {
            transport,
            username: username.into(),
            password,
            secrets,
            session: None,
        }
    }

    /// Run the login handshake and remember the established session.
    pub async fn login(&mut self) -> Result<EstablishedSession> {
        let session = LoginProtocol::new(
            self.transport.clone(),
            self.username.clone(),
            self.password.clone(),
            self.secrets.shared_secret.clone(),
        )
        .run()
        .await?;
        self.session = Some(session.clone());
        Ok(session)
    }

    /// The session id, once established.
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.session_id.as_str())
    }

    /// Matcher for pending mobile confirmations.
    pub fn confirmations(&self) -> ConfirmationMatcher {
        ConfirmationMatcher::new(self.transport.clone(), self.secrets.clone())
    }

    /// The transport, for callers issuing their own authenticated
    /// requests against the established session.
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }
}
