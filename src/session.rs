//! Cross-domain session cookie propagation.
//!
//! The login handshake runs against the store domain while
//! confirmations and trading run against the community domain. After
//! redirect finalization the server has issued a `sessionid` on one of
//! them; the bridge copies it so both domains carry the identical
//! value, which is what downstream form submissions require.

use tracing::debug;

use crate::transport::{Transport, COMMUNITY_URL, SESSION_COOKIE, STORE_URL};
use crate::types::{Result, VigilError};

/// Propagates one `sessionid` across both cookie domains.
///
/// Mutates the jar sequentially; the jar has a single owner (the
/// transport) and the bridge runs once per login.
pub struct SessionCookieBridge<'a> {
    transport: &'a dyn Transport,
}

impl<'a> SessionCookieBridge<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self { transport }
    }

    /// Read the issued session id and write it to both domains.
    ///
    /// Fails with `SessionCookieMissing` if finalization never set the
    /// cookie on either domain.
    pub fn propagate(&self) -> Result<String> {
        let session_id = self
            .transport
            .cookie(STORE_URL, SESSION_COOKIE)
            .or_else(|| self.transport.cookie(COMMUNITY_URL, SESSION_COOKIE))
            .ok_or(VigilError::SessionCookieMissing)?;

        self.transport
            .set_cookie(COMMUNITY_URL, SESSION_COOKIE, &session_id);
        self.transport
            .set_cookie(STORE_URL, SESSION_COOKIE, &session_id);
        debug!("session cookie propagated to both domains");
        Ok(session_id)
    }
}
