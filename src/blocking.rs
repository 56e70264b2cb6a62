//! Blocking adapter over the async client.
//!
//! The protocols have exactly one (async) implementation; this module
//! only parks a current-thread runtime in front of it for callers
//! without an async context. No protocol logic lives here.

use anyhow::Context;
use secrecy::SecretString;
use std::sync::Arc;

use crate::config::GuardSecrets;
use crate::confirmation::ConfirmationRecord;
use crate::transport::Transport;
use crate::types::{ConfirmationTarget, EstablishedSession, Result};

/// Synchronous counterpart of [`crate::SteamClient`].
pub struct SteamClient {
    runtime: tokio::runtime::Runtime,
    inner: crate::client::SteamClient,
}

impl SteamClient {
    pub fn new(
        username: impl Into<String>,
        password: SecretString,
        secrets: GuardSecrets,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start blocking runtime")?;
        let inner = crate::client::SteamClient::new(username, password, secrets)?;
        Ok(Self { runtime, inner })
    }

    /// Adapter over an explicit transport (for testing).
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        username: impl Into<String>,
        password: SecretString,
        secrets: GuardSecrets,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start blocking runtime")?;
        let inner =
            crate::client::SteamClient::with_transport(transport, username, password, secrets);
        Ok(Self { runtime, inner })
    }

    pub fn login(&mut self) -> Result<EstablishedSession> {
        let Self { runtime, inner } = self;
        runtime.block_on(inner.login())
    }

    pub fn session_id(&self) -> Option<&str> {
        self.inner.session_id()
    }

    pub fn list_pending(&self) -> Result<Vec<ConfirmationRecord>> {
        self.runtime.block_on(self.inner.confirmations().list_pending())
    }

    pub fn resolve(&self, record: &ConfirmationRecord) -> Result<ConfirmationTarget> {
        self.runtime.block_on(self.inner.confirmations().resolve(record))
    }

    pub fn approve(&self, record: &ConfirmationRecord) -> Result<()> {
        self.runtime.block_on(self.inner.confirmations().approve(record))
    }

    pub fn cancel(&self, record: &ConfirmationRecord) -> Result<()> {
        self.runtime.block_on(self.inner.confirmations().cancel(record))
    }

    pub fn approve_trade_offer(&self, trade_offer_id: &str) -> Result<()> {
        self.runtime
            .block_on(self.inner.confirmations().approve_trade_offer(trade_offer_id))
    }

    pub fn approve_sell_listing(&self, asset_id: &str) -> Result<()> {
        self.runtime
            .block_on(self.inner.confirmations().approve_sell_listing(asset_id))
    }
}
