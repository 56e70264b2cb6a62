//! VIGIL — Steam marketplace login and mobile confirmation client
//!
//! Establishes an authenticated session through the RSA-encrypted
//! login handshake (with the TOTP-like second factor) and drives the
//! signed mobile-confirmation flow for sensitive account actions.

pub mod config;
pub mod types;
pub mod transport;
pub mod guard;
pub mod login;
pub mod session;
pub mod confirmation;
pub mod client;
pub mod blocking;

pub use client::SteamClient;
pub use config::GuardSecrets;
pub use types::{ConfirmationTarget, EstablishedSession, Result, VigilError};
