//! Guard-secrets loading from JSON.
//!
//! The mobile authenticator export is a JSON object
//! `{steamid, shared_secret, identity_secret}`. Where that JSON comes
//! from (file, string, vault) is the caller's concern; this module
//! only deserializes it into a strongly-typed, read-only value.

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::Path;

use crate::types::{Result, VigilError};

/// The secret triple enabling second-factor codes and confirmation
/// signing. Loaded once; immutable for the life of the process.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardSecrets {
    /// 64-bit account id, kept as a string for wire use.
    #[serde(rename = "steamid", deserialize_with = "string_or_number")]
    pub steam_id: String,
    /// Base64 secret feeding the one-time code generator.
    pub shared_secret: SecretString,
    /// Base64 secret feeding the confirmation tag signer.
    pub identity_secret: SecretString,
}

impl GuardSecrets {
    /// Parse guard secrets from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| VigilError::Config(format!("invalid guard secrets JSON: {e}")))
    }

    /// Load guard secrets from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            VigilError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }
}

/// Authenticator exports are inconsistent about whether `steamid` is a
/// JSON string or a bare number; accept both.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}
