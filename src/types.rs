//! Shared protocol types and the crate-wide error enum.

use std::fmt;

// ---------------------------------------------------------------------------
// Session types
// ---------------------------------------------------------------------------

/// A fully established marketplace session.
///
/// Returned once every transfer redirect has been finalized and the
/// session cookie has been propagated to both cookie domains.
#[derive(Debug, Clone)]
pub struct EstablishedSession {
    /// The `sessionid` value shared by the community and store domains.
    pub session_id: String,
}

// ---------------------------------------------------------------------------
// Confirmation types
// ---------------------------------------------------------------------------

/// The underlying account action a pending confirmation refers to.
///
/// Resolved from a confirmation's detail page; a pending entry is
/// always one or the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationTarget {
    /// A trade offer awaiting mobile approval.
    TradeOffer(String),
    /// A market sell listing awaiting mobile approval.
    SellListing(String),
}

impl fmt::Display for ConfirmationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationTarget::TradeOffer(id) => write!(f, "trade offer {id}"),
            ConfirmationTarget::SellListing(id) => write!(f, "sell listing {id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for VIGIL.
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    /// The RSA key endpoint never returned a usable key.
    #[error("could not obtain RSA login key after {attempts} attempts")]
    KeyFetchFailed { attempts: u32 },

    /// The server demands a captcha; requires human intervention.
    #[error("captcha required to continue login")]
    CaptchaRequired,

    /// Credentials rejected, or the second factor was not accepted.
    #[error("credentials rejected: {0}")]
    InvalidCredentials(String),

    /// Login succeeded but the transfer redirect data was absent.
    #[error("login response carried no transfer redirect data")]
    RedirectMissing,

    /// No `sessionid` cookie was issued during redirect finalization.
    #[error("no session cookie present after redirect finalization")]
    SessionCookieMissing,

    /// Nothing in the pending list matched the requested target.
    #[error("no pending confirmation matches {0}")]
    ConfirmationNotFound(ConfirmationTarget),

    /// The server rejected a signed confirmation request. Often a
    /// symptom of local clock skew; the signature is only valid within
    /// a narrow window of `timestamp`.
    #[error("confirmation request rejected (tag {tag}, t={timestamp}): {message}")]
    ConfirmationApi {
        tag: String,
        timestamp: i64,
        message: String,
    },

    /// A server response was missing required fields or unparseable.
    #[error("malformed server response: {0}")]
    MalformedResponse(String),

    /// Guard secrets input could not be read.
    #[error("configuration error: {0}")]
    Config(String),

    /// A guard secret was not valid base64.
    #[error("invalid guard secret: {0}")]
    InvalidSecret(#[from] base64::DecodeError),

    /// RSA key construction or encryption failed.
    #[error("rsa encryption failed: {0}")]
    Rsa(#[from] rsa::Error),

    /// Transport-level failure, surfaced unmodified.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VigilError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_display() {
        assert_eq!(
            ConfirmationTarget::TradeOffer("123".into()).to_string(),
            "trade offer 123"
        );
        assert_eq!(
            ConfirmationTarget::SellListing("456".into()).to_string(),
            "sell listing 456"
        );
    }

    #[test]
    fn test_confirmation_api_error_carries_context() {
        let err = VigilError::ConfirmationApi {
            tag: "allow".into(),
            timestamp: 1470838334,
            message: "not accepted".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("allow"));
        assert!(rendered.contains("1470838334"));
        assert!(rendered.contains("not accepted"));
    }

    #[test]
    fn test_transport_error_is_transparent() {
        let err: VigilError = anyhow::anyhow!("connection reset").into();
        assert_eq!(err.to_string(), "connection reset");
    }
}
