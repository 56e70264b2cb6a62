//! Second-factor code generation and confirmation request signing.
//!
//! Pure functions of `(secret, timestamp)`; no I/O. The one-time code
//! feeds the login second factor, the confirmation key authorizes
//! every mobile-confirmation request, and the device id is a
//! deterministic, UUID-shaped identifier derived from the account id
//! (not a real device identifier).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

use crate::types::Result;

type HmacSha1 = Hmac<Sha1>;

/// Alphabet of the 5-character one-time code. Chosen server-side to
/// avoid ambiguous glyphs; order is part of the wire contract.
const CODE_ALPHABET: &[u8] = b"23456789BCDFGHJKMNPQRTVWXY";

/// One-time codes are valid for a 30-second window.
const CODE_WINDOW_SECS: i64 = 30;

/// Current Unix time in seconds.
///
/// Captured immediately before every signed request; a signature is
/// only honored within a narrow tolerance of its timestamp.
pub fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Derive the 5-character second-factor code for a 30-second window.
///
/// `HMAC-SHA1(base64-decode(secret), be_u64(timestamp / 30))`, then
/// 5 base-26 digits read from a 31-bit slice of the digest,
/// least-significant digit first.
pub fn one_time_code(shared_secret: &str, timestamp: i64) -> Result<String> {
    let key = BASE64.decode(shared_secret)?;
    let mut mac = HmacSha1::new_from_slice(&key).expect("HMAC can take key of any size");
    mac.update(&((timestamp / CODE_WINDOW_SECS) as u64).to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[19] & 0xf) as usize;
    let mut value = u32::from_be_bytes([
        digest[offset],
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]) & 0x7fff_ffff;

    let mut code = String::with_capacity(5);
    for _ in 0..5 {
        code.push(CODE_ALPHABET[value as usize % CODE_ALPHABET.len()] as char);
        value /= CODE_ALPHABET.len() as u32;
    }
    Ok(code)
}

/// Derive the base64 signature authorizing one confirmation request.
///
/// `HMAC-SHA1(base64-decode(secret), be_u64(timestamp) ++ ascii(tag))`.
pub fn confirmation_key(identity_secret: &str, tag: &str, timestamp: i64) -> Result<String> {
    let key = BASE64.decode(identity_secret)?;
    let mut mac = HmacSha1::new_from_slice(&key).expect("HMAC can take key of any size");
    mac.update(&(timestamp as u64).to_be_bytes());
    mac.update(tag.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Synthesize the `android:`-prefixed device id for an account.
///
/// SHA1 of the ascii account id, hex, dash-grouped 8-4-4-4-12.
/// Deterministic per account; differs from what the real mobile app
/// reports, which the server does not check.
pub fn device_id(steam_id: &str) -> String {
    let digest = hex::encode(Sha1::digest(steam_id.as_bytes()));
    format!(
        "android:{}-{}-{}-{}-{}",
        &digest[..8],
        &digest[8..12],
        &digest[12..16],
        &digest[16..20],
        &digest[20..32],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VigilError;

    fn shared_secret() -> String {
        BASE64.encode(b"1234567890abcdefghij")
    }

    fn identity_secret() -> String {
        BASE64.encode(b"abcdefghijklmnoprstu")
    }

    #[test]
    fn test_one_time_code_vector() {
        let code = one_time_code(&shared_secret(), 1469184207).unwrap();
        assert_eq!(code, "P2QJN");
    }

    #[test]
    fn test_one_time_code_stable_within_window() {
        // All timestamps in the same 30-second window yield one code.
        let base = (1469184207 / 30) * 30;
        let expected = one_time_code(&shared_secret(), base).unwrap();
        for t in [base + 1, base + 15, base + 29] {
            assert_eq!(one_time_code(&shared_secret(), t).unwrap(), expected);
        }
    }

    #[test]
    fn test_one_time_code_alphabet() {
        let code = one_time_code(&shared_secret(), 1469184207).unwrap();
        assert_eq!(code.len(), 5);
        assert!(code.bytes().all(|c| CODE_ALPHABET.contains(&c)));
    }

    #[test]
    fn test_one_time_code_rejects_bad_base64() {
        let result = one_time_code("not-base64!!!", 1469184207);
        assert!(matches!(result, Err(VigilError::InvalidSecret(_))));
    }

    #[test]
    fn test_confirmation_key_vector() {
        let key = confirmation_key(&identity_secret(), "conf", 1470838334).unwrap();
        assert_eq!(key, "pWqjnkcwqni+t/n+5xXaEa0SGeA=");
    }

    #[test]
    fn test_confirmation_key_depends_on_tag_and_time() {
        let conf = confirmation_key(&identity_secret(), "conf", 1470838334).unwrap();
        let allow = confirmation_key(&identity_secret(), "allow", 1470838334).unwrap();
        let later = confirmation_key(&identity_secret(), "conf", 1470838335).unwrap();
        assert_ne!(conf, allow);
        assert_ne!(conf, later);
    }

    #[test]
    fn test_device_id_vector() {
        assert_eq!(
            device_id("12341234123412345"),
            "android:677cf5aa-3300-7807-d1e2-c408142742e2"
        );
    }

    #[test]
    fn test_device_id_is_deterministic() {
        assert_eq!(device_id("42"), device_id("42"));
        assert_ne!(device_id("42"), device_id("43"));
    }
}
