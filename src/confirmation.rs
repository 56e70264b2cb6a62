//! Mobile confirmation protocol: list, resolve, approve, cancel.
//!
//! Every request is signed with a fresh HMAC over `(timestamp, tag)`;
//! the signature is only honored within a narrow window, so the
//! timestamp is captured immediately before each send and never
//! reused. Records rotate between polls (ids and keys change), so
//! nothing here is cached across calls.
//!
//! The pending-approvals view and the per-record detail payload are
//! server-rendered markup; all extraction from that markup is
//! confined to this module so a page-format change touches nothing
//! else.

use futures::stream::{self, StreamExt, TryStreamExt};
use regex::Regex;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::config::GuardSecrets;
use crate::guard;
use crate::transport::{Transport, COMMUNITY_URL};
use crate::types::{ConfirmationTarget, Result, VigilError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Upper bound on concurrent detail fetches in `resolve_all`.
/// Resolves are independent reads; approvals are never fanned out.
const MAX_RESOLVES_IN_FLIGHT: usize = 4;

/// Marker the server embeds when the authenticator's signatures are
/// being rejected (revoked secrets or heavy clock skew).
const REVOKED_MARKER: &str =
    "Steam Guard Mobile Authenticator is providing incorrect Steam Guard codes.";

/// Marker identifying the explicit empty state of the pending list.
const EMPTY_MARKER: &str = r#"id="mobileconf_empty""#;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One pending approval, as listed by the server.
///
/// Ephemeral: `conf_id`/`conf_key` rotate between polls and must never
/// be reused across them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRecord {
    /// Entry id, used to address the detail page.
    pub id: String,
    /// Opaque confirmation id, echoed back on approve/cancel.
    pub conf_id: String,
    /// Opaque confirmation key, echoed back on approve/cancel.
    pub conf_key: String,
}

/// Signed query parameters for one outgoing request.
struct SignedQuery {
    params: Vec<(String, String)>,
    timestamp: i64,
}

/// Response of the ajaxop endpoint.
#[derive(Debug, Deserialize)]
struct AjaxOpResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Response of the detail endpoint.
#[derive(Debug, Deserialize)]
struct DetailResponse {
    #[serde(default)]
    html: Option<String>,
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// Lists pending approvals, resolves them to their underlying targets,
/// and approves or cancels the matching one.
pub struct ConfirmationMatcher {
    transport: Arc<dyn Transport>,
    secrets: GuardSecrets,
}

impl ConfirmationMatcher {
    pub fn new(transport: Arc<dyn Transport>, secrets: GuardSecrets) -> Self {
        Self { transport, secrets }
    }

    /// Fetch the pending-approvals view and parse its entries.
    ///
    /// The explicit empty-state marker short-circuits to an empty
    /// list; a page with neither marker nor entries is malformed.
    pub async fn list_pending(&self) -> Result<Vec<ConfirmationRecord>> {
        let signed = self.signed_query("conf")?;
        let body = self
            .transport
            .get(
                &format!("{COMMUNITY_URL}/mobileconf/conf"),
                &signed.params,
                &[(
                    "X-Requested-With".to_string(),
                    "com.valvesoftware.android.steam.community".to_string(),
                )],
            )
            .await?;

        if body.contains(REVOKED_MARKER) {
            return Err(VigilError::ConfirmationApi {
                tag: "conf".to_string(),
                timestamp: signed.timestamp,
                message: "authenticator signatures are being rejected".to_string(),
            });
        }
        let records = parse_confirmations(&body)?;
        debug!(pending = records.len(), "fetched confirmation list");
        Ok(records)
    }

    /// Resolve a record to the account action it confirms.
    ///
    /// One round trip per call; read-only and idempotent, so distinct
    /// records may be resolved concurrently (see `resolve_all`).
    pub async fn resolve(&self, record: &ConfirmationRecord) -> Result<ConfirmationTarget> {
        let signed = self.signed_query(&format!("details{}", record.id))?;
        let body = self
            .transport
            .get(
                &format!("{COMMUNITY_URL}/mobileconf/details/{}", record.id),
                &signed.params,
                &[],
            )
            .await?;

        let detail: DetailResponse = serde_json::from_str(&body)
            .map_err(|e| VigilError::MalformedResponse(format!("detail response: {e}")))?;
        let html = detail.html.ok_or_else(|| {
            VigilError::MalformedResponse("detail response carried no html".to_string())
        })?;
        extract_target(&html)
    }

    /// Resolve many records with bounded concurrency.
    ///
    /// Fails on the first resolve error; in-flight siblings are
    /// dropped.
    pub async fn resolve_all(
        &self,
        records: &[ConfirmationRecord],
    ) -> Result<Vec<(ConfirmationRecord, ConfirmationTarget)>> {
        stream::iter(records.to_vec())
            .map(|record| async move {
                let target = self.resolve(&record).await?;
                Ok::<_, VigilError>((record, target))
            })
            .buffered(MAX_RESOLVES_IN_FLIGHT)
            .try_collect()
            .await
    }

    /// Find the pending record confirming the given trade offer.
    ///
    /// Linear scan with one detail round trip per record; the server
    /// offers no direct lookup.
    pub async fn find_by_trade_offer(&self, trade_offer_id: &str) -> Result<ConfirmationRecord> {
        let wanted = ConfirmationTarget::TradeOffer(trade_offer_id.to_string());
        self.find(wanted).await
    }

    /// Find the pending record confirming the given sell listing.
    pub async fn find_by_sell_listing(&self, asset_id: &str) -> Result<ConfirmationRecord> {
        let wanted = ConfirmationTarget::SellListing(asset_id.to_string());
        self.find(wanted).await
    }

    async fn find(&self, wanted: ConfirmationTarget) -> Result<ConfirmationRecord> {
        for record in self.list_pending().await? {
            if self.resolve(&record).await? == wanted {
                debug!(conf_id = %record.conf_id, target = %wanted, "matched confirmation");
                return Ok(record);
            }
        }
        Err(VigilError::ConfirmationNotFound(wanted))
    }

    /// Approve a pending record.
    pub async fn approve(&self, record: &ConfirmationRecord) -> Result<()> {
        self.submit_op("allow", record).await
    }

    /// Cancel (deny) a pending record.
    pub async fn cancel(&self, record: &ConfirmationRecord) -> Result<()> {
        self.submit_op("cancel", record).await
    }

    /// Approve the confirmation backing a trade offer.
    pub async fn approve_trade_offer(&self, trade_offer_id: &str) -> Result<()> {
        let record = self.find_by_trade_offer(trade_offer_id).await?;
        self.approve(&record).await?;
        info!(trade_offer_id, "trade offer confirmed");
        Ok(())
    }

    /// Approve the confirmation backing a sell listing.
    pub async fn approve_sell_listing(&self, asset_id: &str) -> Result<()> {
        let record = self.find_by_sell_listing(asset_id).await?;
        self.approve(&record).await?;
        info!(asset_id, "sell listing confirmed");
        Ok(())
    }

    async fn submit_op(&self, op: &str, record: &ConfirmationRecord) -> Result<()> {
        let mut signed = self.signed_query(op)?;
        signed.params.push(("op".to_string(), op.to_string()));
        signed
            .params
            .push(("cid".to_string(), record.conf_id.clone()));
        signed
            .params
            .push(("ck".to_string(), record.conf_key.clone()));

        let body = self
            .transport
            .get(
                &format!("{COMMUNITY_URL}/mobileconf/ajaxop"),
                &signed.params,
                &[(
                    "X-Requested-With".to_string(),
                    "XMLHttpRequest".to_string(),
                )],
            )
            .await?;

        let response: AjaxOpResponse = serde_json::from_str(&body)
            .map_err(|e| VigilError::MalformedResponse(format!("ajaxop response: {e}")))?;
        // The wire contract is ambiguous between the boolean flag and
        // an error field holding an "OK" sentinel; accept either.
        if response.success || response.error.as_deref() == Some("OK") {
            return Ok(());
        }
        Err(VigilError::ConfirmationApi {
            tag: op.to_string(),
            timestamp: signed.timestamp,
            message: response
                .error
                .unwrap_or_else(|| "request was not accepted".to_string()),
        })
    }

    /// Build the signed query for one request. The timestamp is
    /// captured here, immediately before the send; never reuse a
    /// `SignedQuery` for a second request.
    fn signed_query(&self, tag: &str) -> Result<SignedQuery> {
        let timestamp = guard::current_timestamp();
        let key = guard::confirmation_key(
            self.secrets.identity_secret.expose_secret(),
            tag,
            timestamp,
        )?;
        let params = vec![
            ("p".to_string(), guard::device_id(&self.secrets.steam_id)),
            ("a".to_string(), self.secrets.steam_id.clone()),
            ("k".to_string(), key),
            ("t".to_string(), timestamp.to_string()),
            ("m".to_string(), "android".to_string()),
            ("tag".to_string(), tag.to_string()),
        ];
        Ok(SignedQuery { params, timestamp })
    }
}

// ---------------------------------------------------------------------------
// Markup extraction
// ---------------------------------------------------------------------------

fn entry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<div[^>]*class="mobileconf_list_entry"[^>]*>"#).expect("valid regex")
    })
}

fn attr_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid regex"))
}

fn entry_attr(tag: &str, regex: &Regex, what: &str) -> Result<String> {
    regex
        .captures(tag)
        .map(|captures| captures[1].to_string())
        .ok_or_else(|| {
            VigilError::MalformedResponse(format!("confirmation entry missing {what}"))
        })
}

/// Parse `{id, conf_id, conf_key}` out of every list entry.
fn parse_confirmations(body: &str) -> Result<Vec<ConfirmationRecord>> {
    static ID: OnceLock<Regex> = OnceLock::new();
    static CONF_ID: OnceLock<Regex> = OnceLock::new();
    static CONF_KEY: OnceLock<Regex> = OnceLock::new();

    if body.contains(EMPTY_MARKER) {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in entry_regex().find_iter(body) {
        let tag = entry.as_str();
        records.push(ConfirmationRecord {
            id: entry_attr(tag, attr_regex(&ID, r#"id="conf([^"]+)""#), "entry id")?,
            conf_id: entry_attr(
                tag,
                attr_regex(&CONF_ID, r#"data-confid="([^"]+)""#),
                "data-confid",
            )?,
            conf_key: entry_attr(
                tag,
                attr_regex(&CONF_KEY, r#"data-key="([^"]+)""#),
                "data-key",
            )?,
        });
    }

    if records.is_empty() {
        return Err(VigilError::MalformedResponse(
            "confirmation list carries neither entries nor the empty marker".to_string(),
        ));
    }
    Ok(records)
}

/// Extract the confirmed action from a detail page: either a trade
/// offer anchor or the embedded listing-item object.
fn extract_target(html: &str) -> Result<ConfirmationTarget> {
    static TRADE_OFFER: OnceLock<Regex> = OnceLock::new();

    if let Some(captures) = attr_regex(&TRADE_OFFER, r#"id="tradeoffer_(\d+)""#).captures(html) {
        return Ok(ConfirmationTarget::TradeOffer(captures[1].to_string()));
    }

    if let Some(fragment) = text_between(html, "'confiteminfo', ", ", UserYou") {
        let item: Value = serde_json::from_str(fragment.trim()).map_err(|e| {
            VigilError::MalformedResponse(format!("embedded listing item: {e}"))
        })?;
        let asset_id = match item.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(VigilError::MalformedResponse(
                    "embedded listing item carries no id".to_string(),
                ))
            }
        };
        return Ok(ConfirmationTarget::SellListing(asset_id));
    }

    Err(VigilError::MalformedResponse(
        "detail page names neither a trade offer nor a listing item".to_string(),
    ))
}

/// Slice of `text` between the first `begin` and the next `end`.
fn text_between<'a>(text: &'a str, begin: &str, end: &str) -> Option<&'a str> {
    let start = text.find(begin)? + begin.len();
    let stop = text[start..].find(end)? + start;
    Some(&text[start..stop])
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use crate::transport::MockTransport;
    use secrecy::SecretString;

    const LIST_PAGE: &str = r#"
        <div id="mobileconf_list">
          <div class="mobileconf_list_entry" id="conf9001" data-confid="9001" data-key="111222333">
            <div class="mobileconf_list_entry_content">Trade with partner</div>
          </div>
          <div class="mobileconf_list_entry" id="conf9002" data-confid="9002" data-key="444555666">
            <div class="mobileconf_list_entry_content">Market listing</div>
          </div>
        </div>"#;

    const EMPTY_PAGE: &str =
        r#"<div id="mobileconf_empty" class="mobileconf_empty"><div>Nothing to confirm</div></div>"#;

    fn test_secrets() -> GuardSecrets {
        GuardSecrets {
            steam_id: "12341234123412345".to_string(),
            shared_secret: SecretString::new(BASE64.encode(b"1234567890abcdefghij")),
            identity_secret: SecretString::new(BASE64.encode(b"abcdefghijklmnoprstu")),
        }
    }

    #[test]
    fn test_parse_confirmation_list() {
        let records = parse_confirmations(LIST_PAGE).unwrap();
        assert_eq!(
            records,
            vec![
                ConfirmationRecord {
                    id: "9001".into(),
                    conf_id: "9001".into(),
                    conf_key: "111222333".into(),
                },
                ConfirmationRecord {
                    id: "9002".into(),
                    conf_id: "9002".into(),
                    conf_key: "444555666".into(),
                },
            ]
        );
    }

    #[test]
    fn test_empty_marker_short_circuits() {
        assert_eq!(parse_confirmations(EMPTY_PAGE).unwrap(), Vec::new());
    }

    #[test]
    fn test_markerless_page_is_malformed() {
        let result = parse_confirmations("<html><body>maintenance</body></html>");
        assert!(matches!(result, Err(VigilError::MalformedResponse(_))));
    }

    #[test]
    fn test_extract_trade_offer_target() {
        let html = r#"<div class="tradeoffer" id="tradeoffer_4001234567">items</div>"#;
        assert_eq!(
            extract_target(html).unwrap(),
            ConfirmationTarget::TradeOffer("4001234567".into())
        );
    }

    #[test]
    fn test_extract_sell_listing_target() {
        let html = concat!(
            r#"<script>BuildHover( 'confiteminfo', "#,
            r#"{"id":"8812345","appid":730,"market_name":"Case"}, UserYou );</script>"#,
        );
        assert_eq!(
            extract_target(html).unwrap(),
            ConfirmationTarget::SellListing("8812345".into())
        );
    }

    #[test]
    fn test_extract_sell_listing_numeric_id() {
        let html = r#"BuildHover( 'confiteminfo', {"id":8812345}, UserYou );"#;
        assert_eq!(
            extract_target(html).unwrap(),
            ConfirmationTarget::SellListing("8812345".into())
        );
    }

    #[test]
    fn test_extract_target_rejects_unknown_page() {
        let result = extract_target("<div>nothing of note</div>");
        assert!(matches!(result, Err(VigilError::MalformedResponse(_))));
    }

    #[test]
    fn test_text_between() {
        assert_eq!(text_between("a [x] b", "[", "]"), Some("x"));
        assert_eq!(text_between("a [x] b", "<", ">"), None);
    }

    #[test]
    fn test_signed_query_shape() {
        let matcher = ConfirmationMatcher::new(Arc::new(MockTransport::new()), test_secrets());
        let signed = matcher.signed_query("conf").unwrap();

        let lookup = |name: &str| {
            signed
                .params
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
        };
        assert_eq!(
            lookup("p").unwrap(),
            "android:677cf5aa-3300-7807-d1e2-c408142742e2"
        );
        assert_eq!(lookup("a").unwrap(), "12341234123412345");
        assert_eq!(lookup("m").unwrap(), "android");
        assert_eq!(lookup("tag").unwrap(), "conf");
        assert_eq!(lookup("t").unwrap(), signed.timestamp.to_string());
        assert_eq!(
            lookup("k").unwrap(),
            guard::confirmation_key(
                test_secrets().identity_secret.expose_secret(),
                "conf",
                signed.timestamp,
            )
            .unwrap()
        );
    }
}
