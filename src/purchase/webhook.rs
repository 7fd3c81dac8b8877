//! Signed provider events.
//!
//! The provider signs `"{timestamp}.{raw body}"` with HMAC-SHA256 and sends
//! `t=<timestamp>,v1=<hex digest>` in the signature header. Verification runs
//! on the raw bytes, before any JSON parsing.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::{Error, Result};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

type HmacSha256 = Hmac<Sha256>;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const ASYNC_PAYMENT_SUCCEEDED: &str = "checkout.session.async_payment_succeeded";
pub const CHECKOUT_EXPIRED: &str = "checkout.session.expired";
pub const ASYNC_PAYMENT_FAILED: &str = "checkout.session.async_payment_failed";

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: SessionObject,
}

/// The fields of a checkout session this service cares about, other objects parse with `id` only.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SessionObject {
    pub id: Option<String>,
    pub payment_status: Option<String>,
}

impl SessionObject {
    /// `checkout.session.completed` also fires for delayed methods that are not paid yet.
    pub fn is_paid(&self) -> bool {
        matches!(
            self.payment_status.as_deref(),
            None | Some("paid") | Some("no_payment_required")
        )
    }
}

fn mac(secret: &str, timestamp: i64, payload: &[u8]) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

/// Header value a provider would send for `payload` at `timestamp`.
pub fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let digest = mac(secret, timestamp, payload).finalize().into_bytes();
    format!("t={},v1={}", timestamp, hex::encode(digest))
}

/// Check `header` against `payload`. Any `v1` entry may match; the timestamp must lie
/// within `tolerance_secs` of `now`.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<()> {
    if secret.is_empty() {
        return Err(Error::Fatal(anyhow::anyhow!(
            "webhook secret is not configured"
        )));
    }
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }
    let Some(timestamp) = timestamp else {
        return Err(Error::InvalidSignature);
    };
    if now.abs_diff(timestamp) > u64::try_from(tolerance_secs).unwrap_or(0) {
        return Err(Error::InvalidSignature);
    }
    let expected = mac(secret, timestamp, payload);
    if signatures
        .iter()
        .any(|signature| expected.clone().verify_slice(signature).is_ok())
    {
        Ok(())
    } else {
        Err(Error::InvalidSignature)
    }
}

pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent> {
    serde_json::from_slice(payload)
        .map_err(|e| Error::BadRequest(format!("Malformed webhook event: {e}")))
}
