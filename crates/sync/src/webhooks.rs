//! Webhook payload parsing and signature verification.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::models::{TrackerEvent, TrackerEventKind};

type HmacSha256 = Hmac<Sha256>;

/// Verify a tracker webhook signature using HMAC-SHA256.
///
/// # Arguments
/// * `body` - Raw webhook body bytes
/// * `signature` - Hex-encoded signature from the signature header
/// * `secret` - Webhook signing secret
#[must_use]
pub fn verify_webhook_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    // Constant-time comparison to prevent timing attacks
    computed.as_slice().ct_eq(&signature_bytes).into()
}

/// Validate an event timestamp against a freshness window.
#[must_use]
pub fn validate_webhook_timestamp(timestamp: DateTime<Utc>, max_age_ms: i64) -> bool {
    (Utc::now() - timestamp).num_milliseconds().abs() <= max_age_ms
}

/// Whether an inbound issue key belongs to the project link's key space.
///
/// Keys are `PREFIX-<number>`; anything else, or a foreign prefix, is
/// ignored rather than rejected (the tracker may serve unrelated uses).
#[must_use]
pub fn key_matches_prefix(issue_key: &str, prefix: &str) -> bool {
    match issue_key.split_once('-') {
        Some((head, tail)) => head == prefix && !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Event type carried by the webhook payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    /// Issue status changed
    StatusChanged,
    /// Resolution applied
    ResolutionSet,
    /// Comment added
    CommentAdded,
    /// Unknown type (catch-all to avoid parse failures)
    #[serde(other)]
    Unknown,
}

/// Inbound webhook payload: `{issue_key, event_type, new_value, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Issue the event belongs to
    pub issue_key: String,
    /// Kind of change
    pub event_type: WebhookEventType,
    /// New status/resolution name or comment body
    #[serde(default)]
    pub new_value: Option<String>,
    /// Tracker-side event time
    pub timestamp: DateTime<Utc>,
}

impl WebhookPayload {
    /// Convert into a tracker event, dropping unknown event types.
    #[must_use]
    pub fn into_event(self) -> Option<TrackerEvent> {
        let kind = match self.event_type {
            WebhookEventType::StatusChanged => TrackerEventKind::StatusChanged,
            WebhookEventType::ResolutionSet => TrackerEventKind::ResolutionSet,
            WebhookEventType::CommentAdded => TrackerEventKind::CommentAdded,
            WebhookEventType::Unknown => return None,
        };
        Some(TrackerEvent {
            issue_key: self.issue_key,
            kind,
            new_value: self.new_value.unwrap_or_default(),
            timestamp: self.timestamp,
        })
    }
}
