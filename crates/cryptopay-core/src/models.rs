//! SDK domain primitives.
//!
//! Defines the API credential, the raw inbound webhook delivery, the decoded
//! update it carries, replay keys, and the page type produced by list
//! endpoints.

use std::{fmt, sync::Arc};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

/// Crypto Pay API token.
///
/// The token authenticates outbound calls and keys webhook signatures. It is
/// immutable once constructed and never printed: `Debug` and `Display`
/// output is redacted.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential(Arc<str>);

impl Credential {
    /// Wraps a raw API token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::from(token.into()))
    }

    /// Returns the raw token for signing or header construction.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the token is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a log-safe rendering that keeps only the app id prefix.
    ///
    /// Crypto Pay tokens look like `<app_id>:<secret>`; everything after the
    /// colon is masked.
    pub fn masked(&self) -> String {
        match self.0.split_once(':') {
            Some((app_id, _)) => format!("{app_id}:***"),
            None if self.0.is_empty() => String::new(),
            None => "***".to_string(),
        }
    }

    /// SHA-256 of the token, the HMAC key for webhook signatures.
    pub fn secret_digest(&self) -> [u8; 32] {
        Sha256::digest(self.0.as_bytes()).into()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.masked())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

impl<'de> Deserialize<'de> for Credential {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// One inbound webhook request exactly as received.
///
/// `raw_body` is the canonical signing input. It must never be replaced by a
/// re-serialization of the decoded JSON.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    /// Request body bytes as read from the wire.
    pub raw_body: Bytes,
    /// Request headers; lookups are case-insensitive.
    pub headers: HeaderMap,
    /// When the delivery was received.
    pub received_at: DateTime<Utc>,
}

impl WebhookDelivery {
    /// Creates a delivery received now.
    pub fn new(raw_body: impl Into<Bytes>, headers: HeaderMap) -> Self {
        Self::received_at(raw_body, headers, Utc::now())
    }

    /// Creates a delivery with an explicit receive time.
    pub fn received_at(
        raw_body: impl Into<Bytes>,
        headers: HeaderMap,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self { raw_body: raw_body.into(), headers, received_at }
    }

    /// Returns a header value if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Lower-case hex SHA-256 of the raw body.
    pub fn body_sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.raw_body))
    }
}

/// Decoded webhook update.
///
/// Crypto Pay sends `{"update_id", "update_type", "request_date",
/// "payload"}`. Every field is optional so unknown update kinds still decode;
/// the body must however be a JSON object. Top-level fields outside the
/// envelope are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Monotonic identifier of the update.
    ///
    /// Integer strings are accepted; any other non-integer id decodes as
    /// `None`.
    #[serde(default, deserialize_with = "lenient_update_id")]
    pub update_id: Option<i64>,
    /// Update kind, e.g. `invoice_paid`.
    #[serde(default)]
    pub update_type: Option<String>,
    /// When the update was sent.
    #[serde(default)]
    pub request_date: Option<String>,
    /// Update payload, an invoice for `invoice_paid`.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Any other top-level fields, passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn lenient_update_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let id = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(number) => number.as_i64(),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    Ok(id)
}

impl Update {
    /// Decodes an update from raw body bytes.
    ///
    /// Rejects bodies that are not a JSON object.
    pub fn from_slice(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_slice(raw)?;
        if !value.is_object() {
            return Err(serde::de::Error::custom("webhook body must be a JSON object"));
        }
        serde_json::from_value(value)
    }

    /// Update kind, `unknown` when absent.
    pub fn kind(&self) -> &str {
        self.update_type.as_deref().unwrap_or("unknown")
    }

    /// Invoice id carried in the payload, if any.
    pub fn invoice_id(&self) -> Option<i64> {
        self.payload.get("invoice_id").and_then(serde_json::Value::as_i64)
    }

    /// Decodes the payload as an invoice.
    pub fn invoice(&self) -> Option<crate::resources::Invoice> {
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// Deduplication key identifying one logical webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplayKey(String);

impl ReplayKey {
    /// Creates a key, returning `None` for blank input.
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        let trimmed = key.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == key.len() {
            Some(Self(key))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page returned by an offset-paginated endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items in source order.
    pub items: Vec<T>,
    /// Offset of the following page; `None` once the source is exhausted.
    pub next_offset: Option<u64>,
}

impl<T> Page<T> {
    /// Builds a page from a window fetched at `offset` with `page_size`.
    ///
    /// A full window points at the next offset; a short or empty one marks
    /// the end.
    pub fn from_window(items: Vec<T>, offset: u64, page_size: u32) -> Self {
        let next_offset = if !items.is_empty() && items.len() >= page_size as usize {
            Some(offset + u64::from(page_size))
        } else {
            None
        };
        Self { items, next_offset }
    }

    /// Whether no page follows this one.
    pub fn is_last(&self) -> bool {
        self.next_offset.is_none()
    }

    /// Number of items on the page.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the page holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
