//! Webhook signature verification.
//!
//! Crypto Pay signs every webhook with
//! `HMAC-SHA256(key = SHA256(api_token), message = raw_body)` and sends the
//! lower-case hex tag in the `crypto-pay-api-signature` header. Verification
//! always runs over the raw body bytes and compares MACs in constant time.

use std::fmt;

use cryptopay_core::{Credential, WebhookDelivery};
use hmac::{Hmac, Mac};
use http::HeaderName;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Default header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "crypto-pay-api-signature";

/// Length of a hex-encoded HMAC-SHA256 tag.
const SIGNATURE_HEX_LEN: usize = 64;

/// Why a signature was rejected.
///
/// Only used for internal logging; senders only ever see a generic
/// "invalid signature" response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// No signature header was sent.
    #[error("signature header missing")]
    Missing,
    /// The header is not a 64 character hex string.
    #[error("signature is not a hex-encoded SHA-256 MAC")]
    Malformed,
    /// The signature does not match the body.
    #[error("signature mismatch")]
    Mismatch,
    /// The HMAC key could not be initialised.
    #[error("invalid signing key")]
    InvalidKey,
}

/// Computes the hex signature Crypto Pay would send for `body`.
///
/// # Errors
///
/// Returns `SignatureError::InvalidKey` if the HMAC cannot be keyed.
pub fn compute_signature(secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    let key: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
    Ok(hex::encode(mac_tag(&key, body)?))
}

/// Checks `provided` against the signature of `body`, reporting why it
/// failed.
///
/// # Errors
///
/// Returns the reason the signature was rejected.
pub fn check_signature(
    secret: &str,
    body: &[u8],
    provided: Option<&str>,
) -> Result<(), SignatureError> {
    let key: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
    check_with_key(&key, body, provided)
}

/// Whether `provided` is the valid signature of `body` under `secret`.
///
/// Never panics; missing, malformed and mismatched signatures all return
/// `false`.
pub fn verify(secret: &str, body: &[u8], provided: Option<&str>) -> bool {
    check_signature(secret, body, provided).is_ok()
}

/// First characters of a provided signature, safe to log.
pub fn signature_prefix(provided: &str) -> &str {
    let end = provided.char_indices().nth(8).map_or(provided.len(), |(index, _)| index);
    &provided[..end]
}

fn check_with_key(key: &[u8; 32], body: &[u8], provided: Option<&str>) -> Result<(), SignatureError> {
    let provided = match provided {
        Some(value) if !value.is_empty() => value,
        _ => return Err(SignatureError::Missing),
    };

    if provided.len() != SIGNATURE_HEX_LEN {
        return Err(SignatureError::Malformed);
    }
    let provided = hex::decode(provided).map_err(|_| SignatureError::Malformed)?;

    let expected = mac_tag(key, body)?;

    if bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

fn mac_tag(key: &[u8; 32], body: &[u8]) -> Result<Vec<u8>, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Verifies deliveries for one API token.
///
/// The SHA-256 of the token is derived once at construction and reused for
/// every delivery.
#[derive(Clone)]
pub struct SignatureVerifier {
    key: [u8; 32],
    header: HeaderName,
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier").field("header", &self.header).finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    /// Verifier reading the default signature header.
    pub fn new(credential: &Credential) -> Self {
        Self {
            key: credential.secret_digest(),
            header: HeaderName::from_static(SIGNATURE_HEADER),
        }
    }

    /// Reads the signature from `header` instead of the default.
    pub fn with_header(mut self, header: HeaderName) -> Self {
        self.header = header;
        self
    }

    /// Header the signature is read from.
    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// Checks the signature of a delivery against its raw body.
    ///
    /// # Errors
    ///
    /// Returns the reason the delivery's signature was rejected.
    pub fn check(&self, delivery: &WebhookDelivery) -> Result<(), SignatureError> {
        check_with_key(&self.key, &delivery.raw_body, delivery.header(self.header.as_str()))
    }

    /// Whether the delivery carries a valid signature.
    pub fn verify(&self, delivery: &WebhookDelivery) -> bool {
        self.check(delivery).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{HeaderMap, HeaderValue};

    use super::*;

    const BODY: &[u8] =
        br#"{"update_id":1,"update_type":"invoice_paid","payload":{"invoice_id":123}}"#;

    #[test]
    fn verify_accepts_own_signature() {
        let signature = compute_signature("test-token", BODY).unwrap();

        assert_eq!(signature.len(), 64);
        assert!(verify("test-token", BODY, Some(&signature)));
    }

    #[test]
    fn signature_uses_sha256_of_token_as_key() {
        let key: [u8; 32] = Sha256::digest(b"test-token").into();
        let mut mac = HmacSha256::new_from_slice(&key).unwrap();
        mac.update(BODY);
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(compute_signature("test-token", BODY).unwrap(), expected);
    }

    #[test]
    fn rejection_reasons() {
        let signature = compute_signature("test-token", BODY).unwrap();

        assert_eq!(check_signature("test-token", BODY, None), Err(SignatureError::Missing));
        assert_eq!(check_signature("test-token", BODY, Some("")), Err(SignatureError::Missing));
        assert_eq!(check_signature("test-token", BODY, Some("abc")), Err(SignatureError::Malformed));
        assert_eq!(
            check_signature("test-token", BODY, Some(&"z".repeat(64))),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            check_signature("other-token", BODY, Some(&signature)),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            check_signature("test-token", b"{}", Some(&signature)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn uppercase_hex_is_accepted() {
        let signature = compute_signature("test-token", BODY).unwrap().to_uppercase();
        assert!(verify("test-token", BODY, Some(&signature)));
    }

    #[test]
    fn verifier_reads_configured_header() {
        let credential = Credential::new("test-token");
        let signature = compute_signature("test-token", BODY).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-signature", HeaderValue::from_str(&signature).unwrap());
        let delivery = WebhookDelivery::new(Bytes::from_static(BODY), headers);

        let default_verifier = SignatureVerifier::new(&credential);
        assert_eq!(default_verifier.check(&delivery), Err(SignatureError::Missing));

        let custom = default_verifier.with_header(HeaderName::from_static("x-signature"));
        assert!(custom.verify(&delivery));
    }

    #[test]
    fn prefix_is_bounded() {
        assert_eq!(signature_prefix("0123456789abcdef"), "01234567");
        assert_eq!(signature_prefix("abc"), "abc");
    }

    #[test]
    fn debug_hides_key() {
        let verifier = SignatureVerifier::new(&Credential::new("test-token"));
        let rendered = format!("{verifier:?}");
        assert!(!rendered.contains("key"));
    }
}
