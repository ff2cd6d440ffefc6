#![no_main]

//! Fuzz target for webhook signature validation.
//!
//! Splits the input into a signature header value and a body and checks that
//! verification never panics and never accepts anything but the exact MAC.

use bytes::Bytes;
use cryptopay_core::{Credential, WebhookDelivery};
use cryptopay_webhook::{compute_signature, verify, SignatureVerifier, SIGNATURE_HEADER};
use http::{HeaderMap, HeaderValue};
use libfuzzer_sys::fuzz_target;

const TOKEN: &str = "1234:AAzQcZWQqQAbsfgPnOLr4FHC8Doa4L7KryC";

fuzz_target!(|data: &[u8]| {
    let split = data.first().map_or(0, |n| usize::from(*n)).min(data.len());
    let (provided, body) = data.split_at(split);
    let provided = String::from_utf8_lossy(provided);

    let accepted = verify(TOKEN, body, Some(&provided));
    if accepted {
        let expected = compute_signature(TOKEN, body).unwrap_or_default();
        assert!(provided.eq_ignore_ascii_case(&expected));
    }

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_bytes(provided.as_bytes()) {
        headers.insert(SIGNATURE_HEADER, value);
    }
    let delivery = WebhookDelivery::new(Bytes::copy_from_slice(body), headers);
    let verifier = SignatureVerifier::new(&Credential::new(TOKEN));
    let _ = verifier.check(&delivery);
});
