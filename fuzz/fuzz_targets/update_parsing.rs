#![no_main]

//! Fuzz target for decoding webhook bodies into updates and replay keys.

use bytes::Bytes;
use cryptopay_core::{Update, WebhookDelivery};
use cryptopay_webhook::{DefaultReplayKeyResolver, ReplayKeyResolver};
use http::HeaderMap;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(update) = Update::from_slice(data) else {
        return;
    };

    let _ = update.kind();
    let _ = update.invoice();

    let delivery = WebhookDelivery::new(Bytes::copy_from_slice(data), HeaderMap::new());
    let key = DefaultReplayKeyResolver.resolve(&delivery, &update);
    assert!(key.is_some_and(|key| !key.trim().is_empty()));
});
