//! Property tests for core domain types.

use cryptopay_core::{Credential, Page, ReplayKey, Update};
use proptest::prelude::*;

proptest! {
    /// A window is terminal exactly when it is shorter than the page size.
    #[test]
    fn page_window_terminal_iff_short(len in 0usize..50, page_size in 1u32..50, offset in 0u64..10_000) {
        let page = Page::from_window(vec![0u8; len], offset, page_size);

        let full = len > 0 && len >= page_size as usize;
        prop_assert_eq!(page.is_last(), !full);
        if full {
            prop_assert_eq!(page.next_offset, Some(offset + u64::from(page_size)));
        }
    }

    /// Credential debug output never contains the secret part of a token.
    #[test]
    fn credential_debug_never_leaks_secret(app_id in 1u32..1_000_000, secret in "[A-Za-z0-9]{16,40}") {
        let credential = Credential::new(format!("{app_id}:{secret}"));

        let rendered = format!("{credential:?}");

        prop_assert!(!rendered.contains(&secret));
    }

    /// Non-blank keys survive construction without surrounding whitespace.
    #[test]
    fn replay_key_trims(key in "[a-z0-9:_]{1,32}", pad in " {0,3}") {
        let replay_key = ReplayKey::new(format!("{pad}{key}{pad}")).unwrap();
        prop_assert_eq!(replay_key.as_str(), key.as_str());
    }
}

/// Updates without identifiers still decode as long as the body is an object.
#[test]
fn update_without_identifiers_decodes() {
    let update = Update::from_slice(br#"{"payload":{"amount":"1"}}"#).unwrap();

    assert_eq!(update.update_id, None);
    assert_eq!(update.kind(), "unknown");
    assert_eq!(update.invoice_id(), None);
}

/// An `invoice_paid` payload decodes into a typed invoice.
#[test]
fn update_payload_decodes_as_invoice() {
    let update = Update::from_slice(
        br#"{"update_id":9,"update_type":"invoice_paid","request_date":"2024-01-01T00:00:00Z",
            "payload":{"invoice_id":42,"status":"paid","asset":"USDT","amount":"10"}}"#,
    )
    .unwrap();

    let invoice = update.invoice().unwrap();

    assert_eq!(invoice.invoice_id, 42);
    assert_eq!(invoice.asset.as_deref(), Some("USDT"));
}
