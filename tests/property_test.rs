//! Property-based tests for the webhook delivery pipeline.
//!
//! Drives the listener router with generated delivery sequences, including
//! redeliveries in arbitrary order, and checks that every logical update
//! reaches the handler exactly once.

#![allow(clippy::unwrap_used)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use axum::body::Body;
use cryptopay_core::Credential;
use cryptopay_webhook::{
    compute_signature, create_router, handler_fn, AppState, ListenerConfig, WebhookDispatcher,
};
use futures::future::join_all;
use http::{Request, StatusCode};
use proptest::{prelude::*, test_runner::TestRunner};
use serde_json::json;
use tower::ServiceExt;

const TOKEN: &str = "1234:AAzQcZWQqQAbsfgPnOLr4FHC8Doa4L7KryC";

/// Creates property test configuration based on environment.
///
/// `PROPTEST_CASES` overrides the case count; `CI=true` raises the default.
fn proptest_config() -> ProptestConfig {
    let is_ci = std::env::var("CI").unwrap_or_default() == "true";
    let default_cases = if is_ci { 100 } else { 20 };

    let cases =
        std::env::var("PROPTEST_CASES").ok().and_then(|s| s.parse().ok()).unwrap_or(default_cases);

    ProptestConfig::with_cases(cases)
}

type Seen = Arc<Mutex<HashMap<i64, usize>>>;

fn counting_router(secret: &str) -> (axum::Router, Seen) {
    let seen: Seen = Arc::default();
    let sink = seen.clone();
    let handler = handler_fn(move |update, _headers| {
        *sink.lock().unwrap().entry(update.update_id.unwrap_or_default()).or_default() += 1;
        async { Ok::<(), anyhow::Error>(()) }
    });
    let dispatcher = WebhookDispatcher::new(&Credential::new(secret), handler);
    (create_router(AppState::new(dispatcher), &ListenerConfig::default()), seen)
}

fn paid_body(update_id: i64) -> String {
    json!({
        "update_id": update_id,
        "update_type": "invoice_paid",
        "payload": {"invoice_id": update_id * 10, "status": "paid"}
    })
    .to_string()
}

fn signed(secret: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("Crypto-Pay-API-Signature", compute_signature(secret, body.as_bytes()).unwrap())
        .body(Body::from(body))
        .unwrap()
}

/// Delivery plans: distinct update ids, each sent one to three times, in
/// shuffled order.
fn delivery_plan() -> impl Strategy<Value = (usize, Vec<i64>)> {
    prop::collection::hash_map(1i64..100_000, 1usize..=3, 1..16).prop_flat_map(|copies| {
        let unique = copies.len();
        let sends: Vec<i64> =
            copies.into_iter().flat_map(|(id, n)| std::iter::repeat(id).take(n)).collect();
        (Just(unique), Just(sends).prop_shuffle())
    })
}

/// Concrete walk-through: a correctly signed `invoice_paid` delivery runs
/// the callback once; the identical request replayed is acknowledged
/// without a second call.
#[tokio::test]
async fn signed_invoice_paid_then_replay() {
    let (router, seen) = counting_router("test-token");
    let body = r#"{"update_id":1,"update_type":"invoice_paid","payload":{"invoice_id":123}}"#;

    let first = router.clone().oneshot(signed("test-token", body.to_string())).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(seen.lock().unwrap().get(&1), Some(&1));

    let replay = router.clone().oneshot(signed("test-token", body.to_string())).await.unwrap();
    assert_eq!(replay.status(), StatusCode::OK);
    assert_eq!(seen.lock().unwrap().get(&1), Some(&1));
}

/// Sequential redeliveries in any order dispatch each update exactly once
/// and every request is acknowledged with 200.
#[test]
fn redeliveries_dispatch_each_update_once() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut runner = TestRunner::new(proptest_config());

    runner
        .run(&delivery_plan(), |(unique, sends)| {
            rt.block_on(async {
                let (router, seen) = counting_router(TOKEN);

                for update_id in &sends {
                    let response =
                        router.clone().oneshot(signed(TOKEN, paid_body(*update_id))).await.unwrap();
                    prop_assert_eq!(response.status(), StatusCode::OK);
                }

                let seen = seen.lock().unwrap();
                prop_assert_eq!(seen.len(), unique);
                prop_assert!(seen.values().all(|count| *count == 1));
                Ok(())
            })
        })
        .unwrap();
}

/// Concurrent redeliveries race on the replay store; exactly one copy of
/// each update wins.
#[test]
fn concurrent_redeliveries_dispatch_each_update_once() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut runner = TestRunner::new(proptest_config());

    runner
        .run(&delivery_plan(), |(unique, sends)| {
            rt.block_on(async {
                let (router, seen) = counting_router(TOKEN);

                let responses = join_all(sends.iter().map(|update_id| {
                    let router = router.clone();
                    let request = signed(TOKEN, paid_body(*update_id));
                    tokio::spawn(async move { router.oneshot(request).await.unwrap().status() })
                }))
                .await;

                for status in responses {
                    prop_assert_eq!(status.unwrap(), StatusCode::OK);
                }

                let seen = seen.lock().unwrap();
                prop_assert_eq!(seen.len(), unique);
                prop_assert!(seen.values().all(|count| *count == 1));
                Ok(())
            })
        })
        .unwrap();
}

proptest! {
    #![proptest_config(proptest_config())]

    /// Deliveries signed with any other secret never reach the handler.
    #[test]
    fn foreign_secret_never_dispatches(secret in "[ -~]{1,48}", update_id in 1i64..100_000) {
        prop_assume!(secret != TOKEN);
        let rt = tokio::runtime::Runtime::new().unwrap();

        rt.block_on(async {
            let (router, seen) = counting_router(TOKEN);
            let response = router.oneshot(signed(&secret, paid_body(update_id))).await.unwrap();

            prop_assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            prop_assert!(seen.lock().unwrap().is_empty());
            Ok(())
        })?;
    }
}
