//! Benchmarks for the webhook hot path.
//!
//! Tracks signature verification cost across payload sizes and the full
//! verify, deduplicate and dispatch pipeline on the in-memory replay store.

use std::{
    hint::black_box,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use cryptopay_core::{Credential, WebhookDelivery};
use cryptopay_webhook::{
    compute_signature, handler_fn, verify, SignatureVerifier, WebhookDispatcher, SIGNATURE_HEADER,
};
use http::{HeaderMap, HeaderValue};
use serde_json::json;
use tokio::runtime::Runtime;

const TOKEN: &str = "1234:AAzQcZWQqQAbsfgPnOLr4FHC8Doa4L7KryC";

fn payload(update_id: u64, padding: usize) -> Vec<u8> {
    json!({
        "update_id": update_id,
        "update_type": "invoice_paid",
        "request_date": "2024-03-01T10:05:00.000Z",
        "payload": {
            "invoice_id": update_id,
            "status": "paid",
            "asset": "USDT",
            "amount": "10.5",
            "description": "x".repeat(padding),
        }
    })
    .to_string()
    .into_bytes()
}

fn signed_delivery(body: Vec<u8>) -> WebhookDelivery {
    let signature = compute_signature(TOKEN, &body).unwrap_or_default();
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&signature) {
        headers.insert(SIGNATURE_HEADER, value);
    }
    WebhookDelivery::new(Bytes::from(body), headers)
}

/// Signature verification across payload sizes.
fn bench_signature_verification(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature");

    for size in [256, 4 * 1024, 64 * 1024] {
        let body = payload(1, size);
        let signature = compute_signature(TOKEN, &body).unwrap_or_default();
        group.throughput(Throughput::Bytes(body.len() as u64));

        group.bench_with_input(BenchmarkId::new("verify", size), &body, |b, body| {
            b.iter(|| verify(black_box(TOKEN), black_box(body), Some(black_box(&signature))));
        });

        let verifier = SignatureVerifier::new(&Credential::new(TOKEN));
        let delivery = signed_delivery(body.clone());
        group.bench_with_input(
            BenchmarkId::new("verifier_cached_key", size),
            &delivery,
            |b, delivery| {
                b.iter(|| verifier.verify(black_box(delivery)));
            },
        );
    }

    group.finish();
}

/// Full pipeline with a fresh update id per iteration so every delivery is
/// dispatched rather than short-circuited as a replay.
fn bench_dispatch_pipeline(c: &mut Criterion) {
    let rt = Runtime::new().unwrap_or_else(|e| panic!("runtime: {e}"));
    let dispatcher = WebhookDispatcher::new(
        &Credential::new(TOKEN),
        handler_fn(|update, _headers| async move {
            black_box(update);
            Ok::<(), anyhow::Error>(())
        }),
    );
    let next_id = AtomicU64::new(0);

    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));
    group.bench_function("signed_invoice_paid", |b| {
        b.to_async(&rt).iter(|| {
            let delivery = signed_delivery(payload(next_id.fetch_add(1, Ordering::Relaxed), 64));
            let dispatcher = dispatcher.clone();
            async move { black_box(dispatcher.dispatch(delivery).await) }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_signature_verification, bench_dispatch_pipeline);
criterion_main!(benches);
