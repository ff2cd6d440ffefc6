//! End-to-end tests over real sockets.
//!
//! Runs the webhook listener on an ephemeral port and the typed client
//! against a mock Crypto Pay API, covering the invoice lifecycle from
//! creation to the signed `invoice_paid` webhook.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use cryptopay_client::{ClientConfig, CreateInvoice, CryptoPayClient, RetryConfig};
use cryptopay_core::{Asset, Credential, InvoiceStatus, Update};
use cryptopay_webhook::{
    compute_signature, handler_fn, AppState, ListenerConfig, WebhookDispatcher, WebhookListener,
};
use serde_json::json;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

const TOKEN: &str = "1234:AAzQcZWQqQAbsfgPnOLr4FHC8Doa4L7KryC";

struct RunningListener {
    url: String,
    received: Arc<Mutex<Vec<Update>>>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

async fn spawn_listener() -> RunningListener {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let handler = handler_fn(move |update, _headers| {
        sink.lock().unwrap().push(update);
        async { Ok::<(), anyhow::Error>(()) }
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ListenerConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        ..ListenerConfig::default()
    };

    let state = AppState::new(WebhookDispatcher::new(&Credential::new(TOKEN), handler));
    let (shutdown, signal) = oneshot::channel::<()>();
    let task = tokio::spawn(WebhookListener::new(state, config.clone()).serve_on(listener, async move {
        let _ = signal.await;
    }));

    RunningListener { url: config.url(), received, shutdown, task }
}

async fn post_signed(url: &str, body: &str, token: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(url)
        .header("Content-Type", "application/json")
        .header("Crypto-Pay-API-Signature", compute_signature(token, body.as_bytes()).unwrap())
        .body(body.to_string())
        .send()
        .await
        .unwrap()
}

/// An invoice created through the client is later reported paid by a signed
/// webhook; a redelivery of that webhook is acknowledged but not dispatched.
#[tokio::test]
async fn invoice_created_then_paid_webhook_dispatched() {
    let api = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/createInvoice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": {
                "invoice_id": 528890,
                "status": "active",
                "hash": "IVt6tYVkWbYh",
                "asset": "TON",
                "amount": "2.5",
                "pay_url": "https://t.me/CryptoTestnetBot?start=IVt6tYVkWbYh",
                "created_at": "2024-03-01T10:00:00.000Z",
                "allow_comments": true,
                "allow_anonymous": true
            }
        })))
        .expect(1)
        .mount(&api)
        .await;

    let client = CryptoPayClient::new(
        Credential::new(TOKEN),
        ClientConfig::with_base_url(format!("{}/api", api.uri())),
        RetryConfig::default(),
    )
    .unwrap();
    let invoice = client.create_invoice(&CreateInvoice::new(Asset::Ton, "2.5")).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Active);

    let listener = spawn_listener().await;
    let webhook = json!({
        "update_id": 9001,
        "update_type": "invoice_paid",
        "request_date": "2024-03-01T10:05:00.000Z",
        "payload": {
            "invoice_id": invoice.invoice_id,
            "status": "paid",
            "asset": "TON",
            "amount": "2.5",
            "paid_at": "2024-03-01T10:04:59.000Z"
        }
    })
    .to_string();

    let first = post_signed(&listener.url, &webhook, TOKEN).await;
    assert_eq!(first.status(), 200);
    assert_eq!(first.json::<serde_json::Value>().await.unwrap(), json!({"ok": true}));

    let redelivery = post_signed(&listener.url, &webhook, TOKEN).await;
    assert_eq!(redelivery.status(), 200);
    drop(redelivery);

    {
        let received = listener.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let paid = received[0].invoice().unwrap();
        assert_eq!(paid.invoice_id, invoice.invoice_id);
        assert_eq!(paid.status, InvoiceStatus::Paid);
    }

    listener.shutdown.send(()).unwrap();
    listener.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn forged_webhook_rejected_over_http() {
    let listener = spawn_listener().await;
    let webhook = json!({"update_id": 1, "update_type": "invoice_paid", "payload": {"invoice_id": 1}})
        .to_string();

    let response = post_signed(&listener.url, &webhook, "1234:forged").await;

    assert_eq!(response.status(), 400);
    assert!(response.headers().contains_key("x-request-id"));
    assert!(listener.received.lock().unwrap().is_empty());
    drop(response);

    listener.shutdown.send(()).unwrap();
    listener.task.await.unwrap().unwrap();
}
