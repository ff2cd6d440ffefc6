//! Inbound webhook endpoint.

use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use cryptopay_core::WebhookDelivery;
use tracing::{debug, instrument};

use crate::AppState;

/// Receives one webhook delivery.
///
/// The body is taken as raw bytes so the signature is checked against
/// exactly what was sent.
///
/// Responds with:
/// - 200 `{"ok": true}` when dispatched or already seen
/// - 400 on an invalid signature or malformed body
/// - 500 when the callback fails
/// - 503 when the replay store is unavailable
#[instrument(name = "receive_webhook", skip_all, fields(body_bytes = body.len()))]
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let delivery = WebhookDelivery::received_at(body, headers, state.clock.now_utc());
    let outcome = state.dispatcher.dispatch(delivery).await;

    debug!(?outcome, status = outcome.status_code().as_u16(), "webhook handled");

    (outcome.status_code(), Json(outcome.body())).into_response()
}
