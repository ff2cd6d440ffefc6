//! Per-delivery pipeline: authenticate, decode, deduplicate, dispatch.
//!
//! A delivery moves through
//! `received -> signature checked -> replay checked -> dispatched` and stops
//! at the first failing step. The resulting `DispatchOutcome` maps directly to
//! the HTTP status the sender sees.

use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use cryptopay_core::{Credential, Update, WebhookDelivery};
use http::{HeaderMap, HeaderName, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::{
    crypto::{signature_prefix, SignatureVerifier},
    replay::{ReplayDecision, ReplayGuard},
};

/// Callback receiving authenticated, deduplicated updates.
#[async_trait]
pub trait WebhookHandler: Send + Sync + 'static {
    /// Processes one update.
    ///
    /// An error makes the listener answer 500 so the sender can retry later.
    async fn handle(&self, update: Update, headers: HeaderMap) -> anyhow::Result<()>;
}

/// Async closure handler, see [`handler_fn`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> WebhookHandler for FnHandler<F>
where
    F: Fn(Update, HeaderMap) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, update: Update, headers: HeaderMap) -> anyhow::Result<()> {
        (self.0)(update, headers).await
    }
}

/// Wraps an async closure as a `WebhookHandler`.
pub fn handler_fn<F, Fut>(handler: F) -> FnHandler<F>
where
    F: Fn(Update, HeaderMap) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler(handler)
}

/// Synchronous handler run on tokio's blocking pool.
pub struct BlockingHandler<F>(Arc<F>);

impl<F> BlockingHandler<F>
where
    F: Fn(Update, HeaderMap) -> anyhow::Result<()> + Send + Sync + 'static,
{
    /// Wraps a blocking closure.
    pub fn new(handler: F) -> Self {
        Self(Arc::new(handler))
    }
}

#[async_trait]
impl<F> WebhookHandler for BlockingHandler<F>
where
    F: Fn(Update, HeaderMap) -> anyhow::Result<()> + Send + Sync + 'static,
{
    async fn handle(&self, update: Update, headers: HeaderMap) -> anyhow::Result<()> {
        let handler = self.0.clone();
        tokio::task::spawn_blocking(move || handler(update, headers))
            .await
            .map_err(|join_error| anyhow::anyhow!("blocking handler failed: {join_error}"))?
    }
}

/// When the callback runs relative to the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// The response waits for the callback and reflects its result.
    #[default]
    Awaited,
    /// The callback is spawned and the delivery acknowledged immediately.
    Detached,
}

/// Why a delivery was refused before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Missing, malformed or mismatched signature.
    InvalidSignature,
    /// Authenticated body is not a JSON object.
    MalformedBody,
}

/// Final state of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The callback accepted the update, or was spawned in detached mode.
    Dispatched,
    /// The replay key was already registered; the callback did not run.
    Duplicate,
    /// The delivery was refused before the replay check.
    Rejected(RejectReason),
    /// The callback returned an error or panicked.
    CallbackFailed,
    /// The replay store failed while fail-closed.
    StoreUnavailable,
}

impl DispatchOutcome {
    /// HTTP status returned to the sender.
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::Dispatched | Self::Duplicate => StatusCode::OK,
            Self::Rejected(_) => StatusCode::BAD_REQUEST,
            Self::CallbackFailed => StatusCode::INTERNAL_SERVER_ERROR,
            Self::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// JSON response body. Error bodies stay generic.
    pub fn body(self) -> Value {
        let (code, message) = match self {
            Self::Dispatched | Self::Duplicate => return json!({ "ok": true }),
            Self::Rejected(RejectReason::InvalidSignature) => {
                ("invalid_signature", "Invalid signature")
            },
            Self::Rejected(RejectReason::MalformedBody) => ("invalid_body", "Invalid JSON"),
            Self::CallbackFailed => ("callback_error", "Callback error"),
            Self::StoreUnavailable => ("replay_store_unavailable", "Service unavailable"),
        };
        json!({ "ok": false, "error": { "code": code, "message": message } })
    }
}

/// Runs deliveries through verification, replay protection and the
/// callback.
#[derive(Clone)]
pub struct WebhookDispatcher {
    verifier: SignatureVerifier,
    replay: ReplayGuard,
    handler: Arc<dyn WebhookHandler>,
    mode: DispatchMode,
}

impl fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookDispatcher")
            .field("verifier", &self.verifier)
            .field("replay", &self.replay)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl WebhookDispatcher {
    /// Dispatcher verifying with `credential` and an in-memory replay guard.
    pub fn new(credential: &Credential, handler: impl WebhookHandler) -> Self {
        Self {
            verifier: SignatureVerifier::new(credential),
            replay: ReplayGuard::in_memory(),
            handler: Arc::new(handler),
            mode: DispatchMode::default(),
        }
    }

    /// Replaces the replay guard.
    #[must_use]
    pub fn with_replay(mut self, replay: ReplayGuard) -> Self {
        self.replay = replay;
        self
    }

    /// Sets the dispatch mode.
    #[must_use]
    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Reads signatures from `header`.
    #[must_use]
    pub fn with_signature_header(mut self, header: HeaderName) -> Self {
        self.verifier = self.verifier.with_header(header);
        self
    }

    /// Replay guard in use.
    pub fn replay(&self) -> &ReplayGuard {
        &self.replay
    }

    /// Processes one delivery to completion.
    pub async fn dispatch(&self, delivery: WebhookDelivery) -> DispatchOutcome {
        if let Err(reason) = self.verifier.check(&delivery) {
            let provided = delivery.header(self.verifier.header().as_str()).unwrap_or_default();
            warn!(
                reason = %reason,
                header = %self.verifier.header(),
                signature_prefix = signature_prefix(provided),
                body_bytes = delivery.raw_body.len(),
                "rejected webhook with invalid signature"
            );
            return DispatchOutcome::Rejected(RejectReason::InvalidSignature);
        }

        let update = match Update::from_slice(&delivery.raw_body) {
            Ok(update) => update,
            Err(decode_error) => {
                warn!(error = %decode_error, "rejected webhook with undecodable body");
                return DispatchOutcome::Rejected(RejectReason::MalformedBody);
            },
        };

        info!(
            update_type = update.kind(),
            update_id = update.update_id,
            "received webhook"
        );

        match self.replay.check(&delivery, &update).await {
            ReplayDecision::Accept(_) => {},
            ReplayDecision::Duplicate(_) => return DispatchOutcome::Duplicate,
            ReplayDecision::Unavailable => return DispatchOutcome::StoreUnavailable,
        }

        self.run_handler(update, delivery.headers).await
    }

    async fn run_handler(&self, update: Update, headers: HeaderMap) -> DispatchOutcome {
        let handler = self.handler.clone();
        let task = tokio::spawn(
            async move { handler.handle(update, headers).await }.instrument(Span::current()),
        );

        if self.mode == DispatchMode::Detached {
            tokio::spawn(
                async move {
                    if let Err(failure) = flatten(task.await) {
                        error!(error = %failure, "detached webhook callback failed");
                    }
                }
                .instrument(Span::current()),
            );
            return DispatchOutcome::Dispatched;
        }

        match flatten(task.await) {
            Ok(()) => {
                debug!("webhook callback completed");
                DispatchOutcome::Dispatched
            },
            Err(failure) => {
                error!(error = %failure, "webhook callback failed");
                DispatchOutcome::CallbackFailed
            },
        }
    }
}

fn flatten(
    joined: Result<anyhow::Result<()>, tokio::task::JoinError>,
) -> anyhow::Result<()> {
    match joined {
        Ok(result) => result,
        Err(join_error) if join_error.is_panic() => Err(anyhow::anyhow!("callback panicked")),
        Err(join_error) => Err(anyhow::anyhow!("callback cancelled: {join_error}")),
    }
}
