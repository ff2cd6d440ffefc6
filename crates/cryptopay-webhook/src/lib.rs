//! Inbound side of the Crypto Pay SDK.
//!
//! Verifies webhook signatures over the raw body, rejects replays through a
//! pluggable `ReplayStore`, and hands authenticated updates to a
//! `WebhookHandler`. The axum listener in `server` exposes the pipeline over
//! HTTP.
//!
//! # Example
//!
//! ```no_run
//! use cryptopay_core::Credential;
//! use cryptopay_webhook::{handler_fn, AppState, ListenerConfig, WebhookDispatcher, WebhookListener};
//!
//! # async fn example() -> std::io::Result<()> {
//! let handler = handler_fn(|update, _headers| async move {
//!     println!("received {}", update.kind());
//!     Ok::<(), anyhow::Error>(())
//! });
//! let dispatcher = WebhookDispatcher::new(&Credential::new("1234:AA..."), handler);
//!
//! WebhookListener::new(AppState::new(dispatcher), ListenerConfig::default()).serve().await
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use cryptopay_core::{Clock, RealClock};

pub mod config;
pub mod crypto;
pub mod dispatcher;
pub mod handlers;
pub mod replay;
pub mod server;

pub use config::Config;
pub use crypto::{
    check_signature, compute_signature, verify, SignatureError, SignatureVerifier,
    SIGNATURE_HEADER,
};
pub use dispatcher::{
    handler_fn, BlockingHandler, DispatchMode, DispatchOutcome, RejectReason, WebhookDispatcher,
    WebhookHandler,
};
#[cfg(feature = "redis")]
pub use replay::RedisReplayStore;
pub use replay::{
    resolver_fn, DefaultReplayKeyResolver, InMemoryReplayStore, ReplayDecision,
    ReplayFailureMode, ReplayGuard, ReplayKeyResolver, ReplayStore, ReplayStoreError,
};
pub use server::{create_router, start_server, ListenerConfig, WebhookListener};

/// Shared state handed to every request handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Delivery pipeline.
    pub dispatcher: Arc<WebhookDispatcher>,
    /// Time source for receive timestamps and health checks.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// State for `dispatcher` on the real clock.
    pub fn new(dispatcher: WebhookDispatcher) -> Self {
        Self { dispatcher: Arc::new(dispatcher), clock: Arc::new(RealClock::new()) }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
