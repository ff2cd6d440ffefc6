//! Replay protection for authenticated webhook deliveries.
//!
//! Each delivery is reduced to a `ReplayKey` and registered in a
//! `ReplayStore` with a TTL. Registration is an atomic insert-if-absent, so
//! of several concurrent deliveries sharing a key exactly one proceeds to the
//! callback.

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use cryptopay_core::{ReplayKey, Update, WebhookDelivery};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

pub use memory::InMemoryReplayStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisReplayStore;

/// Default time a replay key stays registered.
pub const DEFAULT_REPLAY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors raised by a replay store backend.
#[derive(Debug, Error)]
pub enum ReplayStoreError {
    /// The backend could not be reached or answered with an error.
    #[error("replay store unavailable: {0}")]
    Unavailable(String),
}

/// Shared record of recently seen replay keys.
#[async_trait]
pub trait ReplayStore: Send + Sync + fmt::Debug {
    /// Registers `key` for `ttl` unless a live registration already exists.
    ///
    /// Returns `true` when the key was newly registered and `false` when it
    /// was already present. Must be atomic across concurrent callers.
    async fn try_register(&self, key: &ReplayKey, ttl: Duration) -> Result<bool, ReplayStoreError>;

    /// Removes a registration.
    async fn forget(&self, key: &ReplayKey) -> Result<(), ReplayStoreError>;

    /// Cheap connectivity probe for health checks.
    async fn health_check(&self) -> Result<(), ReplayStoreError> {
        Ok(())
    }
}

/// Derives the replay key of a delivery.
///
/// Returning `None` opts the delivery out of replay protection.
pub trait ReplayKeyResolver: Send + Sync + fmt::Debug {
    /// Resolves the key for an authenticated delivery and its decoded update.
    fn resolve(&self, delivery: &WebhookDelivery, update: &Update) -> Option<String>;
}

/// Key derivation used when no resolver is configured.
///
/// Tries `"{update_type}:{update_id}"`, then
/// `"{update_type}:invoice_id:{id}"`, then `"body:{sha256(raw_body)}"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultReplayKeyResolver;

impl ReplayKeyResolver for DefaultReplayKeyResolver {
    fn resolve(&self, delivery: &WebhookDelivery, update: &Update) -> Option<String> {
        let kind = update.update_type.as_deref().unwrap_or("update");

        if let Some(update_id) = update.update_id {
            return Some(format!("{kind}:{update_id}"));
        }
        if let Some(invoice_id) = update.invoice_id() {
            return Some(format!("{kind}:invoice_id:{invoice_id}"));
        }
        Some(format!("body:{}", delivery.body_sha256()))
    }
}

/// Resolver built from a closure, see [`resolver_fn`].
pub struct FnResolver<F>(F);

impl<F> fmt::Debug for FnResolver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnResolver")
    }
}

impl<F> ReplayKeyResolver for FnResolver<F>
where
    F: Fn(&WebhookDelivery, &Update) -> Option<String> + Send + Sync,
{
    fn resolve(&self, delivery: &WebhookDelivery, update: &Update) -> Option<String> {
        (self.0)(delivery, update)
    }
}

/// Wraps a closure as a `ReplayKeyResolver`.
pub fn resolver_fn<F>(resolver: F) -> FnResolver<F>
where
    F: Fn(&WebhookDelivery, &Update) -> Option<String> + Send + Sync,
{
    FnResolver(resolver)
}

/// What to do with a delivery when the replay store fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayFailureMode {
    /// Reject the delivery so the sender retries later.
    #[default]
    FailClosed,
    /// Dispatch without replay protection.
    FailOpen,
}

/// Result of the replay check for one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayDecision {
    /// First sighting of the key, or the delivery is unprotected.
    Accept(Option<ReplayKey>),
    /// The key is already registered.
    Duplicate(ReplayKey),
    /// The store failed and the guard is fail-closed.
    Unavailable,
}

/// Applies key resolution and store registration to deliveries.
#[derive(Debug, Clone)]
pub struct ReplayGuard {
    store: Arc<dyn ReplayStore>,
    resolver: Arc<dyn ReplayKeyResolver>,
    ttl: Duration,
    failure_mode: ReplayFailureMode,
}

impl ReplayGuard {
    /// Guard over `store` with the default resolver, TTL and failure mode.
    pub fn new(store: Arc<dyn ReplayStore>) -> Self {
        Self {
            store,
            resolver: Arc::new(DefaultReplayKeyResolver),
            ttl: DEFAULT_REPLAY_TTL,
            failure_mode: ReplayFailureMode::default(),
        }
    }

    /// Guard backed by a fresh process-local store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryReplayStore::new()))
    }

    /// Replaces the key resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl ReplayKeyResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Sets how long keys stay registered.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the behaviour on store failure.
    #[must_use]
    pub fn with_failure_mode(mut self, failure_mode: ReplayFailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    /// Configured key TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Configured failure mode.
    pub fn failure_mode(&self) -> ReplayFailureMode {
        self.failure_mode
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn ReplayStore> {
        &self.store
    }

    /// Resolves the delivery's key and registers it.
    pub async fn check(&self, delivery: &WebhookDelivery, update: &Update) -> ReplayDecision {
        let Some(key) = self.resolver.resolve(delivery, update).and_then(ReplayKey::new) else {
            warn!(
                update_type = update.kind(),
                "replay key resolver returned no key, delivery is not replay protected"
            );
            return ReplayDecision::Accept(None);
        };

        match self.store.try_register(&key, self.ttl).await {
            Ok(true) => ReplayDecision::Accept(Some(key)),
            Ok(false) => {
                debug!(replay_key = %key, "duplicate webhook delivery");
                ReplayDecision::Duplicate(key)
            },
            Err(store_error) => match self.failure_mode {
                ReplayFailureMode::FailClosed => {
                    error!(error = %store_error, replay_key = %key, "replay store failed, rejecting delivery");
                    ReplayDecision::Unavailable
                },
                ReplayFailureMode::FailOpen => {
                    warn!(error = %store_error, replay_key = %key, "replay store failed, dispatching unprotected");
                    ReplayDecision::Accept(None)
                },
            },
        }
    }
}
