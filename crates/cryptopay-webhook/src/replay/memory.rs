//! Process-local replay store.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use cryptopay_core::{Clock, RealClock, ReplayKey};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{ReplayStore, ReplayStoreError};

/// Replay store holding keys in memory.
///
/// One mutex guards check-and-set, so registration is atomic. Expired
/// entries are dropped lazily when touched; `spawn_sweeper` additionally
/// bounds memory for keys that are never seen again. A TTL too large to
/// represent as an `Instant` registers the key without expiry.
#[derive(Debug)]
pub struct InMemoryReplayStore {
    entries: Mutex<HashMap<ReplayKey, Option<Instant>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryReplayStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryReplayStore {
    /// Empty store on the real clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(RealClock::new()))
    }

    /// Empty store reading expiry times from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Mutex::new(HashMap::new()), clock }
    }

    /// Number of stored keys, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops every expired key, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, expires_at| is_live(*expires_at, now));
        before - entries.len()
    }

    /// Purges expired keys every `interval` until the store is dropped.
    pub fn spawn_sweeper(store: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(store);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else { break };
                let removed = store.purge_expired();
                if removed > 0 {
                    debug!(removed, "purged expired replay keys");
                }
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ReplayKey, Option<Instant>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `None` never expires.
fn is_live(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.map_or(true, |expires_at| expires_at > now)
}

#[async_trait]
impl ReplayStore for InMemoryReplayStore {
    async fn try_register(&self, key: &ReplayKey, ttl: Duration) -> Result<bool, ReplayStoreError> {
        let now = self.clock.now();
        let mut entries = self.lock();

        if entries.get(key).is_some_and(|expires_at| is_live(*expires_at, now)) {
            return Ok(false);
        }

        entries.insert(key.clone(), now.checked_add(ttl));
        Ok(true)
    }

    async fn forget(&self, key: &ReplayKey) -> Result<(), ReplayStoreError> {
        self.lock().remove(key);
        Ok(())
    }
}
