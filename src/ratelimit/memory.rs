//! Bounded in-memory bucket store.
//!
//! Entries expire lazily on access and are also swept on a fixed interval by
//! a background task. When a new key would push the store to its high-water
//! mark, a batch of entries is evicted first: expired ones, then the least
//! recently accessed live ones.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::bucket::BucketState;
use super::clock::Clock;
use super::store::{Store, StoreError, StoreResult};
use crate::config::MemoryStoreConfig;

/// A stored bucket plus access bookkeeping.
#[derive(Debug, Clone, Copy)]
struct StoreEntry {
    state: BucketState,
    /// Last get or set; drives eviction order
    last_accessed_at: u64,
}

/// Occupancy snapshot of a [`BoundedMemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub size: usize,
    pub high_water_mark: usize,
    pub utilization_percent: f64,
}

struct Inner {
    entries: DashMap<String, StoreEntry>,
    clock: Arc<dyn Clock>,
    high_water_mark: usize,
    eviction_count: usize,
}

impl Inner {
    fn get(&self, key: &str, now: u64) -> Option<BucketState> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.state.is_expired(now) {
                entry.last_accessed_at = now;
                return Some(entry.state);
            }
        } else {
            return None;
        }

        self.entries
            .remove_if(key, |_, entry| entry.state.is_expired(now));
        None
    }

    fn has(&self, key: &str, now: u64) -> bool {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.state.is_expired(now),
            None => return false,
        };

        if expired {
            self.entries
                .remove_if(key, |_, entry| entry.state.is_expired(now));
        }
        !expired
    }

    fn set(&self, key: &str, state: BucketState, ttl_ms: u64, now: u64) {
        let state = BucketState {
            expires_at: now.saturating_add(ttl_ms),
            ..state
        };

        if !self.entries.contains_key(key) && self.entries.len() >= self.high_water_mark {
            self.evict(now);
        }

        self.entries.insert(
            key.to_string(),
            StoreEntry {
                state,
                last_accessed_at: now,
            },
        );
    }

    /// Shrink to `high_water_mark - eviction_count` entries.
    fn evict(&self, now: u64) -> usize {
        let target = self.high_water_mark.saturating_sub(self.eviction_count);

        // Snapshot first: removing while holding a shard guard would deadlock.
        let (expired, mut live): (Vec<_>, Vec<_>) = self
            .entries
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.last_accessed_at,
                    entry.state.is_expired(now),
                )
            })
            .partition(|(_, _, expired)| *expired);

        let mut expired_removed = 0;
        for (key, _, _) in &expired {
            if self.entries.len() <= target {
                break;
            }
            if self
                .entries
                .remove_if(key, |_, entry| entry.state.is_expired(now))
                .is_some()
            {
                expired_removed += 1;
            }
        }

        let mut live_removed = 0;
        if self.entries.len() > target {
            live.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            for (key, _, _) in &live {
                if self.entries.len() <= target {
                    break;
                }
                if self.entries.remove(key).is_some() {
                    live_removed += 1;
                }
            }
        }

        debug!(
            expired = expired_removed,
            live = live_removed,
            remaining = self.entries.len(),
            target = target,
            "Evicted entries at high-water mark"
        );

        expired_removed + live_removed
    }

    fn sweep(&self, now: u64) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.state.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            debug!(
                removed = removed,
                remaining = self.entries.len(),
                "Swept expired entries"
            );
        }
        removed
    }
}

async fn sweep_loop(inner: Weak<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let now = inner.clock.now_millis();
        inner.sweep(now);
    }
}

/// In-process bucket store with a hard size bound.
pub struct BoundedMemoryStore {
    inner: Arc<Inner>,
    shut_down: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl BoundedMemoryStore {
    /// Create a store and start its sweeper on the current tokio runtime.
    ///
    /// Outside a runtime the store works without a sweeper; expired entries
    /// are then only reclaimed on access or eviction.
    pub fn new(config: &MemoryStoreConfig, clock: Arc<dyn Clock>) -> Self {
        let inner = Arc::new(Inner {
            entries: DashMap::new(),
            clock,
            high_water_mark: config.high_water_mark,
            eviction_count: config.eviction_count,
        });

        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(handle) if config.sweep_interval_ms > 0 => {
                let period = Duration::from_millis(config.sweep_interval_ms);
                Some(handle.spawn(sweep_loop(Arc::downgrade(&inner), period)))
            }
            _ => {
                debug!("Memory store running without background sweeper");
                None
            }
        };

        debug!(
            high_water_mark = config.high_water_mark,
            eviction_count = config.eviction_count,
            sweep_interval_ms = config.sweep_interval_ms,
            "Created bounded memory store"
        );

        Self {
            inner,
            shut_down: AtomicBool::new(false),
            sweeper: Mutex::new(sweeper),
        }
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            Err(StoreError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn now(&self) -> u64 {
        self.inner.clock.now_millis()
    }

    /// Remove every expired entry now. Returns how many were removed.
    pub fn sweep(&self) -> StoreResult<usize> {
        self.ensure_open()?;
        Ok(self.inner.sweep(self.now()))
    }

    /// Whether the background sweeper is alive.
    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Current occupancy.
    pub fn stats(&self) -> StoreStats {
        let size = self.inner.entries.len();
        let high_water_mark = self.inner.high_water_mark;
        let utilization_percent = if high_water_mark == 0 {
            100.0
        } else {
            size as f64 * 100.0 / high_water_mark as f64
        };

        StoreStats {
            size,
            high_water_mark,
            utilization_percent,
        }
    }
}

impl std::fmt::Debug for BoundedMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedMemoryStore")
            .field("size", &self.inner.entries.len())
            .field("high_water_mark", &self.inner.high_water_mark)
            .field("eviction_count", &self.inner.eviction_count)
            .field("shut_down", &self.shut_down.load(Ordering::SeqCst))
            .finish()
    }
}

impl Drop for BoundedMemoryStore {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Store for BoundedMemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<BucketState>> {
        self.ensure_open()?;
        Ok(self.inner.get(key, self.now()))
    }

    async fn set(&self, key: &str, state: BucketState, ttl_ms: u64) -> StoreResult<()> {
        self.ensure_open()?;
        self.inner.set(key, state, ttl_ms, self.now());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self.inner.entries.remove(key).is_some())
    }

    async fn has(&self, key: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self.inner.has(key, self.now()))
    }

    async fn size(&self) -> StoreResult<usize> {
        self.ensure_open()?;
        Ok(self.inner.entries.len())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.ensure_open()?;
        self.inner.entries.clear();
        Ok(())
    }

    async fn shutdown(&self) -> StoreResult<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.inner.entries.clear();

        info!("Memory store shut down");
        Ok(())
    }
}
