//! Per-client buckets, allocated on first use and reclaimed when idle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bucket::{self, TokenBucket};

/// Registry of token buckets keyed by client identity.
///
/// The lock guards only the map. Bucket accounting is synchronised inside
/// each [`TokenBucket`], so admission for one client never waits on the map
/// lock while another client's bucket is refilling.
pub struct ClientRegistry {
    rate: f64,
    burst: u32,
    buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
    created: AtomicU64,
}

impl ClientRegistry {
    /// Create an empty registry whose buckets use `rate` and `burst`.
    pub fn new(rate: f64, burst: u32) -> crate::Result<Self> {
        bucket::validate(rate, burst).map_err(crate::Error::Config)?;
        Ok(Self {
            rate,
            burst,
            buckets: RwLock::new(HashMap::new()),
            created: AtomicU64::new(0),
        })
    }

    /// Look up the bucket for `identity`, creating a full one if none exists.
    ///
    /// Concurrent callers for the same identity always end up with the same
    /// bucket. The returned handle is meant for a single admission; hold it no
    /// longer than that.
    pub fn get_or_create(&self, identity: &str) -> Arc<TokenBucket> {
        if let Some(bucket) = self.read().get(identity) {
            return Arc::clone(bucket);
        }

        let mut buckets = self.write();
        // Another caller may have inserted while we waited for the write lock.
        if let Some(bucket) = buckets.get(identity) {
            return Arc::clone(bucket);
        }

        let bucket = Arc::new(TokenBucket::unchecked(self.rate, self.burst));
        buckets.insert(identity.to_string(), Arc::clone(&bucket));
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!(client = identity, "Allocated client bucket");
        bucket
    }

    /// Remove the bucket for `identity`. Returns whether one existed.
    pub fn evict(&self, identity: &str) -> bool {
        self.write().remove(identity).is_some()
    }

    /// Remove every bucket that has been idle for longer than `expiry`.
    ///
    /// Candidates are collected under the shared lock; the exclusive lock is
    /// taken once per removal. A bucket that was used in between, or that a
    /// request is still holding, is kept. Returns the number removed.
    pub fn evict_idle(&self, expiry: Duration) -> usize {
        let now = Instant::now();
        let candidates: Vec<String> = self
            .read()
            .iter()
            .filter(|(_, bucket)| bucket.idle_for(now) > expiry)
            .map(|(identity, _)| identity.clone())
            .collect();

        let mut removed = 0;
        for identity in candidates {
            let mut buckets = self.write();
            let idle = buckets.get(&identity).is_some_and(|bucket| {
                Arc::strong_count(bucket) == 1 && bucket.idle_for(Instant::now()) > expiry
            });
            if idle {
                buckets.remove(&identity);
                removed += 1;
                debug!(client = %identity, "Evicted idle client bucket");
            }
        }
        removed
    }

    /// Spawn the background task that calls [`evict_idle`](Self::evict_idle)
    /// every `interval`.
    ///
    /// The task runs until [`Eviction::stop`] is called or the handle is dropped.
    pub fn start_eviction(self: &Arc<Self>, interval: Duration, expiry: Duration) -> Eviction {
        let registry = Arc::clone(self);
        let cancel = CancellationToken::new();
        let stopped = cancel.clone();

        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(Instant::now() + interval, interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = tick.tick() => {
                        let removed = registry.evict_idle(expiry);
                        if removed > 0 {
                            info!(
                                removed,
                                remaining = registry.len(),
                                "Evicted idle client buckets"
                            );
                        }
                    }
                }
            }

            debug!("Client bucket eviction stopped");
        });

        info!(
            interval_secs = interval.as_secs(),
            expiry_secs = expiry.as_secs(),
            "Client bucket eviction started"
        );

        Eviction {
            cancel,
            task: Some(task),
        }
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.read().contains_key(identity)
    }

    /// Total buckets ever allocated, including evicted ones.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<TokenBucket>>> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<TokenBucket>>> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the background eviction task.
pub struct Eviction {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Eviction {
    /// Stop the eviction loop and wait for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!("Eviction task ended abnormally: {e}");
        }
    }
}

impl Drop for Eviction {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
