//! Bounded, key-indexed cache of expensive engine-side handles.
//!
//! # Responsibilities
//! - Cache one handle per effective connection configuration
//! - Single-flight creation: concurrent misses on one key invoke the
//!   factory exactly once and all callers share the created handle
//! - LRU eviction beyond capacity, with teardown dispatched outside the
//!   index lock
//! - Never tear down a handle leased by an in-flight call; doomed entries
//!   close when their last lease drops
//! - `close_all` at client shutdown waits a bounded grace period for
//!   in-flight users, then force-closes

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{Notify, OnceCell};

use crate::error::PoolError;

/// An engine-side handle the pool can cache and asynchronously tear down.
pub trait PooledHandle: Send + Sync + 'static {
    /// Asynchronous teardown. Never runs under the pool's index lock.
    fn close(self: Arc<Self>) -> BoxFuture<'static, ()>;
}

struct Entry<R> {
    cell: Arc<OnceCell<Arc<R>>>,
    stamp: u64,
    leases: usize,
    doomed: bool,
}

struct PoolIndex<K, R> {
    entries: HashMap<K, Entry<R>>,
    clock: u64,
    closed: bool,
}

/// Bounded LRU cache of engine handles, shared by all calls.
///
/// The index mutex guards only bookkeeping; factory invocations and handle
/// teardown happen outside it.
pub struct ResourcePool<K, R> {
    capacity: usize,
    index: Mutex<PoolIndex<K, R>>,
    drained: Notify,
}

impl<K, R> ResourcePool<K, R>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    R: PooledHandle,
{
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            index: Mutex::new(PoolIndex {
                entries: HashMap::new(),
                clock: 0,
                closed: false,
            }),
            drained: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolIndex<K, R>> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of cached entries, including creations in flight.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch the handle for `key`, creating it via `factory` on a miss.
    ///
    /// Access bumps the entry's recency. The returned lease keeps the
    /// handle safe from teardown until dropped; callers tie the lease to
    /// their call's completion.
    pub async fn get_or_create<F, Fut>(
        self: &Arc<Self>,
        key: K,
        factory: F,
    ) -> Result<PoolLease<K, R>, PoolError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, PoolError>>,
    {
        let cell = {
            let mut index = self.lock();
            if index.closed {
                return Err(PoolError::Closed);
            }
            index.clock += 1;
            let stamp = index.clock;
            let entry = index.entries.entry(key.clone()).or_insert_with(|| Entry {
                cell: Arc::new(OnceCell::new()),
                stamp,
                leases: 0,
                doomed: false,
            });
            entry.stamp = stamp;
            // Lease registered before the creation await so concurrent
            // eviction cannot pick this entry.
            entry.leases += 1;
            Arc::clone(&entry.cell)
        };

        let created = cell
            .get_or_try_init(|| async { factory().await.map(Arc::new) })
            .await;

        let handle = match created {
            Ok(handle) => Arc::clone(handle),
            Err(err) => {
                // Surface the failure only to this caller and drop the
                // stillborn entry so a retry starts clean.
                let mut index = self.lock();
                if let Some(entry) = index.entries.get_mut(&key) {
                    entry.leases -= 1;
                    if entry.leases == 0 && entry.cell.get().is_none() {
                        index.entries.remove(&key);
                    }
                }
                drop(index);
                self.drained.notify_waiters();
                return Err(err);
            }
        };

        let victims = {
            let mut index = self.lock();
            self.collect_evictions(&mut index)
        };
        for victim in victims {
            dispatch_close(victim);
        }

        Ok(PoolLease {
            pool: Arc::clone(self),
            key,
            handle,
        })
    }

    /// Evict least-recently-used entries until within capacity. Teardown
    /// of evicted handles is dispatched asynchronously; returns how many
    /// entries were evicted or doomed.
    pub fn evict_if_over_capacity(&self) -> usize {
        let victims = {
            let mut index = self.lock();
            self.collect_evictions(&mut index)
        };
        let count = victims.len();
        for victim in victims {
            dispatch_close(victim);
        }
        count
    }

    fn collect_evictions(&self, index: &mut PoolIndex<K, R>) -> Vec<Arc<R>> {
        let mut victims = Vec::new();
        while index.entries.len() > self.capacity {
            let lru_free = index
                .entries
                .iter()
                .filter(|(_, entry)| entry.leases == 0)
                .min_by_key(|(_, entry)| entry.stamp)
                .map(|(key, _)| key.clone());

            match lru_free {
                Some(key) => {
                    if let Some(entry) = index.entries.remove(&key) {
                        tracing::debug!(?key, "evicting pooled engine handle");
                        if let Some(handle) = entry.cell.get() {
                            victims.push(Arc::clone(handle));
                        }
                    }
                }
                None => {
                    // Every candidate is serving an active call. Doom the
                    // LRU one; its last lease performs the teardown.
                    if let Some((key, entry)) = index
                        .entries
                        .iter_mut()
                        .filter(|(_, entry)| !entry.doomed)
                        .min_by_key(|(_, entry)| entry.stamp)
                    {
                        tracing::debug!(?key, "pooled handle in use, deferring eviction");
                        entry.doomed = true;
                    }
                    break;
                }
            }
        }
        victims
    }

    /// Tear down every pooled handle at client shutdown.
    ///
    /// Unleased handles close immediately. Leased handles get up to
    /// `grace` to finish their calls, then are force-closed.
    pub async fn close_all(&self, grace: Duration) {
        let immediate = {
            let mut index = self.lock();
            index.closed = true;
            let keys: Vec<K> = index.entries.keys().cloned().collect();
            let mut immediate = Vec::new();
            for key in keys {
                let free = index
                    .entries
                    .get(&key)
                    .map(|entry| entry.leases == 0)
                    .unwrap_or(false);
                if free {
                    if let Some(entry) = index.entries.remove(&key) {
                        if let Some(handle) = entry.cell.get() {
                            immediate.push(Arc::clone(handle));
                        }
                    }
                } else if let Some(entry) = index.entries.get_mut(&key) {
                    entry.doomed = true;
                }
            }
            immediate
        };
        for handle in immediate {
            handle.close().await;
        }

        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);
        loop {
            let notified = self.drained.notified();
            if self.lock().entries.is_empty() {
                return;
            }
            tokio::select! {
                _ = &mut deadline => break,
                _ = notified => {}
            }
        }

        let leftovers: Vec<Arc<R>> = {
            let mut index = self.lock();
            index
                .entries
                .drain()
                .filter_map(|(_, entry)| entry.cell.get().cloned())
                .collect()
        };
        for handle in leftovers {
            tracing::warn!("grace period elapsed, force-closing pooled handle still in use");
            handle.close().await;
        }
    }
}

/// RAII lease on a pooled handle. Dropping it releases the reference; if
/// the entry was doomed while leased, the drop performs the deferred
/// teardown.
pub struct PoolLease<K, R>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    R: PooledHandle,
{
    pool: Arc<ResourcePool<K, R>>,
    key: K,
    handle: Arc<R>,
}

impl<K, R> std::fmt::Debug for PoolLease<K, R>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    R: PooledHandle,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolLease").field("key", &self.key).finish()
    }
}

impl<K, R> Deref for PoolLease<K, R>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    R: PooledHandle,
{
    type Target = R;

    fn deref(&self) -> &R {
        &self.handle
    }
}

impl<K, R> Drop for PoolLease<K, R>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    R: PooledHandle,
{
    fn drop(&mut self) {
        let deferred = {
            let mut index = self.pool.lock();
            match index.entries.get_mut(&self.key) {
                Some(entry) => {
                    entry.leases -= 1;
                    if entry.leases == 0 && entry.doomed {
                        index
                            .entries
                            .remove(&self.key)
                            .and_then(|entry| entry.cell.get().cloned())
                    } else {
                        None
                    }
                }
                // Entry already force-closed or evicted wholesale.
                None => None,
            }
        };
        if let Some(handle) = deferred {
            dispatch_close(handle);
        }
        self.pool.drained.notify_waiters();
    }
}

fn dispatch_close<R: PooledHandle>(handle: Arc<R>) {
    match tokio::runtime::Handle::try_current() {
        Ok(rt) => {
            rt.spawn(handle.close());
        }
        // Outside a runtime there is nothing to await the teardown on.
        Err(_) => drop(handle),
    }
}
