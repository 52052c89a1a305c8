//! Subscription registry.
//!
//! A key has at most one subscription; repeated `add_watcher` calls merge
//! their callbacks into it. Shard assignment happens once at creation
//! (live subscription count divided by the shard capacity) and never
//! changes afterwards, so removals leave shards sparse instead of
//! triggering a rebalance that would duplicate first-fires.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use tracing::debug;

use crate::key::ConfigKey;
use crate::watch::CallbackFn;

/// Opaque identity of one registered callback.
///
/// Removal matches by handle, not by closure identity; registering the
/// same closure twice yields two handles and two invocations per change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle {
    pub(crate) id: u64,
}

struct Subscription {
    callbacks: Vec<(u64, CallbackFn)>,
    last_md5: String,
    shard: usize,
    /// Creation order, for stable shard snapshots.
    seq: u64,
    /// Whether a long-poll probe already carried this subscription.
    probed: bool,
}

struct Inner {
    subs: HashMap<ConfigKey, Subscription>,
    next_seq: u64,
}

pub(crate) struct AddOutcome {
    pub(crate) handle: WatchHandle,
    pub(crate) shard: usize,
}

/// A subscription's state as seen by a poller cycle.
pub(crate) struct ShardEntry {
    pub(crate) key: ConfigKey,
    pub(crate) last_md5: String,
    pub(crate) probed: bool,
}

pub(crate) struct WatchRegistry {
    inner: Mutex<Inner>,
    next_handle: AtomicU64,
    shard_size: usize,
}

impl WatchRegistry {
    pub(crate) fn new(shard_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                subs: HashMap::new(),
                next_seq: 0,
            }),
            next_handle: AtomicU64::new(1),
            shard_size,
        }
    }

    /// Registers a callback, creating the subscription on first use.
    pub(crate) fn add(
        &self,
        key: ConfigKey,
        callback: CallbackFn,
    ) -> AddOutcome {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().expect("registry lock poisoned");

        // Shard index is the live subscription count at creation time;
        // it never changes afterwards.
        let next_shard = inner.subs.len() / self.shard_size;
        let seq = inner.next_seq;
        let mut created = false;
        let sub = inner.subs.entry(key.clone()).or_insert_with(|| {
            created = true;
            Subscription {
                callbacks: Vec::new(),
                last_md5: String::new(),
                shard: next_shard,
                seq,
                probed: false,
            }
        });
        sub.callbacks.push((id, callback));
        let shard = sub.shard;

        if created {
            inner.next_seq += 1;
            debug!("subscription created for {} in shard {}", key, shard);
        }

        AddOutcome {
            handle: WatchHandle { id },
            shard,
        }
    }

    /// Removes one callback. The subscription disappears with its last
    /// callback; a zero-callback subscription is never left live.
    ///
    /// Returns whether the handle was found.
    pub(crate) fn remove(
        &self,
        key: &ConfigKey,
        handle: WatchHandle,
    ) -> bool {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let Some(sub) = inner.subs.get_mut(key) else {
            return false;
        };
        let before = sub.callbacks.len();
        sub.callbacks.retain(|(id, _)| *id != handle.id);
        let found = sub.callbacks.len() != before;
        if sub.callbacks.is_empty() {
            inner.subs.remove(key);
            debug!("subscription dropped for {}", key);
        }
        found
    }

    /// Removes every callback of a key. Returns how many were dropped.
    pub(crate) fn remove_all(
        &self,
        key: &ConfigKey,
    ) -> usize {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        match inner.subs.remove(key) {
            Some(sub) => {
                debug!("subscription dropped for {}", key);
                sub.callbacks.len()
            }
            None => 0,
        }
    }

    /// Stable copy of one shard, in subscription creation order.
    pub(crate) fn snapshot_shard(
        &self,
        shard: usize,
    ) -> Vec<ShardEntry> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        let mut entries: Vec<(u64, ShardEntry)> = inner
            .subs
            .iter()
            .filter(|(_, sub)| sub.shard == shard)
            .map(|(key, sub)| {
                (
                    sub.seq,
                    ShardEntry {
                        key: key.clone(),
                        last_md5: sub.last_md5.clone(),
                        probed: sub.probed,
                    },
                )
            })
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, entry)| entry).collect()
    }

    /// Marks the given keys as having been carried by a probe.
    pub(crate) fn mark_probed(
        &self,
        keys: &[ConfigKey],
    ) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        for key in keys {
            if let Some(sub) = inner.subs.get_mut(key) {
                sub.probed = true;
            }
        }
    }

    /// Records the hash of the last successfully fetched content.
    pub(crate) fn update_md5(
        &self,
        key: &ConfigKey,
        md5: &str,
    ) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if let Some(sub) = inner.subs.get_mut(key) {
            sub.last_md5 = md5.to_string();
        }
    }

    pub(crate) fn last_md5(
        &self,
        key: &ConfigKey,
    ) -> Option<String> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.subs.get(key).map(|sub| sub.last_md5.clone())
    }

    /// Callbacks currently registered on a key.
    pub(crate) fn callbacks_for(
        &self,
        key: &ConfigKey,
    ) -> Vec<CallbackFn> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner
            .subs
            .get(key)
            .map(|sub| sub.callbacks.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn shard_population(
        &self,
        shard: usize,
    ) -> usize {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.subs.values().filter(|sub| sub.shard == shard).count()
    }

    pub(crate) fn subscription_count(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").subs.len()
    }
}
