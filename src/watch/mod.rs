//! Change-notification engine.
//!
//! Subscriptions are sharded across background pollers, each driving the
//! long-poll protocol for its slice. A detected change triggers a fresh
//! fetch and a dispatch to the registered callbacks through a bounded
//! worker pool.
//!
//! ```text
//! add_watcher()
//!      │
//!      ▼
//! WatchRegistry ──snapshot──▶ shard puller (one task per non-empty shard)
//!                                  │  POST Probe-Modify-Request, hangs
//!                                  │  until a key changes or times out
//!                                  ▼
//!                             re-fetch changed keys
//!                                  │
//!                                  ▼
//!                             Dispatcher (callback_thread_num workers,
//!                             per-key ordering, panic isolation)
//! ```

pub(crate) mod dispatcher;
pub(crate) mod payload;
pub(crate) mod puller;
pub(crate) mod registry;

#[cfg(test)]
mod dispatcher_test;

use std::sync::Arc;

pub use registry::WatchHandle;

/// One observed change of a configuration item, handed to callbacks.
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub data_id: String,
    pub group: String,
    pub tenant: String,
    /// New value after KMS opening; `None` means the item was deleted.
    pub content: Option<String>,
    /// Value as stored on the control plane (ciphertext for ciphered keys).
    pub raw_content: Option<String>,
}

/// User callback invoked on every observed change.
pub(crate) type CallbackFn = Arc<dyn Fn(ConfigChange) + Send + Sync>;
