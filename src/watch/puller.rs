//! Long-poll shard loop.
//!
//! Each non-empty shard owns one task. A cycle snapshots the shard's
//! subscriptions, posts their probe lines with the long-poll headers and
//! hangs until the server reports changed keys or the hang time elapses.
//! Changed keys are re-fetched fresh (the failover overlay is bypassed),
//! the recorded hash advances, and callbacks are queued on the
//! dispatcher. Transient failures back off exponentially and the loop
//! carries on; the task exits once its shard has no subscriptions left.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::auth::SignScope;
use crate::client::Core;
use crate::constants::BACKOFF_CEILING_SECS;
use crate::constants::BACKOFF_INITIAL_SECS;
use crate::constants::CONFIG_PATH;
use crate::constants::HEADER_LONG_PULLING_NO_HANGUP;
use crate::constants::HEADER_LONG_PULLING_TIMEOUT;
use crate::constants::PROBE_FIELD;
use crate::constants::PULLING_SLACK_SECS;
use crate::key::ConfigKey;
use crate::transport::RequestSpec;
use crate::watch::payload::build_probe;
use crate::watch::payload::parse_changed_keys;
use crate::watch::payload::ProbeItem;
use crate::watch::ConfigChange;

/// Doubling delay between failed cycles, reset on success.
pub(crate) struct Backoff {
    current: Duration,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self {
            current: Duration::from_secs(BACKOFF_INITIAL_SECS),
        }
    }

    /// Delay to sleep now; the next failure waits twice as long, up to
    /// the ceiling.
    pub(crate) fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(Duration::from_secs(BACKOFF_CEILING_SECS));
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = Duration::from_secs(BACKOFF_INITIAL_SECS);
    }
}

pub(crate) fn content_md5(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}

/// Runs shard `shard` until it empties or the client shuts down.
pub(crate) async fn run_shard(
    core: Arc<Core>,
    shard: usize,
) {
    let mut shutdown = core.shutdown_receiver();
    let mut backoff = Backoff::new();
    info!("poller shard {} started", shard);

    loop {
        let entries = core.registry.snapshot_shard(shard);
        if entries.is_empty() {
            if core.release_shard(shard) {
                break;
            }
            // A subscription arrived between the snapshot and the check.
            continue;
        }

        let keys: Vec<ConfigKey> = entries.iter().map(|e| e.key.clone()).collect();
        let has_fresh = entries.iter().any(|e| !e.probed);
        let items: Vec<ProbeItem> = entries
            .iter()
            .map(|e| ProbeItem {
                key: e.key.clone(),
                last_md5: e.last_md5.clone(),
            })
            .collect();

        let mut spec = RequestSpec::post(CONFIG_PATH);
        spec.form.push((PROBE_FIELD.to_string(), build_probe(&items)));
        spec.headers.push((
            HEADER_LONG_PULLING_TIMEOUT,
            core.config.pulling_timeout_ms.to_string(),
        ));
        if has_fresh {
            // Let the server answer immediately for never-probed keys.
            spec.headers.push((HEADER_LONG_PULLING_NO_HANGUP, "true".to_string()));
        }
        spec.timeout = core.config.pulling_timeout() + Duration::from_secs(PULLING_SLACK_SECS);
        spec.sign_scope = Some(SignScope {
            tenant: core.config.namespace.clone(),
            group: entries[0].key.group().to_string(),
        });
        core.registry.mark_probed(&keys);

        let result = tokio::select! {
            _ = shutdown.changed() => {
                debug!("poller shard {} received shutdown", shard);
                break;
            }
            result = core.agent.request(spec) => result,
        };

        match result {
            Ok(body) => {
                backoff.reset();
                let changed = parse_changed_keys(&body);
                if !changed.is_empty() {
                    debug!("shard {}: {} changed keys", shard, changed.len());
                }
                for key in changed {
                    handle_change(&core, &key).await;
                }
            }
            Err(e) => {
                let delay = backoff.next();
                error!(
                    "poller shard {} cycle failed: {}, retrying in {:?}",
                    shard, e, delay
                );
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    info!("poller shard {} stopped", shard);
}

/// Re-fetches one changed key and queues its callbacks.
async fn handle_change(
    core: &Arc<Core>,
    key: &ConfigKey,
) {
    if core.registry.callbacks_for(key).is_empty() {
        debug!("change for {} has no watcher anymore, ignored", key);
        return;
    }

    let raw = match core.fetch_for_watch(key).await {
        Ok(raw) => raw,
        Err(e) => {
            // Hash stays untouched so the next cycle retries this key.
            warn!("re-fetch failed for {}: {}", key, e);
            return;
        }
    };

    let md5 = raw.as_deref().map(content_md5).unwrap_or_default();
    core.registry.update_md5(key, &md5);

    let content = match &raw {
        Some(stored) => match core.envelope.open(key, stored).await {
            Ok(plain) => Some(plain),
            Err(e) => {
                error!("cannot open content for {}: {}", key, e);
                return;
            }
        },
        None => None,
    };

    let Some(dispatcher) = core.dispatcher() else {
        return;
    };
    let change = ConfigChange {
        data_id: key.data_id().to_string(),
        group: key.group().to_string(),
        tenant: key.tenant().to_string(),
        content,
        raw_content: raw,
    };
    for callback in core.registry.callbacks_for(key) {
        dispatcher.submit(key, callback, change.clone()).await;
    }
}
