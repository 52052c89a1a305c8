//! The configuration client.
//!
//! Read path priority: failover overlay, then the control plane (rotating
//! servers on failure), then the local snapshot. Every successful remote
//! fetch writes through to the snapshot so the process can survive a full
//! outage with the last observed values.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::builder::ClientBuilder;
use crate::config::ClientConfig;
use crate::constants::BASESTONE_PATH;
use crate::constants::CONFIG_PATH;
use crate::constants::DATUM_PATH;
use crate::constants::LIST_METHOD;
use crate::constants::PUBLISH_METHOD;
use crate::constants::REMOVE_METHOD;
use crate::errors::Error;
use crate::errors::Result;
use crate::key::ConfigKey;
use crate::kms::Envelope;
use crate::store::LocalStore;
use crate::transport::HttpAgent;
use crate::transport::RequestSpec;
use crate::watch::dispatcher::Dispatcher;
use crate::watch::dispatcher::DispatcherWorkers;
use crate::watch::puller;
use crate::watch::registry::WatchRegistry;
use crate::watch::ConfigChange;
use crate::watch::WatchHandle;

/// One page of the configuration listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPage {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub page_number: u64,
    #[serde(default)]
    pub pages_available: u64,
    #[serde(default)]
    pub page_items: Vec<ConfigItem>,
}

/// One listed configuration item.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigItem {
    pub data_id: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// Key coordinates returned by [`ConfigClient::list_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSummary {
    pub data_id: String,
    pub group: String,
}

struct WatchState {
    dispatcher: Option<(Arc<Dispatcher>, DispatcherWorkers)>,
    pullers: HashMap<usize, JoinHandle<()>>,
    shutdown: bool,
}

/// Shared internals behind the cloneable client handle.
pub(crate) struct Core {
    pub(crate) config: ClientConfig,
    pub(crate) agent: HttpAgent,
    pub(crate) store: LocalStore,
    pub(crate) envelope: Envelope,
    pub(crate) registry: WatchRegistry,
    watch: Mutex<WatchState>,
    shutdown_tx: watch::Sender<()>,
    shutdown_rx: watch::Receiver<()>,
}

impl Core {
    pub(crate) fn new(
        config: ClientConfig,
        agent: HttpAgent,
        store: LocalStore,
        envelope: Envelope,
        shutdown_tx: watch::Sender<()>,
        shutdown_rx: watch::Receiver<()>,
    ) -> Self {
        let registry = WatchRegistry::new(config.pulling_config_size);
        Self {
            config,
            agent,
            store,
            envelope,
            registry,
            watch: Mutex::new(WatchState {
                dispatcher: None,
                pullers: HashMap::new(),
                shutdown: false,
            }),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub(crate) fn shutdown_receiver(&self) -> watch::Receiver<()> {
        self.shutdown_rx.clone()
    }

    pub(crate) fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
        let state = self.watch.lock().expect("watch lock poisoned");
        state.dispatcher.as_ref().map(|(dispatcher, _)| dispatcher.clone())
    }

    /// Called by a poller that found its shard empty. Returns true when
    /// the shard is still empty and the task should exit; the handle is
    /// dropped under the same lock that spawns replacements, so a racing
    /// `add_watcher` either sees the running task or respawns one.
    pub(crate) fn release_shard(
        &self,
        shard: usize,
    ) -> bool {
        let mut state = self.watch.lock().expect("watch lock poisoned");
        if self.registry.shard_population(shard) == 0 {
            state.pullers.remove(&shard);
            true
        } else {
            false
        }
    }

    fn ensure_watch_running(
        self: &Arc<Self>,
        shard: usize,
    ) {
        let mut state = self.watch.lock().expect("watch lock poisoned");
        if state.shutdown {
            warn!("watcher added after shutdown, ignored");
            return;
        }
        if state.dispatcher.is_none() {
            let (dispatcher, workers) = Dispatcher::spawn(self.config.callback_thread_num);
            state.dispatcher = Some((Arc::new(dispatcher), workers));
            info!("callback dispatcher started: {} workers", self.config.callback_thread_num);
        }
        let running = state.pullers.get(&shard).map(|h| !h.is_finished()).unwrap_or(false);
        if !running {
            let core = Arc::clone(self);
            state.pullers.insert(shard, tokio::spawn(puller::run_shard(core, shard)));
        }
    }

    /// Remote fetch used by the pollers: the failover overlay is bypassed
    /// for freshness and there is no snapshot fallback, but a hit still
    /// writes through.
    pub(crate) async fn fetch_for_watch(
        &self,
        key: &ConfigKey,
    ) -> Result<Option<String>> {
        self.fetch_raw(key, self.config.default_timeout(), true, false).await
    }

    /// Read ladder over raw (possibly ciphered) content: failover
    /// overlay, then the control plane, then the snapshot fallback.
    async fn fetch_raw(
        &self,
        key: &ConfigKey,
        timeout: Duration,
        no_snapshot: bool,
        use_failover: bool,
    ) -> Result<Option<String>> {
        if use_failover {
            if let Some(content) = self.store.read_failover(key) {
                debug!("{} served from failover directory", key);
                return Ok(Some(content));
            }
        }

        let mut spec = RequestSpec::get(CONFIG_PATH);
        spec.query = key_fields(key);
        spec.timeout = timeout;

        match self.agent.request(spec).await {
            Ok(body) => {
                self.store.write_snapshot(key, &body);
                Ok(Some(body))
            }
            Err(Error::Http { status: 404, .. }) => {
                warn!("{} not found on server, dropping snapshot", key);
                self.store.delete_snapshot(key);
                Ok(None)
            }
            Err(e @ Error::Http { status: 403, .. }) => {
                error!("no permission for {}", key);
                Err(e)
            }
            Err(e @ Error::Http { status: 409, .. }) => {
                error!("{} is being modified concurrently", key);
                Err(e)
            }
            Err(e @ Error::Http { .. }) => Err(e),
            Err(e @ Error::NoServerAvailable(_)) => {
                if no_snapshot {
                    return Err(e);
                }
                match self.store.read_snapshot(key) {
                    Some(content) => {
                        warn!("{} served from snapshot after server failure", key);
                        Ok(Some(content))
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }
}

/// Client for the configuration control plane.
///
/// Cloning is cheap and every clone drives the same connection pool,
/// snapshot store and watch engine. Construct through
/// [`ConfigClient::builder`].
///
/// ```no_run
/// use acm_client::ConfigClient;
///
/// #[tokio::main]
/// async fn main() {
///     let client = ConfigClient::builder("acm.example.com:8080")
///         .namespace("my-tenant")
///         .credentials("ak", "sk")
///         .build()
///         .unwrap();
///
///     let value = client.get("app.properties", "DEFAULT_GROUP").await.unwrap();
///     println!("current value: {:?}", value);
///
///     let handle = client
///         .add_watcher("app.properties", "DEFAULT_GROUP", |change| {
///             println!("changed: {:?}", change.content);
///         })
///         .unwrap();
///
///     // ...
///     client.remove_watcher("app.properties", "DEFAULT_GROUP", handle).unwrap();
///     client.shutdown().await;
/// }
/// ```
#[derive(Clone)]
pub struct ConfigClient {
    core: Arc<Core>,
}

impl ConfigClient {
    /// Starts building a client against the given endpoint.
    pub fn builder(endpoint: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(endpoint)
    }

    pub(crate) fn from_core(core: Arc<Core>) -> Self {
        Self { core }
    }

    fn key(
        &self,
        data_id: &str,
        group: &str,
    ) -> Result<ConfigKey> {
        ConfigKey::new(data_id, group, &self.core.config.namespace)
    }

    /// Current value of one item, `None` when absent or deleted.
    ///
    /// Ciphered items (`cipher-` prefix) are opened through the KMS
    /// envelope before being returned.
    pub async fn get(
        &self,
        data_id: &str,
        group: &str,
    ) -> Result<Option<String>> {
        self.get_with(data_id, group, None, None).await
    }

    /// [`get`](Self::get) with explicit timeout and snapshot policy.
    pub async fn get_with(
        &self,
        data_id: &str,
        group: &str,
        timeout: Option<Duration>,
        no_snapshot: Option<bool>,
    ) -> Result<Option<String>> {
        let key = self.key(data_id, group)?;
        let raw = self.get_raw_inner(&key, timeout, no_snapshot).await?;
        match raw {
            Some(stored) => Ok(Some(self.core.envelope.open(&key, &stored).await?)),
            None => Ok(None),
        }
    }

    /// Current value without KMS opening; ciphered items come back as
    /// ciphertext.
    pub async fn get_raw(
        &self,
        data_id: &str,
        group: &str,
    ) -> Result<Option<String>> {
        let key = self.key(data_id, group)?;
        self.get_raw_inner(&key, None, None).await
    }

    async fn get_raw_inner(
        &self,
        key: &ConfigKey,
        timeout: Option<Duration>,
        no_snapshot: Option<bool>,
    ) -> Result<Option<String>> {
        let timeout = timeout.unwrap_or_else(|| self.core.config.default_timeout());
        let no_snapshot = no_snapshot.unwrap_or(self.core.config.no_snapshot);
        self.core.fetch_raw(key, timeout, no_snapshot, true).await
    }

    /// Creates or updates one item.
    ///
    /// Empty content is rejected; use [`remove`](Self::remove) to delete.
    /// Ciphered items are sealed through the KMS envelope before leaving
    /// the process.
    pub async fn publish(
        &self,
        data_id: &str,
        group: &str,
        content: &str,
    ) -> Result<()> {
        self.publish_with(data_id, group, content, None).await
    }

    pub async fn publish_with(
        &self,
        data_id: &str,
        group: &str,
        content: &str,
        timeout: Option<Duration>,
    ) -> Result<()> {
        if content.is_empty() {
            return Err(Error::InvalidParam(
                "cannot publish empty content, use remove instead".into(),
            ));
        }
        let key = self.key(data_id, group)?;
        let sealed = self.core.envelope.seal(&key, content).await?;

        let mut spec = RequestSpec::post(BASESTONE_PATH);
        spec.query.push(("method".to_string(), PUBLISH_METHOD.to_string()));
        spec.form = key_fields(&key);
        spec.form.push(("content".to_string(), sealed));
        spec.form.push(("appName".to_string(), self.core.config.app_name.clone()));
        spec.timeout = timeout.unwrap_or_else(|| self.core.config.default_timeout());

        let response = self.core.agent.request(spec).await.map_err(log_privilege(&key))?;
        info!("published {}, server said: {}", key, truncate(&response));
        Ok(())
    }

    /// Deletes one item.
    pub async fn remove(
        &self,
        data_id: &str,
        group: &str,
    ) -> Result<()> {
        self.remove_with(data_id, group, None).await
    }

    pub async fn remove_with(
        &self,
        data_id: &str,
        group: &str,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let key = self.key(data_id, group)?;

        let mut spec = RequestSpec::post(DATUM_PATH);
        spec.query.push(("method".to_string(), REMOVE_METHOD.to_string()));
        spec.form = key_fields(&key);
        spec.timeout = timeout.unwrap_or_else(|| self.core.config.default_timeout());

        let response = self.core.agent.request(spec).await.map_err(log_privilege(&key))?;
        info!("removed {}, server said: {}", key, truncate(&response));
        Ok(())
    }

    /// One page of the namespace's items, straight from the server.
    pub async fn list(
        &self,
        page_no: u64,
        page_size: u64,
    ) -> Result<ConfigPage> {
        let mut spec = RequestSpec::get(BASESTONE_PATH);
        spec.query.push(("method".to_string(), LIST_METHOD.to_string()));
        spec.query.push(("pageNo".to_string(), page_no.to_string()));
        spec.query.push(("pageSize".to_string(), page_size.to_string()));
        if !self.core.config.namespace.is_empty() {
            spec.query.push(("tenant".to_string(), self.core.config.namespace.clone()));
        }
        spec.timeout = self.core.config.default_timeout();

        let body = self.core.agent.request(spec).await?;
        serde_json::from_str(&body).map_err(|e| Error::InvalidResponse(e.to_string()))
    }

    /// Every item of the namespace, optionally filtered.
    ///
    /// Filters are applied client side after all pages are aggregated;
    /// the prefix match is case sensitive.
    pub async fn list_all(
        &self,
        group: Option<&str>,
        prefix: Option<&str>,
    ) -> Result<Vec<ConfigSummary>> {
        const PAGE_SIZE: u64 = 200;

        let matches = |item: &ConfigItem| {
            group.map(|g| item.group == g).unwrap_or(true)
                && prefix.map(|p| item.data_id.starts_with(p)).unwrap_or(true)
        };
        let summarize = |item: &ConfigItem| ConfigSummary {
            data_id: item.data_id.clone(),
            group: item.group.clone(),
        };

        let first = self.list(1, PAGE_SIZE).await?;
        debug!("{} items in namespace", first.total_count);
        let mut out: Vec<ConfigSummary> =
            first.page_items.iter().filter(|i| matches(i)).map(summarize).collect();

        for page_no in 2..=first.pages_available {
            let page = self.list(page_no, PAGE_SIZE).await?;
            out.extend(page.page_items.iter().filter(|i| matches(i)).map(summarize));
        }
        Ok(out)
    }

    /// Registers a callback for changes of one item.
    ///
    /// The callback fires once shortly after registration when the item
    /// already exists on the server, then on every observed change or
    /// deletion. Callbacks run on the dispatch pool; panics are caught
    /// and logged.
    pub fn add_watcher(
        &self,
        data_id: &str,
        group: &str,
        callback: impl Fn(ConfigChange) + Send + Sync + 'static,
    ) -> Result<WatchHandle> {
        let key = self.key(data_id, group)?;
        let outcome = self.core.registry.add(key.clone(), Arc::new(callback));
        info!("watcher added for {} in shard {}", key, outcome.shard);
        self.core.ensure_watch_running(outcome.shard);
        Ok(outcome.handle)
    }

    /// Unregisters one callback by the handle `add_watcher` returned.
    /// After this returns the callback sees no change observed by a
    /// later poll cycle.
    pub fn remove_watcher(
        &self,
        data_id: &str,
        group: &str,
        handle: WatchHandle,
    ) -> Result<()> {
        let key = self.key(data_id, group)?;
        if !self.core.registry.remove(&key, handle) {
            warn!("no such watcher on {}", key);
        }
        Ok(())
    }

    /// Unregisters every callback of one item.
    pub fn remove_watchers(
        &self,
        data_id: &str,
        group: &str,
    ) -> Result<()> {
        let key = self.key(data_id, group)?;
        let dropped = self.core.registry.remove_all(&key);
        info!("{} watchers removed from {}", dropped, key);
        Ok(())
    }

    /// Number of live subscriptions (for diagnostics and tests).
    pub fn watcher_count(&self) -> usize {
        self.core.registry.subscription_count()
    }

    /// Hash of the last content observed for a watched item, empty
    /// before the first observation, `None` without a subscription.
    #[doc(hidden)]
    pub fn watcher_md5(
        &self,
        data_id: &str,
        group: &str,
    ) -> Option<String> {
        let key = self.key(data_id, group).ok()?;
        self.core.registry.last_md5(&key)
    }

    /// Signals every background task, waits for the pollers to finish
    /// their cycle (bounded by the long-poll hang time) and drains the
    /// callback queue.
    pub async fn shutdown(&self) {
        let _ = self.core.shutdown_tx.send(());

        let (pullers, dispatcher) = {
            let mut state = self.core.watch.lock().expect("watch lock poisoned");
            state.shutdown = true;
            (
                std::mem::take(&mut state.pullers),
                state.dispatcher.take(),
            )
        };

        let grace = self.core.config.pulling_timeout();
        let joined = futures::future::join_all(pullers.into_iter().map(|(_, handle)| handle));
        if tokio::time::timeout(grace, joined).await.is_err() {
            warn!("pollers did not stop within {:?}", grace);
        }

        if let Some((dispatcher, workers)) = dispatcher {
            drop(dispatcher);
            workers.join().await;
        }
        info!("client shut down");
    }
}

/// `dataId`/`group`/`tenant` fields shared by query strings and forms.
/// The tenant is omitted entirely when the namespace is empty.
fn key_fields(key: &ConfigKey) -> Vec<(String, String)> {
    let mut fields = vec![
        ("dataId".to_string(), key.data_id().to_string()),
        ("group".to_string(), key.group().to_string()),
    ];
    if !key.tenant().is_empty() {
        fields.push(("tenant".to_string(), key.tenant().to_string()));
    }
    fields
}

fn log_privilege(key: &ConfigKey) -> impl FnOnce(Error) -> Error + '_ {
    move |e| {
        if let Error::Http { status: 403, .. } = &e {
            error!("insufficient privilege for {}", key);
        }
        e
    }
}

fn truncate(s: &str) -> &str {
    let max = 100;
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
