//! Control-plane server pool.
//!
//! In address-server mode the pool asks the directory service for the
//! current host list and refreshes it every 30 seconds in the background;
//! otherwise the configured endpoint is the single server. Rotation
//! advances a shared index so that consecutive retries land on different
//! hosts.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::constants::ADDRESS_SERVER_PATH;
use crate::constants::ADDRESS_SERVER_TIMEOUT_SECS;
use crate::constants::SERVER_REFRESH_INTERVAL_SECS;
use crate::errors::Error;
use crate::errors::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServerEntry {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) tls: bool,
}

impl ServerEntry {
    pub(crate) fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

impl fmt::Display for ServerEntry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

struct PoolState {
    servers: Vec<ServerEntry>,
    offset: usize,
    /// Most recent rotation victim, kept for diagnostics.
    #[allow(dead_code)]
    last_failure: Option<(ServerEntry, Instant)>,
}

pub(crate) struct ServerPool {
    endpoint: String,
    cai_enabled: bool,
    tls: bool,
    http: reqwest::Client,
    state: Mutex<PoolState>,
    init_lock: tokio::sync::Mutex<()>,
    refresher_started: AtomicBool,
    shutdown: watch::Receiver<()>,
}

impl ServerPool {
    pub(crate) fn new(
        endpoint: String,
        cai_enabled: bool,
        tls: bool,
        shutdown: watch::Receiver<()>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(ADDRESS_SERVER_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::NoServerAvailable(format!("http client init: {e}")))?;

        Ok(Self {
            endpoint,
            cai_enabled,
            tls,
            http,
            state: Mutex::new(PoolState {
                servers: Vec::new(),
                offset: 0,
                last_failure: None,
            }),
            init_lock: tokio::sync::Mutex::new(()),
            refresher_started: AtomicBool::new(false),
            shutdown,
        })
    }

    /// The currently preferred server, initializing the pool on first use.
    pub(crate) async fn current(self: &Arc<Self>) -> Result<ServerEntry> {
        self.ensure_initialized().await?;
        let state = self.state.lock().expect("pool lock poisoned");
        Ok(state.servers[state.offset].clone())
    }

    /// Number of servers a single call may try before giving up.
    pub(crate) fn len(&self) -> usize {
        self.state.lock().expect("pool lock poisoned").servers.len()
    }

    /// Advances to the next server, noting when the previous one failed.
    pub(crate) fn rotate(&self) {
        let mut state = self.state.lock().expect("pool lock poisoned");
        if state.servers.is_empty() {
            return;
        }
        let failed = state.servers[state.offset].clone();
        state.offset = (state.offset + 1) % state.servers.len();
        let next = state.servers[state.offset].clone();
        state.last_failure = Some((failed.clone(), Instant::now()));
        warn!(failed = %failed, next = %next, "server rotated");
    }

    async fn ensure_initialized(self: &Arc<Self>) -> Result<()> {
        if !self.state.lock().expect("pool lock poisoned").servers.is_empty() {
            return Ok(());
        }

        let _guard = self.init_lock.lock().await;
        // Another caller may have finished initialization while we waited.
        if !self.state.lock().expect("pool lock poisoned").servers.is_empty() {
            return Ok(());
        }

        let servers = self.discover().await?;
        if servers.is_empty() {
            return Err(Error::NoServerAvailable(format!(
                "empty server list from {}",
                self.endpoint
            )));
        }
        info!("server list initialized: {} entries", servers.len());

        {
            let mut state = self.state.lock().expect("pool lock poisoned");
            state.servers = servers;
            state.offset = 0;
        }

        if self.cai_enabled {
            self.ensure_refresher();
        }
        Ok(())
    }

    /// Replaces the server list directly (for testing).
    #[cfg(test)]
    pub(crate) fn set_servers(
        &self,
        servers: Vec<ServerEntry>,
    ) {
        let mut state = self.state.lock().expect("pool lock poisoned");
        state.servers = servers;
        state.offset = 0;
    }

    async fn discover(&self) -> Result<Vec<ServerEntry>> {
        if !self.cai_enabled {
            return parse_host_port(&self.endpoint, self.default_port(), self.tls)
                .map(|entry| vec![entry]);
        }

        let url = format!("http://{}{}", self.endpoint, ADDRESS_SERVER_PATH);
        debug!("discovering servers from {}", url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::NoServerAvailable(format!("address server {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::NoServerAvailable(format!(
                "address server {} answered {}",
                url,
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| Error::NoServerAvailable(format!("address server body: {e}")))?;

        Ok(parse_server_lines(&body, self.default_port(), self.tls))
    }

    fn default_port(&self) -> u16 {
        if self.tls {
            443
        } else {
            8080
        }
    }

    /// Spawns the 30-second refresh loop exactly once.
    fn ensure_refresher(self: &Arc<Self>) {
        if self.refresher_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let pool = Arc::clone(self);
        let mut shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let interval = Duration::from_secs(SERVER_REFRESH_INTERVAL_SECS);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        debug!("server refresher stopping");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        pool.refresh_once().await;
                    }
                }
            }
        });
    }

    async fn refresh_once(&self) {
        match self.discover().await {
            Ok(servers) if servers.is_empty() => {
                // Keep the previous list; an empty answer is a directory
                // hiccup, not an empty cluster.
                error!("empty server list from {}, keeping previous", self.endpoint);
            }
            Ok(servers) => {
                let mut state = self.state.lock().expect("pool lock poisoned");
                if state.servers != servers {
                    info!("server list refreshed: {} entries", servers.len());
                    state.servers = servers;
                    state.offset = 0;
                }
            }
            Err(e) => {
                error!("server refresh failed: {}", e);
            }
        }
    }
}

/// Parses a `host[:port]` endpoint into a single entry.
fn parse_host_port(
    endpoint: &str,
    default_port: u16,
    tls: bool,
) -> Result<ServerEntry> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(Error::NoServerAvailable("empty endpoint".into()));
    }
    match endpoint.split_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::NoServerAvailable(format!("bad server address: {endpoint}")))?;
            Ok(ServerEntry {
                host: host.to_string(),
                port,
                tls,
            })
        }
        None => Ok(ServerEntry {
            host: endpoint.to_string(),
            port: default_port,
            tls,
        }),
    }
}

/// Parses the address-server body, one `host[:port]` per line.
/// Malformed lines are skipped.
fn parse_server_lines(
    body: &str,
    default_port: u16,
    tls: bool,
) -> Vec<ServerEntry> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match parse_host_port(line, default_port, tls) {
            Ok(entry) => Some(entry),
            Err(_) => {
                warn!("bad server address ignored: {}", line);
                None
            }
        })
        .collect()
}
