//! Client configuration.
//!
//! Defaults live in code, a configuration file named by `CONFIG_PATH` can
//! override them, and `ACM__*` environment variables override both.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::errors::Error;
use crate::errors::Result;

/// All tunables of the configuration client.
///
/// Field-level defaults use helper functions prefixed with `default_` so a
/// partially specified file or environment still yields a full config.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    /// Address server `host[:port]`, or the control-plane server itself
    /// when `cai_enabled` is false.
    #[serde(default)]
    pub endpoint: String,

    /// Tenant namespace. Empty means the default namespace.
    #[serde(default)]
    pub namespace: String,

    /// Access key for request signing.
    #[serde(default)]
    pub access_key: Option<String>,

    /// Secret key for request signing.
    #[serde(default)]
    pub secret_key: Option<String>,

    /// RAM role name. When set, credentials come from the STS oracle
    /// instead of `access_key`/`secret_key`.
    #[serde(default)]
    pub ram_role_name: Option<String>,

    /// Per-request timeout for plain (non-long-poll) calls, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Scheme selection for control-plane servers.
    #[serde(default)]
    pub tls_enabled: bool,

    /// Attach auth headers to outbound requests. Effective only when a
    /// credential source is configured.
    #[serde(default = "default_true")]
    pub auth_enabled: bool,

    /// Address-server discovery mode. When false, `endpoint` is used as the
    /// single control-plane server.
    #[serde(default = "default_true")]
    pub cai_enabled: bool,

    /// Server-side hang time of a long poll, in milliseconds.
    #[serde(default = "default_pulling_timeout_ms")]
    pub pulling_timeout_ms: u64,

    /// Maximum subscriptions per poller shard.
    #[serde(default = "default_pulling_config_size")]
    pub pulling_config_size: usize,

    /// Number of callback dispatch workers.
    #[serde(default = "default_callback_thread_num")]
    pub callback_thread_num: usize,

    /// Read-only overlay consulted before the network.
    #[serde(default = "default_failover_base")]
    pub failover_base: PathBuf,

    /// Write-through cache populated by successful fetches.
    #[serde(default = "default_snapshot_base")]
    pub snapshot_base: PathBuf,

    /// Application name reported to the control plane.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Skip the snapshot fallback on `get` when every server failed.
    #[serde(default)]
    pub no_snapshot: bool,

    /// Engage the KMS envelope for `cipher-` data ids.
    #[serde(default)]
    pub kms_enabled: bool,

    /// KMS region.
    #[serde(default)]
    pub region_id: String,

    /// KMS access key, falling back to `access_key` when unset.
    #[serde(default)]
    pub kms_ak: Option<String>,

    /// KMS secret, falling back to `secret_key` when unset.
    #[serde(default)]
    pub kms_secret: Option<String>,

    /// KMS master key id used on encrypt.
    #[serde(default)]
    pub key_id: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            namespace: String::new(),
            access_key: None,
            secret_key: None,
            ram_role_name: None,
            default_timeout_ms: default_timeout_ms(),
            tls_enabled: false,
            auth_enabled: true,
            cai_enabled: true,
            pulling_timeout_ms: default_pulling_timeout_ms(),
            pulling_config_size: default_pulling_config_size(),
            callback_thread_num: default_callback_thread_num(),
            failover_base: default_failover_base(),
            snapshot_base: default_snapshot_base(),
            app_name: default_app_name(),
            no_snapshot: false,
            kms_enabled: false,
            region_id: String::new(),
            kms_ak: None,
            kms_secret: None,
            key_id: String::new(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Sources are merged in order (later overrides earlier):
    /// 1. Type defaults
    /// 2. File named by the `CONFIG_PATH` environment variable, if set
    /// 3. `ACM__*` environment variables (`ACM__PULLING_TIMEOUT_MS=15000`)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("ACM")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration consistency.
    ///
    /// # Errors
    /// `Error::Config` naming the violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "endpoint must not be empty".into(),
            )));
        }
        if self.pulling_config_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "pulling_config_size must be positive".into(),
            )));
        }
        if self.callback_thread_num == 0 {
            return Err(Error::Config(ConfigError::Message(
                "callback_thread_num must be positive".into(),
            )));
        }
        if self.kms_enabled && self.region_id.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "kms_enabled requires a region_id".into(),
            )));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn pulling_timeout(&self) -> Duration {
        Duration::from_millis(self.pulling_timeout_ms)
    }

    /// Whether requests should carry auth headers at all.
    pub(crate) fn signing_enabled(&self) -> bool {
        self.auth_enabled
            && ((self.access_key.is_some() && self.secret_key.is_some())
                || self.ram_role_name.is_some())
    }

    /// KMS credential pair, falling back to the client pair. Consumed by
    /// [`KmsProvider`](crate::KmsProvider) implementations.
    pub fn kms_credentials(&self) -> Option<(&str, &str)> {
        let ak = self.kms_ak.as_deref().or(self.access_key.as_deref())?;
        let sk = self.kms_secret.as_deref().or(self.secret_key.as_deref())?;
        Some((ak, sk))
    }
}

fn default_timeout_ms() -> u64 {
    3_000
}

fn default_pulling_timeout_ms() -> u64 {
    30_000
}

fn default_pulling_config_size() -> usize {
    3_000
}

fn default_callback_thread_num() -> usize {
    10
}

fn default_failover_base() -> PathBuf {
    PathBuf::from("acm-data/data")
}

fn default_snapshot_base() -> PathBuf {
    PathBuf::from("acm-data/snapshot")
}

fn default_app_name() -> String {
    "ACM-SDK".to_string()
}

fn default_true() -> bool {
    true
}
