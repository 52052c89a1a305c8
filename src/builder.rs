use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::auth::CredentialCache;
use crate::auth::CredentialProvider;
use crate::auth::StaticCredentials;
use crate::client::ConfigClient;
use crate::client::Core;
use crate::config::ClientConfig;
use crate::errors::Error;
use crate::errors::Result;
use crate::kms::Envelope;
use crate::kms::KmsProvider;
use crate::server_pool::ServerPool;
use crate::store::LocalStore;
use crate::transport::HttpAgent;

/// Configurable builder for [`ConfigClient`] instances.
///
/// # Typical Usage Flow
/// 1. Create with [`ConfigClient::builder`]
/// 2. Chain configuration methods
/// 3. Finalize with `.build()`
///
/// Construction performs no I/O; server discovery happens lazily on the
/// first request.
pub struct ClientBuilder {
    config: ClientConfig,
    credential_provider: Option<Arc<dyn CredentialProvider>>,
    kms_provider: Option<Arc<dyn KmsProvider>>,
}

impl ClientBuilder {
    /// New builder with default config and the given endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            config: ClientConfig {
                endpoint: endpoint.into(),
                ..ClientConfig::default()
            },
            credential_provider: None,
            kms_provider: None,
        }
    }

    /// Tenant namespace (default: empty).
    pub fn namespace(
        mut self,
        namespace: impl Into<String>,
    ) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// Static access-key/secret pair for request signing.
    pub fn credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.config.access_key = Some(access_key.into());
        self.config.secret_key = Some(secret_key.into());
        self
    }

    /// Custom credential source, e.g. an STS/RAM-role oracle.
    pub fn credential_provider(
        mut self,
        role_name: impl Into<String>,
        provider: Arc<dyn CredentialProvider>,
    ) -> Self {
        self.config.ram_role_name = Some(role_name.into());
        self.credential_provider = Some(provider);
        self
    }

    /// Enables the KMS envelope for `cipher-` data ids.
    pub fn kms(
        mut self,
        key_id: impl Into<String>,
        region_id: impl Into<String>,
        provider: Arc<dyn KmsProvider>,
    ) -> Self {
        self.config.kms_enabled = true;
        self.config.key_id = key_id.into();
        self.config.region_id = region_id.into();
        self.kms_provider = Some(provider);
        self
    }

    /// Use TLS towards the control plane (default: off).
    pub fn tls(
        mut self,
        enabled: bool,
    ) -> Self {
        self.config.tls_enabled = enabled;
        self
    }

    /// Address-server discovery mode (default: on). When off, the
    /// endpoint itself is the single control-plane server.
    pub fn address_server(
        mut self,
        enabled: bool,
    ) -> Self {
        self.config.cai_enabled = enabled;
        self
    }

    /// Completely replaces the configuration assembled so far.
    ///
    /// Settings made through individual methods before this call are
    /// discarded; oracle providers are kept.
    pub fn set_config(
        mut self,
        config: ClientConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Build the client with the current configuration.
    pub fn build(self) -> Result<ConfigClient> {
        self.config.validate()?;
        let config = self.config;

        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let pool = Arc::new(ServerPool::new(
            config.endpoint.clone(),
            config.cai_enabled,
            config.tls_enabled,
            shutdown_rx.clone(),
        )?);

        let credentials = if config.signing_enabled() {
            let provider: Arc<dyn CredentialProvider> = match &self.credential_provider {
                Some(provider) => provider.clone(),
                None => {
                    if config.ram_role_name.is_some() {
                        return Err(Error::Credential(
                            "ram_role_name is set but no credential provider was supplied".into(),
                        ));
                    }
                    Arc::new(StaticCredentials::new(
                        config.access_key.clone().expect("checked by signing_enabled"),
                        config.secret_key.clone().expect("checked by signing_enabled"),
                    ))
                }
            };
            Some(Arc::new(CredentialCache::new(provider)))
        } else {
            None
        };

        let envelope = if config.kms_enabled {
            let provider = self.kms_provider.ok_or_else(|| {
                Error::Encrypt("kms_enabled is set but no KMS provider was supplied".into())
            })?;
            Envelope::new(Some(provider), config.key_id.clone(), true)
        } else {
            Envelope::disabled()
        };

        let agent = HttpAgent::new(pool, credentials, config.app_name.clone())?;
        let store = LocalStore::new(config.failover_base.clone(), config.snapshot_base.clone());

        info!(endpoint = %config.endpoint, tenant = %config.namespace, "client initialized");
        let core = Core::new(config, agent, store, envelope, shutdown_tx, shutdown_rx);
        Ok(ConfigClient::from_core(Arc::new(core)))
    }
}
