//! Request signing and credential sourcing.
//!
//! Every signed request carries `Spas-AccessKey`, an optional
//! `Spas-SecurityToken`, a millisecond `Timestamp` and a
//! `Spas-Signature` computed as base64(HMAC-SHA1(sk, sign_string)).
//! The sign string is `{tenant}+{group}+{timestamp}` with empty
//! components (and their separator) elided; downstream verification
//! rejects any other assembly by answering 403.

use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::Hmac;
use hmac::Mac;
use sha1::Sha1;
use tracing::debug;

use crate::constants::CREDENTIAL_EXPIRY_SKEW_SECS;
use crate::errors::Result;

type HmacSha1 = Hmac<Sha1>;

/// A signing credential, static or leased from the STS oracle.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_key: String,
    pub secret_key: String,
    /// Present only for STS-leased credentials.
    pub security_token: Option<String>,
    /// Lease expiry. `None` means the credential never expires.
    pub expires_at: Option<SystemTime>,
}

impl Credential {
    /// Static credential without expiry.
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            security_token: None,
            expires_at: None,
        }
    }

    fn expiring_within(
        &self,
        window: Duration,
    ) -> bool {
        match self.expires_at {
            Some(expiry) => match expiry.duration_since(SystemTime::now()) {
                Ok(remaining) => remaining < window,
                Err(_) => true,
            },
            None => false,
        }
    }
}

/// Source of signing credentials.
///
/// The RAM/STS metadata service is one implementation; a fixed
/// access-key/secret pair is another. Implementations must be cheap to
/// call repeatedly: the client caches the result and only re-fetches
/// close to expiry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self) -> Result<Credential>;
}

/// Provider returning a fixed credential.
pub struct StaticCredentials {
    credential: Credential,
}

impl StaticCredentials {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            credential: Credential::new(access_key, secret_key),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn fetch(&self) -> Result<Credential> {
        Ok(self.credential.clone())
    }
}

/// Caches the provider's credential, refreshing shortly before expiry.
pub(crate) struct CredentialCache {
    provider: Arc<dyn CredentialProvider>,
    cached: ArcSwap<Option<Credential>>,
}

impl CredentialCache {
    pub(crate) fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            cached: ArcSwap::from_pointee(None),
        }
    }

    /// Returns a credential with at least the expiry skew remaining.
    pub(crate) async fn current(&self) -> Result<Credential> {
        let skew = Duration::from_secs(CREDENTIAL_EXPIRY_SKEW_SECS);
        if let Some(credential) = self.cached.load().as_ref() {
            if !credential.expiring_within(skew) {
                return Ok(credential.clone());
            }
        }

        let fresh = self.provider.fetch().await?;
        debug!(access_key = %fresh.access_key, "credential refreshed");
        self.cached.store(Arc::new(Some(fresh.clone())));
        Ok(fresh)
    }
}

/// Scope of a signature: the tenant and primary group of the request.
#[derive(Debug, Clone, Default)]
pub(crate) struct SignScope {
    pub(crate) tenant: String,
    pub(crate) group: String,
}

/// Assembles the string to be signed.
///
/// Empty components are elided together with their trailing `+`, so the
/// possible shapes are `tenant+group+ts`, `tenant+ts`, `group+ts` and the
/// empty string (in which case no signature is attached at all).
pub(crate) fn sign_string(
    tenant: &str,
    group: &str,
    timestamp_ms: &str,
) -> String {
    let mut out = String::new();
    if !tenant.is_empty() {
        out.push_str(tenant);
        out.push('+');
    }
    if !group.is_empty() {
        out.push_str(group);
        out.push('+');
    }
    if !out.is_empty() {
        out.push_str(timestamp_ms);
    }
    out
}

/// base64(HMAC-SHA1(secret, message)).
pub(crate) fn signature(
    secret: &str,
    message: &str,
) -> String {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC key should be valid");
    mac.update(message.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Auth headers for one request.
///
/// The signature header is omitted when the scope produces an empty sign
/// string, matching server-side verification.
pub(crate) fn auth_headers(
    credential: &Credential,
    scope: &SignScope,
    timestamp_ms: &str,
) -> Vec<(&'static str, String)> {
    use crate::constants::HEADER_ACCESS_KEY;
    use crate::constants::HEADER_SECURITY_TOKEN;
    use crate::constants::HEADER_SIGNATURE;
    use crate::constants::HEADER_TIMESTAMP;

    let mut headers = vec![
        (HEADER_ACCESS_KEY, credential.access_key.clone()),
        (HEADER_TIMESTAMP, timestamp_ms.to_string()),
    ];
    if let Some(token) = &credential.security_token {
        headers.push((HEADER_SECURITY_TOKEN, token.clone()));
    }

    let message = sign_string(&scope.tenant, &scope.group, timestamp_ms);
    if !message.is_empty() {
        headers.push((HEADER_SIGNATURE, signature(&credential.secret_key, &message)));
    }
    headers
}
