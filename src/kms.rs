//! KMS envelope indirection for ciphered items.
//!
//! Items whose data id starts with `cipher-` store ciphertext on the
//! control plane and in the local snapshot; plaintext only exists in the
//! caller's hands. The cryptographic service itself is an opaque oracle
//! behind [`KmsProvider`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Error;
use crate::errors::Result;
use crate::key::ConfigKey;

/// Opaque encrypt/decrypt oracle.
///
/// Implementations wrap a KMS endpoint (or a test double). Errors should
/// be reported through [`Error::Encrypt`] / [`Error::Decrypt`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KmsProvider: Send + Sync {
    async fn encrypt(
        &self,
        key_id: &str,
        plaintext: &str,
    ) -> Result<String>;

    async fn decrypt(
        &self,
        ciphertext: &str,
    ) -> Result<String>;
}

/// Applies the KMS oracle to ciphered keys and passes everything else
/// through untouched.
pub(crate) struct Envelope {
    provider: Option<Arc<dyn KmsProvider>>,
    key_id: String,
    enabled: bool,
}

impl Envelope {
    pub(crate) fn new(
        provider: Option<Arc<dyn KmsProvider>>,
        key_id: String,
        enabled: bool,
    ) -> Self {
        Self {
            provider,
            key_id,
            enabled,
        }
    }

    pub(crate) fn disabled() -> Self {
        Self::new(None, String::new(), false)
    }

    fn applies_to(
        &self,
        key: &ConfigKey,
    ) -> bool {
        self.enabled && key.is_ciphered() && self.provider.is_some()
    }

    /// Content as it should be sent to the control plane.
    pub(crate) async fn seal(
        &self,
        key: &ConfigKey,
        plaintext: &str,
    ) -> Result<String> {
        if !self.applies_to(key) {
            return Ok(plaintext.to_string());
        }
        let provider = self.provider.as_ref().expect("checked by applies_to");
        provider
            .encrypt(&self.key_id, plaintext)
            .await
            .map_err(|e| Error::Encrypt(e.to_string()))
    }

    /// Content as it should be handed to the caller.
    pub(crate) async fn open(
        &self,
        key: &ConfigKey,
        stored: &str,
    ) -> Result<String> {
        if !self.applies_to(key) {
            return Ok(stored.to_string());
        }
        let provider = self.provider.as_ref().expect("checked by applies_to");
        provider.decrypt(stored).await.map_err(|e| Error::Decrypt(e.to_string()))
    }
}
