use std::fmt;
use std::path::PathBuf;

use crate::constants::CIPHER_PREFIX;
use crate::constants::DEFAULT_GROUP;
use crate::constants::DEFAULT_TENANT;
use crate::errors::Error;
use crate::errors::Result;

/// The three-part key of a configuration item.
///
/// `group` falls back to `DEFAULT_GROUP` when blank; `tenant` may be empty
/// (the wire omits it, the on-disk layout substitutes [`DEFAULT_TENANT`]).
/// Two keys are equal iff all three components match byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigKey {
    data_id: String,
    group: String,
    tenant: String,
}

impl ConfigKey {
    /// Validates and normalizes the key components.
    ///
    /// # Errors
    /// `Error::InvalidParam` when `data_id` is empty or either component
    /// contains characters outside `[a-zA-Z0-9._:-]`.
    pub fn new(
        data_id: &str,
        group: &str,
        tenant: &str,
    ) -> Result<Self> {
        let group = group.trim();
        let group = if group.is_empty() { DEFAULT_GROUP } else { group };

        if !is_valid(data_id) {
            return Err(Error::InvalidParam(format!("invalid dataId: {data_id:?}")));
        }
        if !is_valid(group) {
            return Err(Error::InvalidParam(format!("invalid group: {group:?}")));
        }

        Ok(Self {
            data_id: data_id.to_string(),
            group: group.to_string(),
            tenant: tenant.to_string(),
        })
    }

    pub fn data_id(&self) -> &str {
        &self.data_id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Whether this item goes through the KMS envelope.
    pub fn is_ciphered(&self) -> bool {
        self.data_id.starts_with(CIPHER_PREFIX)
    }

    /// Path of this key's record under a store root.
    ///
    /// Layout is `{tenant}/{group}/{dataId}` with the empty tenant mapped
    /// to the `DEFAULT_TENANT` sentinel directory.
    pub(crate) fn relative_path(&self) -> PathBuf {
        let tenant = if self.tenant.is_empty() { DEFAULT_TENANT } else { &self.tenant };
        PathBuf::from(tenant).join(&self.group).join(&self.data_id)
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}+{}+{}", self.data_id, self.group, self.tenant)
    }
}

/// Key components accept word characters plus `.`, `:`, `_` and `-`.
fn is_valid(component: &str) -> bool {
    !component.is_empty()
        && component
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '_' | '-'))
}
