//! Error hierarchy for the configuration client.
//!
//! Transport problems are recovered internally by server rotation; what
//! surfaces here is either a caller mistake (4xx, invalid parameters) or an
//! exhausted recovery path (every server in the pool failed).

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Every server in the pool failed with a transport error or 5xx
    /// within a single call, or discovery never produced a server list.
    #[error("no server available: {0}")]
    NoServerAvailable(String),

    /// The control plane rejected the request. 4xx responses are never
    /// retried on another server.
    #[error("request rejected with status {status}: {body}")]
    Http { status: u16, body: String },

    /// Caller-supplied parameter failed validation before any I/O.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// KMS envelope failure while sealing content for publish.
    #[error("encrypt failed: {0}")]
    Encrypt(String),

    /// KMS envelope failure while opening fetched content.
    #[error("decrypt failed: {0}")]
    Decrypt(String),

    /// The credential oracle failed or returned an unusable credential.
    #[error("credential refresh failed: {0}")]
    Credential(String),

    /// The control plane answered 200 with a body this client cannot parse.
    #[error("malformed server response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Status code for HTTP rejections, `None` for every other kind.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
