/// Group used when the caller passes a blank group.
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

/// Tenant sentinel used for on-disk layout when the namespace is empty.
pub const DEFAULT_TENANT: &str = "DEFAULT_TENANT";

/// Data ids carrying this prefix go through the KMS envelope.
pub const CIPHER_PREFIX: &str = "cipher-";

// -
// Long-poll wire separators

pub(crate) const WORD_SEPARATOR: char = '\u{2}';
pub(crate) const LINE_SEPARATOR: char = '\u{1}';

// -
// Control-plane endpoints

pub(crate) const CONFIG_PATH: &str = "/diamond-server/config.co";
pub(crate) const BASESTONE_PATH: &str = "/diamond-server/basestone.do";
pub(crate) const DATUM_PATH: &str = "/diamond-server/datum.do";
pub(crate) const ADDRESS_SERVER_PATH: &str = "/diamond-server/diamond";

pub(crate) const PUBLISH_METHOD: &str = "syncUpdateAll";
pub(crate) const REMOVE_METHOD: &str = "deleteAllDatums";
pub(crate) const LIST_METHOD: &str = "getAllConfigByTenant";

// -
// Headers

pub(crate) const HEADER_ACCESS_KEY: &str = "Spas-AccessKey";
pub(crate) const HEADER_SECURITY_TOKEN: &str = "Spas-SecurityToken";
pub(crate) const HEADER_SIGNATURE: &str = "Spas-Signature";
pub(crate) const HEADER_TIMESTAMP: &str = "Timestamp";
pub(crate) const HEADER_APP_NAME: &str = "Diamond-Client-AppName";
pub(crate) const HEADER_CLIENT_VERSION: &str = "Client-Version";
pub(crate) const HEADER_EX_CONFIG_INFO: &str = "exConfigInfo";
pub(crate) const HEADER_LONG_PULLING_TIMEOUT: &str = "Long-Pulling-Timeout";
pub(crate) const HEADER_LONG_PULLING_NO_HANGUP: &str = "longPullingNoHangUp";

pub(crate) const PROBE_FIELD: &str = "Probe-Modify-Request";

pub(crate) const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

// -
// Timing

/// Address-server discovery request timeout.
pub(crate) const ADDRESS_SERVER_TIMEOUT_SECS: u64 = 3;

/// Cadence of the background server-list refresh.
pub(crate) const SERVER_REFRESH_INTERVAL_SECS: u64 = 30;

/// Extra headroom added on top of the long-poll hang time.
pub(crate) const PULLING_SLACK_SECS: u64 = 10;

/// Credentials are refreshed when fewer than this many seconds remain.
pub(crate) const CREDENTIAL_EXPIRY_SKEW_SECS: u64 = 180;

/// Poller backoff bounds, doubling between them.
pub(crate) const BACKOFF_INITIAL_SECS: u64 = 1;
pub(crate) const BACKOFF_CEILING_SECS: u64 = 60;

/// Per-worker dispatch queue depth.
pub(crate) const DISPATCH_QUEUE_DEPTH: usize = 128;

pub(crate) fn user_agent() -> String {
    format!("ACM-Rust-{CLIENT_VERSION}")
}
