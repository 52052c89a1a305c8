//! # acm-client
//!
//! Client for an ACM/Diamond-style remote configuration service.
//!
//! ## Features
//! - **Three-tier reads**: failover overlay, then the control plane with
//!   server rotation, then the local snapshot cache
//! - **Change notifications**: subscriptions sharded over long-poll
//!   workers, callbacks dispatched with per-key ordering and panic
//!   isolation
//! - **Request signing**: HMAC-SHA1 `Spas-*` headers, static keys or an
//!   STS/RAM credential oracle
//! - **KMS envelope**: transparent encrypt/decrypt for `cipher-` items
//!
//! ## Quick Start
//! ```no_run
//! use acm_client::ConfigClient;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = ConfigClient::builder("acm.example.com:8080")
//!         .namespace("my-tenant")
//!         .credentials("access-key", "secret-key")
//!         .build()
//!         .unwrap();
//!
//!     client.publish("app.properties", "DEFAULT_GROUP", "greeting=hello").await.unwrap();
//!     let value = client.get("app.properties", "DEFAULT_GROUP").await.unwrap();
//!     assert_eq!(value.as_deref(), Some("greeting=hello"));
//!
//!     let _handle = client
//!         .add_watcher("app.properties", "DEFAULT_GROUP", |change| {
//!             println!("new value: {:?}", change.content);
//!         })
//!         .unwrap();
//!
//!     client.shutdown().await;
//! }
//! ```

mod auth;
mod builder;
mod client;
mod config;
mod constants;
mod errors;
mod key;
mod kms;
mod server_pool;
mod store;
mod transport;
mod watch;

pub use auth::Credential;
pub use auth::CredentialProvider;
pub use auth::StaticCredentials;
pub use builder::ClientBuilder;
pub use client::ConfigClient;
pub use client::ConfigItem;
pub use client::ConfigPage;
pub use client::ConfigSummary;
pub use config::ClientConfig;
pub use constants::CIPHER_PREFIX;
pub use constants::DEFAULT_GROUP;
pub use constants::DEFAULT_TENANT;
pub use errors::Error;
pub use errors::Result;
pub use key::ConfigKey;
pub use kms::KmsProvider;
pub use watch::ConfigChange;
pub use watch::WatchHandle;

#[cfg(test)]
mod key_test;
#[cfg(test)]
mod kms_test;
#[cfg(test)]
mod server_pool_test;
