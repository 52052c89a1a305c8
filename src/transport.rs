//! Signed HTTP requests with rotate-on-failure.
//!
//! One entry point drives every control-plane call: pick the pool's
//! current server, attach client and auth headers, send, and on a
//! transport error or 5xx rotate to the next server. A single call tries
//! at most `pool.len()` distinct servers before reporting
//! `NoServerAvailable`. 4xx answers are the server's verdict and are
//! returned immediately without rotation.

use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::Method;
use tracing::debug;
use tracing::warn;

use crate::auth::auth_headers;
use crate::auth::CredentialCache;
use crate::auth::SignScope;
use crate::constants::user_agent;
use crate::constants::CLIENT_VERSION;
use crate::constants::HEADER_APP_NAME;
use crate::constants::HEADER_CLIENT_VERSION;
use crate::constants::HEADER_EX_CONFIG_INFO;
use crate::errors::Error;
use crate::errors::Result;
use crate::server_pool::ServerPool;

/// One control-plane request, independent of the server it lands on.
pub(crate) struct RequestSpec {
    pub(crate) method: Method,
    pub(crate) path: &'static str,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) form: Vec<(String, String)>,
    pub(crate) headers: Vec<(&'static str, String)>,
    pub(crate) timeout: Duration,
    /// Signature scope. When `None` the scope is derived from the
    /// `tenant`/`group` request fields.
    pub(crate) sign_scope: Option<SignScope>,
}

impl RequestSpec {
    pub(crate) fn get(path: &'static str) -> Self {
        Self::new(Method::GET, path)
    }

    pub(crate) fn post(path: &'static str) -> Self {
        Self::new(Method::POST, path)
    }

    fn new(
        method: Method,
        path: &'static str,
    ) -> Self {
        Self {
            method,
            path,
            query: Vec::new(),
            form: Vec::new(),
            headers: Vec::new(),
            timeout: Duration::from_secs(3),
            sign_scope: None,
        }
    }

    fn field(
        &self,
        name: &str,
    ) -> Option<&str> {
        self.query
            .iter()
            .chain(self.form.iter())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn scope(&self) -> SignScope {
        self.sign_scope.clone().unwrap_or_else(|| SignScope {
            tenant: self.field("tenant").unwrap_or_default().to_string(),
            group: self.field("group").unwrap_or_default().to_string(),
        })
    }
}

pub(crate) struct HttpAgent {
    http: reqwest::Client,
    pool: Arc<ServerPool>,
    credentials: Option<Arc<CredentialCache>>,
    app_name: String,
}

impl HttpAgent {
    pub(crate) fn new(
        pool: Arc<ServerPool>,
        credentials: Option<Arc<CredentialCache>>,
        app_name: String,
    ) -> Result<Self> {
        let mut defaults = HeaderMap::new();
        defaults.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_str(&user_agent())
                .map_err(|e| Error::InvalidResponse(e.to_string()))?,
        );
        defaults.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip,deflate"),
        );

        let http = reqwest::Client::builder()
            .default_headers(defaults)
            .build()
            .map_err(|e| Error::NoServerAvailable(format!("http client init: {e}")))?;

        Ok(Self {
            http,
            pool,
            credentials,
            app_name,
        })
    }

    /// Sends the request, rotating servers until one answers or the pool
    /// is exhausted.
    pub(crate) async fn request(
        &self,
        spec: RequestSpec,
    ) -> Result<String> {
        let auth = self.build_auth_headers(&spec).await?;

        let mut tries = 0;
        loop {
            let server = self.pool.current().await?;
            let url = format!("{}{}", server.base_url(), spec.path);
            debug!(method = %spec.method, %url, "control-plane request");

            let mut request = self
                .http
                .request(spec.method.clone(), &url)
                .timeout(spec.timeout)
                .header(HEADER_APP_NAME, self.app_name.as_str())
                .header(HEADER_CLIENT_VERSION, CLIENT_VERSION)
                .header(HEADER_EX_CONFIG_INFO, "true");
            if !spec.query.is_empty() {
                request = request.query(&spec.query);
            }
            if !spec.form.is_empty() {
                request = request.form(&spec.form);
            }
            for (name, value) in &spec.headers {
                request = request.header(*name, value.as_str());
            }
            for (name, value) in &auth {
                request = request.header(*name, value.as_str());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response
                            .bytes()
                            .await
                            .map_err(|e| Error::InvalidResponse(e.to_string()))?;
                        return String::from_utf8(body.to_vec())
                            .map_err(|e| Error::InvalidResponse(e.to_string()));
                    }
                    if status.is_server_error() {
                        warn!(server = %server, status = %status, "server unavailable");
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        return Err(Error::Http {
                            status: status.as_u16(),
                            body,
                        });
                    }
                }
                Err(e) => {
                    warn!(server = %server, "transport error: {}", e);
                }
            }

            tries += 1;
            if tries >= self.pool.len().max(1) {
                return Err(Error::NoServerAvailable(format!(
                    "all {} servers failed",
                    tries
                )));
            }
            self.pool.rotate();
        }
    }

    async fn build_auth_headers(
        &self,
        spec: &RequestSpec,
    ) -> Result<Vec<(&'static str, String)>> {
        let Some(credentials) = &self.credentials else {
            return Ok(Vec::new());
        };
        let credential = credentials.current().await?;
        let timestamp = now_epoch_millis().to_string();
        Ok(auth_headers(&credential, &spec.scope(), &timestamp))
    }
}

fn now_epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis()
}
