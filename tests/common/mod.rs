//! In-process control plane for integration tests.
//!
//! Serves the config endpoints over a real socket so the client exercises
//! its full transport path. Failure modes are scripted per test.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use axum::extract::Query;
use axum::extract::State;
use axum::Form;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::routing::get;
use axum::routing::post;
use axum::Router;
use serde_json::json;

use acm_client::KmsProvider;

const WORD_SEPARATOR: char = '\u{2}';
const LINE_SEPARATOR: char = '\u{1}';

/// (tenant, group, dataId)
type ItemKey = (String, String, String);

#[derive(Default)]
struct Inner {
    configs: Mutex<HashMap<ItemKey, String>>,
    addresses: Mutex<Vec<String>>,
    fail_all: AtomicBool,
    /// Maximum hold of a long poll with no changes, in milliseconds.
    hold_ms: AtomicU64,
}

#[derive(Clone)]
pub struct ControlPlane {
    inner: Arc<Inner>,
    pub addr: SocketAddr,
}

impl ControlPlane {
    pub async fn spawn() -> ControlPlane {
        let inner = Arc::new(Inner {
            hold_ms: AtomicU64::new(300),
            ..Inner::default()
        });

        let app = Router::new()
            .route("/diamond-server/config.co", get(get_config).post(long_poll))
            .route("/diamond-server/basestone.do", get(list_configs).post(publish_config))
            .route("/diamond-server/datum.do", post(remove_config))
            .route("/diamond-server/diamond", get(address_list))
            .with_state(inner.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        inner.addresses.lock().unwrap().push(addr.to_string());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        ControlPlane { inner, addr }
    }

    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    pub fn put(
        &self,
        tenant: &str,
        group: &str,
        data_id: &str,
        content: &str,
    ) {
        self.inner.configs.lock().unwrap().insert(
            (tenant.to_string(), group.to_string(), data_id.to_string()),
            content.to_string(),
        );
    }

    pub fn stored(
        &self,
        tenant: &str,
        group: &str,
        data_id: &str,
    ) -> Option<String> {
        self.inner
            .configs
            .lock()
            .unwrap()
            .get(&(tenant.to_string(), group.to_string(), data_id.to_string()))
            .cloned()
    }

    pub fn set_fail_all(
        &self,
        fail: bool,
    ) {
        self.inner.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn delete(
        &self,
        tenant: &str,
        group: &str,
        data_id: &str,
    ) {
        self.inner.configs.lock().unwrap().remove(&(
            tenant.to_string(),
            group.to_string(),
            data_id.to_string(),
        ));
    }
}

fn md5_hex(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}

fn item_key(fields: &HashMap<String, String>) -> ItemKey {
    (
        fields.get("tenant").cloned().unwrap_or_default(),
        fields.get("group").cloned().unwrap_or_default(),
        fields.get("dataId").cloned().unwrap_or_default(),
    )
}

async fn get_config(
    State(inner): State<Arc<Inner>>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    if inner.fail_all.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "scripted failure".into());
    }
    match inner.configs.lock().unwrap().get(&item_key(&query)) {
        Some(content) => (StatusCode::OK, content.clone()),
        None => (StatusCode::NOT_FOUND, "config data not exist".into()),
    }
}

async fn publish_config(
    State(inner): State<Arc<Inner>>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, String) {
    if inner.fail_all.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "scripted failure".into());
    }
    let content = form.get("content").cloned().unwrap_or_default();
    inner.configs.lock().unwrap().insert(item_key(&form), content);
    (StatusCode::OK, "OK".into())
}

async fn remove_config(
    State(inner): State<Arc<Inner>>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, String) {
    if inner.fail_all.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "scripted failure".into());
    }
    inner.configs.lock().unwrap().remove(&item_key(&form));
    (StatusCode::OK, "OK".into())
}

async fn list_configs(
    State(inner): State<Arc<Inner>>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    if inner.fail_all.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "scripted failure".into());
    }
    let tenant = query.get("tenant").cloned().unwrap_or_default();
    let page_no: usize = query.get("pageNo").and_then(|v| v.parse().ok()).unwrap_or(1);
    let page_size: usize = query.get("pageSize").and_then(|v| v.parse().ok()).unwrap_or(200);

    let configs = inner.configs.lock().unwrap();
    let mut items: Vec<(&ItemKey, &String)> =
        configs.iter().filter(|((t, _, _), _)| *t == tenant).collect();
    items.sort_by_key(|(key, _)| (*key).clone());

    let total = items.len();
    let pages = total.div_ceil(page_size).max(1);
    let page_items: Vec<serde_json::Value> = items
        .into_iter()
        .skip((page_no - 1) * page_size)
        .take(page_size)
        .map(|((_, group, data_id), content)| {
            json!({"dataId": data_id, "group": group, "content": content})
        })
        .collect();

    let body = json!({
        "totalCount": total,
        "pageNumber": page_no,
        "pagesAvailable": pages,
        "pageItems": page_items,
    });
    (StatusCode::OK, body.to_string())
}

async fn address_list(State(inner): State<Arc<Inner>>) -> (StatusCode, String) {
    if inner.fail_all.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "scripted failure".into());
    }
    (StatusCode::OK, inner.addresses.lock().unwrap().join("\n"))
}

async fn long_poll(
    State(inner): State<Arc<Inner>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, String) {
    if inner.fail_all.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "scripted failure".into());
    }

    let probe = form.get("Probe-Modify-Request").cloned().unwrap_or_default();
    let listeners: Vec<(String, String, String, String)> = probe
        .split(LINE_SEPARATOR)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split(WORD_SEPARATOR).collect();
            (
                fields.first().copied().unwrap_or_default().to_string(),
                fields.get(1).copied().unwrap_or_default().to_string(),
                fields.get(2).copied().unwrap_or_default().to_string(),
                fields.get(3).copied().unwrap_or_default().to_string(),
            )
        })
        .collect();

    let no_hangup = headers.contains_key("longPullingNoHangUp");
    let hold = Duration::from_millis(inner.hold_ms.load(Ordering::SeqCst));
    let started = Instant::now();

    loop {
        let changed: Vec<String> = {
            let configs = inner.configs.lock().unwrap();
            listeners
                .iter()
                .filter(|(data_id, group, probe_md5, tenant)| {
                    let current = configs
                        .get(&(tenant.clone(), group.clone(), data_id.clone()))
                        .map(|content| md5_hex(content))
                        .unwrap_or_default();
                    current != *probe_md5
                })
                .map(|(data_id, group, _, tenant)| {
                    if tenant.is_empty() {
                        format!("{data_id}%02{group}%01")
                    } else {
                        format!("{data_id}%02{group}%02{tenant}%01")
                    }
                })
                .collect()
        };

        if !changed.is_empty() {
            return (StatusCode::OK, changed.concat());
        }
        if no_hangup || started.elapsed() >= hold {
            return (StatusCode::OK, String::new());
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// KMS double mapping `plain` to `ENC(plain)` and back.
pub struct MappingKms;

#[async_trait::async_trait]
impl KmsProvider for MappingKms {
    async fn encrypt(
        &self,
        _key_id: &str,
        plaintext: &str,
    ) -> acm_client::Result<String> {
        Ok(format!("ENC({plaintext})"))
    }

    async fn decrypt(
        &self,
        ciphertext: &str,
    ) -> acm_client::Result<String> {
        ciphertext
            .strip_prefix("ENC(")
            .and_then(|rest| rest.strip_suffix(')'))
            .map(str::to_string)
            .ok_or_else(|| acm_client::Error::Decrypt(format!("not a test ciphertext: {ciphertext}")))
    }
}
