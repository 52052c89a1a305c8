use std::sync::Arc;

use tokio::sync::watch;

use crate::server_pool::ServerPool;

fn pool(
    endpoint: &str,
    cai_enabled: bool,
    tls: bool,
) -> Arc<ServerPool> {
    // These tests never start the background refresher, so the state of
    // the shutdown channel does not matter.
    let (_tx, rx) = watch::channel(());
    Arc::new(ServerPool::new(endpoint.to_string(), cai_enabled, tls, rx).unwrap())
}

#[tokio::test]
async fn test_direct_endpoint_with_port() {
    let pool = pool("10.0.0.1:9090", false, false);
    let server = pool.current().await.unwrap();
    assert_eq!(server.host, "10.0.0.1");
    assert_eq!(server.port, 9090);
    assert_eq!(server.base_url(), "http://10.0.0.1:9090");
}

#[tokio::test]
async fn test_direct_endpoint_default_port() {
    let pool = pool("acm.example.com", false, false);
    let server = pool.current().await.unwrap();
    assert_eq!(server.port, 8080);
}

#[tokio::test]
async fn test_direct_endpoint_tls_default_port() {
    let pool = pool("acm.example.com", false, true);
    let server = pool.current().await.unwrap();
    assert_eq!(server.port, 443);
    assert_eq!(server.base_url(), "https://acm.example.com:443");
}

#[tokio::test]
async fn test_bad_endpoint_fails() {
    let pool1 = pool("acm.example.com:not-a-port", false, false);
    assert!(pool1.current().await.is_err());

    let pool2 = pool("   ", false, false);
    assert!(pool2.current().await.is_err());
}

#[tokio::test]
async fn test_rotation_wraps_around() {
    // Single server: rotation is a no-op on the index.
    let pool = pool("a.example.com:1", false, false);
    let before = pool.current().await.unwrap();
    pool.rotate();
    assert_eq!(pool.current().await.unwrap(), before);
    assert_eq!(pool.len(), 1);
}

#[tokio::test]
async fn test_rotation_cycles_through_all_servers() {
    use crate::server_pool::ServerEntry;

    let pool = pool("unused.example.com", false, false);
    let entry = |host: &str| ServerEntry {
        host: host.to_string(),
        port: 8080,
        tls: false,
    };
    pool.set_servers(vec![entry("a"), entry("b"), entry("c")]);

    assert_eq!(pool.current().await.unwrap().host, "a");
    pool.rotate();
    assert_eq!(pool.current().await.unwrap().host, "b");
    pool.rotate();
    assert_eq!(pool.current().await.unwrap().host, "c");
    pool.rotate();
    assert_eq!(pool.current().await.unwrap().host, "a", "index wraps modulo length");
}

#[tokio::test]
async fn test_rotate_before_initialization_is_harmless() {
    let pool = pool("a.example.com:1", false, false);
    pool.rotate();
    assert_eq!(pool.len(), 0);
    assert!(pool.current().await.is_ok());
}
