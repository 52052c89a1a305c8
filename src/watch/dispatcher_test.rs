use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use super::dispatcher::Dispatcher;
use super::CallbackFn;
use super::ConfigChange;
use crate::key::ConfigKey;

fn change(content: &str) -> ConfigChange {
    ConfigChange {
        data_id: "D".into(),
        group: "G".into(),
        tenant: "T".into(),
        content: Some(content.to_string()),
        raw_content: Some(content.to_string()),
    }
}

fn key(data_id: &str) -> ConfigKey {
    ConfigKey::new(data_id, "G", "T").unwrap()
}

#[tokio::test]
async fn test_callback_receives_change() {
    let (dispatcher, workers) = Dispatcher::spawn(4);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let cb: CallbackFn = Arc::new(move |c| sink.lock().unwrap().push(c.content.unwrap()));

    dispatcher.submit(&key("D"), cb, change("v1")).await;
    drop(dispatcher);
    workers.join().await;

    assert_eq!(*seen.lock().unwrap(), vec!["v1".to_string()]);
}

#[tokio::test]
async fn test_per_key_submission_order_is_preserved() {
    let (dispatcher, workers) = Dispatcher::spawn(8);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let cb: CallbackFn = Arc::new(move |c| sink.lock().unwrap().push(c.content.unwrap()));

    for i in 0..50 {
        dispatcher.submit(&key("D"), cb.clone(), change(&format!("v{i}"))).await;
    }
    drop(dispatcher);
    workers.join().await;

    let observed = seen.lock().unwrap().clone();
    let expected: Vec<String> = (0..50).map(|i| format!("v{i}")).collect();
    assert_eq!(observed, expected);
}

#[tokio::test]
async fn test_panicking_callback_is_isolated() {
    let (dispatcher, workers) = Dispatcher::spawn(1);
    let calls = Arc::new(AtomicUsize::new(0));

    let panicking: CallbackFn = Arc::new(|_| panic!("user code exploded"));
    let counting = {
        let calls = calls.clone();
        let cb: CallbackFn = Arc::new(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        cb
    };

    dispatcher.submit(&key("D"), panicking.clone(), change("v1")).await;
    dispatcher.submit(&key("D"), counting.clone(), change("v1")).await;
    dispatcher.submit(&key("D"), panicking, change("v2")).await;
    dispatcher.submit(&key("D"), counting, change("v2")).await;
    drop(dispatcher);
    workers.join().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2, "panics must not kill the worker");
}

#[tokio::test]
async fn test_distinct_keys_fan_out() {
    let (dispatcher, workers) = Dispatcher::spawn(4);
    let calls = Arc::new(AtomicUsize::new(0));

    for i in 0..20 {
        let calls = calls.clone();
        let cb: CallbackFn = Arc::new(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        dispatcher.submit(&key(&format!("D{i}")), cb, change("v")).await;
    }
    drop(dispatcher);
    workers.join().await;

    assert_eq!(calls.load(Ordering::SeqCst), 20);
}

#[tokio::test]
async fn test_join_returns_after_drain() {
    let (dispatcher, workers) = Dispatcher::spawn(2);
    let slow: CallbackFn = Arc::new(|_| std::thread::sleep(Duration::from_millis(20)));
    for _ in 0..4 {
        dispatcher.submit(&key("D"), slow.clone(), change("v")).await;
    }
    drop(dispatcher);
    // Join must wait for queued jobs rather than abandoning them.
    tokio::time::timeout(Duration::from_secs(5), workers.join())
        .await
        .expect("workers drained");
}
