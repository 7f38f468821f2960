//! Commands queued from other threads run on the home thread.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

use serde_json::json;
use treebus::{Broker, DType, Metadata};

/// Deferred publishes are invisible until `process` runs them.
#[test]
fn test_cross_thread_publish() {
    let broker = Broker::new();
    broker
        .topic_add("dev/temp", Metadata::new(DType::F32, "Temperature").with_default(0.0))
        .unwrap();
    let handle = broker.handle();

    let worker = thread::spawn(move || {
        for i in 1..=3 {
            handle.publish("dev/temp", f64::from(i) * 10.0);
        }
    });
    worker.join().unwrap();

    assert_eq!(broker.query("dev/temp").unwrap(), json!(0.0));
    assert_eq!(broker.pending(), 3);
    assert_eq!(broker.process(), 3);
    assert_eq!(broker.query("dev/temp").unwrap(), json!(30.0));
    assert_eq!(broker.process(), 0);
}

/// The notify callback fires once per enqueue, from the enqueuing thread.
#[test]
fn test_notify_wakes_home_thread() {
    let broker = Broker::new();
    broker
        .topic_add("jobs/done", Metadata::new(DType::U32, "Done").with_default(0))
        .unwrap();

    let (tx, rx) = mpsc::channel::<()>();
    let wakes = Arc::new(AtomicUsize::new(0));
    let counter = wakes.clone();
    broker.set_notify(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(());
    });

    let handle = broker.handle();
    let workers: Vec<_> = (0..4u32)
        .map(|i| {
            let handle = handle.clone();
            thread::spawn(move || handle.publish("jobs/done", i + 1))
        })
        .collect();

    let mut processed = 0;
    while processed < 4 {
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        processed += broker.process();
    }
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(wakes.load(Ordering::SeqCst), 4);
    assert!(broker.query("jobs/done").unwrap().as_u64().unwrap() >= 1);

    broker.clear_notify();
    handle.publish("jobs/done", 0);
    assert_eq!(wakes.load(Ordering::SeqCst), 4);
    assert_eq!(broker.process(), 1);
}

/// Topic lifecycle commands can be queued too; priority publishes jump
/// the queue.
#[test]
fn test_queued_topic_commands() {
    let broker = Broker::new();
    let handle = broker.handle();
    handle.topic_add("q/a", Metadata::new(DType::Str, "a").with_default("x"));
    handle.publish("q/a", "y");
    handle.topic_remove("q/a");
    handle.topic_add_with("q/b", Metadata::new(DType::Str, "b"), true);
    assert_eq!(handle.pending(), 4);

    assert_eq!(broker.process(), 4);
    assert!(!broker.contains("q/a"));
    assert!(broker.contains("q/b"));

    handle.publish("q/b", "second");
    handle.publish_priority("q/b", "first");
    broker.process();
    assert_eq!(broker.query("q/b").unwrap(), json!("second"));
}

/// A failing deferred command is logged and the rest still run.
#[test]
fn test_failures_do_not_stop_processing() {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .finish();
    tracing::subscriber::with_default(subscriber, || {
        let broker = Broker::new();
        broker
            .topic_add("n", Metadata::new(DType::U8, "n").with_default(0))
            .unwrap();
        broker.publish_deferred("n", 999);
        broker.publish_deferred("n", 5);
        assert_eq!(broker.process(), 2);
        assert_eq!(broker.query("n").unwrap(), json!(5));
    });
}
