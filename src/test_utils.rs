//! Test utilities for wtfork.
//!
//! Provides in-memory connected pairs, sample registries and a capturing
//! logger, plus the end-to-end tests that exercise a whole pair.

use crate::child::{ChildConfig, ParentHandle};
use crate::dispatcher::UnknownMethodPolicy;
use crate::identity::Identity;
use crate::logging::{LogEntry, LogLevel, StructuredLogger};
use crate::marshal::RemoteError;
use crate::message::Role;
use crate::peer::{Peer, PeerOptions};
use crate::registry::MethodRegistry;
use crate::transport::MemoryBus;
use crate::ArgsExtractor;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const READY_WAIT: Duration = Duration::from_secs(2);

/// Both ends of a pair running in this process.
pub struct Pair {
    /// The parent's handle to its child.
    pub parent: Peer,
    /// The child's handle to its parent.
    pub child: ParentHandle,
}

/// Methods a test child exposes.
pub fn child_methods() -> MethodRegistry {
    MethodRegistry::builder()
        .sync_method("hello", |_| Ok(json!({"some": "data"})))
        .sync_method("goodbye", |_| Err(RemoteError::msg("Please don't leave me!")))
        .method("simples", |args| async move {
            // Earlier letters answer later, so replies cross on the wire
            let arg: String = ArgsExtractor::new(args).get(0)?;
            let delay = match arg.as_str() {
                "a" => 60,
                _ => 5,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(json!(arg))
        })
        .method("echo_index", |args| async move {
            let args = ArgsExtractor::new(args);
            let index: u64 = args.get(0)?;
            let delay_ms: u64 = args.get_opt(1)?.unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(json!({ "index": index }))
        })
        .sync_method("_secret", |_| Ok(json!("leaked")))
        .build()
}

/// Methods a test parent exposes.
pub fn parent_methods() -> MethodRegistry {
    MethodRegistry::builder()
        .sync_method("quit", |_| Ok(json!("bye")))
        .sync_method("status", |_| Ok(json!({"alive": true})))
        .sync_method("_internal", |_| Ok(Value::Null))
        .build()
}

pub async fn connected_pair() -> Pair {
    connected_pair_with(parent_methods(), child_methods(), PeerOptions::default(), PeerOptions::default()).await
}

/// A pair over a fresh in-memory bus, waited until the child is ready.
pub async fn connected_pair_with(
    parent_registry: MethodRegistry,
    child_registry: MethodRegistry,
    parent_options: PeerOptions,
    child_options: PeerOptions,
) -> Pair {
    pair_on_bus(
        &MemoryBus::new(),
        Identity::generate(),
        parent_registry,
        child_registry,
        parent_options,
        child_options,
    )
    .await
}

/// A pair attached to `bus`, which other pairs may share.
pub async fn pair_on_bus(
    bus: &MemoryBus,
    identity: Identity,
    parent_registry: MethodRegistry,
    child_registry: MethodRegistry,
    parent_options: PeerOptions,
    child_options: PeerOptions,
) -> Pair {
    let parent_names = parent_registry.names().to_vec();
    let parent = Peer::connect(
        Role::Parent,
        identity.clone(),
        bus.attach(),
        parent_registry,
        Vec::new(),
        parent_options,
    )
    .await
    .unwrap();

    let child = ChildConfig::new(identity)
        .with_parent_methods(parent_names)
        .with_logger(child_options.logger)
        .with_metrics(child_options.metrics)
        .with_unknown_method_policy(child_options.unknown_method_policy)
        .connect_with(bus.attach(), child_registry)
        .await
        .unwrap();

    parent.wait_ready(READY_WAIT).await.unwrap();
    Pair { parent, child }
}

/// Logger that keeps every entry, at debug level.
pub fn create_test_logger() -> (StructuredLogger, Arc<Mutex<Vec<LogEntry>>>) {
    let logs = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&logs);

    let logger = StructuredLogger::new(
        Some(Arc::new(move |entry: &LogEntry| {
            sink.lock().unwrap().push(entry.clone());
        })),
        LogLevel::Debug,
    );

    (logger, logs)
}

/// Poll `condition` every 10ms until it holds or `timeout_ms` passes.
pub async fn wait_for_condition<F, Fut>(condition: F, timeout_ms: u64) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WtforkError;
    use crate::marshal::ErrorKind;
    use crate::message::READY_CHANNEL;
    use crate::{call, call_with_type};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_advertised_names_exclude_private_methods() {
        let pair = connected_pair().await;

        assert_eq!(
            pair.parent.methods().names(),
            vec!["hello", "goodbye", "simples", "echo_index"]
        );
        assert_eq!(pair.child.methods().names(), vec!["quit", "status"]);
        assert!(pair.parent.methods().get("_secret").is_none());
    }

    #[tokio::test]
    async fn test_hello_resolves_with_data() {
        let pair = connected_pair().await;
        let result: Value = pair
            .parent
            .methods()
            .call("hello", vec![json!("x")])
            .await
            .unwrap();
        assert_eq!(result, json!({"some": "data"}));
    }

    #[tokio::test]
    async fn test_goodbye_rejection_keeps_message() {
        let pair = connected_pair().await;
        let result: crate::error::Result<Value> =
            call!(pair.parent.methods(), goodbye("x", "y")).await;

        match result {
            Err(WtforkError::Remote(err)) => {
                assert_eq!(err.message, "Please don't leave me!");
                assert_eq!(err.kind, ErrorKind::Generic);
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_child_calls_parent() {
        let pair = connected_pair().await;
        let bye: String = pair.child.methods().call("quit", vec![]).await.unwrap();
        assert_eq!(bye, "bye");

        let status = call_with_type!(pair.child.methods(), status, (), Value)
            .await
            .unwrap();
        assert_eq!(status, json!({"alive": true}));
    }

    #[tokio::test]
    async fn test_event_payload_arrives_intact() {
        let pair = connected_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        pair.parent.on("hello", move |payload| drop(tx.send(payload))).await;

        pair.child.send("hello", &json!({"foo": "bar"})).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), json!({"foo": "bar"}));
    }

    #[tokio::test]
    async fn test_concurrent_simples_calls_keep_their_arguments() {
        let pair = connected_pair().await;
        let methods = pair.parent.methods().clone();
        let other = methods.clone();

        let a = tokio::spawn(async move { call_with_type!(methods, simples, ("a"), String).await });
        let b = tokio::spawn(async move { call_with_type!(other, simples, ("b"), String).await });

        assert_eq!(a.await.unwrap().unwrap(), "a");
        assert_eq!(b.await.unwrap().unwrap(), "b");
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_isolated() {
        let pair = connected_pair().await;
        let n = 6u64;

        let mut calls = Vec::new();
        for index in 0..n {
            let stub = pair.parent.methods().get("echo_index").unwrap();
            // Later calls finish first
            let delay = (n - index) * 15;
            calls.push(tokio::spawn(async move {
                stub.invoke::<_, Value>((index, delay)).await
            }));
        }

        for (index, call) in calls.into_iter().enumerate() {
            let result = call.await.unwrap().unwrap();
            assert_eq!(result, json!({ "index": index }));
        }
        assert_eq!(pair.parent.pending_call_count().await, 0);
    }

    #[tokio::test]
    async fn test_pairs_on_shared_bus_are_isolated() {
        let bus = MemoryBus::new();
        let first = pair_on_bus(
            &bus,
            Identity::from("first"),
            parent_methods(),
            child_methods(),
            PeerOptions::default(),
            PeerOptions::default(),
        )
        .await;
        let second = pair_on_bus(
            &bus,
            Identity::from("second"),
            parent_methods(),
            MethodRegistry::builder()
                .sync_method("hello", |_| Ok(json!("second child")))
                .build(),
            PeerOptions::default(),
            PeerOptions::default(),
        )
        .await;

        let (first_tx, mut first_rx) = mpsc::unbounded_channel();
        let (second_tx, mut second_rx) = mpsc::unbounded_channel();
        first.parent.on("news", move |p| drop(first_tx.send(p))).await;
        second.parent.on("news", move |p| drop(second_tx.send(p))).await;

        first.child.send("news", &json!({"from": "first"})).await.unwrap();
        assert_eq!(first_rx.recv().await.unwrap(), json!({"from": "first"}));

        let first_hello: Value = first.parent.methods().call("hello", vec![]).await.unwrap();
        let second_hello: Value = second.parent.methods().call("hello", vec![]).await.unwrap();
        assert_eq!(first_hello, json!({"some": "data"}));
        assert_eq!(second_hello, json!("second child"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(second_rx.try_recv().is_err());
        assert!(second.parent.metrics().snapshot().await.messages_dropped > 0);
    }

    #[tokio::test]
    async fn test_readiness_is_announced_once() {
        let bus = MemoryBus::new();
        let identity = Identity::generate();
        let parent = Peer::connect(
            Role::Parent,
            identity.clone(),
            bus.attach(),
            MethodRegistry::empty(),
            Vec::new(),
            PeerOptions::default(),
        )
        .await
        .unwrap();
        assert!(!parent.is_ready());

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        parent
            .on(READY_CHANNEL, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        let child = ChildConfig::new(identity)
            .connect_with(bus.attach(), child_methods())
            .await
            .unwrap();
        assert!(child.is_ready());
        parent.wait_ready(READY_WAIT).await.unwrap();

        // Re-advertising methods does not repeat the announcement
        child.set_child_methods(child_methods()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(parent.is_ready());
    }

    #[tokio::test]
    async fn test_wait_ready_times_out_without_child() {
        let (conn, _other) = MemoryBus::pair();
        let parent = Peer::connect(
            Role::Parent,
            Identity::generate(),
            conn,
            MethodRegistry::empty(),
            Vec::new(),
            PeerOptions::default(),
        )
        .await
        .unwrap();

        let result = parent.wait_ready(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(WtforkError::ReadyTimeout(50))));
    }

    #[tokio::test]
    async fn test_unknown_method_stays_pending() {
        let pair = connected_pair().await;
        let stub = pair.parent.methods().stub("nope");
        let call = tokio::spawn(async move { stub.call_raw(vec![]).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!call.is_finished(), "call to an unknown method settled");
        assert_eq!(pair.parent.pending_call_count().await, 1);
        assert_eq!(pair.parent.metrics().snapshot().await.pending, 1);

        // Giving up on the call releases its entry
        call.abort();
        let parent = pair.parent.clone();
        assert!(wait_for_condition(|| {
            let parent = parent.clone();
            async move { parent.metrics().snapshot().await.calls_abandoned == 1 }
        }, 1000)
        .await);
        assert_eq!(pair.parent.pending_call_count().await, 0);
        assert_eq!(pair.parent.metrics().snapshot().await.pending, 0);
    }

    #[tokio::test]
    async fn test_outer_timeout_releases_pending_entry() {
        let pair = connected_pair().await;
        let stub = pair.parent.methods().stub("nope");

        let waited = tokio::time::timeout(Duration::from_millis(100), stub.call_raw(vec![])).await;
        assert!(waited.is_err());

        let parent = pair.parent.clone();
        assert!(wait_for_condition(|| {
            let parent = parent.clone();
            async move { parent.pending_call_count().await == 0 }
        }, 1000)
        .await);
    }

    #[tokio::test]
    async fn test_unknown_method_with_timeout() {
        let pair = connected_pair().await;
        let stub = pair.parent.methods().stub("nope");

        let result = stub
            .call_with_timeout(vec![], Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(WtforkError::Timeout { .. })));
        assert_eq!(pair.parent.pending_call_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_method_rejected_when_configured() {
        let pair = connected_pair_with(
            parent_methods(),
            child_methods(),
            PeerOptions::default(),
            PeerOptions {
                unknown_method_policy: UnknownMethodPolicy::Reject,
                ..Default::default()
            },
        )
        .await;

        match pair.parent.methods().stub("_secret").call_raw(vec![]).await {
            Err(WtforkError::Remote(err)) => assert_eq!(err.kind, ErrorKind::Reference),
            other => panic!("expected reference error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unadvertised_name_fails_fast() {
        let pair = connected_pair().await;
        let result = pair.parent.methods().call_raw("nope", vec![]).await;
        assert!(matches!(result, Err(WtforkError::InvalidArgument(_))));
        assert_eq!(pair.parent.pending_call_count().await, 0);
    }

    #[tokio::test]
    async fn test_set_child_methods_updates_parent_stubs() {
        let pair = connected_pair().await;
        pair.child
            .set_child_methods(
                MethodRegistry::builder()
                    .sync_method("late", |args| Ok(json!(args.len())))
                    .sync_method("_still_private", |_| Ok(Value::Null))
                    .build(),
            )
            .await
            .unwrap();

        let methods = pair.parent.methods().clone();
        assert!(wait_for_condition(|| {
            let methods = methods.clone();
            async move { methods.contains("late") }
        }, 1000)
        .await);

        assert_eq!(pair.parent.methods().names(), vec!["late"]);
        let count: usize = call!(pair.parent.methods(), late(1i64, 2i64, 3i64)).await.unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_parent_set_methods_updates_child_stubs() {
        let pair = connected_pair().await;
        pair.parent
            .set_methods(
                MethodRegistry::builder()
                    .sync_method("restart", |_| Ok(json!("restarting")))
                    .build(),
            )
            .await
            .unwrap();

        let methods = pair.child.methods().clone();
        assert!(wait_for_condition(|| {
            let methods = methods.clone();
            async move { methods.contains("restart") }
        }, 1000)
        .await);

        let answer: String = pair.child.methods().call("restart", vec![]).await.unwrap();
        assert_eq!(answer, "restarting");
        assert!(!pair.child.methods().contains("quit"));
    }

    #[tokio::test]
    async fn test_transport_close_fails_pending_calls() {
        let bus = MemoryBus::new();
        let pair = pair_on_bus(
            &bus,
            Identity::generate(),
            parent_methods(),
            child_methods(),
            PeerOptions::default(),
            PeerOptions::default(),
        )
        .await;

        let stub = pair.parent.methods().stub("nope");
        let pending = tokio::spawn(async move { stub.call_raw(vec![]).await });
        assert!(wait_for_condition(|| {
            let parent = pair.parent.clone();
            async move { parent.pending_call_count().await == 1 }
        }, 1000)
        .await);

        bus.close();
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(WtforkError::Disconnected)));
    }

    #[tokio::test]
    async fn test_unrepresentable_argument_fails_before_sending() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let child = MethodRegistry::builder()
            .sync_method("record", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!("got"))
            })
            .build();
        let pair = connected_pair_with(parent_methods(), child, PeerOptions::default(), PeerOptions::default()).await;

        let mut bad = std::collections::HashMap::new();
        bad.insert((1, 2), "tuple keys have no JSON form");

        let stub = pair.parent.methods().get("record").unwrap();
        let invoked: crate::error::Result<Value> = stub.invoke((&bad,)).await;
        assert!(matches!(invoked, Err(WtforkError::Json(_))));

        let called: crate::error::Result<Value> = call!(pair.parent.methods(), record("fine", &bad)).await;
        assert!(matches!(called, Err(WtforkError::Json(_))));

        // A good call still goes through, and is the only one the child saw
        let ok: Value = call!(pair.parent.methods(), record("fine")).await.unwrap();
        assert_eq!(ok, json!("got"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(pair.parent.metrics().snapshot().await.calls_total, 1);
    }

    #[tokio::test]
    async fn test_close_fails_pending_calls_and_later_sends() {
        let pair = connected_pair().await;
        let stub = pair.parent.methods().stub("nope");
        let pending = tokio::spawn(async move { stub.call_raw(vec![]).await });
        let parent = pair.parent.clone();
        assert!(wait_for_condition(|| {
            let parent = parent.clone();
            async move { parent.pending_call_count().await == 1 }
        }, 1000)
        .await);

        pair.parent.close().await;
        assert!(matches!(pending.await.unwrap(), Err(WtforkError::Disconnected)));
        assert!(matches!(
            pair.parent.send("hello", &json!({})).await,
            Err(WtforkError::Disconnected)
        ));
        let late: crate::error::Result<Value> = pair.parent.methods().call("hello", vec![]).await;
        assert!(matches!(late, Err(WtforkError::Disconnected)));

        // Closing again is harmless
        pair.parent.close().await;
    }

    #[tokio::test]
    async fn test_calls_are_logged_and_counted() {
        let (logger, logs) = create_test_logger();
        let pair = connected_pair_with(
            parent_methods(),
            child_methods(),
            PeerOptions {
                logger,
                ..Default::default()
            },
            PeerOptions::default(),
        )
        .await;

        let _: Value = pair.parent.methods().call("hello", vec![]).await.unwrap();
        let _ = pair.parent.methods().call_raw("goodbye", vec![]).await;

        let snapshot = pair.parent.metrics().snapshot().await;
        assert_eq!(snapshot.calls_total, 2);
        assert_eq!(snapshot.calls_resolved, 1);
        assert_eq!(snapshot.calls_rejected, 1);
        assert_eq!(snapshot.pending, 0);

        let served = pair.child.metrics().snapshot().await.calls_served;
        assert_eq!(served, 2);

        let logs = logs.lock().unwrap();
        let events: Vec<&str> = logs.iter().map(|e| e.event.as_str()).collect();
        assert!(events.contains(&"child_ready"));
        assert!(events.contains(&"call_start"));
        assert!(events.contains(&"call_end"));
        assert!(events.contains(&"call_error"));

        let error = logs.iter().find(|e| e.event == "call_error").unwrap();
        assert_eq!(error.error.as_deref(), Some("Please don't leave me!"));
        assert_eq!(error.role.as_deref(), Some("parent"));
    }
}
