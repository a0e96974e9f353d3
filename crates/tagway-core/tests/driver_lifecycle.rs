// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Driver Lifecycle Tests
//!
//! Drives a [`Driver`] over a scripted adapter and checks:
//!
//! - Reference-counted backend subscriptions
//! - Subscription replay after reconnect
//! - Retry of topics whose backend subscription failed
//! - Fixed-delay connection retries
//! - Request dispatch and reply shapes

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use tagway_core::{
    Bus, BusError, CanonicalValue, ConnectionState, DataPoint, Driver, DriverAdapter,
    DriverClient, DriverContext, DriverError, DriverHandle, DriverOptions, DriverResult,
    SubscribedItems, SystemType, TopicAddress, WriteCompletion,
};

// =============================================================================
// Scripted adapter
// =============================================================================

#[derive(Default)]
struct Script {
    fail_connects: usize,
    connect_attempts: usize,
    disconnects: usize,
    subscribe_calls: Vec<Vec<String>>,
    unsubscribe_calls: Vec<(Vec<String>, Vec<u32>)>,
    next_item: u32,
    reject_once: Vec<String>,
    context: Option<DriverContext>,
}

#[derive(Clone)]
struct ScriptedAdapter {
    id: String,
    script: Arc<Mutex<Script>>,
}

impl ScriptedAdapter {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    fn failing_connects(self, count: usize) -> Self {
        self.script.lock().fail_connects = count;
        self
    }

    fn reject_once(&self, topic: &TopicAddress) {
        self.script.lock().reject_once.push(topic.topic_name().to_string());
    }

    fn context(&self) -> DriverContext {
        self.script.lock().context.clone().expect("not connected")
    }

    fn subscribe_calls(&self) -> Vec<Vec<String>> {
        self.script.lock().subscribe_calls.clone()
    }

    fn unsubscribe_calls(&self) -> Vec<(Vec<String>, Vec<u32>)> {
        self.script.lock().unsubscribe_calls.clone()
    }
}

#[async_trait]
impl DriverAdapter for ScriptedAdapter {
    type Item = u32;

    fn id(&self) -> &str {
        &self.id
    }

    fn system_type(&self) -> SystemType {
        SystemType::Opc
    }

    async fn connect(&mut self, context: DriverContext) -> DriverResult<()> {
        let mut script = self.script.lock();
        script.connect_attempts += 1;
        if script.fail_connects > 0 {
            script.fail_connects -= 1;
            return Err(DriverError::connection_failed("endpoint unreachable"));
        }
        script.context = Some(context);
        Ok(())
    }

    async fn disconnect(&mut self) -> DriverResult<()> {
        self.script.lock().disconnects += 1;
        Ok(())
    }

    async fn subscribe_topics(
        &mut self,
        topics: &[TopicAddress],
    ) -> DriverResult<SubscribedItems<u32>> {
        let mut script = self.script.lock();
        script
            .subscribe_calls
            .push(topics.iter().map(|t| t.topic_name().to_string()).collect());
        let mut outcome = SubscribedItems::new();
        for topic in topics {
            if let Some(pos) = script.reject_once.iter().position(|t| t == topic.topic_name()) {
                script.reject_once.remove(pos);
                outcome.fail(topic.clone());
                continue;
            }
            script.next_item += 1;
            outcome.push(topic.clone(), script.next_item);
        }
        Ok(outcome)
    }

    async fn unsubscribe_items(&mut self, topics: &[TopicAddress], items: Vec<u32>) -> DriverResult<()> {
        self.script.lock().unsubscribe_calls.push((
            topics.iter().map(|t| t.topic_name().to_string()).collect(),
            items,
        ));
        Ok(())
    }

    async fn read(&mut self, node_ids: &[String]) -> DriverResult<Vec<CanonicalValue>> {
        Ok(node_ids.iter().map(|_| CanonicalValue::new(42i64)).collect())
    }

    async fn write(&mut self, items: Vec<(String, String)>) -> DriverResult<Vec<WriteCompletion>> {
        Ok(items
            .into_iter()
            .map(|(_, value)| WriteCompletion::ready(value != "fail"))
            .collect())
    }
}

// =============================================================================
// Test Helpers
// =============================================================================

fn topic(name: &str) -> TopicAddress {
    TopicAddress::parse(name).expect("valid topic")
}

async fn start(adapter: ScriptedAdapter, options: DriverOptions) -> (Arc<Bus>, DriverHandle) {
    let bus = Arc::new(Bus::default());
    let handle = Driver::new(adapter, bus.clone(), options).spawn();
    (bus, handle)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// =============================================================================
// Subscription Tests
// =============================================================================

#[tokio::test]
async fn test_shared_topic_has_one_backend_subscription() {
    let adapter = ScriptedAdapter::new("plant");
    let (bus, handle) = start(adapter.clone(), DriverOptions::default()).await;
    assert!(handle.wait_for_state(ConnectionState::Connected).await);

    let temperature = topic("Opc/plant/Node/ns=2;s=Temperature");
    let first = DriverClient::for_topic(bus.clone(), &temperature).with_client_id("a");
    let second = DriverClient::for_topic(bus.clone(), &temperature).with_client_id("b");

    first.subscribe(&temperature).await.unwrap();
    second.subscribe(&temperature).await.unwrap();
    assert_eq!(adapter.subscribe_calls().len(), 1);

    first.unsubscribe(&[temperature.clone()]).await.unwrap();
    assert!(adapter.unsubscribe_calls().is_empty());

    second.unsubscribe(&[temperature.clone()]).await.unwrap();
    let released = adapter.unsubscribe_calls();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].0, vec![temperature.topic_name().to_string()]);
    assert_eq!(released[0].1, vec![1]);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_repeated_subscribe_is_idempotent() {
    let adapter = ScriptedAdapter::new("plant");
    let (bus, handle) = start(adapter.clone(), DriverOptions::default()).await;
    assert!(handle.wait_for_state(ConnectionState::Connected).await);

    let pressure = topic("Opc/plant/Node/ns=2;s=Pressure");
    let client = DriverClient::for_topic(bus, &pressure).with_client_id("a");
    client.subscribe(&pressure).await.unwrap();
    client.subscribe(&pressure).await.unwrap();
    assert_eq!(adapter.subscribe_calls().len(), 1);

    client.unsubscribe(&[pressure]).await.unwrap();
    assert_eq!(adapter.unsubscribe_calls().len(), 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_unknown_unsubscribe_is_harmless() {
    let adapter = ScriptedAdapter::new("plant");
    let (bus, handle) = start(adapter.clone(), DriverOptions::default()).await;
    assert!(handle.wait_for_state(ConnectionState::Connected).await);

    let level = topic("Opc/plant/Node/ns=2;s=Level");
    let client = DriverClient::for_topic(bus, &level).with_client_id("ghost");
    client.unsubscribe(&[level]).await.unwrap();
    assert!(adapter.unsubscribe_calls().is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_foreign_topic_is_rejected() {
    let adapter = ScriptedAdapter::new("plant");
    let (bus, handle) = start(adapter.clone(), DriverOptions::default()).await;
    assert!(handle.wait_for_state(ConnectionState::Connected).await);

    let foreign = topic("Opc/other/Node/i=2258");
    let client = DriverClient::new(bus, SystemType::Opc, "plant");
    let err = client.subscribe(&foreign).await.unwrap_err();
    assert!(matches!(err, BusError::Rejected { .. }));
    assert!(adapter.subscribe_calls().is_empty());

    handle.shutdown().await;
}

// =============================================================================
// Connection Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_connect_retries_with_fixed_delay() {
    let adapter = ScriptedAdapter::new("plant").failing_connects(2);
    let options = DriverOptions::default().with_reconnect_delay(Duration::from_secs(5));
    let started = tokio::time::Instant::now();
    let (_bus, handle) = start(adapter.clone(), options).await;

    assert!(handle.wait_for_state(ConnectionState::Connected).await);
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(adapter.script.lock().connect_attempts, 3);
    assert_eq!(handle.stats().connect_failures, 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_replays_every_topic_once() {
    let adapter = ScriptedAdapter::new("plant");
    let (bus, handle) = start(adapter.clone(), DriverOptions::default()).await;
    assert!(handle.wait_for_state(ConnectionState::Connected).await);

    let a = topic("Opc/plant/Node/ns=2;s=A");
    let b = topic("Opc/plant/Path/Objects/Line1/#");
    let client = DriverClient::new(bus.clone(), SystemType::Opc, "plant").with_client_id("c1");
    let other = DriverClient::new(bus, SystemType::Opc, "plant").with_client_id("c2");
    client.subscribe(&a).await.unwrap();
    client.subscribe(&b).await.unwrap();
    other.subscribe(&a).await.unwrap();
    assert_eq!(adapter.subscribe_calls().len(), 2);

    adapter.context().events.connection_lost("session closed");
    eventually(|| handle.stats().reconnects == 1 && handle.state() == ConnectionState::Connected)
        .await;
    eventually(|| adapter.subscribe_calls().len() == 3).await;

    let mut replayed = adapter.subscribe_calls()[2].clone();
    replayed.sort();
    let mut expected = vec![a.topic_name().to_string(), b.topic_name().to_string()];
    expected.sort();
    assert_eq!(replayed, expected);

    // Items released after replay are the new handles.
    client.unsubscribe(&[b.clone()]).await.unwrap();
    let released = adapter.unsubscribe_calls();
    assert_eq!(released.len(), 1);
    assert!(released[0].1.iter().all(|item| *item > 2));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_topic_failing_on_replay_is_retried() {
    let adapter = ScriptedAdapter::new("plant");
    let options = DriverOptions::default().with_reconnect_delay(Duration::from_millis(50));
    let (bus, handle) = start(adapter.clone(), options).await;
    assert!(handle.wait_for_state(ConnectionState::Connected).await);

    let a = topic("Opc/plant/Node/ns=2;s=A");
    let b = topic("Opc/plant/Node/ns=2;s=B");
    let client = DriverClient::new(bus, SystemType::Opc, "plant").with_client_id("c1");
    client.subscribe(&a).await.unwrap();
    client.subscribe(&b).await.unwrap();

    adapter.reject_once(&b);
    adapter.context().events.connection_lost("session closed");
    eventually(|| adapter.subscribe_calls().len() == 4).await;

    let calls = adapter.subscribe_calls();
    assert_eq!(calls[2].len(), 2);
    assert_eq!(calls[3], vec![b.topic_name().to_string()]);
    assert_eq!(handle.stats().resubscribe_attempts, 1);

    // Both topics hold a live item again and release it on unsubscribe.
    client.unsubscribe(&[a.clone(), b.clone()]).await.unwrap();
    let released = adapter.unsubscribe_calls();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].1.len(), 2);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(adapter.subscribe_calls().len(), 4);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_rejected_first_subscribe_replies_error() {
    let adapter = ScriptedAdapter::new("plant");
    let (bus, handle) = start(adapter.clone(), DriverOptions::default()).await;
    assert!(handle.wait_for_state(ConnectionState::Connected).await);

    let a = topic("Opc/plant/Node/ns=2;s=A");
    adapter.reject_once(&a);
    let client = DriverClient::for_topic(bus, &a);
    assert!(client.subscribe(&a).await.is_err());

    // The failed client was rolled back, so a new subscribe goes to the backend.
    client.subscribe(&a).await.unwrap();
    assert_eq!(adapter.subscribe_calls().len(), 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_subscribe_while_disconnected_waits_for_connect() {
    let adapter = ScriptedAdapter::new("plant").failing_connects(1);
    let options = DriverOptions::default().with_reconnect_delay(Duration::from_millis(200));
    let (bus, handle) = start(adapter.clone(), options).await;

    let a = topic("Opc/plant/Node/ns=2;s=A");
    let client = DriverClient::for_topic(bus, &a);
    client.subscribe(&a).await.unwrap();
    assert!(adapter.subscribe_calls().is_empty());

    assert!(handle.wait_for_state(ConnectionState::Connected).await);
    eventually(|| adapter.subscribe_calls().len() == 1).await;
    assert_eq!(adapter.subscribe_calls()[0], vec![a.topic_name().to_string()]);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_startup_topics_subscribe_once() {
    let adapter = ScriptedAdapter::new("plant");
    let options = DriverOptions::default()
        .with_startup_topics(vec![topic("Opc/plant/Node/i=2258")]);
    let (_bus, handle) = start(adapter.clone(), options).await;

    assert!(handle.wait_for_state(ConnectionState::Connected).await);
    eventually(|| adapter.subscribe_calls().len() == 1).await;

    adapter.context().events.connection_lost("network");
    eventually(|| adapter.subscribe_calls().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(adapter.subscribe_calls().len(), 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_unregisters_addresses() {
    let adapter = ScriptedAdapter::new("plant");
    let (bus, handle) = start(adapter.clone(), DriverOptions::default()).await;
    assert!(bus.has_handler("Opc/plant/Read"));

    handle.shutdown().await;
    assert!(!bus.has_handler("Opc/plant/Read"));
    assert!(adapter.script.lock().disconnects >= 1);
}

// =============================================================================
// Request Tests
// =============================================================================

#[tokio::test]
async fn test_read_requires_connection() {
    let adapter = ScriptedAdapter::new("plant").failing_connects(usize::MAX);
    let (bus, handle) = start(adapter, DriverOptions::default()).await;

    let client = DriverClient::new(bus, SystemType::Opc, "plant");
    let err = client.read("i=2258").await.unwrap_err();
    match err {
        BusError::Rejected { message, .. } => assert!(message.contains("not connected")),
        other => panic!("unexpected error: {other:?}"),
    }

    handle.shutdown().await;
}

#[tokio::test]
async fn test_read_single_and_many() {
    let adapter = ScriptedAdapter::new("plant");
    let (bus, handle) = start(adapter, DriverOptions::default()).await;
    assert!(handle.wait_for_state(ConnectionState::Connected).await);

    let client = DriverClient::new(bus, SystemType::Opc, "plant");
    let one = client.read("i=2258").await.unwrap();
    assert_eq!(one.value_as_string(), "42");

    let many = client.read_many(&["i=1", "i=2", "i=3"]).await.unwrap();
    assert_eq!(many.len(), 3);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_write_reply_shapes() {
    let adapter = ScriptedAdapter::new("plant");
    let (bus, handle) = start(adapter, DriverOptions::default()).await;
    assert!(handle.wait_for_state(ConnectionState::Connected).await);

    let client = DriverClient::new(bus.clone(), SystemType::Opc, "plant");
    assert!(client.write("ns=2;s=Setpoint", 12.5).await.unwrap());

    let flags = client
        .write_many(&[("ns=2;s=A", json!("1")), ("ns=2;s=B", json!("fail"))])
        .await
        .unwrap();
    assert_eq!(flags, vec![true, false]);

    let mismatched = client
        .call(
            tagway_core::Operation::Write,
            json!({"NodeId": ["a", "b"], "Value": ["1"]}),
        )
        .await;
    assert!(matches!(mismatched, Err(BusError::Rejected { .. })));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_unsupported_operation_replies_error() {
    let adapter = ScriptedAdapter::new("plant");
    let (bus, handle) = start(adapter, DriverOptions::default()).await;
    assert!(handle.wait_for_state(ConnectionState::Connected).await);

    let client = DriverClient::new(bus, SystemType::Opc, "plant");
    assert!(client.browse("i=85", false).await.is_err());
    assert!(client.server_info().await.is_err());

    handle.shutdown().await;
}

// =============================================================================
// Publication Tests
// =============================================================================

#[tokio::test]
async fn test_values_reach_subscribers_and_empty_values_do_not() {
    let adapter = ScriptedAdapter::new("plant");
    let (bus, handle) = start(adapter.clone(), DriverOptions::default()).await;
    assert!(handle.wait_for_state(ConnectionState::Connected).await);

    let speed = topic("Opc/plant/Node:Value/ns=2;s=Speed");
    let mut values = DriverClient::for_topic(bus, &speed).subscribe(&speed).await.unwrap();

    let publisher = adapter.context().publisher;
    assert!(!publisher.publish(&DataPoint::new(speed.clone(), CanonicalValue::empty("BadWaitingForInitialData"))));
    assert!(publisher.publish(&DataPoint::new(speed.clone(), CanonicalValue::new(1500i64))));

    let message = values.recv().await.unwrap();
    assert_eq!(message.payload, "1500");
    assert!(values.try_recv().unwrap().is_none());

    let stats = handle.stats();
    assert_eq!(stats.published_values, 1);
    assert_eq!(stats.suppressed_values, 1);

    handle.shutdown().await;
}
