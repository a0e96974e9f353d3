// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Driver actor and connection state machine.
//!
//! A [`Driver`] owns one [`DriverAdapter`] and one [`SubscriptionRegistry`]
//! and runs them on a single task. Every bus request, adapter event and
//! reconnect timer is handled on that task, so registry state has exactly
//! one writer.
//!
//! # Connection states
//!
//! ```text
//!               connect ok                 connection lost
//! Connecting ──────────────▶ Connected ─────────────────────▶ Reconnecting
//!   │    ▲                      ▲                                  │
//!   └────┘ fail: retry after    └──────────── connect ok ──────────┘
//!          fixed delay                 (fail: retry after fixed delay)
//! ```
//!
//! There is no backoff and no retry limit. Every transition into
//! `Connected` replays the registry: old backend handles are discarded and
//! every registered topic is subscribed again. Topics whose backend call
//! fails during replay keep their clients and are retried after the same
//! fixed delay until they succeed or lose their last client.
//!
//! # Example
//!
//! ```rust,ignore
//! let driver = Driver::new(adapter, bus.clone(), DriverOptions::default());
//! let handle = driver.spawn();
//! handle.wait_for_state(ConnectionState::Connected).await;
//! handle.shutdown().await;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::adapter::{DriverAdapter, DriverContext, DriverEvent, DriverEvents};
use crate::bus::{Bus, BusRequest, ReplySender};
use crate::error::{BusError, DriverError};
use crate::message::{
    self, BrowseRequest, Operation, PublishRequest, ReadRequest, Reply, SchemaRequest,
    SubscribeRequest, UnsubscribeRequest, WriteRequest,
};
use crate::publish::ValuePublisher;
use crate::registry::SubscriptionRegistry;
use crate::topic::TopicAddress;

/// Client id under which startup subscriptions are registered.
pub const STARTUP_CLIENT_ID: &str = "$startup";

/// Default delay between connection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

// =============================================================================
// ConnectionState
// =============================================================================

/// Connection state of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not running or shut down.
    Disconnected,
    /// Establishing the first connection.
    Connecting,
    /// Connected to the backend.
    Connected,
    /// Re-establishing a lost connection.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Options
// =============================================================================

/// Driver behaviour independent of the protocol.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Fixed delay between failed connection attempts.
    pub reconnect_delay: Duration,
    /// Topics subscribed after the first successful connect.
    pub subscribe_on_startup: Vec<TopicAddress>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            subscribe_on_startup: Vec::new(),
        }
    }
}

impl DriverOptions {
    /// Sets the reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the startup topics.
    pub fn with_startup_topics(mut self, topics: Vec<TopicAddress>) -> Self {
        self.subscribe_on_startup = topics;
        self
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Driver counters, shared with the driver's [`ValuePublisher`].
#[derive(Debug, Default)]
pub struct DriverStats {
    requests: AtomicU64,
    subscribe_calls: AtomicU64,
    unsubscribe_calls: AtomicU64,
    backend_subscriptions: AtomicU64,
    published_values: AtomicU64,
    suppressed_values: AtomicU64,
    reconnects: AtomicU64,
    connect_failures: AtomicU64,
    resubscribe_attempts: AtomicU64,
}

impl DriverStats {
    pub(crate) fn record_published(&self) {
        self.published_values.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_suppressed(&self) {
        self.suppressed_values.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a copy of the counters.
    pub fn snapshot(&self) -> DriverStatsSnapshot {
        DriverStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            subscribe_calls: self.subscribe_calls.load(Ordering::Relaxed),
            unsubscribe_calls: self.unsubscribe_calls.load(Ordering::Relaxed),
            backend_subscriptions: self.backend_subscriptions.load(Ordering::Relaxed),
            published_values: self.published_values.load(Ordering::Relaxed),
            suppressed_values: self.suppressed_values.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            resubscribe_attempts: self.resubscribe_attempts.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`DriverStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriverStatsSnapshot {
    /// Bus requests handled.
    pub requests: u64,
    /// Subscribe requests.
    pub subscribe_calls: u64,
    /// Unsubscribe requests.
    pub unsubscribe_calls: u64,
    /// Backend monitored items created.
    pub backend_subscriptions: u64,
    /// Values published on the bus.
    pub published_values: u64,
    /// Values dropped for having no scalar.
    pub suppressed_values: u64,
    /// Lost connections.
    pub reconnects: u64,
    /// Failed connection attempts.
    pub connect_failures: u64,
    /// Retries of topics whose backend subscription failed on replay.
    pub resubscribe_attempts: u64,
}

// =============================================================================
// DriverHandle
// =============================================================================

/// Control handle of a spawned driver.
#[derive(Debug)]
pub struct DriverHandle {
    id: String,
    shutdown: Arc<Notify>,
    stats: Arc<DriverStats>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    /// Returns the driver id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Returns a receiver of state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Waits until the driver reaches `target`.
    ///
    /// Returns `false` if the driver stopped first.
    pub async fn wait_for_state(&self, target: ConnectionState) -> bool {
        let mut state = self.state.clone();
        let reached = state.wait_for(|s| *s == target).await.is_ok();
        reached
    }

    /// Returns a copy of the counters.
    pub fn stats(&self) -> DriverStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stops the driver and waits for it to disconnect.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            warn!(driver = %self.id, error = %e, "Driver task ended abnormally");
        }
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Single-task actor that serializes all control flow of one driver.
pub struct Driver<A: DriverAdapter> {
    adapter: A,
    bus: Arc<Bus>,
    options: DriverOptions,
    registry: SubscriptionRegistry<A::Item>,
    state: watch::Sender<ConnectionState>,
    stats: Arc<DriverStats>,
    shutdown: Arc<Notify>,
    connected_once: bool,
    resubscribe_queue: Vec<TopicAddress>,
    resubscribe_at: Option<Instant>,
}

impl<A: DriverAdapter> Driver<A> {
    /// Creates a driver. Nothing happens until it is spawned.
    pub fn new(adapter: A, bus: Arc<Bus>, options: DriverOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            adapter,
            bus,
            options,
            registry: SubscriptionRegistry::new(),
            state,
            stats: Arc::new(DriverStats::default()),
            shutdown: Arc::new(Notify::new()),
            connected_once: false,
            resubscribe_queue: Vec::new(),
            resubscribe_at: None,
        }
    }

    /// Returns the bus addresses this driver answers on.
    pub fn addresses(&self) -> Vec<String> {
        Operation::ALL
            .iter()
            .map(|op| message::address(self.adapter.system_type(), self.adapter.id(), *op))
            .collect()
    }

    /// Starts the driver on its own task.
    ///
    /// Bus handlers are registered before this returns, so requests sent
    /// right after are not lost.
    pub fn spawn(self) -> DriverHandle {
        let id = self.adapter.id().to_string();
        let shutdown = self.shutdown.clone();
        let stats = self.stats.clone();
        let state = self.state.subscribe();
        let requests = self.bus.register_all(self.addresses());
        let task = tokio::spawn(self.run(requests));

        DriverHandle {
            id,
            shutdown,
            stats,
            state,
            task,
        }
    }

    #[instrument(skip_all, fields(driver = %self.adapter.id()))]
    async fn run(mut self, mut requests: crate::bus::RequestReceiver) {
        let (events, mut event_rx) = DriverEvents::channel();
        let mut retry_at = Some(Instant::now());
        self.set_state(ConnectionState::Connecting);
        info!("Driver started");

        loop {
            let deadline = retry_at.unwrap_or_else(Instant::now);
            let resubscribe_deadline = self.resubscribe_at.unwrap_or_else(Instant::now);

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Driver received shutdown signal");
                    break;
                }

                Some(event) = event_rx.recv() => {
                    if let Some(at) = self.handle_event(event).await {
                        retry_at = Some(at);
                    }
                }

                _ = tokio::time::sleep_until(deadline), if retry_at.is_some() => {
                    retry_at = self.try_connect(&events).await;
                }

                _ = tokio::time::sleep_until(resubscribe_deadline), if self.resubscribe_at.is_some() => {
                    self.resubscribe().await;
                }

                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
            }
        }

        requests.close();
        for address in requests.addresses() {
            self.bus.unregister(address);
        }
        if let Err(e) = self.adapter.disconnect().await {
            warn!(error = %e, "Disconnect failed");
        }
        self.set_state(ConnectionState::Disconnected);
        info!("Driver stopped");
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    // -------------------------------------------------------------------------
    // Connection
    // -------------------------------------------------------------------------

    /// Attempts to connect. Returns the next attempt time on failure.
    async fn try_connect(&mut self, events: &DriverEvents) -> Option<Instant> {
        let context = DriverContext {
            events: events.clone(),
            publisher: ValuePublisher::new(self.bus.clone(), self.stats.clone()),
        };

        match self.adapter.connect(context).await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                info!("Connected");
                self.replay().await;
                if !self.connected_once {
                    self.connected_once = true;
                    self.subscribe_on_startup().await;
                }
                None
            }
            Err(e) => {
                self.stats.connect_failures.fetch_add(1, Ordering::Relaxed);
                let delay = self.options.reconnect_delay;
                info!(
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Connect failed, retrying"
                );
                if let Err(e) = self.adapter.disconnect().await {
                    debug!(error = %e, "Cleanup after failed connect");
                }
                Some(Instant::now() + delay)
            }
        }
    }

    /// Handles an adapter event. Returns a reconnect time when one is needed.
    async fn handle_event(&mut self, event: DriverEvent) -> Option<Instant> {
        match event {
            DriverEvent::ConnectionLost { reason } => {
                if !self.is_connected() {
                    debug!(reason = %reason, "Connection loss while not connected");
                    return None;
                }
                warn!(reason = %reason, "Connection lost");
                self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                // Replay after the reconnect covers these topics.
                self.resubscribe_queue.clear();
                self.resubscribe_at = None;
                self.set_state(ConnectionState::Reconnecting);
                if let Err(e) = self.adapter.disconnect().await {
                    debug!(error = %e, "Cleanup after connection loss");
                }
                Some(Instant::now())
            }
        }
    }

    /// Resubscribes every registered topic from scratch.
    async fn replay(&mut self) {
        let topics = self.registry.get_topics();
        if topics.is_empty() {
            return;
        }

        for topic in &topics {
            let discarded = self.registry.del_topic(topic);
            debug!(topic = %topic, items = discarded.len(), "Discarding stale monitored items");
        }

        info!(topics = topics.len(), "Replaying subscriptions");
        let failed = match self.subscribe_backend(&topics).await {
            Ok(failed) => failed,
            Err(e) => {
                warn!(error = %e, "Subscription replay failed");
                topics
            }
        };
        self.schedule_resubscribe(failed);
    }

    /// Queues topics for another backend subscribe after the reconnect delay.
    fn schedule_resubscribe(&mut self, topics: Vec<TopicAddress>) {
        if topics.is_empty() {
            return;
        }
        for topic in topics {
            if !self.resubscribe_queue.contains(&topic) {
                self.resubscribe_queue.push(topic);
            }
        }
        let delay = self.options.reconnect_delay;
        warn!(
            topics = self.resubscribe_queue.len(),
            retry_in_ms = delay.as_millis() as u64,
            "Topics without backend subscription, retrying"
        );
        self.resubscribe_at = Some(Instant::now() + delay);
    }

    /// Retries queued topics that still have clients and no items.
    async fn resubscribe(&mut self) {
        self.resubscribe_at = None;
        let queued = std::mem::take(&mut self.resubscribe_queue);
        if !self.is_connected() {
            return;
        }

        let topics: Vec<TopicAddress> = queued
            .into_iter()
            .filter(|t| self.registry.client_count(t) > 0 && self.registry.item_count(t) == 0)
            .collect();
        if topics.is_empty() {
            return;
        }

        self.stats.resubscribe_attempts.fetch_add(1, Ordering::Relaxed);
        info!(topics = topics.len(), "Retrying backend subscriptions");
        let failed = match self.subscribe_backend(&topics).await {
            Ok(failed) => failed,
            Err(e) => {
                warn!(error = %e, "Backend subscribe retry failed");
                topics
            }
        };
        self.schedule_resubscribe(failed);
    }

    async fn subscribe_on_startup(&mut self) {
        let topics = self.options.subscribe_on_startup.clone();
        for topic in topics {
            let reply = self
                .on_subscribe(SubscribeRequest {
                    client_id: STARTUP_CLIENT_ID.to_string(),
                    topic: topic.clone(),
                })
                .await;
            if !reply.is_ok() {
                warn!(topic = %topic, error = ?reply.error, "Startup subscription failed");
            }
        }
    }

    /// Subscribes topics on the backend. Returns the topics that failed.
    async fn subscribe_backend(&mut self, topics: &[TopicAddress]) -> Result<Vec<TopicAddress>, DriverError> {
        let outcome = self.adapter.subscribe_topics(topics).await?;
        let count = outcome.items.len();
        for (topic, item) in outcome.items {
            self.registry.add_monitored_item(item, &topic);
        }
        self.stats
            .backend_subscriptions
            .fetch_add(count as u64, Ordering::Relaxed);
        debug!(
            topics = topics.len(),
            items = count,
            failed = outcome.failed.len(),
            "Backend subscriptions created"
        );
        Ok(outcome.failed)
    }

    fn owns(&self, topic: &TopicAddress) -> bool {
        topic.system_type() == self.adapter.system_type() && topic.system_name() == self.adapter.id()
    }

    // -------------------------------------------------------------------------
    // Requests
    // -------------------------------------------------------------------------

    async fn handle_request(&mut self, request: BusRequest) {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        let operation = Operation::ALL
            .iter()
            .copied()
            .find(|op| request.address.rsplit('/').next() == Some(op.as_str()));
        let (body, reply) = request.into_parts();

        let Some(operation) = operation else {
            reply.send(Reply::error("Unknown operation").to_json());
            return;
        };

        match operation {
            Operation::Subscribe => {
                let result = match decode::<SubscribeRequest>(body) {
                    Ok(request) => self.on_subscribe(request).await,
                    Err(reply) => reply,
                };
                reply.send(result.to_json());
            }
            Operation::Unsubscribe => {
                let result = match decode::<UnsubscribeRequest>(body) {
                    Ok(request) => self.on_unsubscribe(request).await,
                    Err(reply) => reply,
                };
                reply.send(result.to_json());
            }
            Operation::Read => {
                let result = match decode::<ReadRequest>(body) {
                    Ok(request) => self.on_read(request).await,
                    Err(reply) => reply,
                };
                reply.send(result.to_json());
            }
            Operation::Browse => {
                let result = match decode::<BrowseRequest>(body) {
                    Ok(request) => self.on_browse(request).await,
                    Err(reply) => reply,
                };
                reply.send(result.to_json());
            }
            Operation::Schema => {
                let body = if body.is_null() { serde_json::json!({}) } else { body };
                let result = match decode::<SchemaRequest>(body) {
                    Ok(request) => self.on_schema(request).await,
                    Err(reply) => reply,
                };
                reply.send(result.to_json());
            }
            Operation::ServerInfo => {
                let result = self.on_server_info().await;
                reply.send(result.to_json());
            }
            Operation::Write => match decode::<WriteRequest>(body) {
                Ok(request) => self.on_write(request, reply).await,
                Err(result) => reply.send(result.to_json()),
            },
            Operation::Publish => match decode::<PublishRequest>(body) {
                Ok(request) => self.on_publish(request, reply).await,
                Err(result) => reply.send(result.to_json()),
            },
        }
    }

    async fn on_subscribe(&mut self, request: SubscribeRequest) -> Reply {
        self.stats.subscribe_calls.fetch_add(1, Ordering::Relaxed);
        let topic = request.topic;
        if !self.owns(&topic) {
            return Reply::error(format!("Topic '{}' does not belong to this driver", topic));
        }

        let (count, added) = self.registry.add_client(&request.client_id, &topic);
        debug!(client = %request.client_id, topic = %topic, count, "Client subscribed");
        if !added || count != 1 || !self.is_connected() {
            return Reply::ok();
        }

        let error = match self.subscribe_backend(std::slice::from_ref(&topic)).await {
            Ok(failed) if failed.is_empty() => return Reply::ok(),
            Ok(_) => DriverError::subscription(format!("Backend rejected {}", topic)),
            Err(e) => e,
        };
        warn!(topic = %topic, error = %error, "Backend subscribe failed");
        self.registry.del_client(&request.client_id, &topic);
        self.registry.del_topic(&topic);
        Reply::error(error)
    }

    async fn on_unsubscribe(&mut self, request: UnsubscribeRequest) -> Reply {
        self.stats.unsubscribe_calls.fetch_add(1, Ordering::Relaxed);

        let mut released_topics = Vec::new();
        let mut released_items = Vec::new();
        for topic in &request.topics {
            let (count, removed) = self.registry.del_client(&request.client_id, topic);
            if removed && count == 0 {
                released_items.extend(self.registry.del_topic(topic));
                released_topics.push(topic.clone());
            }
        }

        if released_topics.is_empty() || !self.is_connected() {
            return Reply::ok();
        }

        debug!(topics = released_topics.len(), items = released_items.len(), "Releasing backend subscriptions");
        if let Err(e) = self
            .adapter
            .unsubscribe_items(&released_topics, released_items)
            .await
        {
            warn!(error = %e, "Backend unsubscribe failed");
        }
        Reply::ok()
    }

    async fn on_read(&mut self, request: ReadRequest) -> Reply {
        if !self.is_connected() {
            return Reply::error(DriverError::NotConnected);
        }
        let many = request.node_id.is_many();
        let node_ids = request.node_id.into_vec();

        match self.adapter.read(&node_ids).await {
            Ok(values) if many => Reply::with_result(serde_json::Value::Array(
                values.iter().map(|v| v.to_json()).collect(),
            )),
            Ok(values) => match values.first() {
                Some(value) => Reply::with_result(value.to_json()),
                None => Reply::error(DriverError::read_failed(node_ids.join(","), "no value returned")),
            },
            Err(e) => Reply::error(e),
        }
    }

    async fn on_write(&mut self, request: WriteRequest, reply: ReplySender) {
        let many = request.node_id.is_many();
        let Some(pairs) = request.pairs() else {
            reply.send(Reply::error("NodeId and Value counts differ").to_json());
            return;
        };
        if !self.is_connected() {
            reply.send(Reply::error(DriverError::NotConnected).to_json());
            return;
        }

        let completions = match self.adapter.write(pairs).await {
            Ok(completions) => completions,
            Err(e) => {
                reply.send(Reply::error(e).to_json());
                return;
            }
        };

        tokio::spawn(async move {
            let mut flags = Vec::with_capacity(completions.len());
            for completion in completions {
                flags.push(completion.await);
            }
            let result = if many {
                Reply::flags(flags)
            } else {
                Reply::flag(flags.first().copied().unwrap_or(false))
            };
            reply.send(result.to_json());
        });
    }

    async fn on_publish(&mut self, request: PublishRequest, reply: ReplySender) {
        if !self.owns(&request.topic) {
            let error = format!("Topic '{}' does not belong to this driver", request.topic);
            reply.send(Reply::error(error).to_json());
            return;
        }
        if !self.is_connected() {
            reply.send(Reply::error(DriverError::NotConnected).to_json());
            return;
        }

        match self.adapter.publish_topic(&request.topic, &request.data).await {
            Ok(completion) => {
                tokio::spawn(async move {
                    reply.send(Reply::flag(completion.await).to_json());
                });
            }
            Err(e) => reply.send(Reply::error(e).to_json()),
        }
    }

    async fn on_browse(&mut self, request: BrowseRequest) -> Reply {
        if !self.is_connected() {
            return Reply::error(DriverError::NotConnected);
        }
        match self.adapter.browse(&request.node_id, request.reverse).await {
            Ok(entries) => to_result(&entries),
            Err(e) => Reply::error(e),
        }
    }

    async fn on_schema(&mut self, request: SchemaRequest) -> Reply {
        if !self.is_connected() {
            return Reply::error(DriverError::NotConnected);
        }
        let node_ids = request.node_ids.into_vec();
        match self.adapter.schema(&node_ids).await {
            Ok(nodes) => to_result(&nodes),
            Err(e) => Reply::error(e),
        }
    }

    async fn on_server_info(&mut self) -> Reply {
        if !self.is_connected() {
            return Reply::error(DriverError::NotConnected);
        }
        match self.adapter.server_info().await {
            Ok(info) => Reply::with_result(info),
            Err(e) => Reply::error(e),
        }
    }
}

impl<A: DriverAdapter> fmt::Debug for Driver<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("id", &self.adapter.id())
            .field("state", &*self.state.borrow())
            .field("topics", &self.registry.len())
            .finish()
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: serde_json::Value) -> Result<T, Reply> {
    serde_json::from_value(body).map_err(|e| Reply::error(BusError::from(e)))
}

fn to_result<T: Serialize>(value: &T) -> Reply {
    match serde_json::to_value(value) {
        Ok(json) => Reply::with_result(json),
        Err(e) => Reply::error(BusError::from(e)),
    }
}
