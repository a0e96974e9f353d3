// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol binding abstraction.
//!
//! A [`DriverAdapter`] is the protocol-specific half of a driver. The generic
//! half, [`Driver`](crate::driver::Driver), owns the adapter together with the
//! subscription registry and runs the connection state machine. The adapter
//! only talks to its backend.
//!
//! # Lifecycle
//!
//! 1. The driver calls [`DriverAdapter::connect`] with a [`DriverContext`].
//! 2. Value changes are published by the adapter through
//!    [`DriverContext::publisher`] from whatever task receives them.
//! 3. A lost connection is reported with [`DriverEvents::connection_lost`].
//!    The driver then reconnects and replays its registry.
//! 4. [`DriverAdapter::disconnect`] is called on shutdown and before every
//!    reconnect attempt.
//!
//! Adapters must not keep subscription state of their own beyond what is
//! needed to route backend callbacks. The registry is the source of truth.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{DriverError, DriverResult};
use crate::message::{BrowseEntry, SchemaNode};
use crate::publish::ValuePublisher;
use crate::topic::{SystemType, TopicAddress};
use crate::value::CanonicalValue;
use crate::write::WriteCompletion;

// =============================================================================
// Events
// =============================================================================

/// Notifications from an adapter to its driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// The backend connection dropped.
    ConnectionLost {
        /// Why the connection dropped.
        reason: String,
    },
}

/// Sending side of the adapter event channel.
#[derive(Debug, Clone)]
pub struct DriverEvents {
    sender: mpsc::UnboundedSender<DriverEvent>,
}

impl DriverEvents {
    /// Creates an event channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DriverEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Reports a lost connection.
    pub fn connection_lost(&self, reason: impl Into<String>) {
        let event = DriverEvent::ConnectionLost {
            reason: reason.into(),
        };
        if self.sender.send(event).is_err() {
            trace!("Driver gone, connection loss not delivered");
        }
    }
}

/// Everything an adapter needs from its driver while connected.
#[derive(Debug, Clone)]
pub struct DriverContext {
    /// Event channel back to the driver.
    pub events: DriverEvents,
    /// Publisher for value changes.
    pub publisher: ValuePublisher,
}

// =============================================================================
// SubscribedItems
// =============================================================================

/// Outcome of one [`DriverAdapter::subscribe_topics`] call.
///
/// A backend call that fails for one topic does not fail the batch. The topic
/// is listed in `failed` and the driver retries it later. Topics that can
/// never be subscribed, such as malformed filters, appear in neither list.
#[derive(Debug)]
pub struct SubscribedItems<I> {
    /// Created items with the topic each belongs to.
    pub items: Vec<(TopicAddress, I)>,
    /// Topics whose backend subscription failed.
    pub failed: Vec<TopicAddress>,
}

impl<I> SubscribedItems<I> {
    /// Creates an empty outcome.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Records a created item.
    pub fn push(&mut self, topic: TopicAddress, item: I) {
        self.items.push((topic, item));
    }

    /// Records a topic whose backend call failed.
    pub fn fail(&mut self, topic: TopicAddress) {
        if !self.failed.contains(&topic) {
            self.failed.push(topic);
        }
    }

    /// Returns `true` if every backend call succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl<I> Default for SubscribedItems<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> From<Vec<(TopicAddress, I)>> for SubscribedItems<I> {
    fn from(items: Vec<(TopicAddress, I)>) -> Self {
        Self {
            items,
            failed: Vec::new(),
        }
    }
}

// =============================================================================
// DriverAdapter
// =============================================================================

/// A protocol binding driven by a [`Driver`](crate::driver::Driver).
///
/// All methods take `&mut self`. The driver serializes every call on its own
/// task, so implementations need no internal locking for control state.
#[async_trait]
pub trait DriverAdapter: Send + 'static {
    /// Backend handle of one monitored item.
    type Item: Send + 'static;

    /// Returns the driver instance id, the system name of its topics.
    fn id(&self) -> &str;

    /// Returns the system type this adapter serves.
    fn system_type(&self) -> SystemType;

    /// Connects to the backend.
    async fn connect(&mut self, context: DriverContext) -> DriverResult<()>;

    /// Disconnects from the backend. Must succeed when already disconnected.
    async fn disconnect(&mut self) -> DriverResult<()>;

    /// Creates backend subscriptions for topics.
    ///
    /// Returns every created item with the topic it belongs to. A Path topic
    /// may yield many items or none. Per-topic backend failures go into
    /// [`SubscribedItems::failed`]; an `Err` means no topic was attempted.
    async fn subscribe_topics(
        &mut self,
        topics: &[TopicAddress],
    ) -> DriverResult<SubscribedItems<Self::Item>>;

    /// Deletes backend subscriptions of topics that lost their last client.
    async fn unsubscribe_items(
        &mut self,
        topics: &[TopicAddress],
        items: Vec<Self::Item>,
    ) -> DriverResult<()>;

    /// Publishes raw data to a backend topic.
    async fn publish_topic(&mut self, topic: &TopicAddress, data: &str) -> DriverResult<WriteCompletion> {
        let _ = (topic, data);
        Err(DriverError::unsupported("Publish"))
    }

    /// Reads current values.
    async fn read(&mut self, node_ids: &[String]) -> DriverResult<Vec<CanonicalValue>> {
        let _ = node_ids;
        Err(DriverError::unsupported("Read"))
    }

    /// Writes text values. Returns one completion per item, in order.
    async fn write(&mut self, items: Vec<(String, String)>) -> DriverResult<Vec<WriteCompletion>> {
        let _ = items;
        Err(DriverError::unsupported("Write"))
    }

    /// Browses one level forward, or every inverse reference up to the root.
    async fn browse(&mut self, node_id: &str, reverse: bool) -> DriverResult<Vec<BrowseEntry>> {
        let _ = (node_id, reverse);
        Err(DriverError::unsupported("Browse"))
    }

    /// Browses the subtrees below the given nodes.
    async fn schema(&mut self, node_ids: &[String]) -> DriverResult<Vec<SchemaNode>> {
        let _ = node_ids;
        Err(DriverError::unsupported("Schema"))
    }

    /// Describes the backend server.
    async fn server_info(&mut self) -> DriverResult<serde_json::Value> {
        Err(DriverError::unsupported("ServerInfo"))
    }
}

// =============================================================================
// Tests
// =============================================================================
