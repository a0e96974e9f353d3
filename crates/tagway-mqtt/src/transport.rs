// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! MQTT transport abstraction layer.
//!
//! [`MqttTransport`] is what the adapter needs from an MQTT client: a
//! session, filter subscriptions and publications. Received messages are
//! pushed into the [`MessageHandler`] given at connect time.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tagway_core::{DriverEvents, DriverResult};

use crate::settings::QoS;

/// A message received from the broker.
#[derive(Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// The concrete topic the message was published on.
    pub topic: String,
    /// The payload bytes.
    pub payload: Vec<u8>,
}

impl IncomingMessage {
    /// Creates a message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

impl fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("topic", &self.topic)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Receives broker messages. Must not block.
pub trait MessageHandler: Send + Sync {
    /// Handles one message.
    fn on_message(&self, message: IncomingMessage);
}

impl<F> MessageHandler for F
where
    F: Fn(IncomingMessage) + Send + Sync,
{
    fn on_message(&self, message: IncomingMessage) {
        self(message)
    }
}

/// Low-level MQTT client operations.
#[async_trait]
pub trait MqttTransport: Send + Sync + 'static {
    /// Connects to the broker and starts delivering messages to `handler`.
    ///
    /// A connection that later drops must be reported through `events`.
    async fn connect(&self, events: DriverEvents, handler: Arc<dyn MessageHandler>) -> DriverResult<()>;

    /// Disconnects. Succeeds when not connected.
    async fn disconnect(&self) -> DriverResult<()>;

    /// Returns `true` while connected.
    fn is_connected(&self) -> bool;

    /// Subscribes a topic filter.
    async fn subscribe(&self, filter: &str, qos: QoS) -> DriverResult<()>;

    /// Unsubscribes a topic filter.
    async fn unsubscribe(&self, filter: &str) -> DriverResult<()>;

    /// Publishes a message.
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> DriverResult<()>;
}
