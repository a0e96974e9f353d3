// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Internal request/reply and publish/subscribe bus.
//!
//! Front-ends and drivers never reference each other directly. They meet on
//! the [`Bus`]:
//!
//! - **Request/reply**: a driver registers a handler per address
//!   (`{SystemType}/{SystemName}/{Operation}`) and receives [`BusRequest`]s
//!   over an mpsc channel. Each request carries a oneshot reply slot.
//! - **Publish/subscribe**: values are published on the channel named by the
//!   topic's canonical name and fanned out through a broadcast channel per
//!   name. Delivery is at-most-once with no replay.
//!
//! ```text
//!  front-end ──request(addr, body)──▶ handlers[addr] ──▶ driver actor
//!      ▲                                                     │
//!      └──────────── channels[topic] ◀──publish(topic)───────┘
//! ```
//!
//! The bus is shared as `Arc<Bus>` and is safe to publish to from any task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{trace, warn};

use crate::error::{BusError, BusResult};

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Messages
// =============================================================================

/// A value published on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// The channel name, a topic's canonical name.
    pub channel: String,
    /// The rendered payload.
    pub payload: String,
}

/// A request delivered to a handler.
#[derive(Debug)]
pub struct BusRequest {
    /// The address the request was sent to.
    pub address: String,
    /// The JSON request body.
    pub body: serde_json::Value,
    reply: oneshot::Sender<serde_json::Value>,
}

impl BusRequest {
    /// Creates a request and the receiver of its reply.
    pub fn new(
        address: impl Into<String>,
        body: serde_json::Value,
    ) -> (Self, oneshot::Receiver<serde_json::Value>) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                address: address.into(),
                body,
                reply,
            },
            rx,
        )
    }

    /// Decodes the body into a typed request.
    pub fn decode<T: DeserializeOwned>(&self) -> BusResult<T> {
        serde_json::from_value(self.body.clone()).map_err(BusError::from)
    }

    /// Sends the reply. A requester that gave up is ignored.
    pub fn reply(self, body: serde_json::Value) {
        if self.reply.send(body).is_err() {
            trace!(address = %self.address, "Requester gone before reply");
        }
    }

    /// Splits the request into its body and reply slot.
    pub fn into_parts(self) -> (serde_json::Value, ReplySender) {
        (
            self.body,
            ReplySender {
                address: self.address,
                reply: self.reply,
            },
        )
    }
}

/// Detached reply slot of a [`BusRequest`].
#[derive(Debug)]
pub struct ReplySender {
    address: String,
    reply: oneshot::Sender<serde_json::Value>,
}

impl ReplySender {
    /// Sends the reply.
    pub fn send(self, body: serde_json::Value) {
        if self.reply.send(body).is_err() {
            trace!(address = %self.address, "Requester gone before reply");
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Bus statistics.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusStats {
    /// Requests sent.
    pub requests: u64,
    /// Requests that failed or timed out.
    pub request_failures: u64,
    /// Messages published.
    pub messages_published: u64,
    /// Messages handed to at least one subscriber.
    pub messages_delivered: u64,
    /// Messages lost by lagging subscribers.
    pub messages_dropped: u64,
    /// Registered request handlers.
    pub handlers: u64,
    /// Channels with live subscribers.
    pub channels: u64,
}

#[derive(Debug, Default)]
struct AtomicBusStats {
    requests: AtomicU64,
    request_failures: AtomicU64,
    messages_published: AtomicU64,
    messages_delivered: AtomicU64,
    messages_dropped: AtomicU64,
}

// =============================================================================
// Bus
// =============================================================================

/// Request/reply and pub/sub transport between front-ends and drivers.
pub struct Bus {
    handlers: DashMap<String, mpsc::Sender<BusRequest>>,
    channels: DashMap<String, broadcast::Sender<BusMessage>>,
    capacity: usize,
    stats: Arc<AtomicBusStats>,
}

impl Bus {
    /// Creates a bus whose channels buffer `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            handlers: DashMap::new(),
            channels: DashMap::new(),
            capacity: capacity.max(1),
            stats: Arc::new(AtomicBusStats::default()),
        }
    }

    /// Returns the channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // -------------------------------------------------------------------------
    // Request/reply
    // -------------------------------------------------------------------------

    /// Registers a handler for an address and returns its request stream.
    ///
    /// A previous handler at the same address is replaced.
    pub fn register(&self, address: impl Into<String>) -> RequestReceiver {
        self.register_all(vec![address.into()])
    }

    /// Registers one request stream for several addresses.
    ///
    /// Requests keep their address so the handler can tell them apart.
    pub fn register_all(&self, addresses: Vec<String>) -> RequestReceiver {
        let (sender, receiver) = mpsc::channel(self.capacity);
        for address in &addresses {
            if let Some(previous) = self.handlers.insert(address.clone(), sender.clone()) {
                if !previous.is_closed() {
                    warn!(address = %address, "Replacing live bus handler");
                }
            }
        }
        RequestReceiver {
            addresses,
            receiver,
        }
    }

    /// Removes the handler for an address.
    pub fn unregister(&self, address: &str) -> bool {
        self.handlers.remove(address).is_some()
    }

    /// Returns `true` if a live handler is registered at the address.
    pub fn has_handler(&self, address: &str) -> bool {
        self.handlers
            .get(address)
            .map(|sender| !sender.is_closed())
            .unwrap_or(false)
    }

    /// Sends a request and waits for the reply body.
    pub async fn request(
        &self,
        address: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> BusResult<serde_json::Value> {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        let result = self.do_request(address, body, timeout).await;
        if result.is_err() {
            self.stats.request_failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn do_request(
        &self,
        address: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> BusResult<serde_json::Value> {
        let sender = self
            .handlers
            .get(address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BusError::NoHandler {
                address: address.to_string(),
            })?;

        let closed = || BusError::Closed {
            address: address.to_string(),
        };
        let (request, rx) = BusRequest::new(address, body);

        let exchange = async {
            sender.send(request).await.map_err(|_| closed())?;
            rx.await.map_err(|_| closed())
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| BusError::Timeout {
                address: address.to_string(),
                timeout,
            })?
    }

    // -------------------------------------------------------------------------
    // Publish/subscribe
    // -------------------------------------------------------------------------

    /// Publishes a payload on a channel.
    ///
    /// Returns the number of subscribers that will see it. A channel without
    /// subscribers drops the payload.
    pub fn publish(&self, channel: &str, payload: impl Into<String>) -> usize {
        self.stats.messages_published.fetch_add(1, Ordering::Relaxed);

        let Some(sender) = self.channels.get(channel).map(|entry| entry.value().clone()) else {
            return 0;
        };

        let message = BusMessage {
            channel: channel.to_string(),
            payload: payload.into(),
        };
        match sender.send(message) {
            Ok(count) => {
                self.stats.messages_delivered.fetch_add(1, Ordering::Relaxed);
                count
            }
            Err(_) => {
                self.channels
                    .remove_if(channel, |_, sender| sender.receiver_count() == 0);
                0
            }
        }
    }

    /// Subscribes to a channel.
    pub fn subscribe(&self, channel: &str) -> BusSubscriber {
        let receiver = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        BusSubscriber {
            channel: channel.to_string(),
            receiver,
            stats: self.stats.clone(),
        }
    }

    /// Returns the number of live subscribers of a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Returns current statistics.
    pub fn stats(&self) -> BusStats {
        BusStats {
            requests: self.stats.requests.load(Ordering::Relaxed),
            request_failures: self.stats.request_failures.load(Ordering::Relaxed),
            messages_published: self.stats.messages_published.load(Ordering::Relaxed),
            messages_delivered: self.stats.messages_delivered.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            handlers: self.handlers.len() as u64,
            channels: self
                .channels
                .iter()
                .filter(|entry| entry.value().receiver_count() > 0)
                .count() as u64,
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("capacity", &self.capacity)
            .field("handlers", &self.handlers.len())
            .field("channels", &self.channels.len())
            .finish()
    }
}

// =============================================================================
// Receivers
// =============================================================================

/// Request stream of one or more registered addresses.
#[derive(Debug)]
pub struct RequestReceiver {
    addresses: Vec<String>,
    receiver: mpsc::Receiver<BusRequest>,
}

impl RequestReceiver {
    /// Returns the registered addresses.
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Receives the next request, `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<BusRequest> {
        self.receiver.recv().await
    }

    /// Stops accepting requests.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Subscriber to one channel.
pub struct BusSubscriber {
    channel: String,
    receiver: broadcast::Receiver<BusMessage>,
    stats: Arc<AtomicBusStats>,
}

impl BusSubscriber {
    /// Returns the channel name.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Receives the next message. Lag is logged and skipped.
    pub async fn recv(&mut self) -> BusResult<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Ok(message),
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(BusError::Closed {
                        address: self.channel.clone(),
                    })
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    self.stats.messages_dropped.fetch_add(count, Ordering::Relaxed);
                    warn!(channel = %self.channel, count, "Bus subscriber lagged, messages dropped");
                }
            }
        }
    }

    /// Receives without waiting.
    pub fn try_recv(&mut self) -> BusResult<Option<BusMessage>> {
        match self.receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(BusError::Closed {
                address: self.channel.clone(),
            }),
            Err(broadcast::error::TryRecvError::Lagged(count)) => {
                self.stats.messages_dropped.fetch_add(count, Ordering::Relaxed);
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for BusSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSubscriber")
            .field("channel", &self.channel)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
