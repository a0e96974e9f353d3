// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-driver subscription registry.
//!
//! The registry multiplexes many logical subscribers onto one backend
//! subscription per topic. It counts distinct clients per topic and owns the
//! backend monitored-item handles created for that topic.
//!
//! The registry has no interior locking. It is owned by a single driver actor
//! and every mutation happens on that actor's task.
//!
//! # Lifecycle
//!
//! ```text
//! add_client (refcount 0 -> 1)  => backend subscribe, add_monitored_item
//! add_client (refcount n -> n+1) => nothing
//! del_client (refcount 1 -> 0)  => del_topic, backend unsubscribe
//! ```

use std::collections::{HashMap, HashSet};

use tracing::{trace, warn};

use crate::topic::TopicAddress;

/// Identifier of a logical subscriber (a front-end connection).
pub type ClientId = String;

#[derive(Debug)]
struct TopicClients {
    topic: TopicAddress,
    clients: HashSet<ClientId>,
}

/// Reference-counted subscriptions and their backend handles.
///
/// `I` is the driver's monitored item handle type.
#[derive(Debug)]
pub struct SubscriptionRegistry<I> {
    clients: HashMap<String, TopicClients>,
    items: HashMap<String, Vec<I>>,
}

impl<I> SubscriptionRegistry<I> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
            items: HashMap::new(),
        }
    }

    /// Adds a client to a topic.
    ///
    /// Returns the topic's refcount and whether the pair was newly added.
    /// Adding a pair that is already present changes nothing.
    pub fn add_client(&mut self, client_id: &str, topic: &TopicAddress) -> (usize, bool) {
        let entry = self
            .clients
            .entry(topic.topic_name().to_string())
            .or_insert_with(|| TopicClients {
                topic: topic.clone(),
                clients: HashSet::new(),
            });

        let added = entry.clients.insert(client_id.to_string());
        if !added {
            warn!(client = client_id, topic = %topic, "Client already subscribed to topic");
        }
        (entry.clients.len(), added)
    }

    /// Removes a client from a topic.
    ///
    /// Returns the remaining refcount and whether the pair existed. The topic
    /// entry disappears when its last client leaves.
    pub fn del_client(&mut self, client_id: &str, topic: &TopicAddress) -> (usize, bool) {
        let Some(entry) = self.clients.get_mut(topic.topic_name()) else {
            warn!(client = client_id, topic = %topic, "Unsubscribe for unknown topic");
            return (0, false);
        };

        let removed = entry.clients.remove(client_id);
        let count = entry.clients.len();
        if !removed {
            warn!(client = client_id, topic = %topic, "Client was not subscribed to topic");
        }
        if count == 0 {
            self.clients.remove(topic.topic_name());
        }
        (count, removed)
    }

    /// Attaches a backend handle to a topic.
    pub fn add_monitored_item(&mut self, item: I, topic: &TopicAddress) {
        trace!(topic = %topic, "Monitored item added");
        self.items
            .entry(topic.topic_name().to_string())
            .or_default()
            .push(item);
    }

    /// Detaches and returns every backend handle of a topic.
    pub fn del_topic(&mut self, topic: &TopicAddress) -> Vec<I> {
        self.items.remove(topic.topic_name()).unwrap_or_default()
    }

    /// Returns a snapshot of every topic with at least one client.
    pub fn get_topics(&self) -> Vec<TopicAddress> {
        self.clients.values().map(|entry| entry.topic.clone()).collect()
    }

    /// Returns the refcount of a topic.
    pub fn client_count(&self, topic: &TopicAddress) -> usize {
        self.clients
            .get(topic.topic_name())
            .map(|entry| entry.clients.len())
            .unwrap_or(0)
    }

    /// Returns the number of handles attached to a topic.
    pub fn item_count(&self, topic: &TopicAddress) -> usize {
        self.items.get(topic.topic_name()).map(Vec::len).unwrap_or(0)
    }

    /// Returns the topics a client is subscribed to.
    pub fn topics_of(&self, client_id: &str) -> Vec<TopicAddress> {
        self.clients
            .values()
            .filter(|entry| entry.clients.contains(client_id))
            .map(|entry| entry.topic.clone())
            .collect()
    }

    /// Returns the number of topics with clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` if no topic has clients.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl<I> Default for SubscriptionRegistry<I> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
