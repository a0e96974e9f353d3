// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Routing of received messages to subscribed topics.
//!
//! A broker message carries a concrete topic. The router finds every
//! subscribed topic whose filter matches it and remembers the answer per
//! received topic. Adding or removing a filter evicts the cached answers it
//! could change. The answers live in an LRU cache, so a wildcard filter over
//! an unbounded set of topic names keeps at most a fixed number of them.

use std::fmt;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tagway_core::TopicAddress;
use tracing::trace;

use crate::filter;

/// Default number of received topics whose routes are cached.
pub const DEFAULT_ROUTE_CACHE_SIZE: usize = 10_000;

struct RouterState {
    subscribed: Vec<TopicAddress>,
    received: LruCache<String, Vec<TopicAddress>>,
}

/// Received-topic router shared by the adapter and the message callback.
pub struct TopicRouter {
    state: Mutex<RouterState>,
}

impl TopicRouter {
    /// Creates an empty router with the default route cache size.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ROUTE_CACHE_SIZE)
    }

    /// Creates an empty router caching routes of at most `capacity`
    /// received topics.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(RouterState {
                subscribed: Vec::new(),
                received: LruCache::new(capacity),
            }),
        }
    }

    /// Adds a subscribed topic. Returns `false` if it was already present.
    pub fn add(&self, topic: &TopicAddress) -> bool {
        let mut state = self.state.lock();
        if state.subscribed.iter().any(|t| t.topic_name() == topic.topic_name()) {
            return false;
        }
        state.subscribed.push(topic.clone());
        Self::evict(&mut state, topic.payload());
        true
    }

    /// Removes a subscribed topic. Returns `false` if it was not present.
    pub fn remove(&self, topic: &TopicAddress) -> bool {
        let mut state = self.state.lock();
        let before = state.subscribed.len();
        state.subscribed.retain(|t| t.topic_name() != topic.topic_name());
        if state.subscribed.len() == before {
            return false;
        }
        Self::evict(&mut state, topic.payload());
        true
    }

    /// Returns `true` if any subscribed topic still uses `filter`.
    pub fn uses_filter(&self, filter: &str) -> bool {
        self.state.lock().subscribed.iter().any(|t| t.payload() == filter)
    }

    /// Returns the subscribed topics a message on `received` belongs to.
    pub fn route(&self, received: &str) -> Vec<TopicAddress> {
        let mut state = self.state.lock();
        if let Some(topics) = state.received.get(received) {
            return topics.clone();
        }

        let topics: Vec<TopicAddress> = state
            .subscribed
            .iter()
            .filter(|t| filter::matches(t.payload(), received))
            .cloned()
            .collect();
        trace!(received, topics = topics.len(), "Route cached");
        state.received.put(received.to_string(), topics.clone());
        topics
    }

    /// Forgets every topic and cached route.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.subscribed.clear();
        state.received.clear();
    }

    /// Returns the number of subscribed topics.
    pub fn len(&self) -> usize {
        self.state.lock().subscribed.len()
    }

    /// Returns `true` if nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of cached received topics.
    pub fn cached_routes(&self) -> usize {
        self.state.lock().received.len()
    }

    fn evict(state: &mut RouterState, filter: &str) {
        let stale: Vec<String> = state
            .received
            .iter()
            .filter(|(received, _)| filter::matches(filter, received))
            .map(|(received, _)| received.clone())
            .collect();
        for received in stale {
            state.received.pop(&received);
        }
    }
}

impl fmt::Debug for TopicRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TopicRouter")
            .field("subscribed", &state.subscribed.len())
            .field("cached_routes", &state.received.len())
            .field("capacity", &state.received.cap())
            .finish()
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new()
    }
}
