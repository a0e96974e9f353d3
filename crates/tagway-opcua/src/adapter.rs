// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA driver adapter.
//!
//! [`OpcUaAdapter`] binds an [`OpcUaTransport`] to the generic driver:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    Driver (tagway-core)                   │
//! └───────────────────────────────────────────────────────────┘
//!                               │ DriverAdapter
//!                               ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │                       OpcUaAdapter                        │
//! │  PathResolver ── WriteCoordinator ── NodeBrowser ── codec │
//! └───────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │                   OpcUaTransport (trait)                  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! One monitored item is created per Node topic and per resolved leaf of a
//! Path topic. Each item's callback renders its value and publishes it on
//! the originating topic.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tagway_core::{
    BatchWriter, BrowseEntry, CanonicalValue, DataPoint, DriverAdapter, DriverContext,
    DriverError, DriverResult, PathCache, PathResolver, ResolvedNode, ResolverStatsSnapshot,
    SchemaNode, SubscribedItems, SystemType, TopicAddress, ValueCodec, ValuePublisher,
    WriteCompletion,
    WriteCoordinator, WriteStatsSnapshot,
};
use tracing::{debug, info, warn};

use crate::browse::{NodeBrowser, TransportBrowser};
use crate::codec::{variant_from_text, DataValueCodec};
use crate::transport::{MonitoredItemRequest, OpcUaTransport};
use crate::types::{BuiltinType, DataValue, NodeId};
use crate::OpcUaSettings;

async fn with_timeout<F, R>(duration: Duration, call: F) -> DriverResult<R>
where
    F: Future<Output = DriverResult<R>>,
{
    tokio::time::timeout(duration, call)
        .await
        .map_err(|_| DriverError::timeout(duration))?
}

// =============================================================================
// TransportWriter
// =============================================================================

/// A write as submitted: text still to be converted to the node's type.
#[derive(Debug, Clone, PartialEq)]
pub struct TextWrite {
    /// Value text.
    pub text: String,
    /// Source timestamp to send along, if any.
    pub source_timestamp: Option<DateTime<Utc>>,
}

/// Data types of written nodes, valid for one session.
pub type DataTypeCache = Arc<Mutex<HashMap<NodeId, BuiltinType>>>;

/// Batch writer issuing one `Write` service call per batch.
///
/// Runs on the write worker. Data types of nodes not yet cached are read
/// there, so submitting a write never waits on the server.
pub struct TransportWriter<T> {
    transport: Arc<T>,
    timeout: Duration,
    data_types: DataTypeCache,
}

impl<T: OpcUaTransport> TransportWriter<T> {
    /// Creates a writer sharing `data_types` with its adapter.
    pub fn new(transport: Arc<T>, timeout: Duration, data_types: DataTypeCache) -> Self {
        Self {
            transport,
            timeout,
            data_types,
        }
    }

    async fn data_type(&self, node: &NodeId) -> Option<BuiltinType> {
        if let Some(data_type) = self.data_types.lock().get(node) {
            return Some(*data_type);
        }
        let attributes = match with_timeout(self.timeout, self.transport.read_attributes(node)).await {
            Ok(attributes) => attributes,
            Err(e) => {
                warn!(node = %node, error = %e, "Reading data type failed");
                return None;
            }
        };
        let data_type = attributes.data_type.as_ref().and_then(BuiltinType::from_data_type);
        match data_type {
            Some(data_type) => {
                self.data_types.lock().insert(node.clone(), data_type);
            }
            None => warn!(node = %node, "Write to node with unsupported data type"),
        }
        data_type
    }

    async fn convert(&self, node: &NodeId, write: TextWrite) -> Option<DataValue> {
        let data_type = self.data_type(node).await?;
        let variant = match variant_from_text(&write.text, data_type) {
            Ok(variant) => variant,
            Err(e) => {
                warn!(node = %node, error = %e, "Write value conversion failed");
                return None;
            }
        };
        let mut value = DataValue::new(variant);
        if let Some(time) = write.source_timestamp {
            value = value.with_source_timestamp(time);
        }
        Some(value)
    }
}

#[async_trait]
impl<T: OpcUaTransport> BatchWriter for TransportWriter<T> {
    type Target = NodeId;
    type Value = TextWrite;

    async fn write_batch(&self, items: Vec<(NodeId, TextWrite)>) -> DriverResult<Vec<bool>> {
        let mut flags = vec![false; items.len()];
        let mut positions = Vec::with_capacity(items.len());
        let mut writes = Vec::with_capacity(items.len());
        for (index, (node, write)) in items.into_iter().enumerate() {
            if let Some(value) = self.convert(&node, write).await {
                positions.push(index);
                writes.push((node, value));
            }
        }
        if writes.is_empty() {
            return Ok(flags);
        }

        let statuses = with_timeout(self.timeout, self.transport.write_values(&writes)).await?;
        for ((index, (node, _)), status) in positions.into_iter().zip(&writes).zip(statuses) {
            if status.is_bad() {
                debug!(node = %node, status = %status, "Write rejected");
            }
            flags[index] = status.is_good();
        }
        Ok(flags)
    }
}

// =============================================================================
// OpcUaAdapter
// =============================================================================

/// Driver adapter for one OPC UA server.
pub struct OpcUaAdapter<T: OpcUaTransport> {
    id: String,
    settings: OpcUaSettings,
    transport: Arc<T>,
    resolver: PathResolver<TransportBrowser<T>>,
    browser: NodeBrowser<T>,
    writer: Option<WriteCoordinator<TransportWriter<T>>>,
    publisher: Option<ValuePublisher>,
    data_types: DataTypeCache,
}

impl<T: OpcUaTransport> OpcUaAdapter<T> {
    /// Creates an adapter with the driver id `id`.
    pub fn new(id: impl Into<String>, transport: T, settings: OpcUaSettings) -> Self {
        let transport = Arc::new(transport);
        let cache = PathCache::new(settings.cache_maximum_size, settings.cache_expire_after);
        Self {
            id: id.into(),
            resolver: PathResolver::with_cache(TransportBrowser::new(transport.clone()), cache),
            browser: NodeBrowser::new(transport.clone()),
            transport,
            settings,
            writer: None,
            publisher: None,
            data_types: DataTypeCache::default(),
        }
    }

    /// Returns the settings.
    pub fn settings(&self) -> &OpcUaSettings {
        &self.settings
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns path resolution counters.
    pub fn resolver_stats(&self) -> ResolverStatsSnapshot {
        self.resolver.stats().snapshot()
    }

    /// Returns write queue counters, once the queue exists.
    pub fn write_stats(&self) -> Option<WriteStatsSnapshot> {
        self.writer.as_ref().map(|w| w.stats())
    }

    fn monitored_item(
        &self,
        publisher: &ValuePublisher,
        topic: &TopicAddress,
        node_id: NodeId,
        leaf: Option<ResolvedNode>,
    ) -> MonitoredItemRequest {
        let publisher = publisher.clone();
        let topic = topic.clone();
        MonitoredItemRequest {
            node_id,
            settings: self.settings.monitoring,
            callback: Arc::new(move |raw: DataValue| {
                let mut point = DataPoint::new(topic.clone(), DataValueCodec.from_backend(raw));
                if let Some(leaf) = &leaf {
                    point = point.with_leaf(leaf.clone());
                }
                publisher.publish(&point);
            }),
        }
    }

    /// Enqueues one write without waiting on the server. Conversion to the
    /// node's type happens on the write worker; every failure completes
    /// with `false`.
    fn submit_write(&self, node_id: &str, text: &str) -> WriteCompletion {
        let node: NodeId = match node_id.parse() {
            Ok(node) => node,
            Err(e) => {
                warn!(node = node_id, error = %e, "Write to invalid node id");
                return WriteCompletion::ready(false);
            }
        };

        let write = TextWrite {
            text: text.to_string(),
            source_timestamp: self.settings.write_with_time.then(Utc::now),
        };
        match &self.writer {
            Some(writer) => writer.submit(node, write),
            None => WriteCompletion::ready(false),
        }
    }
}

#[async_trait]
impl<T: OpcUaTransport> DriverAdapter for OpcUaAdapter<T> {
    type Item = u32;

    fn id(&self) -> &str {
        &self.id
    }

    fn system_type(&self) -> SystemType {
        SystemType::Opc
    }

    async fn connect(&mut self, context: DriverContext) -> DriverResult<()> {
        with_timeout(
            self.settings.connect_timeout,
            self.transport.connect(context.events.clone()),
        )
        .await?;

        if self.writer.is_none() {
            let writer = TransportWriter::new(
                self.transport.clone(),
                self.settings.request_timeout,
                self.data_types.clone(),
            );
            self.writer = Some(WriteCoordinator::new(
                self.id.clone(),
                writer,
                self.settings.write.clone(),
            ));
        }
        self.data_types.lock().clear();
        self.publisher = Some(context.publisher);
        info!(driver = %self.id, endpoint = self.transport.endpoint(), "Session established");
        Ok(())
    }

    async fn disconnect(&mut self) -> DriverResult<()> {
        self.publisher = None;
        self.transport.disconnect().await
    }

    async fn subscribe_topics(
        &mut self,
        topics: &[TopicAddress],
    ) -> DriverResult<SubscribedItems<u32>> {
        let publisher = self.publisher.clone().ok_or(DriverError::NotConnected)?;

        let mut owners = Vec::new();
        let mut requests = Vec::new();
        for topic in topics {
            if topic.is_node() {
                match topic.payload().parse::<NodeId>() {
                    Ok(node) => {
                        requests.push(self.monitored_item(&publisher, topic, node, None));
                        owners.push(topic.clone());
                    }
                    Err(e) => warn!(topic = %topic, error = %e, "Topic has an invalid node id"),
                }
                continue;
            }

            let leaves = self.resolver.resolve(topic.payload()).await;
            if leaves.is_empty() {
                info!(topic = %topic, "Path matched no nodes");
            }
            for leaf in leaves {
                match leaf.node_id.parse::<NodeId>() {
                    Ok(node) => {
                        requests.push(self.monitored_item(&publisher, topic, node, Some(leaf)));
                        owners.push(topic.clone());
                    }
                    Err(e) => warn!(topic = %topic, node = %leaf.node_id, error = %e, "Leaf has an invalid node id"),
                }
            }
        }

        let mut outcome = SubscribedItems::new();
        if requests.is_empty() {
            return Ok(outcome);
        }

        let results = with_timeout(
            self.settings.request_timeout,
            self.transport.create_monitored_items(requests),
        )
        .await;
        let results = match results {
            Ok(results) => results,
            Err(e) => {
                warn!(driver = %self.id, topics = topics.len(), error = %e, "Creating monitored items failed");
                for topic in owners {
                    outcome.fail(topic);
                }
                return Ok(outcome);
            }
        };

        for (topic, result) in owners.into_iter().zip(results) {
            if result.status.is_good() {
                outcome.push(topic, result.monitored_item_id);
            } else {
                warn!(topic = %topic, status = %result.status, "Monitored item rejected");
            }
        }
        Ok(outcome)
    }

    async fn unsubscribe_items(&mut self, topics: &[TopicAddress], items: Vec<u32>) -> DriverResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        debug!(topics = topics.len(), items = items.len(), "Deleting monitored items");
        with_timeout(
            self.settings.request_timeout,
            self.transport.delete_monitored_items(&items),
        )
        .await
    }

    async fn publish_topic(&mut self, topic: &TopicAddress, data: &str) -> DriverResult<WriteCompletion> {
        if topic.is_node() {
            return Ok(self.submit_write(topic.payload(), data));
        }

        let leaves = self.resolver.resolve(topic.payload()).await;
        if leaves.is_empty() {
            return Ok(WriteCompletion::ready(false));
        }
        let mut completions = Vec::with_capacity(leaves.len());
        for leaf in &leaves {
            completions.push(self.submit_write(&leaf.node_id, data));
        }

        let (reply, completion) = WriteCompletion::pending();
        tokio::spawn(async move {
            let mut ok = true;
            for completion in completions {
                ok &= completion.await;
            }
            let _ = reply.send(ok);
        });
        Ok(completion)
    }

    async fn read(&mut self, node_ids: &[String]) -> DriverResult<Vec<CanonicalValue>> {
        let nodes = node_ids
            .iter()
            .map(|id| {
                id.parse::<NodeId>()
                    .map_err(|e| DriverError::read_failed(id.as_str(), e.to_string()))
            })
            .collect::<DriverResult<Vec<_>>>()?;

        let values = with_timeout(self.settings.request_timeout, self.transport.read_values(&nodes)).await?;
        Ok(values.into_iter().map(|v| DataValueCodec.from_backend(v)).collect())
    }

    async fn write(&mut self, items: Vec<(String, String)>) -> DriverResult<Vec<WriteCompletion>> {
        let mut completions = Vec::with_capacity(items.len());
        for (node_id, text) in &items {
            completions.push(self.submit_write(node_id, text));
        }
        Ok(completions)
    }

    async fn browse(&mut self, node_id: &str, reverse: bool) -> DriverResult<Vec<BrowseEntry>> {
        self.browser.browse(node_id, reverse).await
    }

    async fn schema(&mut self, node_ids: &[String]) -> DriverResult<Vec<SchemaNode>> {
        self.browser.schema(node_ids).await
    }

    async fn server_info(&mut self) -> DriverResult<serde_json::Value> {
        let info = with_timeout(self.settings.request_timeout, self.transport.server_info()).await?;
        serde_json::to_value(info).map_err(|e| DriverError::protocol(e.to_string()))
    }
}

impl<T: OpcUaTransport> fmt::Debug for OpcUaAdapter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcUaAdapter")
            .field("id", &self.id)
            .field("endpoint", &self.transport.endpoint())
            .field("connected", &self.transport.is_connected())
            .finish()
    }
}
