// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA transport abstraction layer.
//!
//! [`OpcUaTransport`] is the capability set the adapter needs from an OPC UA
//! client stack: a session, browsing with continuation points, attribute
//! reads, batched writes and monitored items. Keeping it behind a trait lets
//! the adapter run against an in-memory address space in tests.
//!
//! All methods take `&self`. The adapter shares one transport between its
//! own task, the write worker and the path resolver.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tagway_core::{DriverEvents, DriverResult};

use crate::types::{
    BrowseDirection, BrowseResult, DataValue, NodeAttributes, NodeId, ServerInfo, StatusCode,
};

// =============================================================================
// Monitored items
// =============================================================================

/// Receives value changes of one monitored item.
///
/// Called from whatever task the transport delivers notifications on. Must
/// not block.
pub trait DataChangeCallback: Send + Sync {
    /// Handles one value change.
    fn on_data_change(&self, value: DataValue);
}

impl<F> DataChangeCallback for F
where
    F: Fn(DataValue) + Send + Sync,
{
    fn on_data_change(&self, value: DataValue) {
        self(value)
    }
}

/// Sampling parameters of monitored items.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitoringSettings {
    /// Sampling interval. Zero asks for the fastest rate.
    pub sampling_interval: Duration,
    /// Server-side queue size.
    pub queue_size: u32,
    /// Drop the oldest value when the queue overflows.
    pub discard_oldest: bool,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            sampling_interval: Duration::ZERO,
            queue_size: 1,
            discard_oldest: true,
        }
    }
}

/// Request to monitor the value of one node.
#[derive(Clone)]
pub struct MonitoredItemRequest {
    /// The node to monitor.
    pub node_id: NodeId,
    /// Sampling parameters.
    pub settings: MonitoringSettings,
    /// Receiver of value changes.
    pub callback: Arc<dyn DataChangeCallback>,
}

impl fmt::Debug for MonitoredItemRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredItemRequest")
            .field("node_id", &self.node_id)
            .field("settings", &self.settings)
            .finish()
    }
}

/// Outcome of creating one monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoredItemResult {
    /// Server-assigned item id.
    pub monitored_item_id: u32,
    /// Creation status.
    pub status: StatusCode,
}

// =============================================================================
// OpcUaTransport
// =============================================================================

/// Low-level OPC UA client operations.
#[async_trait]
pub trait OpcUaTransport: Send + Sync + 'static {
    /// Opens a session.
    ///
    /// A session that later drops must be reported through `events`.
    async fn connect(&self, events: DriverEvents) -> DriverResult<()>;

    /// Closes the session. Succeeds when no session is open.
    async fn disconnect(&self) -> DriverResult<()>;

    /// Returns `true` while a session is open.
    fn is_connected(&self) -> bool;

    /// Returns the endpoint URL.
    fn endpoint(&self) -> &str;

    /// Browses references of a node, restricted to the classes in
    /// `node_class_mask`. Returns the first page.
    async fn browse(
        &self,
        node_id: &NodeId,
        direction: BrowseDirection,
        node_class_mask: u32,
    ) -> DriverResult<BrowseResult>;

    /// Fetches the next page of a browse.
    async fn browse_next(&self, continuation_point: &str) -> DriverResult<BrowseResult>;

    /// Reads the values of nodes with both timestamps.
    async fn read_values(&self, node_ids: &[NodeId]) -> DriverResult<Vec<DataValue>>;

    /// Reads class, names and data type of a node.
    async fn read_attributes(&self, node_id: &NodeId) -> DriverResult<NodeAttributes>;

    /// Writes values in one service call. Returns one status per item.
    async fn write_values(&self, writes: &[(NodeId, DataValue)]) -> DriverResult<Vec<StatusCode>>;

    /// Creates monitored items in the session's subscription.
    async fn create_monitored_items(
        &self,
        requests: Vec<MonitoredItemRequest>,
    ) -> DriverResult<Vec<MonitoredItemResult>>;

    /// Deletes monitored items.
    async fn delete_monitored_items(&self, monitored_item_ids: &[u32]) -> DriverResult<()>;

    /// Reads the `Server` object.
    async fn server_info(&self) -> DriverResult<ServerInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Variant;
    use parking_lot::Mutex;

    #[test]
    fn test_closure_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: Arc<dyn DataChangeCallback> =
            Arc::new(move |value: DataValue| sink.lock().push(value));

        callback.on_data_change(DataValue::new(Variant::Double(1.5)));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_request_debug_hides_callback() {
        let request = MonitoredItemRequest {
            node_id: NodeId::numeric(0, 2258),
            settings: MonitoringSettings::default(),
            callback: Arc::new(|_: DataValue| {}),
        };
        let text = format!("{:?}", request);
        assert!(text.contains("2258"));
        assert!(!text.contains("callback"));
    }
}
