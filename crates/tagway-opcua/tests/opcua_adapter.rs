// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # OPC UA Adapter Tests
//!
//! Runs an [`OpcUaAdapter`] inside a driver against an in-memory address
//! space:
//!
//! ```text
//! Root (i=84)
//! └── Objects (i=85)
//!     ├── PLC1
//!     │   ├── Temperature  Double
//!     │   ├── Pressure     Int32
//!     │   └── Running      Boolean
//!     └── PLC2
//!         └── Temperature  Double
//! ```
//!
//! Browse results are paged so continuation points are exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use tagway_core::{
    Bus, ConnectionState, Driver, DriverClient, DriverError, DriverEvents, DriverHandle,
    DriverOptions, DriverResult, TopicAddress, WriteConfig,
};
use tagway_opcua::{
    BrowseDirection, BrowseResult, BuiltinType, DataValue, MonitoredItemRequest,
    MonitoredItemResult, NodeAttributes, NodeClass, NodeId, OpcUaAdapter, OpcUaSettings,
    OpcUaTransport, ReferenceDescription, ServerInfo, StatusCode, Variant,
};

// =============================================================================
// Mock transport
// =============================================================================

struct MockNode {
    attributes: NodeAttributes,
    value: DataValue,
    children: Vec<ReferenceDescription>,
    parents: Vec<ReferenceDescription>,
}

#[derive(Default)]
struct AddressSpace {
    nodes: HashMap<NodeId, MockNode>,
    continuations: HashMap<String, Vec<ReferenceDescription>>,
    monitored: HashMap<u32, MonitoredItemRequest>,
    writes: Vec<Vec<(NodeId, DataValue)>>,
    events: Option<DriverEvents>,
    attribute_reads: usize,
    stalled_attributes: Option<NodeId>,
    fail_next_create: bool,
}

#[derive(Clone)]
struct MockTransport {
    space: Arc<Mutex<AddressSpace>>,
    connected: Arc<AtomicBool>,
    next_item: Arc<AtomicU32>,
    page_size: usize,
}

impl MockTransport {
    fn plant() -> Self {
        let transport = Self {
            space: Arc::new(Mutex::new(AddressSpace::default())),
            connected: Arc::new(AtomicBool::new(false)),
            next_item: Arc::new(AtomicU32::new(0)),
            page_size: 2,
        };

        transport.add_object(None, NodeId::numeric(0, 84), "Root");
        transport.add_object(Some(NodeId::numeric(0, 84)), NodeId::numeric(0, 85), "Objects");
        for plc in ["PLC1", "PLC2"] {
            transport.add_object(Some(NodeId::numeric(0, 85)), NodeId::string(2, plc), plc);
        }
        transport.add_variable("PLC1", "Temperature", BuiltinType::Double, Variant::Double(20.0));
        transport.add_variable("PLC1", "Pressure", BuiltinType::Int32, Variant::Int32(3));
        transport.add_variable("PLC1", "Running", BuiltinType::Boolean, Variant::Boolean(true));
        transport.add_variable("PLC2", "Temperature", BuiltinType::Double, Variant::Double(18.0));
        transport
    }

    fn add_node(&self, parent: Option<NodeId>, node_id: NodeId, name: &str, class: NodeClass, data_type: Option<BuiltinType>, value: Variant) {
        let mut space = self.space.lock();
        if let Some(parent) = parent {
            let parent_class = space.nodes[&parent].attributes.node_class;
            let parent_name = space.nodes[&parent].attributes.browse_name.clone();
            let reference_type = if class == NodeClass::Object { "Organizes" } else { "HasComponent" };
            if let Some(node) = space.nodes.get_mut(&parent) {
                node.children
                    .push(ReferenceDescription::new(node_id.clone(), name, class, reference_type));
            }
            space.nodes.insert(
                node_id.clone(),
                MockNode {
                    attributes: Self::attributes(&node_id, name, class, data_type),
                    value: DataValue::new(value),
                    children: Vec::new(),
                    parents: vec![ReferenceDescription::new(parent, parent_name, parent_class, reference_type)],
                },
            );
        } else {
            space.nodes.insert(
                node_id.clone(),
                MockNode {
                    attributes: Self::attributes(&node_id, name, class, data_type),
                    value: DataValue::new(value),
                    children: Vec::new(),
                    parents: Vec::new(),
                },
            );
        }
    }

    fn attributes(node_id: &NodeId, name: &str, class: NodeClass, data_type: Option<BuiltinType>) -> NodeAttributes {
        NodeAttributes {
            node_id: node_id.clone(),
            node_class: class,
            browse_name: name.to_string(),
            display_name: name.to_string(),
            data_type: data_type.map(|t| t.data_type_id()),
        }
    }

    fn add_object(&self, parent: Option<NodeId>, node_id: NodeId, name: &str) {
        self.add_node(parent, node_id, name, NodeClass::Object, None, Variant::Null);
    }

    fn add_variable(&self, plc: &str, name: &str, data_type: BuiltinType, value: Variant) {
        self.add_node(
            Some(NodeId::string(2, plc)),
            NodeId::string(2, format!("{}.{}", plc, name)),
            name,
            NodeClass::Variable,
            Some(data_type),
            value,
        );
    }

    /// Delivers a value change to every item monitoring `node_id`.
    fn emit(&self, node_id: &NodeId, value: DataValue) {
        let callbacks: Vec<_> = self
            .space
            .lock()
            .monitored
            .values()
            .filter(|item| &item.node_id == node_id)
            .map(|item| item.callback.clone())
            .collect();
        for callback in callbacks {
            callback.on_data_change(value.clone());
        }
    }

    fn monitored_nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self
            .space
            .lock()
            .monitored
            .values()
            .map(|item| item.node_id.to_string())
            .collect();
        nodes.sort();
        nodes
    }

    fn writes(&self) -> Vec<(NodeId, DataValue)> {
        self.space.lock().writes.iter().flatten().cloned().collect()
    }

    fn drop_session(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let events = {
            let mut space = self.space.lock();
            space.monitored.clear();
            space.events.clone()
        };
        if let Some(events) = events {
            events.connection_lost("socket closed");
        }
    }

    fn page(&self, mut references: Vec<ReferenceDescription>) -> BrowseResult {
        let mut result = BrowseResult::default();
        if references.len() > self.page_size {
            let rest = references.split_off(self.page_size);
            let point = format!("cp-{}", self.next_item.fetch_add(1, Ordering::SeqCst));
            self.space.lock().continuations.insert(point.clone(), rest);
            result.continuation_point = Some(point);
        }
        result.references = references;
        result
    }

    fn require_session(&self) -> DriverResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DriverError::NotConnected)
        }
    }
}

#[async_trait]
impl OpcUaTransport for MockTransport {
    async fn connect(&self, events: DriverEvents) -> DriverResult<()> {
        self.space.lock().events = Some(events);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> DriverResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn endpoint(&self) -> &str {
        "opc.tcp://mock:4840"
    }

    async fn browse(&self, node_id: &NodeId, direction: BrowseDirection, mask: u32) -> DriverResult<BrowseResult> {
        self.require_session()?;
        let references = {
            let space = self.space.lock();
            let Some(node) = space.nodes.get(node_id) else {
                return Ok(BrowseResult {
                    status: StatusCode::BAD_NODE_ID_UNKNOWN,
                    ..Default::default()
                });
            };
            let references = match direction {
                BrowseDirection::Forward => &node.children,
                BrowseDirection::Inverse => &node.parents,
            };
            references
                .iter()
                .filter(|r| r.node_class.mask() & mask != 0)
                .cloned()
                .collect::<Vec<_>>()
        };
        Ok(self.page(references))
    }

    async fn browse_next(&self, continuation_point: &str) -> DriverResult<BrowseResult> {
        self.require_session()?;
        let rest = self.space.lock().continuations.remove(continuation_point);
        match rest {
            Some(rest) => Ok(self.page(rest)),
            None => Err(DriverError::browse(continuation_point, "unknown continuation point")),
        }
    }

    async fn read_values(&self, node_ids: &[NodeId]) -> DriverResult<Vec<DataValue>> {
        self.require_session()?;
        let space = self.space.lock();
        Ok(node_ids
            .iter()
            .map(|id| match space.nodes.get(id) {
                Some(node) => node.value.clone(),
                None => DataValue::new(Variant::Null).with_status(StatusCode::BAD_NODE_ID_UNKNOWN),
            })
            .collect())
    }

    async fn read_attributes(&self, node_id: &NodeId) -> DriverResult<NodeAttributes> {
        self.require_session()?;
        let stalled = {
            let mut space = self.space.lock();
            space.attribute_reads += 1;
            space.stalled_attributes.as_ref() == Some(node_id)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        self.space
            .lock()
            .nodes
            .get(node_id)
            .map(|node| node.attributes.clone())
            .ok_or_else(|| DriverError::read_failed(node_id.to_string(), "BadNodeIdUnknown"))
    }

    async fn write_values(&self, writes: &[(NodeId, DataValue)]) -> DriverResult<Vec<StatusCode>> {
        self.require_session()?;
        let mut space = self.space.lock();
        space.writes.push(writes.to_vec());
        Ok(writes
            .iter()
            .map(|(id, value)| match space.nodes.get_mut(id) {
                Some(node) => {
                    node.value = value.clone();
                    StatusCode::GOOD
                }
                None => StatusCode::BAD_NODE_ID_UNKNOWN,
            })
            .collect())
    }

    async fn create_monitored_items(
        &self,
        requests: Vec<MonitoredItemRequest>,
    ) -> DriverResult<Vec<MonitoredItemResult>> {
        self.require_session()?;
        let mut space = self.space.lock();
        if space.fail_next_create {
            space.fail_next_create = false;
            return Err(DriverError::protocol("BadTooManyOperations"));
        }
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            if !space.nodes.contains_key(&request.node_id) {
                results.push(MonitoredItemResult {
                    monitored_item_id: 0,
                    status: StatusCode::BAD_NODE_ID_UNKNOWN,
                });
                continue;
            }
            let id = self.next_item.fetch_add(1, Ordering::SeqCst) + 1;
            space.monitored.insert(id, request);
            results.push(MonitoredItemResult {
                monitored_item_id: id,
                status: StatusCode::GOOD,
            });
        }
        Ok(results)
    }

    async fn delete_monitored_items(&self, monitored_item_ids: &[u32]) -> DriverResult<()> {
        let mut space = self.space.lock();
        for id in monitored_item_ids {
            space.monitored.remove(id);
        }
        Ok(())
    }

    async fn server_info(&self) -> DriverResult<ServerInfo> {
        self.require_session()?;
        Ok(ServerInfo {
            server: vec!["urn:mock:server".into()],
            namespace: vec!["http://opcfoundation.org/UA/".into(), "urn:mock:plant".into()],
            build_info: "Mock 1.0".into(),
            server_status: "Running".into(),
            ..Default::default()
        })
    }
}

// =============================================================================
// Test Helpers
// =============================================================================

fn topic(name: &str) -> TopicAddress {
    TopicAddress::parse(name).expect("valid topic")
}

async fn start(transport: MockTransport, settings: OpcUaSettings) -> (Arc<Bus>, DriverHandle, DriverClient) {
    let bus = Arc::new(Bus::default());
    let adapter = OpcUaAdapter::new("plant", transport, settings);
    let options = DriverOptions::default().with_reconnect_delay(Duration::from_millis(50));
    let handle = Driver::new(adapter, bus.clone(), options).spawn();
    assert!(handle.wait_for_state(ConnectionState::Connected).await);
    let client = DriverClient::new(bus.clone(), tagway_core::SystemType::Opc, "plant");
    (bus, handle, client)
}

fn settings() -> OpcUaSettings {
    OpcUaSettings::new("opc.tcp://mock:4840")
        .with_write(WriteConfig::default().with_poll_timeout(Duration::from_millis(20)))
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
async fn test_node_topic_publishes_values() {
    let transport = MockTransport::plant();
    let (_bus, handle, client) = start(transport.clone(), settings()).await;

    let temperature = topic("Opc/plant/Node:Value/ns=2;s=PLC1.Temperature");
    let mut values = client.subscribe(&temperature).await.unwrap();
    assert_eq!(transport.monitored_nodes(), vec!["ns=2;s=PLC1.Temperature"]);

    transport.emit(&NodeId::string(2, "PLC1.Temperature"), DataValue::new(Variant::Double(21.5)));
    assert_eq!(values.recv().await.unwrap().payload, "21.5");

    handle.shutdown().await;
}

#[tokio::test]
async fn test_path_topic_monitors_every_leaf() {
    let transport = MockTransport::plant();
    let (_bus, handle, client) = start(transport.clone(), settings()).await;

    let temperatures = topic("Opc/plant/Path/Objects/+/Temperature");
    let mut values = client.subscribe(&temperatures).await.unwrap();
    assert_eq!(
        transport.monitored_nodes(),
        vec!["ns=2;s=PLC1.Temperature", "ns=2;s=PLC2.Temperature"]
    );

    let time = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    transport.emit(
        &NodeId::string(2, "PLC2.Temperature"),
        DataValue::new(Variant::Double(17.25)).with_source_timestamp(time),
    );

    let message = values.recv().await.unwrap();
    let point: serde_json::Value = serde_json::from_str(&message.payload).unwrap();
    assert_eq!(point["topic"]["topicNode"], "ns=2;s=PLC2.Temperature");
    assert!(point["topic"]["browsePath"].as_str().unwrap().ends_with("PLC2/Temperature"));
    assert_eq!(point["value"]["statusCode"], "Good");

    handle.shutdown().await;
}

#[tokio::test]
async fn test_path_without_matches_subscribes_nothing() {
    let transport = MockTransport::plant();
    let (_bus, handle, client) = start(transport.clone(), settings()).await;

    client.subscribe(&topic("Opc/plant/Path/Objects/PLC9/Speed")).await.unwrap();
    assert!(transport.monitored_nodes().is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_unsubscribe_deletes_monitored_items() {
    let transport = MockTransport::plant();
    let (_bus, handle, client) = start(transport.clone(), settings()).await;

    let plc1 = topic("Opc/plant/Path/Objects/PLC1/#");
    client.subscribe(&plc1).await.unwrap();
    assert_eq!(transport.monitored_nodes().len(), 3);

    client.unsubscribe(&[plc1]).await.unwrap();
    assert!(transport.monitored_nodes().is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_recreates_monitored_items() {
    let transport = MockTransport::plant();
    let (_bus, handle, client) = start(transport.clone(), settings()).await;

    let pressure = topic("Opc/plant/Node:Value/ns=2;s=PLC1.Pressure");
    let mut values = client.subscribe(&pressure).await.unwrap();

    transport.drop_session();
    let observer = transport.clone();
    eventually(move || observer.monitored_nodes().len() == 1).await;
    assert_eq!(handle.state(), ConnectionState::Connected);

    transport.emit(&NodeId::string(2, "PLC1.Pressure"), DataValue::new(Variant::Int32(7)));
    assert_eq!(values.recv().await.unwrap().payload, "7");
    assert_eq!(handle.stats().reconnects, 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_monitored_items_failing_on_replay_are_retried() {
    let transport = MockTransport::plant();
    let (_bus, handle, client) = start(transport.clone(), settings()).await;

    let pressure = topic("Opc/plant/Node:Value/ns=2;s=PLC1.Pressure");
    let plc2 = topic("Opc/plant/Path/Objects/PLC2/#");
    let mut values = client.subscribe(&pressure).await.unwrap();
    client.subscribe(&plc2).await.unwrap();

    transport.space.lock().fail_next_create = true;
    transport.drop_session();

    let observer = transport.clone();
    eventually(move || observer.monitored_nodes().len() == 2).await;
    assert_eq!(handle.stats().resubscribe_attempts, 1);

    transport.emit(&NodeId::string(2, "PLC1.Pressure"), DataValue::new(Variant::Int32(9)));
    assert_eq!(values.recv().await.unwrap().payload, "9");

    handle.shutdown().await;
}

// =============================================================================
// Read / Write Tests
// =============================================================================

#[tokio::test]
async fn test_read_reports_status_names() {
    let transport = MockTransport::plant();
    let (_bus, handle, client) = start(transport, settings()).await;

    let value = client.read("ns=2;s=PLC1.Temperature").await.unwrap();
    assert_eq!(value.value_as_string(), "20");
    assert_eq!(value.status_code(), "Good");

    let missing = client.read("ns=2;s=Nowhere").await.unwrap();
    assert!(missing.has_no_value());
    assert_eq!(missing.status_code(), "BadNodeIdUnknown");

    handle.shutdown().await;
}

#[tokio::test]
async fn test_write_converts_to_node_type() {
    let transport = MockTransport::plant();
    let (_bus, handle, client) = start(transport.clone(), settings()).await;

    assert!(client.write("ns=2;s=PLC1.Pressure", "42").await.unwrap());
    assert!(client.write("ns=2;s=PLC1.Running", "0").await.unwrap());
    assert!(client.write("ns=2;s=PLC1.Temperature", 22.5).await.unwrap());

    let writes = transport.writes();
    assert_eq!(writes.len(), 3);
    assert_eq!(writes[0].1.value, Variant::Int32(42));
    assert_eq!(writes[1].1.value, Variant::Boolean(false));
    assert_eq!(writes[2].1.value, Variant::Double(22.5));
    assert!(writes[0].1.source_timestamp.is_none());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_failed_conversion_fails_only_that_item() {
    let transport = MockTransport::plant();
    let (_bus, handle, client) = start(transport.clone(), settings()).await;

    let flags = client
        .write_many(&[
            ("ns=2;s=PLC1.Pressure", serde_json::json!("abc")),
            ("ns=2;s=PLC2.Temperature", serde_json::json!("19.5")),
            ("ns=2;s=Nowhere", serde_json::json!("1")),
        ])
        .await
        .unwrap();
    assert_eq!(flags, vec![false, true, false]);
    assert_eq!(transport.writes().len(), 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_data_type_is_read_once_per_session() {
    let transport = MockTransport::plant();
    let (_bus, handle, client) = start(transport.clone(), settings()).await;

    assert!(client.write("ns=2;s=PLC1.Pressure", "1").await.unwrap());
    assert!(client.write("ns=2;s=PLC1.Pressure", "2").await.unwrap());
    assert_eq!(transport.space.lock().attribute_reads, 1);

    transport.drop_session();
    eventually(|| handle.stats().reconnects == 1 && handle.state() == ConnectionState::Connected)
        .await;
    assert!(client.write("ns=2;s=PLC1.Pressure", "3").await.unwrap());
    assert_eq!(transport.space.lock().attribute_reads, 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_stalled_data_type_read_does_not_block_driver() {
    let transport = MockTransport::plant();
    let settings = settings().with_request_timeout(Duration::from_millis(300));
    let (_bus, handle, client) = start(transport.clone(), settings).await;

    transport.space.lock().stalled_attributes = Some(NodeId::string(2, "PLC1.Pressure"));
    let writer = client.clone();
    let write = tokio::spawn(async move { writer.write("ns=2;s=PLC1.Pressure", "4").await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    let temperature = topic("Opc/plant/Node:Value/ns=2;s=PLC1.Temperature");
    tokio::time::timeout(Duration::from_millis(100), client.subscribe(&temperature))
        .await
        .expect("subscribe answered while the write is pending")
        .unwrap();

    assert!(!write.await.unwrap().unwrap());
    assert!(transport.writes().is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_write_with_time_sets_source_timestamp() {
    let transport = MockTransport::plant();
    let (_bus, handle, client) = start(transport.clone(), settings().with_write_time(true)).await;

    assert!(client.write("ns=2;s=PLC1.Pressure", "5").await.unwrap());
    assert!(transport.writes()[0].1.source_timestamp.is_some());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_publish_to_path_writes_every_leaf() {
    let transport = MockTransport::plant();
    let (_bus, handle, client) = start(transport.clone(), settings()).await;

    let temperatures = topic("Opc/plant/Path/Objects/+/Temperature");
    assert!(client.publish(&temperatures, "25").await.unwrap());

    let mut written: Vec<String> = transport.writes().iter().map(|(id, _)| id.to_string()).collect();
    written.sort();
    assert_eq!(written, vec!["ns=2;s=PLC1.Temperature", "ns=2;s=PLC2.Temperature"]);

    handle.shutdown().await;
}

// =============================================================================
// Browse Tests
// =============================================================================

#[tokio::test]
async fn test_forward_browse_drains_pages() {
    let transport = MockTransport::plant();
    let (_bus, handle, client) = start(transport, settings()).await;

    let entries = client.browse("ns=2;s=PLC1", false).await.unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.browse_name.as_str()).collect();
    assert_eq!(names, vec!["Temperature", "Pressure", "Running"]);
    assert_eq!(entries[0].node_class, "Variable");
    assert_eq!(entries[0].reference_type, "HasComponent");

    handle.shutdown().await;
}

#[tokio::test]
async fn test_reverse_browse_walks_to_root() {
    let transport = MockTransport::plant();
    let (_bus, handle, client) = start(transport, settings()).await;

    let entries = client.browse("ns=2;s=PLC1.Temperature", true).await.unwrap();
    let paths: Vec<&str> = entries.iter().map(|e| e.browse_path.as_str()).collect();
    assert_eq!(paths, vec!["PLC1", "PLC1/Objects", "PLC1/Objects/Root"]);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_browse_unknown_node_fails() {
    let transport = MockTransport::plant();
    let (_bus, handle, client) = start(transport, settings()).await;

    let err = client.browse("ns=2;s=Nowhere", false).await.unwrap_err();
    assert!(err.to_string().contains("BadNodeIdUnknown"));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_schema_is_recursive() {
    let transport = MockTransport::plant();
    let (_bus, handle, client) = start(transport, settings()).await;

    let schema = client.schema(&["i=85"]).await.unwrap();
    assert_eq!(schema.len(), 1);
    assert_eq!(schema[0].browse_name, "Objects");

    let plcs: Vec<&str> = schema[0].nodes.iter().map(|n| n.browse_name.as_str()).collect();
    assert_eq!(plcs, vec!["PLC1", "PLC2"]);
    assert_eq!(schema[0].nodes[0].nodes.len(), 3);
    assert!(schema[0].nodes[0].nodes[0].nodes.is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_server_info() {
    let transport = MockTransport::plant();
    let (_bus, handle, client) = start(transport, settings()).await;

    let info = client.server_info().await.unwrap();
    assert_eq!(info["Server"][0], "urn:mock:server");
    assert_eq!(info["ServerStatus"], "Running");

    handle.shutdown().await;
}
