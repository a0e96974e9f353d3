// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! [`OpcUaTransport`] over the `opcua` client stack.
//!
//! The `opcua` session API blocks and drives its own runtime, so every
//! service call runs on the blocking pool and sessions are only dropped
//! there. Each connect opens an anonymous session without message security
//! and creates one subscription that carries all monitored items. The
//! session does not reconnect on its own; a lost connection is reported
//! through [`DriverEvents`] and the driver connects again.
//!
//! # Example
//!
//! ```rust,ignore
//! use tagway_opcua::{OpcUaAdapter, OpcUaClientTransport, OpcUaSettings};
//!
//! let settings = OpcUaSettings::new("opc.tcp://localhost:4840");
//! let transport = OpcUaClientTransport::new(&settings);
//! let adapter = OpcUaAdapter::new("plant", transport, settings);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opcua::client::prelude::{
    AttributeService, ClientBuilder, ConnectionStatusCallback,
    DataChangeCallback as SubscriptionCallback, IdentityToken, MonitoredItemService,
    SecurityPolicy, Session, SessionClosedCallback, SessionCommand, SubscriptionService,
    ViewService,
};
use opcua::sync::RwLock as SessionLock;
use opcua::types as ua;
use parking_lot::Mutex;
use tagway_core::{DriverError, DriverEvents, DriverResult};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::settings::OpcUaSettings;
use crate::transport::{DataChangeCallback, MonitoredItemRequest, MonitoredItemResult, OpcUaTransport};
use crate::types::{
    BrowseDirection, BrowseResult, DataValue, NodeAttributes, NodeClass, NodeId, NodeIdentifier,
    ReferenceDescription, ServerInfo, StatusCode, Variant,
};

const APPLICATION_NAME: &str = "tagway";
const APPLICATION_URI: &str = "urn:tagway:gateway";
const SESSION_TIMEOUT_MS: u32 = 60_000;
const LIFETIME_COUNT: u32 = 60;
const KEEP_ALIVE_COUNT: u32 = 10;
const MIN_PUBLISHING_INTERVAL: Duration = Duration::from_millis(100);

/// Names of the standard reference types in namespace 0.
const REFERENCE_TYPES: [(u32, &str); 13] = [
    (33, "HierarchicalReferences"),
    (34, "HasChild"),
    (35, "Organizes"),
    (36, "HasEventSource"),
    (37, "HasModellingRule"),
    (40, "HasTypeDefinition"),
    (41, "HasEncoding"),
    (44, "Aggregates"),
    (45, "HasSubtype"),
    (46, "HasProperty"),
    (47, "HasComponent"),
    (48, "HasNotifier"),
    (49, "HasOrderedComponent"),
];

/// `ServerState` enumeration names, by value.
const SERVER_STATES: [&str; 8] = [
    "Running",
    "Failed",
    "NoConfiguration",
    "Suspended",
    "Shutdown",
    "Test",
    "CommunicationFault",
    "Unknown",
];

/// Server object variables read by `server_info`, in result order.
const SERVER_INFO_NODES: [u32; 8] = [
    2254, // ServerArray
    2255, // NamespaceArray
    2257, // ServerStatus.StartTime
    2258, // ServerStatus.CurrentTime
    2259, // ServerStatus.State
    2261, // ServerStatus.BuildInfo.ProductName
    2264, // ServerStatus.BuildInfo.SoftwareVersion
    2265, // ServerStatus.BuildInfo.BuildNumber
];

// =============================================================================
// Value routing
// =============================================================================

/// Routes subscription notifications to monitored item callbacks.
///
/// Notifications can arrive before `create_monitored_items` has returned the
/// item id. Those are held back and delivered on registration.
#[derive(Default)]
struct Routes {
    callbacks: HashMap<u32, Arc<dyn DataChangeCallback>>,
    early: HashMap<u32, DataValue>,
}

type SharedRoutes = Arc<Mutex<Routes>>;

fn dispatch(routes: &SharedRoutes, monitored_item_id: u32, value: DataValue) {
    let callback = {
        let mut routes = routes.lock();
        match routes.callbacks.get(&monitored_item_id) {
            Some(callback) => callback.clone(),
            None => {
                routes.early.insert(monitored_item_id, value);
                return;
            }
        }
    };
    callback.on_data_change(value);
}

fn register(routes: &SharedRoutes, monitored_item_id: u32, callback: Arc<dyn DataChangeCallback>) {
    let early = {
        let mut routes = routes.lock();
        routes.callbacks.insert(monitored_item_id, callback.clone());
        routes.early.remove(&monitored_item_id)
    };
    if let Some(value) = early {
        callback.on_data_change(value);
    }
}

// =============================================================================
// Connection
// =============================================================================

/// An open session and its subscription.
///
/// Closing blocks on the session, so a connection is only dropped on the
/// blocking pool or a plain thread.
struct Connection {
    session: Arc<SessionLock<Session>>,
    subscription_id: u32,
    stop: Option<oneshot::Sender<SessionCommand>>,
    closing: Arc<AtomicBool>,
}

impl Connection {
    fn close(&mut self) {
        let Some(stop) = self.stop.take() else {
            return;
        };
        self.closing.store(true, Ordering::SeqCst);
        let _ = stop.send(SessionCommand::Stop);
        self.session.read().disconnect();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens a session, installs the loss callbacks and creates the
/// subscription. Blocks.
fn open_session(
    endpoint: &str,
    pki_dir: PathBuf,
    publishing_interval: Duration,
    events: DriverEvents,
    routes: SharedRoutes,
    connected: Arc<AtomicBool>,
) -> DriverResult<Connection> {
    let mut client = ClientBuilder::new()
        .application_name(APPLICATION_NAME)
        .application_uri(APPLICATION_URI)
        .product_uri(APPLICATION_URI)
        .pki_dir(pki_dir)
        .create_sample_keypair(false)
        .trust_server_certs(true)
        .session_retry_limit(0)
        .session_timeout(SESSION_TIMEOUT_MS)
        .client()
        .ok_or_else(|| DriverError::connection_failed("Invalid OPC UA client configuration"))?;

    let session = client
        .connect_to_endpoint(
            (
                endpoint,
                SecurityPolicy::None.to_str(),
                ua::MessageSecurityMode::None,
                ua::UserTokenPolicy::anonymous(),
            ),
            IdentityToken::Anonymous,
        )
        .map_err(|status| DriverError::connection_failed(format!("{}: {}", endpoint, status)))?;

    let closing = Arc::new(AtomicBool::new(false));
    {
        let mut session = session.write();

        let (lost, flag, state) = (events.clone(), closing.clone(), connected.clone());
        session.set_connection_status_callback(ConnectionStatusCallback::new(move |online| {
            if online {
                return;
            }
            state.store(false, Ordering::SeqCst);
            if !flag.load(Ordering::SeqCst) {
                lost.connection_lost("OPC UA connection lost");
            }
        }));

        let (lost, flag, state) = (events, closing.clone(), connected);
        session.set_session_closed_callback(SessionClosedCallback::new(move |status| {
            state.store(false, Ordering::SeqCst);
            if !flag.load(Ordering::SeqCst) {
                lost.connection_lost(format!("OPC UA session closed: {}", status));
            }
        }));
    }

    let created = session.read().create_subscription(
        publishing_interval.as_millis() as f64,
        LIFETIME_COUNT,
        KEEP_ALIVE_COUNT,
        0,
        0,
        true,
        SubscriptionCallback::new(move |items| {
            for item in items.iter() {
                trace!(monitored_item_id = item.id(), "Value change");
                dispatch(&routes, item.id(), from_ua_data_value(item.last_value()));
            }
        }),
    );
    let subscription_id = match created {
        Ok(id) => id,
        Err(status) => {
            session.read().disconnect();
            return Err(DriverError::connection_failed(format!(
                "Create subscription failed: {}",
                status
            )));
        }
    };

    let stop = Session::run_async(session.clone());
    Ok(Connection {
        session,
        subscription_id,
        stop: Some(stop),
        closing,
    })
}

// =============================================================================
// OpcUaClientTransport
// =============================================================================

/// OPC UA transport backed by the `opcua` crate.
pub struct OpcUaClientTransport {
    endpoint: String,
    publishing_interval: Duration,
    pki_dir: PathBuf,
    connection: Mutex<Option<Connection>>,
    connected: Arc<AtomicBool>,
    routes: SharedRoutes,
}

impl OpcUaClientTransport {
    /// Creates a disconnected transport for the settings' endpoint.
    ///
    /// The subscription publishes at the monitored item sampling interval,
    /// but no faster than every 100 ms.
    pub fn new(settings: &OpcUaSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            publishing_interval: settings.monitoring.sampling_interval.max(MIN_PUBLISHING_INTERVAL),
            pki_dir: std::env::temp_dir().join("tagway-pki"),
            connection: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            routes: SharedRoutes::default(),
        }
    }

    /// Sets the directory holding the client's certificate store.
    pub fn with_pki_dir(mut self, pki_dir: impl Into<PathBuf>) -> Self {
        self.pki_dir = pki_dir.into();
        self
    }

    /// Runs a service call against the open session on the blocking pool.
    async fn call<R, F>(&self, f: F) -> DriverResult<R>
    where
        F: FnOnce(&Session, u32) -> DriverResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let (session, subscription_id) = self
            .connection
            .lock()
            .as_ref()
            .map(|c| (c.session.clone(), c.subscription_id))
            .ok_or(DriverError::NotConnected)?;

        tokio::task::spawn_blocking(move || {
            let guard = session.read();
            f(&guard, subscription_id)
        })
        .await
        .map_err(|e| DriverError::protocol(format!("OPC UA call aborted: {}", e)))?
    }

    async fn close(&self) {
        let connection = self.connection.lock().take();
        self.connected.store(false, Ordering::SeqCst);
        {
            let mut routes = self.routes.lock();
            routes.callbacks.clear();
            routes.early.clear();
        }
        if let Some(connection) = connection {
            if let Err(e) = tokio::task::spawn_blocking(move || drop(connection)).await {
                warn!(error = %e, "Closing OPC UA session failed");
            }
        }
    }
}

impl Drop for OpcUaClientTransport {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            std::thread::spawn(move || drop(connection));
        }
    }
}

impl fmt::Debug for OpcUaClientTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcUaClientTransport")
            .field("endpoint", &self.endpoint)
            .field("publishing_interval", &self.publishing_interval)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[async_trait]
impl OpcUaTransport for OpcUaClientTransport {
    async fn connect(&self, events: DriverEvents) -> DriverResult<()> {
        self.close().await;
        info!(endpoint = %self.endpoint, "Connecting to OPC UA server");

        let endpoint = self.endpoint.clone();
        let pki_dir = self.pki_dir.clone();
        let publishing_interval = self.publishing_interval;
        let routes = self.routes.clone();
        let connected = self.connected.clone();
        let connection = tokio::task::spawn_blocking(move || {
            open_session(&endpoint, pki_dir, publishing_interval, events, routes, connected)
        })
        .await
        .map_err(|e| DriverError::connection_failed(format!("OPC UA connect aborted: {}", e)))??;

        debug!(subscription_id = connection.subscription_id, "Subscription created");
        *self.connection.lock() = Some(connection);
        self.connected.store(true, Ordering::SeqCst);
        info!(endpoint = %self.endpoint, "Connected to OPC UA server");
        Ok(())
    }

    async fn disconnect(&self) -> DriverResult<()> {
        if self.connection.lock().is_some() {
            info!(endpoint = %self.endpoint, "Disconnecting from OPC UA server");
        }
        self.close().await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn browse(
        &self,
        node_id: &NodeId,
        direction: BrowseDirection,
        node_class_mask: u32,
    ) -> DriverResult<BrowseResult> {
        let description = ua::BrowseDescription {
            node_id: to_ua_node_id(node_id),
            browse_direction: match direction {
                BrowseDirection::Forward => ua::BrowseDirection::Forward,
                BrowseDirection::Inverse => ua::BrowseDirection::Inverse,
            },
            reference_type_id: ua::ReferenceTypeId::HierarchicalReferences.into(),
            include_subtypes: true,
            node_class_mask,
            result_mask: ua::BrowseDescriptionResultMask::all().bits(),
        };
        let node = node_id.to_opc_string();
        trace!(node = %node, ?direction, "Browsing node");

        self.call(move |session, _| {
            let results = session
                .browse(&[description])
                .map_err(|status| DriverError::browse(&node, status.to_string()))?;
            Ok(first_page(results))
        })
        .await
    }

    async fn browse_next(&self, continuation_point: &str) -> DriverResult<BrowseResult> {
        let point = ua::ByteString::from_base64(continuation_point).ok_or_else(|| {
            DriverError::browse(continuation_point, "Invalid continuation point")
        })?;

        self.call(move |session, _| {
            let results = session
                .browse_next(false, &[point])
                .map_err(|status| DriverError::browse("continuation", status.to_string()))?;
            Ok(first_page(results))
        })
        .await
    }

    async fn read_values(&self, node_ids: &[NodeId]) -> DriverResult<Vec<DataValue>> {
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<ua::ReadValueId> = node_ids
            .iter()
            .map(|node| value_id(node, ua::AttributeId::Value))
            .collect();
        trace!(count = ids.len(), "Reading node values");

        let values = self
            .call(move |session, _| {
                session
                    .read(&ids, ua::TimestampsToReturn::Both, 0.0)
                    .map_err(|status| DriverError::read_failed("batch", status.to_string()))
            })
            .await?;
        Ok(values.iter().map(from_ua_data_value).collect())
    }

    async fn read_attributes(&self, node_id: &NodeId) -> DriverResult<NodeAttributes> {
        let ids: Vec<ua::ReadValueId> = [
            ua::AttributeId::NodeClass,
            ua::AttributeId::BrowseName,
            ua::AttributeId::DisplayName,
            ua::AttributeId::DataType,
        ]
        .into_iter()
        .map(|attribute| value_id(node_id, attribute))
        .collect();
        let node = node_id.to_opc_string();

        let values = self
            .call(move |session, _| {
                session
                    .read(&ids, ua::TimestampsToReturn::Neither, 0.0)
                    .map_err(|status| DriverError::read_failed(&node, status.to_string()))
            })
            .await?;
        attributes_from_values(node_id, &values)
    }

    async fn write_values(&self, writes: &[(NodeId, DataValue)]) -> DriverResult<Vec<StatusCode>> {
        let mut statuses = vec![StatusCode::BAD_TYPE_MISMATCH; writes.len()];
        let mut positions = Vec::with_capacity(writes.len());
        let mut nodes = Vec::with_capacity(writes.len());

        for (position, (node_id, value)) in writes.iter().enumerate() {
            let Some(variant) = to_ua_variant(&value.value) else {
                warn!(node = %node_id, "Value type not writable");
                continue;
            };
            let mut data_value = ua::DataValue::value_only(variant);
            data_value.source_timestamp = value.source_timestamp.map(ua::DateTime::from);
            nodes.push(ua::WriteValue {
                node_id: to_ua_node_id(node_id),
                attribute_id: ua::AttributeId::Value as u32,
                index_range: ua::UAString::null(),
                value: data_value,
            });
            positions.push(position);
        }
        if nodes.is_empty() {
            return Ok(statuses);
        }
        trace!(count = nodes.len(), "Writing node values");

        let results = self
            .call(move |session, _| {
                session
                    .write(&nodes)
                    .map_err(|status| DriverError::write_failed("batch", status.to_string()))
            })
            .await?;
        for (position, status) in positions.into_iter().zip(results) {
            statuses[position] = StatusCode(status.bits());
        }
        Ok(statuses)
    }

    async fn create_monitored_items(
        &self,
        requests: Vec<MonitoredItemRequest>,
    ) -> DriverResult<Vec<MonitoredItemResult>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let items: Vec<ua::MonitoredItemCreateRequest> = requests
            .iter()
            .map(|request| ua::MonitoredItemCreateRequest {
                item_to_monitor: value_id(&request.node_id, ua::AttributeId::Value),
                monitoring_mode: ua::MonitoringMode::Reporting,
                requested_parameters: ua::MonitoringParameters {
                    client_handle: 0,
                    sampling_interval: request.settings.sampling_interval.as_secs_f64() * 1000.0,
                    filter: ua::ExtensionObject::null(),
                    queue_size: request.settings.queue_size,
                    discard_oldest: request.settings.discard_oldest,
                },
            })
            .collect();
        trace!(count = items.len(), "Creating monitored items");

        let created = self
            .call(move |session, subscription_id| {
                session
                    .create_monitored_items(subscription_id, ua::TimestampsToReturn::Both, &items)
                    .map_err(|status| {
                        DriverError::subscription(format!("Create monitored items failed: {}", status))
                    })
            })
            .await?;

        let mut results = Vec::with_capacity(requests.len());
        for (request, item) in requests.into_iter().zip(created) {
            let status = StatusCode(item.status_code.bits());
            if status.is_good() {
                register(&self.routes, item.monitored_item_id, request.callback);
            }
            results.push(MonitoredItemResult {
                monitored_item_id: item.monitored_item_id,
                status,
            });
        }
        Ok(results)
    }

    async fn delete_monitored_items(&self, monitored_item_ids: &[u32]) -> DriverResult<()> {
        if monitored_item_ids.is_empty() {
            return Ok(());
        }
        {
            let mut routes = self.routes.lock();
            for id in monitored_item_ids {
                routes.callbacks.remove(id);
                routes.early.remove(id);
            }
        }
        let ids = monitored_item_ids.to_vec();
        trace!(count = ids.len(), "Deleting monitored items");

        self.call(move |session, subscription_id| {
            session
                .delete_monitored_items(subscription_id, &ids)
                .map(|_| ())
                .map_err(|status| {
                    DriverError::subscription(format!("Delete monitored items failed: {}", status))
                })
        })
        .await
    }

    async fn server_info(&self) -> DriverResult<ServerInfo> {
        let ids: Vec<ua::ReadValueId> = SERVER_INFO_NODES
            .iter()
            .map(|id| value_id(&NodeId::numeric(0, *id), ua::AttributeId::Value))
            .collect();

        let values = self
            .call(move |session, _| {
                session
                    .read(&ids, ua::TimestampsToReturn::Neither, 0.0)
                    .map_err(|status| DriverError::read_failed("Server", status.to_string()))
            })
            .await?;
        let values: Vec<Variant> = values
            .iter()
            .map(|value| from_ua_data_value(value).value)
            .collect();
        Ok(server_info_from_values(&values))
    }
}

// =============================================================================
// Conversions
// =============================================================================

fn value_id(node_id: &NodeId, attribute: ua::AttributeId) -> ua::ReadValueId {
    ua::ReadValueId {
        node_id: to_ua_node_id(node_id),
        attribute_id: attribute as u32,
        index_range: ua::UAString::null(),
        data_encoding: ua::QualifiedName::null(),
    }
}

fn to_ua_node_id(node_id: &NodeId) -> ua::NodeId {
    let namespace = node_id.namespace_index;
    match &node_id.identifier {
        NodeIdentifier::Numeric(v) => ua::NodeId::new(namespace, *v),
        NodeIdentifier::String(v) => ua::NodeId::new(namespace, v.clone()),
        NodeIdentifier::Guid(v) => ua::NodeId::new(namespace, ua::Guid::from(*v)),
        NodeIdentifier::Opaque(v) => ua::NodeId::new(
            namespace,
            ua::ByteString::from_base64(v).unwrap_or_else(ua::ByteString::null),
        ),
    }
}

fn from_ua_node_id(node_id: &ua::NodeId) -> NodeId {
    let namespace_index = node_id.namespace;
    let identifier = match &node_id.identifier {
        ua::Identifier::Numeric(v) => NodeIdentifier::Numeric(*v),
        ua::Identifier::String(v) => NodeIdentifier::String(v.as_ref().to_string()),
        ua::Identifier::Guid(v) => NodeIdentifier::Guid(Uuid::from_bytes(*v.as_bytes())),
        ua::Identifier::ByteString(v) => NodeIdentifier::Opaque(v.as_base64()),
    };
    NodeId {
        namespace_index,
        identifier,
    }
}

fn from_ua_variant(variant: &ua::Variant) -> Variant {
    match variant {
        ua::Variant::Empty => Variant::Null,
        ua::Variant::Boolean(v) => Variant::Boolean(*v),
        ua::Variant::SByte(v) => Variant::SByte(*v),
        ua::Variant::Byte(v) => Variant::Byte(*v),
        ua::Variant::Int16(v) => Variant::Int16(*v),
        ua::Variant::UInt16(v) => Variant::UInt16(*v),
        ua::Variant::Int32(v) => Variant::Int32(*v),
        ua::Variant::UInt32(v) => Variant::UInt32(*v),
        ua::Variant::Int64(v) => Variant::Int64(*v),
        ua::Variant::UInt64(v) => Variant::UInt64(*v),
        ua::Variant::Float(v) => Variant::Float(*v),
        ua::Variant::Double(v) => Variant::Double(*v),
        ua::Variant::String(v) => Variant::String(v.as_ref().to_string()),
        ua::Variant::DateTime(v) => Variant::DateTime(v.as_chrono()),
        ua::Variant::Guid(v) => Variant::Guid(Uuid::from_bytes(*v.as_bytes())),
        ua::Variant::StatusCode(v) => Variant::StatusCode(StatusCode(v.bits())),
        ua::Variant::ByteString(v) => Variant::ByteString(v.value.clone().unwrap_or_default()),
        ua::Variant::NodeId(v) => Variant::NodeId(from_ua_node_id(v)),
        ua::Variant::QualifiedName(v) => Variant::QualifiedName(v.name.as_ref().to_string()),
        ua::Variant::LocalizedText(v) => Variant::LocalizedText(v.text.as_ref().to_string()),
        ua::Variant::Array(array) => {
            Variant::Array(array.values.iter().map(from_ua_variant).collect())
        }
        other => Variant::String(format!("{:?}", other)),
    }
}

/// Converts a scalar for writing. Composite values are not writable.
fn to_ua_variant(value: &Variant) -> Option<ua::Variant> {
    let variant = match value {
        Variant::Null => ua::Variant::Empty,
        Variant::Boolean(v) => ua::Variant::Boolean(*v),
        Variant::SByte(v) => ua::Variant::SByte(*v),
        Variant::Byte(v) => ua::Variant::Byte(*v),
        Variant::Int16(v) => ua::Variant::Int16(*v),
        Variant::UInt16(v) => ua::Variant::UInt16(*v),
        Variant::Int32(v) => ua::Variant::Int32(*v),
        Variant::UInt32(v) => ua::Variant::UInt32(*v),
        Variant::Int64(v) => ua::Variant::Int64(*v),
        Variant::UInt64(v) => ua::Variant::UInt64(*v),
        Variant::Float(v) => ua::Variant::Float(*v),
        Variant::Double(v) => ua::Variant::Double(*v),
        Variant::String(v) => ua::Variant::String(ua::UAString::from(v.as_str())),
        Variant::DateTime(v) => ua::Variant::DateTime(Box::new(ua::DateTime::from(*v))),
        Variant::Guid(v) => ua::Variant::Guid(Box::new(ua::Guid::from(*v))),
        Variant::ByteString(v) => ua::Variant::ByteString(ua::ByteString::from(v.as_slice())),
        Variant::NodeId(v) => ua::Variant::NodeId(Box::new(to_ua_node_id(v))),
        _ => return None,
    };
    Some(variant)
}

fn from_ua_data_value(value: &ua::DataValue) -> DataValue {
    DataValue {
        value: value.value.as_ref().map(from_ua_variant).unwrap_or_default(),
        status: value.status.as_ref().map(|status| StatusCode(status.bits())),
        source_timestamp: value.source_timestamp.as_ref().map(|t| t.as_chrono()),
        server_timestamp: value.server_timestamp.as_ref().map(|t| t.as_chrono()),
    }
}

fn reference_type_name(reference_type: &NodeId) -> String {
    if reference_type.namespace_index == 0 {
        if let NodeIdentifier::Numeric(id) = reference_type.identifier {
            if let Some((_, name)) = REFERENCE_TYPES.iter().find(|(known, _)| *known == id) {
                return (*name).to_string();
            }
        }
    }
    reference_type.to_opc_string()
}

fn from_ua_reference(reference: &ua::ReferenceDescription) -> ReferenceDescription {
    let mut converted = ReferenceDescription::new(
        from_ua_node_id(&reference.node_id.node_id),
        reference.browse_name.name.as_ref(),
        NodeClass::from_mask(reference.node_class as u32),
        reference_type_name(&from_ua_node_id(&reference.reference_type_id)),
    );
    let display_name = reference.display_name.text.as_ref();
    if !display_name.is_empty() {
        converted.display_name = display_name.to_string();
    }
    converted
}

fn continuation(point: &ua::ByteString) -> Option<String> {
    match &point.value {
        Some(bytes) if !bytes.is_empty() => Some(point.as_base64()),
        _ => None,
    }
}

fn from_ua_browse_result(result: &ua::BrowseResult) -> BrowseResult {
    BrowseResult {
        status: StatusCode(result.status_code.bits()),
        references: result
            .references
            .as_ref()
            .map(|references| references.iter().map(from_ua_reference).collect())
            .unwrap_or_default(),
        continuation_point: continuation(&result.continuation_point),
    }
}

fn first_page(results: Option<Vec<ua::BrowseResult>>) -> BrowseResult {
    results
        .as_ref()
        .and_then(|results| results.first())
        .map(from_ua_browse_result)
        .unwrap_or_default()
}

fn attributes_from_values(node_id: &NodeId, values: &[ua::DataValue]) -> DriverResult<NodeAttributes> {
    let values: Vec<DataValue> = values.iter().map(from_ua_data_value).collect();
    if let Some(status) = values.first().and_then(|v| v.status).filter(|s| !s.is_good()) {
        return Err(DriverError::read_failed(node_id.to_opc_string(), status.name()));
    }
    let attribute = |index: usize| values.get(index).map(|v| &v.value);

    let node_class = match attribute(0) {
        Some(Variant::Int32(mask)) => NodeClass::from_mask(*mask as u32),
        _ => NodeClass::Unspecified,
    };
    let browse_name = match attribute(1) {
        Some(Variant::QualifiedName(name)) => name.clone(),
        _ => String::new(),
    };
    let display_name = match attribute(2) {
        Some(Variant::LocalizedText(text)) if !text.is_empty() => text.clone(),
        _ => browse_name.clone(),
    };
    let data_type = match attribute(3) {
        Some(Variant::NodeId(data_type)) => Some(data_type.clone()),
        _ => None,
    };

    Ok(NodeAttributes {
        node_id: node_id.clone(),
        node_class,
        browse_name,
        display_name,
        data_type,
    })
}

fn strings(value: Option<&Variant>) -> Vec<String> {
    match value {
        Some(Variant::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Variant::String(text) => Some(text.clone()),
                _ => None,
            })
            .collect(),
        Some(Variant::String(text)) => vec![text.clone()],
        _ => Vec::new(),
    }
}

fn text(value: Option<&Variant>) -> String {
    match value {
        Some(Variant::String(text)) => text.clone(),
        Some(Variant::LocalizedText(text)) => text.clone(),
        _ => String::new(),
    }
}

fn server_info_from_values(values: &[Variant]) -> ServerInfo {
    let time = |index: usize| match values.get(index) {
        Some(Variant::DateTime(time)) => Some(*time),
        _ => None,
    };
    let server_status = match values.get(4) {
        Some(Variant::Int32(state)) => usize::try_from(*state)
            .ok()
            .and_then(|state| SERVER_STATES.get(state))
            .map(|name| name.to_string())
            .unwrap_or_else(|| state.to_string()),
        _ => String::new(),
    };
    let build_info = format!(
        "{} {} (build {})",
        text(values.get(5)),
        text(values.get(6)),
        text(values.get(7))
    );

    ServerInfo {
        server: strings(values.first()),
        namespace: strings(values.get(1)),
        build_info,
        start_time: time(2),
        current_time: time(3),
        server_status,
    }
}

// =============================================================================
// Tests
// =============================================================================
