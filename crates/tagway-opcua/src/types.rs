// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA data types used by the binding.
//!
//! - **NodeId**: Numeric, string, GUID and opaque node identifiers
//! - **NodeClass**: Node classes and browse masks
//! - **BuiltinType**: Built-in data types addressed by their type node
//! - **Variant / DataValue**: Values as delivered by a session
//! - **StatusCode**: Status codes with symbolic names
//!
//! # Examples
//!
//! ```
//! use tagway_opcua::types::NodeId;
//!
//! let objects: NodeId = "i=85".parse().unwrap();
//! assert_eq!(objects, NodeId::numeric(0, 85));
//!
//! let tag: NodeId = "ns=2;s=Line1.Speed".parse().unwrap();
//! assert_eq!(tag.to_string(), "ns=2;s=Line1.Speed");
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OpcUaError;

// =============================================================================
// NodeId
// =============================================================================

/// OPC UA node identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = OPC UA standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    /// Creates a numeric node ID.
    #[inline]
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node ID.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// Creates a GUID node ID.
    #[inline]
    pub fn guid(namespace_index: u16, value: Uuid) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Guid(value),
        }
    }

    /// Returns the numeric identifier in namespace 0, if that is what this is.
    pub fn as_ns0_numeric(&self) -> Option<u32> {
        match (&self.identifier, self.namespace_index) {
            (NodeIdentifier::Numeric(v), 0) => Some(*v),
            _ => None,
        }
    }

    /// Returns the parseable text form, omitting namespace 0.
    pub fn to_opc_string(&self) -> String {
        if self.namespace_index == 0 {
            self.identifier.to_string()
        } else {
            format!("ns={};{}", self.namespace_index, self.identifier)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_opc_string())
    }
}

impl FromStr for NodeId {
    type Err = OpcUaError;

    /// Parses `ns=<n>;<id>` or `<id>`, where `<id>` is one of `i=`, `s=`,
    /// `g=` or `b=`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let (namespace_index, identifier_part) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, id) = rest
                    .split_once(';')
                    .ok_or_else(|| OpcUaError::invalid_node_id(s, "missing identifier after namespace"))?;
                let ns: u16 = ns
                    .parse()
                    .map_err(|_| OpcUaError::invalid_node_id(s, "invalid namespace index"))?;
                (ns, id)
            }
            None => (0, s),
        };

        let identifier = if let Some(id) = identifier_part.strip_prefix("i=") {
            let value = id
                .parse()
                .map_err(|_| OpcUaError::invalid_node_id(s, "invalid numeric identifier"))?;
            NodeIdentifier::Numeric(value)
        } else if let Some(id) = identifier_part.strip_prefix("s=") {
            NodeIdentifier::String(id.to_string())
        } else if let Some(id) = identifier_part.strip_prefix("g=") {
            let uuid = Uuid::parse_str(id)
                .map_err(|e| OpcUaError::invalid_node_id(s, format!("invalid GUID: {}", e)))?;
            NodeIdentifier::Guid(uuid)
        } else if let Some(id) = identifier_part.strip_prefix("b=") {
            NodeIdentifier::Opaque(id.to_string())
        } else {
            return Err(OpcUaError::invalid_node_id(
                s,
                "unknown identifier type, expected i=, s=, g= or b=",
            ));
        };

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

/// OPC UA node identifier kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),
    /// String identifier.
    String(String),
    /// GUID identifier.
    Guid(Uuid),
    /// Opaque identifier, kept in its base64 text form.
    Opaque(String),
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeIdentifier::Numeric(v) => write!(f, "i={}", v),
            NodeIdentifier::String(v) => write!(f, "s={}", v),
            NodeIdentifier::Guid(v) => write!(f, "g={}", v),
            NodeIdentifier::Opaque(v) => write!(f, "b={}", v),
        }
    }
}

/// Well-known namespace 0 nodes.
pub mod ids {
    /// `Root` folder.
    pub const ROOT: u32 = 84;
    /// `Objects` folder.
    pub const OBJECTS: u32 = 85;
    /// `Types` folder.
    pub const TYPES: u32 = 86;
    /// `Views` folder.
    pub const VIEWS: u32 = 87;
    /// `Server` object.
    pub const SERVER: u32 = 2253;
}

/// Maps a root alias (`Root`, `Objects`, `Types`, `Views`) to its node.
///
/// Matching ignores case and an optional leading `$`.
pub fn root_alias(name: &str) -> Option<NodeId> {
    let name = name.strip_prefix('$').unwrap_or(name);
    let id = match name.to_ascii_lowercase().as_str() {
        "root" => ids::ROOT,
        "objects" => ids::OBJECTS,
        "types" => ids::TYPES,
        "views" => ids::VIEWS,
        _ => return None,
    };
    Some(NodeId::numeric(0, id))
}

// =============================================================================
// NodeClass
// =============================================================================

/// OPC UA node class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum NodeClass {
    /// No class.
    #[default]
    Unspecified,
    /// Object node.
    Object,
    /// Variable node.
    Variable,
    /// Method node.
    Method,
    /// Object type node.
    ObjectType,
    /// Variable type node.
    VariableType,
    /// Reference type node.
    ReferenceType,
    /// Data type node.
    DataType,
    /// View node.
    View,
}

impl NodeClass {
    /// Returns the browse mask bit of this class.
    pub fn mask(&self) -> u32 {
        match self {
            NodeClass::Unspecified => 0,
            NodeClass::Object => 1,
            NodeClass::Variable => 2,
            NodeClass::Method => 4,
            NodeClass::ObjectType => 8,
            NodeClass::VariableType => 16,
            NodeClass::ReferenceType => 32,
            NodeClass::DataType => 64,
            NodeClass::View => 128,
        }
    }

    /// Returns the class with browse mask bit `mask`.
    pub fn from_mask(mask: u32) -> Self {
        match mask {
            1 => NodeClass::Object,
            2 => NodeClass::Variable,
            4 => NodeClass::Method,
            8 => NodeClass::ObjectType,
            16 => NodeClass::VariableType,
            32 => NodeClass::ReferenceType,
            64 => NodeClass::DataType,
            128 => NodeClass::View,
            _ => NodeClass::Unspecified,
        }
    }

    /// Returns the class name.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeClass::Unspecified => "Unspecified",
            NodeClass::Object => "Object",
            NodeClass::Variable => "Variable",
            NodeClass::Method => "Method",
            NodeClass::ObjectType => "ObjectType",
            NodeClass::VariableType => "VariableType",
            NodeClass::ReferenceType => "ReferenceType",
            NodeClass::DataType => "DataType",
            NodeClass::View => "View",
        }
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Browse mask selecting objects and variables.
pub const OBJECTS_AND_VARIABLES: u32 = 1 | 2;

/// Hierarchical reference types followed when browsing.
pub const HIERARCHICAL_REFERENCES: [&str; 3] = ["Organizes", "HasComponent", "HasProperty"];

// =============================================================================
// BuiltinType
// =============================================================================

/// Built-in data types a write can be converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuiltinType {
    /// Boolean.
    Boolean,
    /// Signed byte.
    SByte,
    /// Unsigned byte.
    Byte,
    /// 16-bit signed integer.
    Int16,
    /// 16-bit unsigned integer.
    UInt16,
    /// 32-bit signed integer.
    Int32,
    /// 32-bit unsigned integer.
    UInt32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit unsigned integer.
    UInt64,
    /// 32-bit float.
    Float,
    /// 64-bit double.
    Double,
    /// String.
    String,
    /// Abstract signed integer, written as Int32.
    Integer,
    /// Abstract unsigned integer, written as UInt32.
    UInteger,
}

impl BuiltinType {
    /// Looks up the type from its type definition node in namespace 0.
    pub fn from_data_type(node_id: &NodeId) -> Option<Self> {
        let ty = match node_id.as_ns0_numeric()? {
            1 => BuiltinType::Boolean,
            2 => BuiltinType::SByte,
            3 => BuiltinType::Byte,
            4 => BuiltinType::Int16,
            5 => BuiltinType::UInt16,
            6 => BuiltinType::Int32,
            7 => BuiltinType::UInt32,
            8 => BuiltinType::Int64,
            9 => BuiltinType::UInt64,
            10 => BuiltinType::Float,
            11 => BuiltinType::Double,
            12 => BuiltinType::String,
            27 => BuiltinType::Integer,
            28 => BuiltinType::UInteger,
            _ => return None,
        };
        Some(ty)
    }

    /// Returns the type definition node of this type.
    pub fn data_type_id(&self) -> NodeId {
        let id = match self {
            BuiltinType::Boolean => 1,
            BuiltinType::SByte => 2,
            BuiltinType::Byte => 3,
            BuiltinType::Int16 => 4,
            BuiltinType::UInt16 => 5,
            BuiltinType::Int32 => 6,
            BuiltinType::UInt32 => 7,
            BuiltinType::Int64 => 8,
            BuiltinType::UInt64 => 9,
            BuiltinType::Float => 10,
            BuiltinType::Double => 11,
            BuiltinType::String => 12,
            BuiltinType::Integer => 27,
            BuiltinType::UInteger => 28,
        };
        NodeId::numeric(0, id)
    }
}

// =============================================================================
// Variant
// =============================================================================

/// A value as carried by an OPC UA session.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    /// Boolean value.
    Boolean(bool),
    /// Signed byte.
    SByte(i8),
    /// Unsigned byte.
    Byte(u8),
    /// 16-bit signed integer.
    Int16(i16),
    /// 16-bit unsigned integer.
    UInt16(u16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 32-bit unsigned integer.
    UInt32(u32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit unsigned integer.
    UInt64(u64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit double.
    Double(f64),
    /// String value.
    String(String),
    /// Date/time value.
    DateTime(DateTime<Utc>),
    /// GUID value.
    Guid(Uuid),
    /// Byte string.
    ByteString(Vec<u8>),
    /// Node id value.
    NodeId(NodeId),
    /// Localized text, text part only.
    LocalizedText(String),
    /// Qualified name, name part only.
    QualifiedName(String),
    /// Status code value.
    StatusCode(StatusCode),
    /// Array of values.
    Array(Vec<Variant>),
    /// Null value.
    #[default]
    Null,
}

impl Variant {
    /// Returns `true` if this is a null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

// =============================================================================
// StatusCode
// =============================================================================

/// OPC UA status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct StatusCode(pub u32);

const STATUS_NAMES: &[(u32, &str)] = &[
    (0x0000_0000, "Good"),
    (0x00A5_0000, "GoodNoData"),
    (0x4000_0000, "Uncertain"),
    (0x4090_0000, "UncertainLastUsableValue"),
    (0x408F_0000, "UncertainSubNormal"),
    (0x8000_0000, "Bad"),
    (0x8005_0000, "BadCommunicationError"),
    (0x800A_0000, "BadTimeout"),
    (0x800D_0000, "BadServerNotConnected"),
    (0x801F_0000, "BadUserAccessDenied"),
    (0x8026_0000, "BadSessionClosed"),
    (0x8028_0000, "BadSubscriptionIdInvalid"),
    (0x8031_0000, "BadNoCommunication"),
    (0x8032_0000, "BadWaitingForInitialData"),
    (0x8033_0000, "BadNodeIdInvalid"),
    (0x8034_0000, "BadNodeIdUnknown"),
    (0x8035_0000, "BadAttributeIdInvalid"),
    (0x803B_0000, "BadNotWritable"),
    (0x803C_0000, "BadOutOfRange"),
    (0x804A_0000, "BadContinuationPointInvalid"),
    (0x8074_0000, "BadTypeMismatch"),
    (0x808A_0000, "BadNotConnected"),
];

impl StatusCode {
    /// The `Good` status.
    pub const GOOD: StatusCode = StatusCode(0);
    /// Node id not known to the server.
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8034_0000);
    /// Value type does not match the node.
    pub const BAD_TYPE_MISMATCH: StatusCode = StatusCode(0x8074_0000);
    /// Node is not writable.
    pub const BAD_NOT_WRITABLE: StatusCode = StatusCode(0x803B_0000);
    /// No value received yet.
    pub const BAD_WAITING_FOR_INITIAL_DATA: StatusCode = StatusCode(0x8032_0000);

    /// Returns `true` if the severity is good.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` if the severity is bad.
    #[inline]
    pub fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns the symbolic name, or the hex code when it is not known.
    pub fn name(&self) -> String {
        let code = self.0 & 0xFFFF_0000;
        STATUS_NAMES
            .iter()
            .find(|(value, _)| *value == code)
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| format!("0x{:08X}", self.0))
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

// =============================================================================
// DataValue
// =============================================================================

/// A value with status and timestamps.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    /// The value.
    pub value: Variant,
    /// Status, `None` meaning good.
    pub status: Option<StatusCode>,
    /// Source timestamp.
    pub source_timestamp: Option<DateTime<Utc>>,
    /// Server timestamp.
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// Creates a good value without timestamps.
    pub fn new(value: Variant) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    /// Sets the status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the source timestamp.
    pub fn with_source_timestamp(mut self, time: DateTime<Utc>) -> Self {
        self.source_timestamp = Some(time);
        self
    }

    /// Sets the server timestamp.
    pub fn with_server_timestamp(mut self, time: DateTime<Utc>) -> Self {
        self.server_timestamp = Some(time);
        self
    }

    /// Returns the status, good when absent.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::GOOD)
    }
}

// =============================================================================
// Browsing
// =============================================================================

/// Direction of a browse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BrowseDirection {
    /// Follow references from parent to child.
    #[default]
    Forward,
    /// Follow references from child to parent.
    Inverse,
}

/// One reference returned by a browse.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceDescription {
    /// Target node.
    pub node_id: NodeId,
    /// Browse name of the target.
    pub browse_name: String,
    /// Display name of the target.
    pub display_name: String,
    /// Class of the target.
    pub node_class: NodeClass,
    /// Reference type name, e.g. `HasComponent`.
    pub reference_type: String,
}

impl ReferenceDescription {
    /// Creates a reference. Display name defaults to the browse name.
    pub fn new(
        node_id: NodeId,
        browse_name: impl Into<String>,
        node_class: NodeClass,
        reference_type: impl Into<String>,
    ) -> Self {
        let browse_name = browse_name.into();
        Self {
            node_id,
            display_name: browse_name.clone(),
            browse_name,
            node_class,
            reference_type: reference_type.into(),
        }
    }

    /// Returns `true` if the reference is hierarchical.
    pub fn is_hierarchical(&self) -> bool {
        HIERARCHICAL_REFERENCES.contains(&self.reference_type.as_str())
    }
}

/// One page of browse results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BrowseResult {
    /// Status of the browse.
    pub status: StatusCode,
    /// References on this page.
    pub references: Vec<ReferenceDescription>,
    /// Continuation point, present when more pages follow.
    pub continuation_point: Option<String>,
}

/// Attributes of a single node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeAttributes {
    /// Node id.
    pub node_id: NodeId,
    /// Node class.
    pub node_class: NodeClass,
    /// Browse name.
    pub browse_name: String,
    /// Display name.
    pub display_name: String,
    /// Data type node, for variables.
    pub data_type: Option<NodeId>,
}

/// Server description read from the `Server` object.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerInfo {
    /// Server URIs.
    pub server: Vec<String>,
    /// Namespace URIs.
    pub namespace: Vec<String>,
    /// Build information text.
    pub build_info: String,
    /// Server start time.
    pub start_time: Option<DateTime<Utc>>,
    /// Server current time.
    pub current_time: Option<DateTime<Utc>>,
    /// Server state name.
    pub server_status: String,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_parse_forms() {
        assert_eq!("i=85".parse::<NodeId>().unwrap(), NodeId::numeric(0, 85));
        assert_eq!(
            "ns=2;s=Line1.Speed".parse::<NodeId>().unwrap(),
            NodeId::string(2, "Line1.Speed")
        );
        let guid: NodeId = "ns=1;g=550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
        assert!(matches!(guid.identifier, NodeIdentifier::Guid(_)));
        assert!("ns=x;i=1".parse::<NodeId>().is_err());
        assert!("ns=2".parse::<NodeId>().is_err());
        assert!("Objects".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_node_id_display_omits_namespace_zero() {
        assert_eq!(NodeId::numeric(0, 2258).to_string(), "i=2258");
        assert_eq!(NodeId::numeric(3, 7).to_string(), "ns=3;i=7");
    }

    #[test]
    fn test_root_aliases() {
        assert_eq!(root_alias("Objects"), Some(NodeId::numeric(0, 85)));
        assert_eq!(root_alias("$objects"), Some(NodeId::numeric(0, 85)));
        assert_eq!(root_alias("ROOT"), Some(NodeId::numeric(0, 84)));
        assert_eq!(root_alias("$Views"), Some(NodeId::numeric(0, 87)));
        assert_eq!(root_alias("Plant"), None);
    }

    #[test]
    fn test_status_names() {
        assert_eq!(StatusCode::GOOD.name(), "Good");
        assert_eq!(StatusCode::BAD_NODE_ID_UNKNOWN.name(), "BadNodeIdUnknown");
        assert_eq!(StatusCode(0x8034_0400).name(), "BadNodeIdUnknown");
        assert_eq!(StatusCode(0x80AB_0000).name(), "0x80AB0000");
        assert!(!StatusCode(0x4090_0000).is_good());
        assert!(StatusCode::BAD_TYPE_MISMATCH.is_bad());
    }

    #[test]
    fn test_builtin_type_lookup() {
        assert_eq!(
            BuiltinType::from_data_type(&NodeId::numeric(0, 11)),
            Some(BuiltinType::Double)
        );
        assert_eq!(BuiltinType::from_data_type(&NodeId::numeric(2, 11)), None);
        assert_eq!(BuiltinType::UInteger.data_type_id(), NodeId::numeric(0, 28));
    }
}
