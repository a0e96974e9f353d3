// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Canonical topic addresses.
//!
//! A topic address names one subscribable data source behind a driver. Its
//! encoded form doubles as the bus channel for value updates and as the key
//! of the subscription registry.
//!
//! # Wire Grammar
//!
//! ```text
//! {SystemType}/{SystemName}/{TopicType}[:{Format}]/{payload}
//! $SYS/{path}
//! ```
//!
//! Keywords are matched case-insensitively. The canonical encoding spells
//! them `Opc`, `Mqtt`, `Plc`, `Node`, `Path`, `Rpc` and leaves out the
//! default `Json` format suffix.
//!
//! # Examples
//!
//! ```
//! use tagway_core::topic::{DataFormat, SystemType, TopicAddress, TopicType};
//!
//! let topic = TopicAddress::parse("opc/demo/path:value/Objects/PLC1/#").unwrap();
//! assert_eq!(topic.system_type(), SystemType::Opc);
//! assert_eq!(topic.topic_type(), TopicType::Path);
//! assert_eq!(topic.format(), DataFormat::Value);
//! assert_eq!(topic.topic_name(), "Opc/demo/Path:Value/Objects/PLC1/#");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TopicError, TopicResult};

/// Prefix of internal system topics.
pub const SYSTEM_TOPIC_PREFIX: &str = "$SYS";

// =============================================================================
// SystemType
// =============================================================================

/// The kind of backend system a topic lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemType {
    /// OPC UA server.
    Opc,
    /// MQTT broker.
    Mqtt,
    /// PLC driver.
    Plc,
    /// Internal `$SYS` topics.
    Other,
    /// Not a valid system type.
    Unknown,
}

impl SystemType {
    /// Returns the canonical spelling used in topic names and bus addresses.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemType::Opc => "Opc",
            SystemType::Mqtt => "Mqtt",
            SystemType::Plc => "Plc",
            SystemType::Other => SYSTEM_TOPIC_PREFIX,
            SystemType::Unknown => "Unknown",
        }
    }

    fn from_keyword(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("opc") {
            Some(SystemType::Opc)
        } else if value.eq_ignore_ascii_case("mqtt") {
            Some(SystemType::Mqtt)
        } else if value.eq_ignore_ascii_case("plc") {
            Some(SystemType::Plc)
        } else {
            None
        }
    }
}

impl fmt::Display for SystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// TopicType
// =============================================================================

/// How the payload of a topic is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicType {
    /// A concrete point identifier.
    Node,
    /// A hierarchical path, possibly containing wildcards.
    Path,
    /// A remote procedure name.
    Rpc,
}

impl TopicType {
    /// Returns the canonical spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicType::Node => "Node",
            TopicType::Path => "Path",
            TopicType::Rpc => "Rpc",
        }
    }

    fn from_keyword(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("node") {
            Some(TopicType::Node)
        } else if value.eq_ignore_ascii_case("path") {
            Some(TopicType::Path)
        } else if value.eq_ignore_ascii_case("rpc") {
            Some(TopicType::Rpc)
        } else {
            None
        }
    }
}

impl fmt::Display for TopicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// DataFormat
// =============================================================================

/// Serialization of values published for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataFormat {
    /// The raw scalar rendered as text.
    Value,
    /// Compact `{topic, value}` JSON envelope.
    #[default]
    Json,
    /// Multi-line `{topic, value}` JSON envelope.
    Pretty,
}

impl DataFormat {
    /// Returns the canonical spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Value => "Value",
            DataFormat::Json => "Json",
            DataFormat::Pretty => "Pretty",
        }
    }

    fn from_keyword(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("value") {
            Some(DataFormat::Value)
        } else if value.eq_ignore_ascii_case("json") {
            Some(DataFormat::Json)
        } else if value.eq_ignore_ascii_case("pretty") {
            Some(DataFormat::Pretty)
        } else {
            None
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// TopicAddress
// =============================================================================

/// An immutable, validated topic address.
///
/// `topic_name` is derived from the other fields on construction, so two
/// addresses are equal exactly when their canonical names are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "TopicRecord", into = "TopicRecord")]
pub struct TopicAddress {
    system_type: SystemType,
    system_name: String,
    topic_type: TopicType,
    format: DataFormat,
    payload: String,
    topic_name: String,
}

impl TopicAddress {
    /// Creates a topic address from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError`] when the parts cannot be encoded into a name
    /// that parses back to the same address.
    pub fn new(
        system_type: SystemType,
        system_name: impl Into<String>,
        topic_type: TopicType,
        format: DataFormat,
        payload: impl Into<String>,
    ) -> TopicResult<Self> {
        let system_name = system_name.into();
        let payload = payload.into();

        match system_type {
            SystemType::Unknown => {
                return Err(TopicError::invalid_field(
                    "systemType",
                    system_type.as_str(),
                    "unknown system type",
                ));
            }
            SystemType::Other => {
                if !system_name.is_empty() {
                    return Err(TopicError::invalid_field(
                        "systemName",
                        system_name,
                        "system topics have no system name",
                    ));
                }
                if topic_type != TopicType::Path || format != DataFormat::Json {
                    return Err(TopicError::invalid_field(
                        "topicType",
                        topic_type.as_str(),
                        "system topics are Json paths",
                    ));
                }
            }
            SystemType::Opc | SystemType::Mqtt | SystemType::Plc => {
                if !is_valid_system_name(&system_name) {
                    return Err(TopicError::invalid_field(
                        "systemName",
                        system_name,
                        "expected one or more of [A-Za-z0-9_-]",
                    ));
                }
            }
        }

        if payload.is_empty() {
            return Err(TopicError::invalid_field("payload", payload, "cannot be empty"));
        }

        if system_type == SystemType::Opc {
            if topic_type == TopicType::Node && node_shorthand(&payload).is_some() {
                return Err(TopicError::invalid_field(
                    "payload",
                    payload,
                    "node identifiers may not start with '<digits>/'",
                ));
            }
            if topic_type == TopicType::Path && split_path(&payload).len() < 2 {
                return Err(TopicError::invalid_field(
                    "payload",
                    payload,
                    "OPC UA paths need a root and at least one more segment",
                ));
            }
        }

        let topic_name = encode(system_type, &system_name, topic_type, format, &payload);

        Ok(Self {
            system_type,
            system_name,
            topic_type,
            format,
            payload,
            topic_name,
        })
    }

    /// Creates an OPC UA node topic.
    pub fn opc_node(system_name: impl Into<String>, node: impl Into<String>) -> TopicResult<Self> {
        Self::new(SystemType::Opc, system_name, TopicType::Node, DataFormat::Json, node)
    }

    /// Creates an OPC UA path topic.
    pub fn opc_path(system_name: impl Into<String>, path: impl Into<String>) -> TopicResult<Self> {
        Self::new(SystemType::Opc, system_name, TopicType::Path, DataFormat::Json, path)
    }

    /// Creates an MQTT path topic.
    pub fn mqtt_path(system_name: impl Into<String>, path: impl Into<String>) -> TopicResult<Self> {
        Self::new(SystemType::Mqtt, system_name, TopicType::Path, DataFormat::Json, path)
    }

    /// Creates an internal `$SYS` topic.
    pub fn system(path: impl Into<String>) -> TopicResult<Self> {
        Self::new(SystemType::Other, "", TopicType::Path, DataFormat::Json, path)
    }

    /// Parses a topic address from its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError`] when segments are missing or a keyword is not
    /// recognized.
    pub fn parse(raw: &str) -> TopicResult<Self> {
        if let Some(rest) = strip_prefix_ignore_case(raw, SYSTEM_TOPIC_PREFIX) {
            if rest.is_empty() || rest.starts_with('/') {
                return match rest.strip_prefix('/') {
                    Some(path) if !path.is_empty() => Self::system(path),
                    _ => Err(TopicError::missing_segments(raw, "system topic without a path")),
                };
            }
        }

        let mut parts = raw.splitn(4, '/');
        let (Some(system), Some(name), Some(kind), Some(payload)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TopicError::missing_segments(
                raw,
                "expected {SystemType}/{SystemName}/{TopicType}/{payload}",
            ));
        };

        let system_type =
            SystemType::from_keyword(system).ok_or_else(|| TopicError::UnknownSystemType {
                topic: raw.to_string(),
                value: system.to_string(),
            })?;

        let (kind, format) = match kind.split_once(':') {
            Some((kind, format)) => (
                kind,
                DataFormat::from_keyword(format).ok_or_else(|| TopicError::UnknownFormat {
                    topic: raw.to_string(),
                    value: format.to_string(),
                })?,
            ),
            None => (kind, DataFormat::default()),
        };

        let topic_type = TopicType::from_keyword(kind).ok_or_else(|| TopicError::UnknownTopicType {
            topic: raw.to_string(),
            value: kind.to_string(),
        })?;

        let payload = match (system_type, topic_type, node_shorthand(payload)) {
            (SystemType::Opc, TopicType::Node, Some((ns, id))) => format!("ns={};s={}", ns, id),
            _ => payload.to_string(),
        };

        Self::new(system_type, name, topic_type, format, payload)
    }

    /// Returns the canonical encoded form. Same as [`topic_name`](Self::topic_name).
    pub fn encode(&self) -> String {
        self.topic_name.clone()
    }

    /// Returns the system type.
    pub fn system_type(&self) -> SystemType {
        self.system_type
    }

    /// Returns the driver instance id.
    pub fn system_name(&self) -> &str {
        &self.system_name
    }

    /// Returns the topic type.
    pub fn topic_type(&self) -> TopicType {
        self.topic_type
    }

    /// Returns the publication format.
    pub fn format(&self) -> DataFormat {
        self.format
    }

    /// Returns the point identifier or hierarchical path.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Returns the canonical name, used as bus channel and registry key.
    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    /// Returns `true` for Node topics.
    pub fn is_node(&self) -> bool {
        self.topic_type == TopicType::Node
    }

    /// Returns `true` for Path topics.
    pub fn is_path(&self) -> bool {
        self.topic_type == TopicType::Path
    }

    /// Splits the payload into path segments.
    pub fn path_segments(&self) -> Vec<String> {
        split_path(&self.payload)
    }

    /// Returns a copy of this topic with a different format.
    pub fn with_format(&self, format: DataFormat) -> TopicResult<Self> {
        Self::new(
            self.system_type,
            self.system_name.clone(),
            self.topic_type,
            format,
            self.payload.clone(),
        )
    }
}

impl fmt::Display for TopicAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.topic_name)
    }
}

impl FromStr for TopicAddress {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// JSON form of a topic address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopicRecord {
    #[serde(default)]
    topic_name: String,
    system_type: SystemType,
    #[serde(default)]
    system_name: String,
    topic_type: TopicType,
    #[serde(default)]
    data_format: DataFormat,
    payload: String,
}

impl TryFrom<TopicRecord> for TopicAddress {
    type Error = TopicError;

    fn try_from(record: TopicRecord) -> Result<Self, Self::Error> {
        TopicAddress::new(
            record.system_type,
            record.system_name,
            record.topic_type,
            record.data_format,
            record.payload,
        )
    }
}

impl From<TopicAddress> for TopicRecord {
    fn from(topic: TopicAddress) -> Self {
        Self {
            topic_name: topic.topic_name,
            system_type: topic.system_type,
            system_name: topic.system_name,
            topic_type: topic.topic_type,
            data_format: topic.format,
            payload: topic.payload,
        }
    }
}

fn encode(
    system_type: SystemType,
    system_name: &str,
    topic_type: TopicType,
    format: DataFormat,
    payload: &str,
) -> String {
    if system_type == SystemType::Other {
        return format!("{}/{}", SYSTEM_TOPIC_PREFIX, payload);
    }
    match format {
        DataFormat::Json => format!("{}/{}/{}/{}", system_type, system_name, topic_type, payload),
        _ => format!(
            "{}/{}/{}:{}/{}",
            system_type, system_name, topic_type, format, payload
        ),
    }
}

fn is_valid_system_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Matches the `<digits>/<rest>` shorthand of OPC UA string node ids.
fn node_shorthand(payload: &str) -> Option<(&str, &str)> {
    let (ns, id) = payload.split_once('/')?;
    if !ns.is_empty() && ns.chars().all(|c| c.is_ascii_digit()) {
        Some((ns, id))
    } else {
        None
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        value.get(prefix.len()..)
    } else {
        None
    }
}

// =============================================================================
// Path Segments
// =============================================================================

/// Splits a hierarchical path on `/`.
///
/// A slash escaped as `\/` does not split and is kept as a literal `/`
/// inside its segment.
///
/// ```
/// use tagway_core::topic::split_path;
///
/// assert_eq!(split_path("Objects/PLC1/#"), vec!["Objects", "PLC1", "#"]);
/// assert_eq!(split_path(r"Objects/a\/b"), vec!["Objects", "a/b"]);
/// ```
pub fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'/') => {
                chars.next();
                current.push('/');
            }
            '/' => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
}

/// A classified path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Matches a child by exact name.
    Literal(String),
    /// `+`: any single child, one level.
    AnyChild,
    /// `#`: everything at this level, without descending into sub-objects.
    AllDescendants,
}

impl PathSegment {
    /// Classifies a raw segment.
    pub fn parse(segment: &str) -> Self {
        match segment {
            "+" => PathSegment::AnyChild,
            "#" => PathSegment::AllDescendants,
            other => PathSegment::Literal(other.to_string()),
        }
    }

    /// Returns `true` if a child named `name` passes this segment.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            PathSegment::Literal(literal) => literal == name,
            PathSegment::AnyChild | PathSegment::AllDescendants => true,
        }
    }

    /// Returns `true` for wildcard segments.
    pub fn is_wildcard(&self) -> bool {
        !matches!(self, PathSegment::Literal(_))
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Literal(name) => f.write_str(name),
            PathSegment::AnyChild => f.write_str("+"),
            PathSegment::AllDescendants => f.write_str("#"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_opc_node() {
        let topic = TopicAddress::parse("Opc/demo/Node/ns=2;s=Tag1").unwrap();
        assert_eq!(topic.system_type(), SystemType::Opc);
        assert_eq!(topic.system_name(), "demo");
        assert_eq!(topic.topic_type(), TopicType::Node);
        assert_eq!(topic.format(), DataFormat::Json);
        assert_eq!(topic.payload(), "ns=2;s=Tag1");
        assert_eq!(topic.topic_name(), "Opc/demo/Node/ns=2;s=Tag1");
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let topic = TopicAddress::parse("opc/demo/node:pretty/i=2258").unwrap();
        assert_eq!(topic.format(), DataFormat::Pretty);
        assert_eq!(topic.topic_name(), "Opc/demo/Node:Pretty/i=2258");
    }

    #[test]
    fn test_parse_node_shorthand() {
        let topic = TopicAddress::parse("Opc/s7/Node/3/\"DB1\".\"State\"").unwrap();
        assert_eq!(topic.payload(), "ns=3;s=\"DB1\".\"State\"");

        let multi_digit = TopicAddress::parse("Opc/s7/Node/12/a/b").unwrap();
        assert_eq!(multi_digit.payload(), "ns=12;s=a/b");
    }

    #[test]
    fn test_shorthand_payload_rejected_on_construction() {
        let result = TopicAddress::opc_node("s7", "3/Tag");
        assert!(matches!(result, Err(TopicError::InvalidField { field: "payload", .. })));
    }

    #[test]
    fn test_parse_paths() {
        let opc = TopicAddress::parse("Opc/demo/Path:Value/Objects/+/Tag1").unwrap();
        assert!(opc.is_path());
        assert_eq!(opc.path_segments(), vec!["Objects", "+", "Tag1"]);

        let mqtt = TopicAddress::parse("Mqtt/home/Path/sensors/#").unwrap();
        assert_eq!(mqtt.system_type(), SystemType::Mqtt);
        assert_eq!(mqtt.payload(), "sensors/#");

        let single = TopicAddress::parse("Mqtt/home/Path/status").unwrap();
        assert_eq!(single.payload(), "status");
    }

    #[test]
    fn test_opc_path_needs_two_segments() {
        assert!(TopicAddress::parse("Opc/demo/Path/Objects").is_err());
    }

    #[test]
    fn test_parse_system_topic() {
        let topic = TopicAddress::parse("$SYS/broker/uptime").unwrap();
        assert_eq!(topic.system_type(), SystemType::Other);
        assert_eq!(topic.system_name(), "");
        assert_eq!(topic.payload(), "broker/uptime");
        assert_eq!(topic.topic_name(), "$SYS/broker/uptime");
        assert!(TopicAddress::parse("$SYS").is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            TopicAddress::parse("Opc/demo/Node"),
            Err(TopicError::MissingSegments { .. })
        ));
        assert!(matches!(
            TopicAddress::parse("Foo/demo/Node/x"),
            Err(TopicError::UnknownSystemType { .. })
        ));
        assert!(matches!(
            TopicAddress::parse("Opc/demo/Leaf/x"),
            Err(TopicError::UnknownTopicType { .. })
        ));
        assert!(matches!(
            TopicAddress::parse("Opc/demo/Node:Xml/x"),
            Err(TopicError::UnknownFormat { .. })
        ));
        assert!(TopicAddress::parse("Opc/bad name/Node/x").is_err());
        assert!(TopicAddress::parse("Opc/demo/Node/").is_err());
    }

    #[test]
    fn test_round_trip_all_combinations() {
        let systems = [SystemType::Opc, SystemType::Mqtt, SystemType::Plc];
        let types = [TopicType::Node, TopicType::Path, TopicType::Rpc];
        let formats = [DataFormat::Value, DataFormat::Json, DataFormat::Pretty];
        let payloads = ["ns=2;s=Dynamic/RandomInt32", "Objects/PLC1/#", "a/+/c", "i=85"];

        for system in systems {
            for topic_type in types {
                for format in formats {
                    for payload in payloads {
                        let Ok(topic) =
                            TopicAddress::new(system, "drv_1", topic_type, format, payload)
                        else {
                            continue;
                        };
                        let decoded = TopicAddress::parse(&topic.encode()).unwrap();
                        assert_eq!(decoded, topic, "round trip of {}", topic);
                    }
                }
            }
        }

        let sys = TopicAddress::system("clients/connected").unwrap();
        assert_eq!(TopicAddress::parse(&sys.encode()).unwrap(), sys);
    }

    #[test]
    fn test_serde_round_trip() {
        let topic = TopicAddress::parse("Opc/demo/Path:Value/Objects/Dynamic/#").unwrap();
        let json = serde_json::to_value(&topic).unwrap();
        assert_eq!(json["topicName"], "Opc/demo/Path:Value/Objects/Dynamic/#");
        assert_eq!(json["systemType"], "Opc");
        assert_eq!(json["dataFormat"], "Value");

        let decoded: TopicAddress = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, topic);
    }

    #[test]
    fn test_serde_rejects_invalid_record() {
        let json = serde_json::json!({
            "systemType": "Unknown",
            "systemName": "x",
            "topicType": "Node",
            "payload": "i=1"
        });
        assert!(serde_json::from_value::<TopicAddress>(json).is_err());
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("a/b/c"), vec!["a", "b", "c"]);
        assert_eq!(split_path(r"a\/b/c"), vec!["a/b", "c"]);
        assert_eq!(split_path("single"), vec!["single"]);
        assert_eq!(split_path("a//b"), vec!["a", "", "b"]);
        assert_eq!(split_path(r"a\b"), vec![r"a\b"]);
    }

    #[test]
    fn test_path_segment_matching() {
        assert!(PathSegment::parse("+").matches("anything"));
        assert!(PathSegment::parse("#").matches("anything"));
        assert!(PathSegment::parse("Tag1").matches("Tag1"));
        assert!(!PathSegment::parse("Tag1").matches("Tag2"));
        assert!(PathSegment::parse("#").is_wildcard());
        assert!(!PathSegment::parse("x").is_wildcard());
    }
}
