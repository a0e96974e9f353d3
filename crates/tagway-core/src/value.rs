// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Canonical values and their serializations.
//!
//! Drivers normalize whatever their backend delivers into a
//! [`CanonicalValue`]: a host scalar (or nothing), a symbolic status name and
//! two timestamps. A value without a scalar is never published.
//!
//! # JSON Form
//!
//! ```text
//! { "value": 21.5, "dataType": "float64", "statusCode": "Good",
//!   "sourceTime": "2024-01-01T00:00:00Z", "serverTime": "...",
//!   "sourceTimeMs": 1704067200000, "serverTimeMs": ... }
//! ```

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;

use crate::resolver::ResolvedNode;
use crate::topic::{DataFormat, TopicAddress};

/// Status name of a good quality value.
pub const STATUS_GOOD: &str = "Good";

// =============================================================================
// Value
// =============================================================================

/// A normalized host scalar.
///
/// Backend wrapper types (unsigned integers, localized text, node ids and
/// the like) are mapped onto these variants by the driver codecs.
///
/// # Examples
///
/// ```
/// use tagway_core::value::Value;
///
/// let temp = Value::Float64(25.5);
/// assert_eq!(temp.as_f64(), Some(25.5));
/// assert_eq!(temp.to_string(), "25.5");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean value
    Bool(bool),
    /// Signed integer
    Int64(i64),
    /// Unsigned integer
    UInt64(u64),
    /// 32-bit floating point
    Float32(f32),
    /// 64-bit floating point
    Float64(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Date and time
    DateTime(DateTime<Utc>),
    /// Array of values
    Array(Vec<Value>),
}

impl Value {
    /// Returns the type name reported as `dataType`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int64(_) => "int64",
            Value::UInt64(_) => "uint64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::DateTime(_) => "datetime",
            Value::Array(_) => "array",
        }
    }

    /// Attempts to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Int64(v) => Some(*v as f64),
            Value::UInt64(v) => Some(*v as f64),
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            Value::String(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    /// Attempts to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Converts this value to a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(v) => json!(v),
            Value::Int64(v) => json!(v),
            Value::UInt64(v) => json!(v),
            Value::Float32(v) => json!(v),
            Value::Float64(v) => json!(v),
            Value::String(v) => json!(v),
            Value::Bytes(v) => json!(v),
            Value::DateTime(v) => json!(v.to_rfc3339()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    /// Converts a JSON value back into a value. `null` has no value.
    ///
    /// Objects have no scalar counterpart and are kept as their JSON text.
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(v) => Some(Value::Bool(*v)),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Some(Value::Int64(v))
                } else if let Some(v) = n.as_u64() {
                    Some(Value::UInt64(v))
                } else {
                    n.as_f64().map(Value::Float64)
                }
            }
            serde_json::Value::String(v) => Some(Value::String(v.clone())),
            serde_json::Value::Array(items) => Some(Value::Array(
                items.iter().filter_map(Value::from_json).collect(),
            )),
            serde_json::Value::Object(_) => Some(Value::String(json.to_string())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(v) => f.write_str(v),
            Value::Bytes(_) | Value::Array(_) => write!(f, "{}", self.to_json()),
            Value::DateTime(v) => f.write_str(&v.to_rfc3339()),
        }
    }
}

macro_rules! impl_from_for_value {
    ($variant:ident, $type:ty) => {
        impl From<$type> for Value {
            fn from(v: $type) -> Self {
                Value::$variant(v.into())
            }
        }
    };
}

impl_from_for_value!(Bool, bool);
impl_from_for_value!(Int64, i8);
impl_from_for_value!(Int64, i16);
impl_from_for_value!(Int64, i32);
impl_from_for_value!(Int64, i64);
impl_from_for_value!(UInt64, u8);
impl_from_for_value!(UInt64, u16);
impl_from_for_value!(UInt64, u32);
impl_from_for_value!(UInt64, u64);
impl_from_for_value!(Float32, f32);
impl_from_for_value!(Float64, f64);
impl_from_for_value!(String, String);
impl_from_for_value!(String, &str);

// =============================================================================
// CanonicalValue
// =============================================================================

/// A protocol-independent value with quality and timestamps.
///
/// Timestamps that the backend does not report are the Unix epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalValue {
    value: Option<Value>,
    status_code: String,
    source_time: DateTime<Utc>,
    server_time: DateTime<Utc>,
}

impl CanonicalValue {
    /// Creates a good value with epoch timestamps.
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
            status_code: STATUS_GOOD.to_string(),
            source_time: epoch(),
            server_time: epoch(),
        }
    }

    /// Creates a value with no scalar, e.g. a bad quality read.
    pub fn empty(status_code: impl Into<String>) -> Self {
        Self {
            value: None,
            status_code: status_code.into(),
            source_time: epoch(),
            server_time: epoch(),
        }
    }

    /// Creates a value from fully normalized parts.
    pub fn from_parts(
        value: Option<Value>,
        status_code: impl Into<String>,
        source_time: Option<DateTime<Utc>>,
        server_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            value,
            status_code: status_code.into(),
            source_time: source_time.unwrap_or_else(epoch),
            server_time: server_time.unwrap_or_else(epoch),
        }
    }

    /// Sets the status name.
    pub fn with_status(mut self, status_code: impl Into<String>) -> Self {
        self.status_code = status_code.into();
        self
    }

    /// Sets the source timestamp.
    pub fn with_source_time(mut self, time: DateTime<Utc>) -> Self {
        self.source_time = time;
        self
    }

    /// Sets the server timestamp.
    pub fn with_server_time(mut self, time: DateTime<Utc>) -> Self {
        self.server_time = time;
        self
    }

    /// Returns the scalar, if any.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Returns the symbolic status name.
    pub fn status_code(&self) -> &str {
        &self.status_code
    }

    /// Returns the source timestamp.
    pub fn source_time(&self) -> DateTime<Utc> {
        self.source_time
    }

    /// Returns the server timestamp.
    pub fn server_time(&self) -> DateTime<Utc> {
        self.server_time
    }

    /// Returns `true` if there is no scalar. Such values are not published.
    pub fn has_no_value(&self) -> bool {
        self.value.is_none()
    }

    /// Returns `true` if there is a scalar.
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Returns `true` if the status name is `Good`.
    pub fn is_status_good(&self) -> bool {
        self.status_code == STATUS_GOOD
    }

    /// Renders the scalar as text, empty when there is none.
    pub fn value_as_string(&self) -> String {
        self.value.as_ref().map(Value::to_string).unwrap_or_default()
    }

    /// Returns the scalar as f64 when it is numeric or numeric text.
    pub fn value_as_f64(&self) -> Option<f64> {
        self.value.as_ref().and_then(Value::as_f64)
    }

    /// Returns the type name of the scalar, empty when there is none.
    pub fn data_type_name(&self) -> &'static str {
        self.value.as_ref().map(Value::type_name).unwrap_or("")
    }

    /// Encodes this value as its JSON object form.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "value": self.value.as_ref().map(Value::to_json).unwrap_or(serde_json::Value::Null),
            "dataType": self.data_type_name(),
            "statusCode": self.status_code,
            "sourceTime": self.source_time.to_rfc3339(),
            "serverTime": self.server_time.to_rfc3339(),
            "sourceTimeMs": self.source_time.timestamp_millis(),
            "serverTimeMs": self.server_time.timestamp_millis(),
        })
    }

    /// Decodes a value from its JSON object form.
    ///
    /// Timestamps are taken from the `*Ms` fields first, then from the ISO
    /// fields, and default to the epoch.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let time = |name: &str| -> Option<DateTime<Utc>> {
            if let Some(ms) = json.get(format!("{}Ms", name)).and_then(|v| v.as_i64()) {
                return Utc.timestamp_millis_opt(ms).single();
            }
            json.get(name)
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };

        Self::from_parts(
            json.get("value").and_then(Value::from_json),
            json.get("statusCode").and_then(|v| v.as_str()).unwrap_or(""),
            time("sourceTime"),
            time("serverTime"),
        )
    }
}

impl Serialize for CanonicalValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CanonicalValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        if !json.is_object() {
            return Err(D::Error::custom("expected a value object"));
        }
        Ok(Self::from_json(&json))
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

// =============================================================================
// ValueCodec
// =============================================================================

/// Normalizes backend samples into canonical values.
///
/// Each driver binding implements this once for its backend's raw sample
/// type.
pub trait ValueCodec {
    /// The backend's raw sample type.
    type Raw;

    /// Normalizes a raw sample.
    fn from_backend(&self, raw: Self::Raw) -> CanonicalValue;
}

// =============================================================================
// DataPoint
// =============================================================================

/// A topic paired with one of its values, the unit of Json publication.
///
/// Values of Path topics also carry the concrete node they were resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// The subscribed topic.
    pub topic: TopicAddress,
    /// The resolved leaf that produced the value, for Path topics.
    pub leaf: Option<ResolvedNode>,
    /// The value.
    pub value: CanonicalValue,
}

impl DataPoint {
    /// Creates a data point for a Node topic.
    pub fn new(topic: TopicAddress, value: CanonicalValue) -> Self {
        Self {
            topic,
            leaf: None,
            value,
        }
    }

    /// Attaches the resolved leaf.
    pub fn with_leaf(mut self, leaf: ResolvedNode) -> Self {
        self.leaf = Some(leaf);
        self
    }

    /// Encodes this data point as `{topic, value}`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut topic = serde_json::to_value(&self.topic).unwrap_or(serde_json::Value::Null);
        if let (Some(leaf), Some(map)) = (&self.leaf, topic.as_object_mut()) {
            map.insert("topicNode".into(), json!(leaf.node_id));
            map.insert("browsePath".into(), json!(leaf.browse_path));
        }
        json!({
            "topic": topic,
            "value": self.value.to_json(),
        })
    }

    /// Decodes a data point from its JSON form.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let topic_json = json.get("topic").cloned().unwrap_or(serde_json::Value::Null);
        let topic: TopicAddress = serde_json::from_value(topic_json.clone())?;
        let leaf = match (
            topic_json.get("topicNode").and_then(|v| v.as_str()),
            topic_json.get("browsePath").and_then(|v| v.as_str()),
        ) {
            (Some(node_id), Some(browse_path)) => Some(ResolvedNode::new(node_id, browse_path)),
            _ => None,
        };
        let value = json
            .get("value")
            .map(CanonicalValue::from_json)
            .unwrap_or_else(|| CanonicalValue::empty(""));
        Ok(Self { topic, leaf, value })
    }

    /// Renders the publication payload for the topic's format.
    ///
    /// Returns `None` when the value has no scalar.
    pub fn render(&self) -> Option<String> {
        if self.value.has_no_value() {
            return None;
        }
        match self.topic.format() {
            DataFormat::Value => Some(self.value.value_as_string()),
            DataFormat::Json => serde_json::to_string(&self.to_json()).ok(),
            DataFormat::Pretty => serde_json::to_string_pretty(&self.to_json()).ok(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap()
    }

    #[test]
    fn test_defaults_to_epoch() {
        let value = CanonicalValue::from_parts(Some(Value::Int64(1)), "Good", None, None);
        assert_eq!(value.source_time().timestamp_millis(), 0);
        assert_eq!(value.server_time().timestamp_millis(), 0);
    }

    #[test]
    fn test_has_no_value() {
        assert!(CanonicalValue::empty("BadNodeIdUnknown").has_no_value());
        assert!(!CanonicalValue::new(0i32).has_no_value());
        assert!(CanonicalValue::new(false).has_value());
    }

    #[test]
    fn test_json_form() {
        let value = CanonicalValue::new(21.5f64)
            .with_source_time(ts(1_000))
            .with_server_time(ts(2_000));
        let json = value.to_json();

        assert_eq!(json["value"], 21.5);
        assert_eq!(json["dataType"], "float64");
        assert_eq!(json["statusCode"], "Good");
        assert_eq!(json["sourceTimeMs"], 1_000);
        assert_eq!(json["serverTimeMs"], 2_000);
        assert_eq!(json["sourceTime"], "1970-01-01T00:00:01+00:00");

        assert_eq!(CanonicalValue::from_json(&json), value);
    }

    #[test]
    fn test_from_json_accepts_iso_times() {
        let json = json!({
            "value": "on",
            "statusCode": "Good",
            "sourceTime": "2024-01-01T00:00:00Z"
        });
        let value = CanonicalValue::from_json(&json);
        assert_eq!(value.value(), Some(&Value::String("on".into())));
        assert_eq!(value.source_time().timestamp(), 1_704_067_200);
        assert_eq!(value.server_time().timestamp(), 0);
    }

    #[test]
    fn test_value_text_rendering() {
        assert_eq!(CanonicalValue::new(true).value_as_string(), "true");
        assert_eq!(CanonicalValue::new(42u16).value_as_string(), "42");
        assert_eq!(CanonicalValue::new("abc").value_as_string(), "abc");
        assert_eq!(CanonicalValue::empty("Bad").value_as_string(), "");
        assert_eq!(CanonicalValue::new("1.5").value_as_f64(), Some(1.5));
    }

    #[test]
    fn test_data_point_render_formats() {
        let value = CanonicalValue::new(7i64);
        let topic = TopicAddress::parse("Opc/demo/Node:Value/ns=2;s=Counter").unwrap();
        assert_eq!(DataPoint::new(topic, value.clone()).render().unwrap(), "7");

        let topic = TopicAddress::parse("Opc/demo/Node/ns=2;s=Counter").unwrap();
        let compact = DataPoint::new(topic.clone(), value.clone()).render().unwrap();
        assert!(!compact.contains('\n'));
        let parsed: serde_json::Value = serde_json::from_str(&compact).unwrap();
        assert_eq!(parsed["topic"]["topicName"], "Opc/demo/Node/ns=2;s=Counter");
        assert_eq!(parsed["value"]["value"], 7);

        let pretty_topic = topic.with_format(DataFormat::Pretty).unwrap();
        let pretty = DataPoint::new(pretty_topic, value).render().unwrap();
        assert!(pretty.contains('\n'));
    }

    #[test]
    fn test_data_point_without_value_renders_nothing() {
        let topic = TopicAddress::parse("Opc/demo/Node/i=2258").unwrap();
        assert!(DataPoint::new(topic, CanonicalValue::empty("Bad")).render().is_none());
    }

    #[test]
    fn test_data_point_json_with_leaf() {
        let topic = TopicAddress::parse("Opc/demo/Path/Objects/PLC1/#").unwrap();
        let point = DataPoint::new(topic, CanonicalValue::new(1i32))
            .with_leaf(ResolvedNode::new("ns=2;s=PLC1.Tag1", "Objects/PLC1/Tag1"));

        let json = point.to_json();
        assert_eq!(json["topic"]["topicNode"], "ns=2;s=PLC1.Tag1");
        assert_eq!(json["topic"]["browsePath"], "Objects/PLC1/Tag1");

        let decoded = DataPoint::from_json(&json).unwrap();
        assert_eq!(decoded, point);
    }
}
