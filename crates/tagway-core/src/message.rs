// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Request and reply bodies exchanged with drivers over the bus.
//!
//! Every driver answers on `{SystemType}/{SystemName}/{Operation}`. Bodies are
//! JSON objects with PascalCase fields:
//!
//! | Operation | Request | Reply `Result` |
//! |-----------|---------|----------------|
//! | Subscribe | `{ClientId, Topic}` | none |
//! | Unsubscribe | `{ClientId, Topics}` | none |
//! | Publish | `{Topic, Data}` | none |
//! | Read | `{NodeId: id \| [id]}` | value or list of values |
//! | Write | `{NodeId: id \| [id], Value: v \| [v]}` | none, `Ok` per item |
//! | Browse | `{NodeId, Reverse?}` | list of [`BrowseEntry`] |
//! | Schema | `{NodeIds?}` | list of [`SchemaNode`] |
//! | ServerInfo | `{}` | backend specific object |
//!
//! Failures travel as `{Ok: false, Error: text}`. They are never surfaced as
//! transport errors.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::topic::{SystemType, TopicAddress};

// =============================================================================
// Operation
// =============================================================================

/// A driver operation reachable over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Add a client to a topic.
    Subscribe,
    /// Remove a client from topics.
    Unsubscribe,
    /// Publish raw data to a topic on the backend.
    Publish,
    /// Read current values.
    Read,
    /// Write values.
    Write,
    /// Browse one level of the address space.
    Browse,
    /// Browse a subtree recursively.
    Schema,
    /// Describe the backend server.
    ServerInfo,
}

impl Operation {
    /// Every operation, in handler registration order.
    pub const ALL: [Operation; 8] = [
        Operation::Subscribe,
        Operation::Unsubscribe,
        Operation::Publish,
        Operation::Read,
        Operation::Write,
        Operation::Browse,
        Operation::Schema,
        Operation::ServerInfo,
    ];

    /// Returns the address suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Subscribe => "Subscribe",
            Operation::Unsubscribe => "Unsubscribe",
            Operation::Publish => "Publish",
            Operation::Read => "Read",
            Operation::Write => "Write",
            Operation::Browse => "Browse",
            Operation::Schema => "Schema",
            Operation::ServerInfo => "ServerInfo",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the bus address of a driver operation.
///
/// ```
/// use tagway_core::message::{address, Operation};
/// use tagway_core::topic::SystemType;
///
/// assert_eq!(address(SystemType::Opc, "plant", Operation::Read), "Opc/plant/Read");
/// ```
pub fn address(system_type: SystemType, system_name: &str, operation: Operation) -> String {
    format!("{}/{}/{}", system_type, system_name, operation)
}

// =============================================================================
// OneOrMany
// =============================================================================

/// A field that holds either one value or a list.
///
/// The list form is tried first so that `T = serde_json::Value` still sees
/// arrays as lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A list of values.
    Many(Vec<T>),
    /// A single value.
    One(T),
}

impl<T> OneOrMany<T> {
    /// Returns `true` for the list form.
    pub fn is_many(&self) -> bool {
        matches!(self, OneOrMany::Many(_))
    }

    /// Returns the values as a list.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }

    /// Returns the number of values.
    pub fn len(&self) -> usize {
        match self {
            OneOrMany::One(_) => 1,
            OneOrMany::Many(values) => values.len(),
        }
    }

    /// Returns `true` for an empty list.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> From<T> for OneOrMany<T> {
    fn from(value: T) -> Self {
        OneOrMany::One(value)
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Accepts a topic as its canonical name or as its JSON record.
fn topic_name_or_record<'de, D>(deserializer: D) -> Result<TopicAddress, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    let json = serde_json::Value::deserialize(deserializer)?;
    match json {
        serde_json::Value::String(name) => TopicAddress::parse(&name).map_err(D::Error::custom),
        other => serde_json::from_value(other).map_err(D::Error::custom),
    }
}

fn topic_list<'de, D>(deserializer: D) -> Result<Vec<TopicAddress>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "topic_name_or_record")] TopicAddress);

    let wrapped: Vec<Wrapped> = Vec::deserialize(deserializer)?;
    Ok(wrapped.into_iter().map(|w| w.0).collect())
}

/// `Subscribe` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubscribeRequest {
    /// The subscribing client.
    pub client_id: String,
    /// The topic.
    #[serde(deserialize_with = "topic_name_or_record")]
    pub topic: TopicAddress,
}

/// `Unsubscribe` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnsubscribeRequest {
    /// The unsubscribing client.
    pub client_id: String,
    /// The topics to leave.
    #[serde(deserialize_with = "topic_list")]
    pub topics: Vec<TopicAddress>,
}

/// `Publish` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublishRequest {
    /// The target topic.
    #[serde(deserialize_with = "topic_name_or_record")]
    pub topic: TopicAddress,
    /// The payload text.
    pub data: String,
}

/// `Read` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    /// One node id or a list.
    #[serde(rename = "NodeId")]
    pub node_id: OneOrMany<String>,
}

/// `Write` request.
///
/// Values may be strings or JSON scalars. Scalars are converted to their
/// text form before conversion to the target type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriteRequest {
    /// One node id or a list.
    #[serde(rename = "NodeId")]
    pub node_id: OneOrMany<String>,
    /// One value or a list, matching `NodeId`.
    pub value: OneOrMany<serde_json::Value>,
}

impl WriteRequest {
    /// Pairs node ids with their values as text.
    ///
    /// Returns `None` when the list lengths differ.
    pub fn pairs(&self) -> Option<Vec<(String, String)>> {
        let nodes = self.node_id.clone().into_vec();
        let values = self.value.clone().into_vec();
        if nodes.len() != values.len() {
            return None;
        }
        Some(
            nodes
                .into_iter()
                .zip(values.iter().map(value_text))
                .collect(),
        )
    }
}

/// Text form of a write value. `null` becomes empty text.
pub fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `Browse` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BrowseRequest {
    /// The node to browse from.
    #[serde(default = "default_browse_root", rename = "NodeId")]
    pub node_id: String,
    /// Browse inverse references up to the root.
    #[serde(default)]
    pub reverse: bool,
}

/// `Schema` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRequest {
    /// Roots of the schema trees.
    #[serde(default = "default_schema_roots", rename = "NodeIds")]
    pub node_ids: OneOrMany<String>,
}

impl Default for SchemaRequest {
    fn default() -> Self {
        Self {
            node_ids: default_schema_roots(),
        }
    }
}

fn default_browse_root() -> String {
    "i=85".to_string()
}

fn default_schema_roots() -> OneOrMany<String> {
    OneOrMany::Many(vec![default_browse_root()])
}

// =============================================================================
// Results
// =============================================================================

/// One browse result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BrowseEntry {
    /// Qualified browse name.
    pub browse_name: String,
    /// Path of browse names from the starting point.
    pub browse_path: String,
    /// Display name.
    pub display_name: String,
    /// Node identifier.
    pub node_id: String,
    /// Node class name.
    pub node_class: String,
    /// Reference type that led to this node.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reference_type: String,
}

/// One node of a schema tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SchemaNode {
    /// Browse name.
    pub browse_name: String,
    /// Display name.
    pub display_name: String,
    /// Node identifier.
    pub node_id: String,
    /// Node class name.
    pub node_class: String,
    /// Data type name, for variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    /// Children.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<SchemaNode>,
}

// =============================================================================
// Reply
// =============================================================================

/// Reply body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Reply {
    /// Overall flag, or one flag per item for list writes.
    pub ok: OneOrMany<bool>,
    /// Operation result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    /// A successful reply without result.
    pub fn ok() -> Self {
        Self {
            ok: OneOrMany::One(true),
            result: None,
            error: None,
        }
    }

    /// A successful reply carrying a result.
    pub fn with_result(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            ..Self::ok()
        }
    }

    /// A plain boolean reply.
    pub fn flag(ok: bool) -> Self {
        Self {
            ok: OneOrMany::One(ok),
            result: None,
            error: None,
        }
    }

    /// A reply with one flag per item.
    pub fn flags(flags: Vec<bool>) -> Self {
        Self {
            ok: OneOrMany::Many(flags),
            result: None,
            error: None,
        }
    }

    /// A failed reply.
    pub fn error(error: impl fmt::Display) -> Self {
        Self {
            ok: OneOrMany::One(false),
            result: None,
            error: Some(error.to_string()),
        }
    }

    /// Returns `true` if every flag is set.
    pub fn is_ok(&self) -> bool {
        match &self.ok {
            OneOrMany::One(ok) => *ok,
            OneOrMany::Many(flags) => flags.iter().all(|ok| *ok),
        }
    }

    /// Encodes the reply body.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({"Ok": false}))
    }
}

// =============================================================================
// Tests
// =============================================================================
