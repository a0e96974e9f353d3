// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Typed request client for driver bus addresses.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::bus::{Bus, BusSubscriber, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{BusError, BusResult};
use crate::message::{self, BrowseEntry, Operation, Reply, SchemaNode};
use crate::topic::{SystemType, TopicAddress};
use crate::value::CanonicalValue;

/// Client of one driver's request addresses.
#[derive(Debug, Clone)]
pub struct DriverClient {
    bus: Arc<Bus>,
    system_type: SystemType,
    system_name: String,
    client_id: String,
    timeout: Duration,
}

impl DriverClient {
    /// Creates a client with a random client id.
    pub fn new(bus: Arc<Bus>, system_type: SystemType, system_name: impl Into<String>) -> Self {
        Self {
            bus,
            system_type,
            system_name: system_name.into(),
            client_id: Uuid::new_v4().to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Creates a client for the driver that owns `topic`.
    pub fn for_topic(bus: Arc<Bus>, topic: &TopicAddress) -> Self {
        Self::new(bus, topic.system_type(), topic.system_name())
    }

    /// Sets the client id used for subscriptions.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the client id.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Sends a raw request and decodes the reply envelope.
    pub async fn call(&self, operation: Operation, body: serde_json::Value) -> BusResult<Reply> {
        let address = message::address(self.system_type, &self.system_name, operation);
        let reply = self.bus.request(&address, body, self.timeout).await?;
        let reply: Reply = serde_json::from_value(reply)?;
        match reply.error {
            Some(message) => Err(BusError::Rejected { address, message }),
            None => Ok(reply),
        }
    }

    async fn call_for<T: DeserializeOwned>(
        &self,
        operation: Operation,
        body: serde_json::Value,
    ) -> BusResult<T> {
        let reply = self.call(operation, body).await?;
        let result = reply.result.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(result)?)
    }

    /// Subscribes to a topic and returns the bus subscriber for its values.
    ///
    /// The bus subscriber is created first so no value published right
    /// after the reply is missed.
    pub async fn subscribe(&self, topic: &TopicAddress) -> BusResult<BusSubscriber> {
        let subscriber = self.bus.subscribe(topic.topic_name());
        self.call(
            Operation::Subscribe,
            json!({ "ClientId": self.client_id, "Topic": topic.topic_name() }),
        )
        .await?;
        Ok(subscriber)
    }

    /// Releases topics held by this client.
    pub async fn unsubscribe(&self, topics: &[TopicAddress]) -> BusResult<()> {
        let names: Vec<&str> = topics.iter().map(|t| t.topic_name()).collect();
        self.call(
            Operation::Unsubscribe,
            json!({ "ClientId": self.client_id, "Topics": names }),
        )
        .await
        .map(|_| ())
    }

    /// Publishes raw data to a backend topic.
    pub async fn publish(&self, topic: &TopicAddress, data: impl Into<String>) -> BusResult<bool> {
        let reply = self
            .call(
                Operation::Publish,
                json!({ "Topic": topic.topic_name(), "Data": data.into() }),
            )
            .await?;
        Ok(reply.is_ok())
    }

    /// Reads one value.
    pub async fn read(&self, node_id: &str) -> BusResult<CanonicalValue> {
        let result: serde_json::Value = self
            .call_for(Operation::Read, json!({ "NodeId": node_id }))
            .await?;
        Ok(CanonicalValue::from_json(&result))
    }

    /// Reads several values in one request.
    pub async fn read_many(&self, node_ids: &[&str]) -> BusResult<Vec<CanonicalValue>> {
        let results: Vec<serde_json::Value> = self
            .call_for(Operation::Read, json!({ "NodeId": node_ids }))
            .await?;
        Ok(results.iter().map(CanonicalValue::from_json).collect())
    }

    /// Writes one value.
    pub async fn write(&self, node_id: &str, value: impl Serialize) -> BusResult<bool> {
        let value = serde_json::to_value(value)?;
        let reply = self
            .call(Operation::Write, json!({ "NodeId": node_id, "Value": value }))
            .await?;
        Ok(reply.is_ok())
    }

    /// Writes several values. Returns one flag per item.
    pub async fn write_many(
        &self,
        items: &[(&str, serde_json::Value)],
    ) -> BusResult<Vec<bool>> {
        let node_ids: Vec<&str> = items.iter().map(|(id, _)| *id).collect();
        let values: Vec<&serde_json::Value> = items.iter().map(|(_, v)| v).collect();
        let reply = self
            .call(Operation::Write, json!({ "NodeId": node_ids, "Value": values }))
            .await?;
        Ok(reply.ok.into_vec())
    }

    /// Browses one level below a node, or its inverse references.
    pub async fn browse(&self, node_id: &str, reverse: bool) -> BusResult<Vec<BrowseEntry>> {
        self.call_for(
            Operation::Browse,
            json!({ "NodeId": node_id, "Reverse": reverse }),
        )
        .await
    }

    /// Browses the subtrees below nodes.
    pub async fn schema(&self, node_ids: &[&str]) -> BusResult<Vec<SchemaNode>> {
        self.call_for(Operation::Schema, json!({ "NodeIds": node_ids }))
            .await
    }

    /// Describes the backend server.
    pub async fn server_info(&self) -> BusResult<serde_json::Value> {
        self.call_for(Operation::ServerInfo, json!({})).await
    }
}
