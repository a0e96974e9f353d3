// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! MQTT driver adapter.
//!
//! Path topics are subscribed as broker filters, one monitored item per
//! filter. Received messages are routed to every subscribed topic whose
//! filter matches and published with the received topic as their leaf.
//!
//! Publish and Write send to the broker. Read, Browse and Schema are not
//! available on a broker.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tagway_core::{
    DataPoint, DriverAdapter, DriverContext, DriverError, DriverResult, ResolvedNode,
    SubscribedItems, SystemType, TopicAddress, ValuePublisher, WriteCompletion,
};
use tracing::{debug, info, trace, warn};

use crate::codec::{decode_payload, encode_payload};
use crate::filter::validate_filter;
use crate::router::TopicRouter;
use crate::settings::{MqttSettings, PayloadFormat};
use crate::transport::{IncomingMessage, MqttTransport};

async fn with_timeout<F, R>(duration: Duration, call: F) -> DriverResult<R>
where
    F: Future<Output = DriverResult<R>>,
{
    tokio::time::timeout(duration, call)
        .await
        .map_err(|_| DriverError::timeout(duration))?
}

/// Routes one received message to its subscribed topics.
fn dispatch(
    router: &TopicRouter,
    publisher: &ValuePublisher,
    format: PayloadFormat,
    message: IncomingMessage,
) {
    let topics = router.route(&message.topic);
    if topics.is_empty() {
        trace!(received = %message.topic, "Message without subscriber");
        return;
    }

    let values = match decode_payload(format, &message.topic, &message.payload, Utc::now()) {
        Ok(values) => values,
        Err(e) => {
            warn!(received = %message.topic, error = %e, "Payload dropped");
            return;
        }
    };

    let leaf = ResolvedNode::new(message.topic.clone(), message.topic.clone());
    for topic in topics {
        for value in &values {
            let point = DataPoint::new(topic.clone(), value.clone()).with_leaf(leaf.clone());
            publisher.publish(&point);
        }
    }
}

/// Driver adapter for one MQTT broker.
pub struct MqttAdapter<T: MqttTransport> {
    id: String,
    settings: MqttSettings,
    transport: Arc<T>,
    router: Arc<TopicRouter>,
}

impl<T: MqttTransport> MqttAdapter<T> {
    /// Creates an adapter with the driver id `id`.
    pub fn new(id: impl Into<String>, transport: T, settings: MqttSettings) -> Self {
        Self {
            id: id.into(),
            settings,
            transport: Arc::new(transport),
            router: Arc::new(TopicRouter::new()),
        }
    }

    /// Returns the settings.
    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns the router.
    pub fn router(&self) -> &Arc<TopicRouter> {
        &self.router
    }

    async fn send(&self, topic: &str, text: &str) -> bool {
        let payload = encode_payload(self.settings.payload_format, text, Utc::now());
        let result = with_timeout(
            self.settings.request_timeout,
            self.transport
                .publish(topic, payload, self.settings.qos, self.settings.retained),
        )
        .await;
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(driver = %self.id, topic, error = %e, "Publish failed");
                false
            }
        }
    }
}

#[async_trait]
impl<T: MqttTransport> DriverAdapter for MqttAdapter<T> {
    type Item = String;

    fn id(&self) -> &str {
        &self.id
    }

    fn system_type(&self) -> SystemType {
        SystemType::Mqtt
    }

    async fn connect(&mut self, context: DriverContext) -> DriverResult<()> {
        // The driver replays its registry after every connect.
        self.router.clear();
        let router = self.router.clone();
        let publisher = context.publisher.clone();
        let format = self.settings.payload_format;
        let handler = Arc::new(move |message: IncomingMessage| {
            dispatch(&router, &publisher, format, message);
        });

        with_timeout(
            self.settings.connect_timeout,
            self.transport.connect(context.events.clone(), handler),
        )
        .await?;
        info!(driver = %self.id, broker = %self.settings.broker(), client_id = %self.settings.client_id, "Broker connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> DriverResult<()> {
        self.transport.disconnect().await
    }

    async fn subscribe_topics(
        &mut self,
        topics: &[TopicAddress],
    ) -> DriverResult<SubscribedItems<String>> {
        let mut outcome = SubscribedItems::new();
        for topic in topics {
            let filter = topic.payload();
            if let Err(e) = validate_filter(filter) {
                warn!(topic = %topic, error = %e, "Topic is not a valid filter");
                continue;
            }

            let result = with_timeout(
                self.settings.request_timeout,
                self.transport.subscribe(filter, self.settings.qos),
            )
            .await;
            if let Err(e) = result {
                warn!(topic = %topic, filter, error = %e, "Filter subscribe failed");
                outcome.fail(topic.clone());
                continue;
            }
            self.router.add(topic);
            debug!(topic = %topic, filter, "Filter subscribed");
            outcome.push(topic.clone(), filter.to_string());
        }
        Ok(outcome)
    }

    async fn unsubscribe_items(&mut self, topics: &[TopicAddress], items: Vec<String>) -> DriverResult<()> {
        for topic in topics {
            self.router.remove(topic);
        }

        let mut released: Vec<String> = items;
        released.sort();
        released.dedup();
        for filter in released {
            if self.router.uses_filter(&filter) {
                debug!(filter = %filter, "Filter still in use");
                continue;
            }
            with_timeout(self.settings.request_timeout, self.transport.unsubscribe(&filter)).await?;
            debug!(filter = %filter, "Filter unsubscribed");
        }
        Ok(())
    }

    async fn publish_topic(&mut self, topic: &TopicAddress, data: &str) -> DriverResult<WriteCompletion> {
        Ok(WriteCompletion::ready(self.send(topic.payload(), data).await))
    }

    async fn write(&mut self, items: Vec<(String, String)>) -> DriverResult<Vec<WriteCompletion>> {
        let mut completions = Vec::with_capacity(items.len());
        for (topic, text) in &items {
            completions.push(WriteCompletion::ready(self.send(topic, text).await));
        }
        Ok(completions)
    }

    async fn server_info(&mut self) -> DriverResult<serde_json::Value> {
        Ok(json!({
            "Broker": self.settings.broker(),
            "ClientId": self.settings.client_id,
            "Connected": self.transport.is_connected(),
            "Subscriptions": self.router.len(),
        }))
    }
}

impl<T: MqttTransport> fmt::Debug for MqttAdapter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttAdapter")
            .field("id", &self.id)
            .field("broker", &self.settings.broker())
            .field("topics", &self.router.len())
            .finish()
    }
}
