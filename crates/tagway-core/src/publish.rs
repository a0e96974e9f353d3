// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Value publication onto the bus.
//!
//! Backend callbacks hand every value to a [`ValuePublisher`], which drops
//! values without a scalar, renders the rest in the topic's format and
//! publishes on the topic's canonical name.

use std::sync::Arc;

use tracing::trace;

use crate::bus::Bus;
use crate::driver::DriverStats;
use crate::value::DataPoint;

/// Renders and publishes data points for one driver.
///
/// Cheap to clone. Safe to use from any task.
#[derive(Debug, Clone)]
pub struct ValuePublisher {
    bus: Arc<Bus>,
    stats: Arc<DriverStats>,
}

impl ValuePublisher {
    /// Creates a publisher that counts into `stats`.
    pub fn new(bus: Arc<Bus>, stats: Arc<DriverStats>) -> Self {
        Self { bus, stats }
    }

    /// Returns the bus.
    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// Publishes a data point.
    ///
    /// Returns `false` when the value was suppressed because it has no scalar.
    pub fn publish(&self, point: &DataPoint) -> bool {
        let Some(payload) = point.render() else {
            self.stats.record_suppressed();
            trace!(topic = %point.topic, status = point.value.status_code(), "Value without data suppressed");
            return false;
        };

        let receivers = self.bus.publish(point.topic.topic_name(), payload);
        self.stats.record_published();
        trace!(topic = %point.topic, receivers, "Value published");
        true
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolvedNode;
    use crate::topic::TopicAddress;
    use crate::value::CanonicalValue;

    fn publisher() -> (ValuePublisher, Arc<Bus>, Arc<DriverStats>) {
        let bus = Arc::new(Bus::new(16));
        let stats = Arc::new(DriverStats::default());
        (ValuePublisher::new(bus.clone(), stats.clone()), bus, stats)
    }

    #[tokio::test]
    async fn test_value_format_publishes_scalar_text() {
        let (publisher, bus, stats) = publisher();
        let topic = TopicAddress::parse("Opc/demo/Node:Value/i=2258").unwrap();
        let mut subscriber = bus.subscribe(topic.topic_name());

        assert!(publisher.publish(&DataPoint::new(topic, CanonicalValue::new(21.5))));
        assert_eq!(subscriber.recv().await.unwrap().payload, "21.5");
        assert_eq!(stats.snapshot().published_values, 1);
    }

    #[tokio::test]
    async fn test_json_format_carries_leaf() {
        let (publisher, bus, _) = publisher();
        let topic = TopicAddress::parse("Opc/demo/Path/Objects/PLC1/#").unwrap();
        let mut subscriber = bus.subscribe(topic.topic_name());

        let point = DataPoint::new(topic, CanonicalValue::new(true))
            .with_leaf(ResolvedNode::new("ns=2;s=Tag1", "Objects/PLC1/Tag1"));
        publisher.publish(&point);

        let payload = subscriber.recv().await.unwrap().payload;
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["topic"]["browsePath"], "Objects/PLC1/Tag1");
        assert_eq!(json["value"]["value"], true);
    }

    #[tokio::test]
    async fn test_empty_value_is_never_published() {
        let (publisher, bus, stats) = publisher();
        let topic = TopicAddress::parse("Opc/demo/Node/i=2258").unwrap();
        let mut subscriber = bus.subscribe(topic.topic_name());

        let point = DataPoint::new(topic, CanonicalValue::empty("BadNodeIdUnknown"));
        assert!(!publisher.publish(&point));
        assert!(subscriber.try_recv().unwrap().is_none());

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.suppressed_values, 1);
        assert_eq!(snapshot.published_values, 0);
        assert_eq!(bus.stats().messages_published, 0);
    }
}
