// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! MQTT binding for the tagway gateway.
//!
//! This crate implements [`tagway_core::DriverAdapter`] for MQTT brokers.
//! The client library sits behind the [`MqttTransport`] trait;
//! [`RumqttcTransport`] implements it with `rumqttc`.
//!
//! # Features
//!
//! - Path topics subscribed as broker topic filters (`+`, `#`)
//! - Received-topic routing with a bounded LRU cache evicted on (un)subscribe
//! - Broker filters kept while any subscribed topic still uses them
//! - `raw` and `json` payload formats
//! - Publish and Write to broker topics
//!
//! # Example
//!
//! ```rust,ignore
//! use tagway_core::{Driver, DriverOptions};
//! use tagway_mqtt::{MqttAdapter, MqttSettings};
//!
//! let adapter = MqttAdapter::new("broker", transport, MqttSettings::new("localhost", 1883));
//! let handle = Driver::new(adapter, bus, DriverOptions::default()).spawn();
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod adapter;
pub mod client;
pub mod codec;
pub mod error;
pub mod filter;
pub mod router;
pub mod settings;
pub mod transport;

pub use adapter::MqttAdapter;
pub use client::RumqttcTransport;
pub use codec::{decode_payload, encode_payload, JsonPayloadCodec, RawPayloadCodec};
pub use error::{MqttError, MqttResult};
pub use router::{TopicRouter, DEFAULT_ROUTE_CACHE_SIZE};
pub use settings::{MqttSettings, PayloadFormat, QoS};
pub use transport::{IncomingMessage, MessageHandler, MqttTransport};
