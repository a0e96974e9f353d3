// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA binding for the tagway gateway.
//!
//! This crate implements [`tagway_core::DriverAdapter`] for OPC UA servers.
//! The protocol stack itself sits behind the [`OpcUaTransport`] trait;
//! [`OpcUaClientTransport`] implements it over the `opcua` crate.
//!
//! # Features
//!
//! - Node and Path topic subscriptions through monitored items
//! - Wildcard browse-path resolution with root aliases
//! - Batched writes with text-to-type conversion
//! - Forward and inverse browsing, recursive schema browsing
//! - Server information
//!
//! # Error Handling
//!
//! ```text
//! OpcUaError
//! ├── InvalidNodeId - Unparseable node identifier
//! ├── Conversion    - Write text not convertible to the node's type
//! ├── BadStatus     - Service call answered with a bad status
//! └── Driver        - Transport failure
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use tagway_core::{Driver, DriverOptions};
//! use tagway_opcua::{OpcUaAdapter, OpcUaClientTransport, OpcUaSettings};
//!
//! let settings = OpcUaSettings::new("opc.tcp://localhost:4840");
//! let transport = OpcUaClientTransport::new(&settings);
//! let adapter = OpcUaAdapter::new("plant", transport, settings);
//! let handle = Driver::new(adapter, bus, DriverOptions::default()).spawn();
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod adapter;
pub mod browse;
pub mod client;
pub mod codec;
pub mod error;
pub mod settings;
pub mod transport;
pub mod types;

pub use adapter::{DataTypeCache, OpcUaAdapter, TextWrite, TransportWriter};
pub use browse::{NodeBrowser, TransportBrowser};
pub use client::OpcUaClientTransport;
pub use codec::{to_value, variant_from_text, DataValueCodec};
pub use error::{OpcUaError, OpcUaResult};
pub use settings::OpcUaSettings;
pub use transport::{
    DataChangeCallback, MonitoredItemRequest, MonitoredItemResult, MonitoringSettings,
    OpcUaTransport,
};
pub use types::{
    BrowseDirection, BrowseResult, BuiltinType, DataValue, NodeAttributes, NodeClass, NodeId,
    NodeIdentifier, ReferenceDescription, ServerInfo, StatusCode, Variant,
};
