// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tagway-core
//!
//! Protocol-independent core of the tagway industrial gateway.
//!
//! This crate provides the pieces every protocol binding shares:
//!
//! - **Topic**: Canonical topic addresses and their text encoding
//! - **Value**: Canonical values, data points and their rendering
//! - **Registry**: Reference-counted multiplexing of client subscriptions
//! - **Resolver**: Browse-path wildcard resolution with an LRU/TTL cache
//! - **Write**: Bounded write queue with batched delivery
//! - **Bus**: In-process request/reply and publish/subscribe bus
//! - **Driver**: Connection state machine and request dispatch
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tagway_core::{Bus, Driver, DriverClient, DriverOptions, TopicAddress};
//!
//! let bus = Arc::new(Bus::default());
//! let handle = Driver::new(adapter, bus.clone(), DriverOptions::default()).spawn();
//!
//! let topic = TopicAddress::parse("Opc/plant/Node:Value/ns=2;s=Temperature")?;
//! let mut values = DriverClient::for_topic(bus, &topic).subscribe(&topic).await?;
//! while let Ok(message) = values.recv().await {
//!     println!("{}", message.payload);
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Core Modules
// =============================================================================

pub mod error;
pub mod topic;
pub mod value;

// =============================================================================
// Subscription & Write Modules
// =============================================================================

pub mod registry;
pub mod resolver;
pub mod write;

// =============================================================================
// Message Bus Modules
// =============================================================================

pub mod bus;
pub mod message;
pub mod publish;

// =============================================================================
// Driver Modules
// =============================================================================

pub mod adapter;
pub mod client;
pub mod driver;

// =============================================================================
// Re-exports for convenience
// =============================================================================

pub use error::*;

pub use topic::{DataFormat, PathSegment, SystemType, TopicAddress, TopicType};
pub use value::{CanonicalValue, DataPoint, Value, ValueCodec, STATUS_GOOD};

pub use registry::{ClientId, SubscriptionRegistry};
pub use resolver::{
    AddressSpaceBrowser, BrowseChild, BrowsePage, NodeKind, PathCache, PathResolver,
    ResolvedNode, ResolverStatsSnapshot,
};
pub use write::{BatchWriter, WriteCompletion, WriteConfig, WriteCoordinator, WriteStatsSnapshot};

pub use bus::{Bus, BusMessage, BusRequest, BusStats, BusSubscriber, ReplySender, RequestReceiver};
pub use message::{BrowseEntry, OneOrMany, Operation, Reply, SchemaNode};
pub use publish::ValuePublisher;

pub use adapter::{DriverAdapter, DriverContext, DriverEvent, DriverEvents, SubscribedItems};
pub use client::DriverClient;
pub use driver::{
    ConnectionState, Driver, DriverHandle, DriverOptions, DriverStats, DriverStatsSnapshot,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
