// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tagway-config
//!
//! Configuration management for the tagway gateway.
//!
//! - **Schema**: Serde structures with defaults and validation
//! - **Multi-Format Support**: YAML, TOML and JSON files
//! - **Environment**: `${VAR:default}` placeholders and `TAGWAY_*` overrides
//!
//! ## Quick Start
//!
//! ```no_run
//! use tagway_config::load_config;
//!
//! let config = load_config("tagway.yaml").unwrap();
//! for driver in config.enabled_drivers() {
//!     println!("{} ({:?})", driver.id, driver.kind);
//! }
//! ```
//!
//! ## Example
//!
//! ```yaml
//! gateway:
//!   id: line-7
//! drivers:
//!   - id: plc1
//!     type: opcua
//!     opcua:
//!       endpoint: opc.tcp://${PLC_HOST:localhost}:4840
//!   - id: broker
//!     type: mqtt
//!     mqtt:
//!       host: mqtt.local
//!       payload_format: raw
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, load_config_str, ConfigFormat, ConfigLoader};
pub use schema::{
    AddressCacheSettings, BusConfig, DriverConfig, DriverKind, GatewayConfig, GatewaySection,
    LogFormat, LogLevel, LoggingConfig, MonitoringConfig, MqttConfig, OpcUaConfig,
    PayloadFormatConfig, WriteSettings,
};
