// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tagway-bin
//!
//! Command line entry point of the tagway gateway.
//!
//! ## Startup sequence
//!
//! 1. [`cli`] parses arguments and picks the command (`run` by default).
//! 2. `run` loads the configuration and calls [`init_logging`].
//! 3. [`RuntimeBuilder`] builds a [`GatewayRuntime`], which creates the bus
//!    and starts one driver actor per enabled driver through a
//!    [`DriverFactory`].
//! 4. [`ShutdownCoordinator`] waits for SIGINT/SIGTERM, then every driver
//!    is stopped.
//!
//! ## Usage
//!
//! ```bash
//! tagway -c /etc/tagway/gateway.yaml
//! tagway validate --show-config --format json
//! tagway version
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use runtime::{
    mqtt_settings, opcua_settings, spawn_mqtt_driver, spawn_opcua_driver, BuiltinDrivers,
    DriverFactory, GatewayRuntime, RunningGateway, RuntimeBuilder,
};
pub use shutdown::{ShutdownCoordinator, ShutdownReason};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
