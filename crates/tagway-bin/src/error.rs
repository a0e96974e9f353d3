// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the tagway binary.
//!
//! | Error | Exit code |
//! |---|---|
//! | `InvalidConfig`, `Config` | 1 |
//! | `Logging` | 2 |
//! | `DriverStart`, `Core` | 3 |
//! | `Output` | 4 |

use thiserror::Error;

use tagway_config::ConfigError;
use tagway_core::GatewayError;

/// Result type alias for tagway-bin operations.
pub type BinResult<T> = Result<T, BinError>;

/// Errors surfaced by the `tagway` commands.
#[derive(Debug, Error)]
pub enum BinError {
    /// A configuration value is unusable for the runtime.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The tracing subscriber could not be installed.
    #[error("Failed to install logging: {0}")]
    Logging(String),

    /// A driver could not be started.
    #[error("Driver '{driver}' failed to start: {message}")]
    DriverStart {
        /// The driver id.
        driver: String,
        /// Why it failed.
        message: String,
    },

    /// Command output could not be rendered.
    #[error("Failed to render output: {0}")]
    Output(#[from] serde_json::Error),

    /// Loading or validating the configuration file failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A gateway core operation failed.
    #[error(transparent)]
    Core(#[from] GatewayError),

    /// An error with a description of what was being done.
    #[error("{context}: {source}")]
    Context {
        /// What was being done.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<BinError>,
    },
}

impl BinError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Creates a logging error.
    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging(message.into())
    }

    /// Creates a driver start error.
    pub fn driver_start(driver: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DriverStart {
            driver: driver.into(),
            message: message.into(),
        }
    }

    /// Wraps the error with what was being done.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidConfig(_) | Self::Config(_) => 1,
            Self::Logging(_) => 2,
            Self::DriverStart { .. } | Self::Core(_) => 3,
            Self::Output(_) => 4,
            Self::Context { source, .. } => source.exit_code(),
        }
    }
}

/// Prints an error and its causes to stderr, one per line.
pub fn report_error(error: &BinError) {
    eprintln!("error: {}", error);
    for cause in std::iter::successors(std::error::Error::source(error), |e| e.source()) {
        eprintln!("  caused by: {}", cause);
    }
}
