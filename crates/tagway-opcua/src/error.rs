// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA binding errors.
//!
//! ```text
//! OpcUaError
//! ├── InvalidNodeId - Unparseable node identifier
//! ├── Conversion    - Write text not convertible to the node's type
//! ├── BadStatus     - Service call answered with a bad status
//! └── Driver        - Transport failure, already in driver terms
//! ```
//!
//! Every variant converts into [`DriverError`] so adapter methods can use `?`.

use tagway_core::DriverError;
use thiserror::Error;

use crate::types::StatusCode;

/// Errors raised by the OPC UA binding.
#[derive(Debug, Error)]
pub enum OpcUaError {
    /// A node identifier could not be parsed.
    #[error("Invalid node id '{value}': {message}")]
    InvalidNodeId {
        /// The offending text.
        value: String,
        /// What is wrong with it.
        message: String,
    },

    /// A write value could not be converted to the node's data type.
    #[error("Cannot convert '{value}' to {data_type}: {message}")]
    Conversion {
        /// The text value.
        value: String,
        /// The target type name.
        data_type: String,
        /// Conversion failure.
        message: String,
    },

    /// A service call answered with a bad status.
    #[error("{operation} failed with status {status}")]
    BadStatus {
        /// The failed service.
        operation: &'static str,
        /// The returned status.
        status: StatusCode,
    },

    /// A transport-level failure.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl OpcUaError {
    /// Creates an invalid node id error.
    pub fn invalid_node_id(value: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            value: value.into(),
            message: message.into(),
        }
    }

    /// Creates a conversion error.
    pub fn conversion(
        value: impl Into<String>,
        data_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Conversion {
            value: value.into(),
            data_type: data_type.into(),
            message: message.into(),
        }
    }

    /// Returns the error type name for logging fields.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidNodeId { .. } => "invalid_node_id",
            Self::Conversion { .. } => "conversion",
            Self::BadStatus { .. } => "bad_status",
            Self::Driver(_) => "driver",
        }
    }
}

impl From<OpcUaError> for DriverError {
    fn from(err: OpcUaError) -> Self {
        match err {
            OpcUaError::Driver(e) => e,
            OpcUaError::BadStatus { operation, status } => {
                DriverError::protocol(format!("{} failed with status {}", operation, status))
            }
            other => DriverError::protocol(other.to_string()),
        }
    }
}

/// Result type for OPC UA binding operations.
pub type OpcUaResult<T> = Result<T, OpcUaError>;
