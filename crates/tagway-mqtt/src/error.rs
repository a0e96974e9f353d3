// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! MQTT binding errors.
//!
//! ```text
//! MqttError
//! ├── InvalidFilter  - Malformed topic filter
//! ├── InvalidQos     - QoS level outside 0..=2
//! ├── InvalidFormat  - Unknown payload format name
//! ├── Payload        - Received payload not decodable
//! └── Driver         - Transport failure
//! ```

use tagway_core::DriverError;
use thiserror::Error;

/// Errors raised by the MQTT binding.
#[derive(Debug, Error)]
pub enum MqttError {
    /// A topic filter violates the wildcard rules.
    #[error("Invalid topic filter '{filter}': {message}")]
    InvalidFilter {
        /// The filter.
        filter: String,
        /// What is wrong with it.
        message: &'static str,
    },

    /// A QoS level outside 0..=2.
    #[error("Invalid QoS level {0}")]
    InvalidQos(u8),

    /// An unknown payload format name.
    #[error("Unknown payload format '{0}'")]
    InvalidFormat(String),

    /// A received payload could not be decoded.
    #[error("Cannot decode payload on '{topic}': {message}")]
    Payload {
        /// Topic the payload arrived on.
        topic: String,
        /// Decoding failure.
        message: String,
    },

    /// A transport-level failure.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl MqttError {
    /// Creates an invalid filter error.
    pub fn invalid_filter(filter: impl Into<String>, message: &'static str) -> Self {
        Self::InvalidFilter {
            filter: filter.into(),
            message,
        }
    }

    /// Creates a payload error.
    pub fn payload(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Payload {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Returns the error type name for logging fields.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidFilter { .. } => "invalid_filter",
            Self::InvalidQos(_) => "invalid_qos",
            Self::InvalidFormat(_) => "invalid_format",
            Self::Payload { .. } => "payload",
            Self::Driver(_) => "driver",
        }
    }
}

impl From<MqttError> for DriverError {
    fn from(err: MqttError) -> Self {
        match err {
            MqttError::Driver(e) => e,
            MqttError::InvalidFilter { filter, message } => {
                DriverError::subscription(format!("Invalid topic filter '{}': {}", filter, message))
            }
            other => DriverError::protocol(other.to_string()),
        }
    }
}

/// Result type for MQTT binding operations.
pub type MqttResult<T> = Result<T, MqttError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_becomes_subscription_error() {
        let err: DriverError = MqttError::invalid_filter("a/#/b", "'#' must be last").into();
        assert_eq!(err.error_type(), DriverError::subscription("").error_type());
        assert!(err.to_string().contains("a/#/b"));
    }
}
