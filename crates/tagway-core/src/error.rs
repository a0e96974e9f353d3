// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unified error hierarchy for tagway.
//!
//! # Error Hierarchy
//!
//! ```text
//! GatewayError (root)
//! ├── TopicError   - Malformed topic addresses
//! ├── DriverError  - Backend connection and operation failures
//! ├── BusError     - Request/reply transport failures and failed replies
//! └── WriteError   - Write queue admission failures
//! ```
//!
//! None of these cross the bus boundary as errors. Driver actors convert
//! them into `{Ok: false, Error: ...}` reply bodies.
//!
//! # Examples
//!
//! ```
//! use tagway_core::error::{DriverError, GatewayError};
//! use std::time::Duration;
//!
//! let error = DriverError::timeout(Duration::from_secs(5));
//! assert!(error.is_retryable());
//!
//! let gateway_error: GatewayError = error.into();
//! assert!(gateway_error.is_retryable());
//! ```

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// GatewayError - Root Error Type
// =============================================================================

/// The root error type for tagway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Topic address error.
    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),

    /// Driver error.
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Bus error.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Write admission error.
    #[error("Write error: {0}")]
    Write(#[from] WriteError),
}

impl GatewayError {
    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Driver(e) => e.is_retryable(),
            GatewayError::Bus(e) => e.is_retryable(),
            GatewayError::Write(e) => matches!(e, WriteError::QueueFull { .. }),
            GatewayError::Topic(_) => false,
        }
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Topic(_) => "topic",
            GatewayError::Driver(e) => e.error_type(),
            GatewayError::Bus(_) => "bus",
            GatewayError::Write(_) => "write",
        }
    }
}

// =============================================================================
// TopicError
// =============================================================================

/// Errors raised while parsing or constructing a topic address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    /// The address has fewer segments than its form requires.
    #[error("Topic '{topic}' has too few segments: {message}")]
    MissingSegments {
        /// The raw topic.
        topic: String,
        /// What is missing.
        message: String,
    },

    /// The system type segment is not recognized.
    #[error("Unknown system type '{value}' in topic '{topic}'")]
    UnknownSystemType {
        /// The raw topic.
        topic: String,
        /// The offending segment.
        value: String,
    },

    /// The topic type segment is not recognized.
    #[error("Unknown topic type '{value}' in topic '{topic}'")]
    UnknownTopicType {
        /// The raw topic.
        topic: String,
        /// The offending segment.
        value: String,
    },

    /// The format suffix is not recognized.
    #[error("Unknown data format '{value}' in topic '{topic}'")]
    UnknownFormat {
        /// The raw topic.
        topic: String,
        /// The offending suffix.
        value: String,
    },

    /// A field holds a value that cannot be encoded unambiguously.
    #[error("Invalid {field} '{value}': {message}")]
    InvalidField {
        /// The field name.
        field: &'static str,
        /// The offending value.
        value: String,
        /// Why it was rejected.
        message: String,
    },
}

impl TopicError {
    /// Creates a missing segments error.
    pub fn missing_segments(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MissingSegments {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(
        field: &'static str,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            field,
            value: value.into(),
            message: message.into(),
        }
    }
}

/// Result type for topic operations.
pub type TopicResult<T> = Result<T, TopicError>;

// =============================================================================
// DriverError
// =============================================================================

/// Protocol driver errors.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Connection failed.
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        /// Error message.
        message: String,
        /// Underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The backend is not connected.
    #[error("Backend is not connected")]
    NotConnected,

    /// Operation timed out.
    #[error("Operation timed out after {duration:?}")]
    Timeout {
        /// The timeout duration.
        duration: Duration,
    },

    /// Protocol-specific error.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message.
        message: String,
    },

    /// Browsing the address space failed.
    #[error("Browse failed for '{node}': {message}")]
    Browse {
        /// The node being browsed.
        node: String,
        /// Error message.
        message: String,
    },

    /// Read operation failed.
    #[error("Read failed for '{address}': {message}")]
    ReadFailed {
        /// The address that failed.
        address: String,
        /// Error message.
        message: String,
    },

    /// Write operation failed.
    #[error("Write failed for '{address}': {message}")]
    WriteFailed {
        /// The address that failed.
        address: String,
        /// Error message.
        message: String,
    },

    /// Subscription error.
    #[error("Subscription error: {message}")]
    Subscription {
        /// Error message.
        message: String,
    },

    /// The driver does not support the requested operation.
    #[error("Operation not supported: {operation}")]
    Unsupported {
        /// The operation name.
        operation: String,
    },
}

impl DriverError {
    /// Creates a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a connection failed error with a source.
    pub fn connection_failed_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a browse error.
    pub fn browse(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Browse {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Creates a read failed error.
    pub fn read_failed(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ReadFailed {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Creates a write failed error.
    pub fn write_failed(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WriteFailed {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Creates a subscription error.
    pub fn subscription(message: impl Into<String>) -> Self {
        Self::Subscription {
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriverError::Timeout { .. }
                | DriverError::ConnectionFailed { .. }
                | DriverError::NotConnected
        )
    }

    /// Returns the error type for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            DriverError::ConnectionFailed { .. } => "connection_failed",
            DriverError::NotConnected => "not_connected",
            DriverError::Timeout { .. } => "timeout",
            DriverError::Protocol { .. } => "protocol",
            DriverError::Browse { .. } => "browse",
            DriverError::ReadFailed { .. } => "read_failed",
            DriverError::WriteFailed { .. } => "write_failed",
            DriverError::Subscription { .. } => "subscription",
            DriverError::Unsupported { .. } => "unsupported",
        }
    }
}

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

// =============================================================================
// BusError
// =============================================================================

/// Internal bus errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// No handler is registered at the address.
    #[error("No handler registered for '{address}'")]
    NoHandler {
        /// The request address.
        address: String,
    },

    /// The handler did not reply in time.
    #[error("Request to '{address}' timed out after {timeout:?}")]
    Timeout {
        /// The request address.
        address: String,
        /// The request timeout.
        timeout: Duration,
    },

    /// The handler dropped the request or its channel is closed.
    #[error("Handler for '{address}' is closed")]
    Closed {
        /// The request address.
        address: String,
    },

    /// The handler answered with a failure reply.
    #[error("Request to '{address}' failed: {message}")]
    Rejected {
        /// The request address.
        address: String,
        /// The reply's error text.
        message: String,
    },

    /// The request body could not be interpreted.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Error message.
        message: String,
    },

    /// Encoding or decoding a message failed.
    #[error("Serialization failed: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },
}

impl BusError {
    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::Timeout { .. } | BusError::NoHandler { .. })
    }
}

impl From<serde_json::Error> for BusError {
    fn from(e: serde_json::Error) -> Self {
        BusError::Serialization {
            message: e.to_string(),
        }
    }
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

// =============================================================================
// WriteError
// =============================================================================

/// Write queue admission errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The bounded write queue is at capacity.
    #[error("Write queue is full (capacity {capacity})")]
    QueueFull {
        /// The queue capacity.
        capacity: usize,
    },

    /// The write worker has stopped.
    #[error("Write worker is closed")]
    Closed,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_retryable() {
        assert!(DriverError::NotConnected.is_retryable());
        assert!(DriverError::connection_failed("refused").is_retryable());
        assert!(!DriverError::protocol("bad").is_retryable());
        assert!(!DriverError::unsupported("Browse").is_retryable());
    }

    #[test]
    fn test_gateway_error_conversion() {
        let err: GatewayError = TopicError::missing_segments("Opc/x", "no payload").into();
        assert_eq!(err.error_type(), "topic");
        assert!(!err.is_retryable());

        let err: GatewayError = WriteError::QueueFull { capacity: 10 }.into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = DriverError::browse("i=85", "BadNodeIdUnknown");
        assert_eq!(err.to_string(), "Browse failed for 'i=85': BadNodeIdUnknown");

        let err = BusError::NoHandler {
            address: "Opc/demo/Read".into(),
        };
        assert!(err.to_string().contains("Opc/demo/Read"));
    }
}
