// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! MQTT adapter settings.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MqttError;

// =============================================================================
// QoS
// =============================================================================

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// Fire and forget.
    #[default]
    AtMostOnce,
    /// Acknowledged delivery.
    AtLeastOnce,
    /// Assured single delivery.
    ExactlyOnce,
}

impl QoS {
    /// Returns the numeric level.
    pub fn level(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = MqttError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(MqttError::InvalidQos(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos.level()
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

// =============================================================================
// PayloadFormat
// =============================================================================

/// Encoding of message payloads on the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// The payload is the value text.
    Raw,
    /// The payload is a canonical value object, an array of them, or a
    /// bare JSON scalar.
    #[default]
    Json,
}

impl FromStr for PayloadFormat {
    type Err = MqttError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(PayloadFormat::Raw),
            "json" => Ok(PayloadFormat::Json),
            _ => Err(MqttError::InvalidFormat(s.to_string())),
        }
    }
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadFormat::Raw => f.write_str("raw"),
            PayloadFormat::Json => f.write_str("json"),
        }
    }
}

// =============================================================================
// MqttSettings
// =============================================================================

/// Settings of one MQTT adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Client id presented to the broker.
    pub client_id: String,
    /// QoS of subscriptions and publications.
    pub qos: QoS,
    /// Publish with the retain flag.
    pub retained: bool,
    /// Payload encoding.
    pub payload_format: PayloadFormat,
    /// Timeout of broker round trips.
    pub request_timeout: Duration,
    /// Timeout of the connect handshake.
    pub connect_timeout: Duration,
    /// Keep-alive interval of the session.
    pub keep_alive: Duration,
}

impl MqttSettings {
    /// Creates settings for a broker with a random client id.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: uuid::Uuid::new_v4().to_string(),
            qos: QoS::default(),
            retained: false,
            payload_format: PayloadFormat::default(),
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            keep_alive: Duration::from_secs(30),
        }
    }

    /// Sets the client id.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Sets the QoS level.
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Sets the retain flag of publications.
    pub fn with_retained(mut self, retained: bool) -> Self {
        self.retained = retained;
        self
    }

    /// Sets the payload encoding.
    pub fn with_payload_format(mut self, format: PayloadFormat) -> Self {
        self.payload_format = format;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the keep-alive interval.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns `host:port`.
    pub fn broker(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self::new("localhost", 1883)
    }
}
