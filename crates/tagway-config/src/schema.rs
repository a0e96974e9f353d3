// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema for the tagway gateway.
//!
//! ```text
//! GatewayConfig
//! ├── gateway   - Gateway identification
//! ├── logging   - Log level and format
//! ├── bus       - Request timeout and channel capacity
//! └── drivers   - One entry per backend connection (type: opcua | mqtt)
//! ```
//!
//! Every section except `drivers[].id`, `drivers[].type` and
//! `drivers[].opcua.endpoint` has a default. Unknown keys are rejected.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tagway_core::{DriverOptions, SystemType, TopicAddress, WriteConfig};

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Root Configuration
// =============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Gateway identification.
    #[serde(default)]
    pub gateway: GatewaySection,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Bus configuration.
    #[serde(default)]
    pub bus: BusConfig,

    /// Driver configurations.
    #[serde(default)]
    pub drivers: Vec<DriverConfig>,
}

impl GatewayConfig {
    /// Validates the whole configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.gateway.validate()?;
        self.bus.validate()?;

        let mut driver_ids = HashSet::new();
        for (index, driver) in self.drivers.iter().enumerate() {
            driver.validate(index)?;
            if !driver_ids.insert(driver.id.as_str()) {
                return Err(ConfigError::duplicate_driver_id(&driver.id));
            }
        }

        Ok(())
    }

    /// Returns a driver configuration by id.
    pub fn get_driver(&self, driver_id: &str) -> Option<&DriverConfig> {
        self.drivers.iter().find(|d| d.id == driver_id)
    }

    /// Returns the enabled drivers.
    pub fn enabled_drivers(&self) -> impl Iterator<Item = &DriverConfig> {
        self.drivers.iter().filter(|d| d.enabled)
    }
}

// =============================================================================
// Gateway Section
// =============================================================================

/// Gateway identification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    /// Gateway id.
    #[serde(default = "default_gateway_id")]
    pub id: String,
}

fn default_gateway_id() -> String {
    "tagway".to_string()
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            id: default_gateway_id(),
        }
    }
}

impl GatewaySection {
    fn validate(&self) -> ConfigResult<()> {
        if self.id.is_empty() {
            return Err(ConfigError::validation("gateway.id", "cannot be empty"));
        }
        Ok(())
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Minimum level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the level as a filter directive.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
    /// Compact single-line text.
    Compact,
}

// =============================================================================
// Bus
// =============================================================================

/// Bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    /// Timeout of front-end requests in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Capacity of request and publication channels.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl BusConfig {
    /// Returns the request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::validation(
                "bus.channel_capacity",
                "must be greater than 0",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "bus.request_timeout_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Drivers
// =============================================================================

/// Backend kind of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// OPC UA server.
    Opcua,
    /// MQTT broker.
    Mqtt,
}

impl DriverKind {
    /// Returns the topic system type served by this kind.
    pub fn system_type(&self) -> SystemType {
        match self {
            Self::Opcua => SystemType::Opc,
            Self::Mqtt => SystemType::Mqtt,
        }
    }
}

/// Configuration of one driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverConfig {
    /// Driver id, used as the system name in topics.
    pub id: String,

    /// Backend kind.
    #[serde(rename = "type")]
    pub kind: DriverKind,

    /// Whether the driver is started.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Delay between failed connection attempts in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Topics subscribed after the first connect.
    #[serde(default)]
    pub subscribe_on_startup: Vec<String>,

    /// OPC UA settings. Required for `type: opcua`.
    #[serde(default)]
    pub opcua: Option<OpcUaConfig>,

    /// MQTT settings. Defaults apply for `type: mqtt` when omitted.
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

impl DriverConfig {
    /// Returns the reconnect delay.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Parses the startup topics.
    pub fn startup_topics(&self) -> ConfigResult<Vec<TopicAddress>> {
        self.subscribe_on_startup
            .iter()
            .map(|raw| {
                TopicAddress::parse(raw).map_err(|e| {
                    ConfigError::validation(
                        format!("drivers.{}.subscribe_on_startup", self.id),
                        e.to_string(),
                    )
                })
            })
            .collect()
    }

    /// Builds the driver actor options.
    pub fn driver_options(&self) -> ConfigResult<DriverOptions> {
        Ok(DriverOptions::default()
            .with_reconnect_delay(self.reconnect_delay())
            .with_startup_topics(self.startup_topics()?))
    }

    /// Returns the MQTT settings, falling back to defaults.
    pub fn mqtt_or_default(&self) -> MqttConfig {
        self.mqtt.clone().unwrap_or_default()
    }

    fn validate(&self, index: usize) -> ConfigResult<()> {
        if self.id.is_empty() {
            return Err(ConfigError::validation(
                format!("drivers[{}].id", index),
                "cannot be empty",
            ));
        }
        if !is_valid_id(&self.id) {
            return Err(ConfigError::validation(
                format!("drivers[{}].id", index),
                format!("'{}' may only contain letters, digits, '_' and '-'", self.id),
            ));
        }

        let field = |name: &str| format!("drivers.{}.{}", self.id, name);
        match self.kind {
            DriverKind::Opcua => {
                if self.mqtt.is_some() {
                    return Err(ConfigError::validation(field("mqtt"), "not allowed for type opcua"));
                }
                match &self.opcua {
                    Some(opcua) => opcua.validate(&field("opcua"))?,
                    None => {
                        return Err(ConfigError::validation(field("opcua"), "required for type opcua"))
                    }
                }
            }
            DriverKind::Mqtt => {
                if self.opcua.is_some() {
                    return Err(ConfigError::validation(field("opcua"), "not allowed for type mqtt"));
                }
                if let Some(mqtt) = &self.mqtt {
                    mqtt.validate(&field("mqtt"))?;
                }
            }
        }

        for topic in self.startup_topics()? {
            if topic.system_type() != self.kind.system_type() || topic.system_name() != self.id {
                return Err(ConfigError::validation(
                    field("subscribe_on_startup"),
                    format!("topic '{}' does not belong to this driver", topic),
                ));
            }
        }

        Ok(())
    }
}

fn is_valid_id(id: &str) -> bool {
    id.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// =============================================================================
// OPC UA
// =============================================================================

/// OPC UA driver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpcUaConfig {
    /// Server endpoint URL.
    pub endpoint: String,

    /// Timeout of single service calls in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Timeout of session establishment in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Write queue settings.
    #[serde(default)]
    pub write: WriteSettings,

    /// Browse path cache settings.
    #[serde(default)]
    pub address_cache: AddressCacheSettings,

    /// Monitored item settings.
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl OpcUaConfig {
    /// Creates settings for `endpoint` with defaults elsewhere.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_request_timeout_ms(),
            write: WriteSettings::default(),
            address_cache: AddressCacheSettings::default(),
            monitoring: MonitoringConfig::default(),
        }
    }

    /// Returns the request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Returns the connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    fn validate(&self, field: &str) -> ConfigResult<()> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::validation(
                format!("{}.endpoint", field),
                "cannot be empty",
            ));
        }
        if !self.endpoint.starts_with("opc.tcp://") {
            return Err(ConfigError::validation(
                format!("{}.endpoint", field),
                "must start with opc.tcp://",
            ));
        }
        self.write.validate(&format!("{}.write", field))?;
        if self.address_cache.maximum_size == 0 {
            return Err(ConfigError::validation(
                format!("{}.address_cache.maximum_size", field),
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Write queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteSettings {
    /// Queue capacity.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Maximum items per backend call.
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Wait for the first item of a batch in milliseconds.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Attach the write time as source timestamp.
    #[serde(default)]
    pub with_time: bool,
}

fn default_queue_size() -> usize {
    1000
}

fn default_block_size() -> usize {
    100
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

impl Default for WriteSettings {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            block_size: default_block_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
            with_time: false,
        }
    }
}

impl WriteSettings {
    /// Converts into the write coordinator configuration.
    pub fn to_write_config(&self) -> WriteConfig {
        WriteConfig::default()
            .with_queue_size(self.queue_size)
            .with_block_size(self.block_size)
            .with_poll_timeout(Duration::from_millis(self.poll_timeout_ms))
    }

    fn validate(&self, field: &str) -> ConfigResult<()> {
        if self.queue_size == 0 {
            return Err(ConfigError::validation(
                format!("{}.queue_size", field),
                "must be greater than 0",
            ));
        }
        if self.block_size == 0 {
            return Err(ConfigError::validation(
                format!("{}.block_size", field),
                "must be greater than 0",
            ));
        }
        if self.block_size > self.queue_size {
            return Err(ConfigError::validation(
                format!("{}.block_size", field),
                format!("cannot exceed queue_size ({})", self.queue_size),
            ));
        }
        Ok(())
    }
}

/// Browse path cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddressCacheSettings {
    /// Maximum cached paths.
    #[serde(default = "default_cache_maximum_size")]
    pub maximum_size: usize,

    /// Entry lifetime after last access in seconds.
    #[serde(default = "default_cache_expire_after_secs")]
    pub expire_after_secs: u64,
}

fn default_cache_maximum_size() -> usize {
    1000
}

fn default_cache_expire_after_secs() -> u64 {
    60
}

impl Default for AddressCacheSettings {
    fn default() -> Self {
        Self {
            maximum_size: default_cache_maximum_size(),
            expire_after_secs: default_cache_expire_after_secs(),
        }
    }
}

impl AddressCacheSettings {
    /// Returns the entry lifetime.
    pub fn expire_after(&self) -> Duration {
        Duration::from_secs(self.expire_after_secs)
    }
}

/// Monitored item settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitoringConfig {
    /// Sampling interval in milliseconds. Zero asks for the fastest rate.
    #[serde(default)]
    pub sampling_interval_ms: u64,

    /// Server-side queue size.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u32,

    /// Drop the oldest value when the server queue overflows.
    #[serde(default = "default_true")]
    pub discard_oldest: bool,
}

fn default_buffer_size() -> u32 {
    1
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            sampling_interval_ms: 0,
            buffer_size: default_buffer_size(),
            discard_oldest: true,
        }
    }
}

impl MonitoringConfig {
    /// Returns the sampling interval.
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }
}

// =============================================================================
// MQTT
// =============================================================================

/// MQTT payload format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormatConfig {
    /// Payload text is the value.
    Raw,
    /// Value objects in JSON.
    #[default]
    Json,
}

/// MQTT driver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttConfig {
    /// Broker host.
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Client id. Random when omitted.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Quality of service for subscriptions and publications.
    #[serde(default)]
    pub qos: u8,

    /// Publish with the retain flag.
    #[serde(default)]
    pub retained: bool,

    /// Payload format.
    #[serde(default)]
    pub payload_format: PayloadFormatConfig,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: None,
            qos: 0,
            retained: false,
            payload_format: PayloadFormatConfig::default(),
        }
    }
}

impl MqttConfig {
    fn validate(&self, field: &str) -> ConfigResult<()> {
        if self.host.is_empty() {
            return Err(ConfigError::validation(format!("{}.host", field), "cannot be empty"));
        }
        if self.port == 0 {
            return Err(ConfigError::validation(format!("{}.port", field), "cannot be 0"));
        }
        if self.qos > 2 {
            return Err(ConfigError::validation(
                format!("{}.qos", field),
                format!("{} is not one of 0, 1, 2", self.qos),
            ));
        }
        if matches!(&self.client_id, Some(id) if id.is_empty()) {
            return Err(ConfigError::validation(
                format!("{}.client_id", field),
                "cannot be empty",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
