// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA adapter settings.

use std::time::Duration;

use tagway_core::WriteConfig;

use crate::transport::MonitoringSettings;

/// Settings of one OPC UA adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct OpcUaSettings {
    /// Server endpoint URL.
    pub endpoint: String,
    /// Timeout of one service call.
    pub request_timeout: Duration,
    /// Timeout of session establishment.
    pub connect_timeout: Duration,
    /// Write queue settings.
    pub write: WriteConfig,
    /// Stamp writes with the current time as source timestamp.
    pub write_with_time: bool,
    /// Maximum number of cached path resolutions.
    pub cache_maximum_size: usize,
    /// Idle time after which a cached resolution expires.
    pub cache_expire_after: Duration,
    /// Monitored item parameters.
    pub monitoring: MonitoringSettings,
}

impl OpcUaSettings {
    /// Creates settings for an endpoint with defaults for everything else.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            write: WriteConfig::default(),
            write_with_time: false,
            cache_maximum_size: 1000,
            cache_expire_after: Duration::from_secs(60),
            monitoring: MonitoringSettings::default(),
        }
    }

    /// Sets the service call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the write queue settings.
    pub fn with_write(mut self, write: WriteConfig) -> Self {
        self.write = write;
        self
    }

    /// Enables source timestamps on writes.
    pub fn with_write_time(mut self, enabled: bool) -> Self {
        self.write_with_time = enabled;
        self
    }

    /// Sets the path cache bounds.
    pub fn with_address_cache(mut self, maximum_size: usize, expire_after: Duration) -> Self {
        self.cache_maximum_size = maximum_size;
        self.cache_expire_after = expire_after;
        self
    }

    /// Sets the monitored item parameters.
    pub fn with_monitoring(mut self, monitoring: MonitoringSettings) -> Self {
        self.monitoring = monitoring;
        self
    }
}

impl Default for OpcUaSettings {
    fn default() -> Self {
        Self::new("opc.tcp://localhost:4840")
    }
}
