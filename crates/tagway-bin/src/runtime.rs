// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Gateway runtime orchestration.
//!
//! The runtime is the composition root: it creates the bus, starts one
//! driver actor per enabled driver entry and stops them all on shutdown.
//!
//! Backend clients come from a [`DriverFactory`]. [`BuiltinDrivers`] links
//! the `rumqttc` MQTT client and the `opcua` client. Embedding applications
//! can supply other stacks through their own factory, using
//! [`spawn_opcua_driver`] with any [`OpcUaTransport`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use tagway_config::{
    load_config, DriverConfig, DriverKind, GatewayConfig, MqttConfig, OpcUaConfig,
    PayloadFormatConfig,
};
use tagway_core::{Bus, Driver, DriverClient, DriverHandle, DriverOptions, SystemType};
use tagway_mqtt::{MqttAdapter, MqttSettings, MqttTransport, PayloadFormat, QoS, RumqttcTransport};
use tagway_opcua::{
    MonitoringSettings, OpcUaAdapter, OpcUaClientTransport, OpcUaSettings, OpcUaTransport,
};

use crate::error::{BinError, BinResult};
use crate::shutdown::ShutdownCoordinator;

// =============================================================================
// Settings Conversion
// =============================================================================

/// Builds OPC UA adapter settings from a driver entry.
pub fn opcua_settings(config: &OpcUaConfig) -> OpcUaSettings {
    OpcUaSettings::new(config.endpoint.clone())
        .with_request_timeout(config.request_timeout())
        .with_connect_timeout(config.connect_timeout())
        .with_write(config.write.to_write_config())
        .with_write_time(config.write.with_time)
        .with_address_cache(
            config.address_cache.maximum_size,
            config.address_cache.expire_after(),
        )
        .with_monitoring(MonitoringSettings {
            sampling_interval: config.monitoring.sampling_interval(),
            queue_size: config.monitoring.buffer_size,
            discard_oldest: config.monitoring.discard_oldest,
        })
}

/// Builds MQTT adapter settings from a driver entry.
pub fn mqtt_settings(config: &MqttConfig) -> BinResult<MqttSettings> {
    let qos = QoS::try_from(config.qos).map_err(|e| BinError::invalid_config(e.to_string()))?;
    let format = match config.payload_format {
        PayloadFormatConfig::Raw => PayloadFormat::Raw,
        PayloadFormatConfig::Json => PayloadFormat::Json,
    };

    let mut settings = MqttSettings::new(config.host.clone(), config.port)
        .with_qos(qos)
        .with_retained(config.retained)
        .with_payload_format(format);
    if let Some(client_id) = &config.client_id {
        settings = settings.with_client_id(client_id.clone());
    }
    Ok(settings)
}

/// Starts an OPC UA driver over `transport`.
pub fn spawn_opcua_driver<T: OpcUaTransport>(
    driver: &DriverConfig,
    transport: T,
    bus: Arc<Bus>,
    options: DriverOptions,
) -> BinResult<DriverHandle> {
    let opcua = driver
        .opcua
        .as_ref()
        .ok_or_else(|| BinError::driver_start(&driver.id, "no opcua section"))?;
    let adapter = OpcUaAdapter::new(driver.id.clone(), transport, opcua_settings(opcua));
    Ok(Driver::new(adapter, bus, options).spawn())
}

/// Starts an MQTT driver over `transport`.
pub fn spawn_mqtt_driver<T: MqttTransport>(
    driver: &DriverConfig,
    transport: T,
    settings: MqttSettings,
    bus: Arc<Bus>,
    options: DriverOptions,
) -> DriverHandle {
    let adapter = MqttAdapter::new(driver.id.clone(), transport, settings);
    Driver::new(adapter, bus, options).spawn()
}

// =============================================================================
// DriverFactory
// =============================================================================

/// Creates driver actors for configured drivers.
pub trait DriverFactory: Send + Sync {
    /// Starts the driver for `driver`.
    ///
    /// Returns `Ok(None)` when no backend client is available for its kind.
    fn spawn(
        &self,
        driver: &DriverConfig,
        bus: Arc<Bus>,
        options: DriverOptions,
    ) -> BinResult<Option<DriverHandle>>;
}

/// Drivers backed by the clients linked into this binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinDrivers;

impl DriverFactory for BuiltinDrivers {
    fn spawn(
        &self,
        driver: &DriverConfig,
        bus: Arc<Bus>,
        options: DriverOptions,
    ) -> BinResult<Option<DriverHandle>> {
        match driver.kind {
            DriverKind::Mqtt => {
                let settings = mqtt_settings(&driver.mqtt_or_default())?;
                let transport = RumqttcTransport::new(settings.clone());
                Ok(Some(spawn_mqtt_driver(driver, transport, settings, bus, options)))
            }
            DriverKind::Opcua => {
                let opcua = driver
                    .opcua
                    .as_ref()
                    .ok_or_else(|| BinError::driver_start(&driver.id, "no opcua section"))?;
                let transport = OpcUaClientTransport::new(&opcua_settings(opcua));
                Ok(Some(spawn_opcua_driver(driver, transport, bus, options)?))
            }
        }
    }
}

// =============================================================================
// GatewayRuntime
// =============================================================================

/// The gateway runtime.
pub struct GatewayRuntime {
    config: Arc<GatewayConfig>,
    factory: Arc<dyn DriverFactory>,
    shutdown: ShutdownCoordinator,
}

impl GatewayRuntime {
    /// Creates a runtime with the builtin drivers.
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config: Arc::new(config),
            factory: Arc::new(BuiltinDrivers),
            shutdown: ShutdownCoordinator::new(),
        }
    }

    /// Replaces the driver factory.
    pub fn with_factory(mut self, factory: Arc<dyn DriverFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Returns the shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Creates the bus and starts every enabled driver.
    pub async fn start(&self) -> BinResult<RunningGateway> {
        let bus = Arc::new(Bus::new(self.config.bus.channel_capacity));
        let mut gateway = RunningGateway {
            bus,
            request_timeout: self.config.bus.request_timeout(),
            drivers: Vec::new(),
        };

        for driver in self.config.enabled_drivers() {
            let options = driver
                .driver_options()
                .map_err(|e| BinError::from(e).context(format!("driver '{}'", driver.id)));
            let spawned = options.and_then(|options| {
                self.factory.spawn(driver, gateway.bus.clone(), options)
            });

            match spawned {
                Ok(Some(handle)) => {
                    info!(
                        driver = %driver.id,
                        kind = ?driver.kind,
                        startup_topics = driver.subscribe_on_startup.len(),
                        "Driver started"
                    );
                    gateway.drivers.push((driver.kind.system_type(), handle));
                }
                Ok(None) => {}
                Err(e) => {
                    gateway.shutdown().await;
                    return Err(e);
                }
            }
        }

        let skipped = self.config.drivers.len() - gateway.drivers.len();
        info!(
            gateway = %self.config.gateway.id,
            drivers = gateway.drivers.len(),
            skipped,
            "Gateway started"
        );
        Ok(gateway)
    }

    /// Runs the gateway until shutdown is signaled.
    pub async fn run(self) -> BinResult<()> {
        info!("Starting tagway v{}", tagway_core::VERSION);

        let gateway = self.start().await?;
        let reason = self.shutdown.wait_for_shutdown().await;

        info!(reason = ?reason, "Stopping drivers");
        gateway.shutdown().await;
        info!("tagway shutdown complete");
        Ok(())
    }
}

// =============================================================================
// RunningGateway
// =============================================================================

/// A started gateway: the bus and its driver actors.
pub struct RunningGateway {
    bus: Arc<Bus>,
    request_timeout: Duration,
    drivers: Vec<(SystemType, DriverHandle)>,
}

impl RunningGateway {
    /// Returns the bus.
    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// Returns the running driver handles.
    pub fn drivers(&self) -> impl Iterator<Item = &DriverHandle> {
        self.drivers.iter().map(|(_, handle)| handle)
    }

    /// Returns the handle of driver `id`.
    pub fn driver(&self, id: &str) -> Option<&DriverHandle> {
        self.drivers().find(|handle| handle.id() == id)
    }

    /// Returns a bus client for driver `id`.
    pub fn client(&self, id: &str) -> Option<DriverClient> {
        self.drivers
            .iter()
            .find(|(_, handle)| handle.id() == id)
            .map(|(system_type, handle)| {
                DriverClient::new(self.bus.clone(), *system_type, handle.id())
                    .with_timeout(self.request_timeout)
            })
    }

    /// Stops every driver: backends are disconnected and write workers end.
    pub async fn shutdown(self) {
        for (_, handle) in self.drivers {
            let id = handle.id().to_string();
            handle.shutdown().await;
            info!(driver = %id, "Driver stopped");
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for the gateway runtime.
#[derive(Default)]
pub struct RuntimeBuilder {
    config_path: Option<PathBuf>,
    config: Option<GatewayConfig>,
    factory: Option<Arc<dyn DriverFactory>>,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration file path.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the configuration directly.
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the driver factory.
    pub fn factory(mut self, factory: Arc<dyn DriverFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> BinResult<GatewayRuntime> {
        let config = match self.config {
            Some(config) => config,
            None => {
                let path = self
                    .config_path
                    .ok_or_else(|| BinError::invalid_config("no configuration provided"))?;
                load_config(&path).map_err(|e| {
                    BinError::from(e).context(format!("loading {}", path.display()))
                })?
            }
        };

        let runtime = GatewayRuntime::new(config);
        Ok(match self.factory {
            Some(factory) => runtime.with_factory(factory),
            None => runtime,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tagway_config::{ConfigFormat, ConfigLoader};
    use tagway_core::ConnectionState;

    fn parse(json: &str) -> GatewayConfig {
        ConfigLoader::new()
            .with_env_vars(false)
            .load_from_str(json, ConfigFormat::Json)
            .unwrap()
    }

    #[test]
    fn test_runtime_builder_requires_config() {
        assert!(RuntimeBuilder::new().build().is_err());
        assert!(RuntimeBuilder::new()
            .config(GatewayConfig::default())
            .build()
            .is_ok());
    }

    #[test]
    fn test_opcua_settings_conversion() {
        let config = parse(
            r#"{"drivers": [{"id": "plc", "type": "opcua", "opcua": {
                "endpoint": "opc.tcp://plc:4840",
                "request_timeout_ms": 2500,
                "write": {"queue_size": 20, "block_size": 5, "with_time": true},
                "address_cache": {"maximum_size": 10, "expire_after_secs": 5},
                "monitoring": {"sampling_interval_ms": 250, "buffer_size": 4, "discard_oldest": false}
            }}]}"#,
        );
        let settings = opcua_settings(config.drivers[0].opcua.as_ref().unwrap());

        assert_eq!(settings.endpoint, "opc.tcp://plc:4840");
        assert_eq!(settings.request_timeout, Duration::from_millis(2500));
        assert_eq!(settings.write.queue_size, 20);
        assert_eq!(settings.write.block_size, 5);
        assert!(settings.write_with_time);
        assert_eq!(settings.cache_maximum_size, 10);
        assert_eq!(settings.cache_expire_after, Duration::from_secs(5));
        assert_eq!(settings.monitoring.sampling_interval, Duration::from_millis(250));
        assert_eq!(settings.monitoring.queue_size, 4);
        assert!(!settings.monitoring.discard_oldest);
    }

    #[test]
    fn test_mqtt_settings_conversion() {
        let config = MqttConfig {
            host: "mqtt.local".to_string(),
            client_id: Some("gateway-1".to_string()),
            qos: 2,
            retained: true,
            payload_format: PayloadFormatConfig::Raw,
            ..Default::default()
        };
        let settings = mqtt_settings(&config).unwrap();
        assert_eq!(settings.broker(), "mqtt.local:1883");
        assert_eq!(settings.client_id, "gateway-1");
        assert_eq!(settings.qos, QoS::ExactlyOnce);
        assert!(settings.retained);
        assert_eq!(settings.payload_format, PayloadFormat::Raw);

        let random = mqtt_settings(&MqttConfig::default()).unwrap();
        assert!(!random.client_id.is_empty());
        assert_eq!(random.payload_format, PayloadFormat::Json);
    }

    #[tokio::test]
    async fn test_builtin_drivers_start_opcua() {
        let config = parse(
            r#"{"drivers": [{"id": "plc", "type": "opcua", "reconnect_delay_ms": 100, "opcua": {
                "endpoint": "opc.tcp://127.0.0.1:1",
                "connect_timeout_ms": 2000
            }}]}"#,
        );
        let runtime = GatewayRuntime::new(config);
        let gateway = runtime.start().await.unwrap();

        assert_eq!(gateway.drivers().count(), 1);
        let handle = gateway.driver("plc").unwrap();
        assert_ne!(handle.state(), ConnectionState::Connected);
        assert!(gateway.client("plc").is_some());
        gateway.shutdown().await;
    }
}
