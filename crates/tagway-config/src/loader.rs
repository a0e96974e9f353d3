// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading.
//!
//! The loader reads a file, picks the format from its extension, resolves
//! `${VAR}` and `${VAR:default}` placeholders, deserializes, applies
//! `TAGWAY_*` environment overrides and validates the result.
//!
//! # Examples
//!
//! ```no_run
//! use tagway_config::loader::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .with_env_prefix("TAGWAY")
//!     .load("tagway.yaml")
//!     .unwrap();
//! println!("{} drivers", config.drivers.len());
//! ```

use std::env;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{GatewayConfig, LogFormat, LogLevel};

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Detects the format from a file extension.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::unsupported_format(extension)),
        }
    }
}

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads and validates gateway configuration.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_prefix: String,
    resolve_env_vars: bool,
}

impl ConfigLoader {
    /// Creates a loader with the `TAGWAY` prefix and placeholder resolution.
    pub fn new() -> Self {
        Self {
            env_prefix: "TAGWAY".to_string(),
            resolve_env_vars: true,
        }
    }

    /// Sets the prefix of override variables.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables placeholder resolution and overrides.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Loads a configuration file.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<GatewayConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        debug!(path = %path.display(), format = ?format, bytes = content.len(), "Configuration read");

        let config = self.load_from_str(&content, format).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::parse(path, message),
            other => other,
        })?;

        info!(
            gateway = %config.gateway.id,
            drivers = config.drivers.len(),
            enabled = config.enabled_drivers().count(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Loads configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<GatewayConfig> {
        let content = if self.resolve_env_vars {
            resolve_placeholders(content)?
        } else {
            content.to_string()
        };

        let mut config: GatewayConfig = parse_str(&content, format)?;
        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&self, config: &mut GatewayConfig) -> ConfigResult<()> {
        if let Ok(value) = env::var(format!("{}_GATEWAY_ID", self.env_prefix)) {
            config.gateway.id = value;
        }
        if let Ok(value) = env::var(format!("{}_LOG_LEVEL", self.env_prefix)) {
            config.logging.level = parse_log_level(&value).ok_or_else(|| {
                ConfigError::validation(format!("{}_LOG_LEVEL", self.env_prefix), "unknown level")
            })?;
        }
        if let Ok(value) = env::var(format!("{}_LOG_FORMAT", self.env_prefix)) {
            config.logging.format = parse_log_format(&value).ok_or_else(|| {
                ConfigError::validation(format!("{}_LOG_FORMAT", self.env_prefix), "unknown format")
            })?;
        }

        for driver in &mut config.drivers {
            let name = format!(
                "{}_DRIVERS_{}_ENABLED",
                self.env_prefix,
                driver.id.to_uppercase().replace('-', "_")
            );
            if let Ok(value) = env::var(&name) {
                driver.enabled = parse_bool(&value);
                debug!(driver = %driver.id, enabled = driver.enabled, "Driver override applied");
            }
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn parse_str<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> ConfigResult<T> {
    match format {
        ConfigFormat::Yaml => parse_yaml(content),
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
    }
}

/// YAML goes through the `config` crate.
fn parse_yaml<T: DeserializeOwned>(content: &str) -> ConfigResult<T> {
    let config = config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()
        .map_err(|e| ConfigError::serialization(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::serialization(e.to_string()))
}

/// Replaces `${VAR}` and `${VAR:default}` with environment values.
///
/// An unterminated placeholder is kept verbatim. A variable that is unset
/// and has no default is an error.
pub fn resolve_placeholders(content: &str) -> ConfigResult<String> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return Ok(result);
        };

        let inner = &after[..end];
        let (name, default) = match inner.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (inner, None),
        };
        match (env::var(name), default) {
            (Ok(value), _) => result.push_str(&value),
            (Err(_), Some(default)) => result.push_str(default),
            (Err(_), None) => return Err(ConfigError::env_var_not_found(name)),
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn parse_log_level(value: &str) -> Option<LogLevel> {
    match value.to_lowercase().as_str() {
        "trace" => Some(LogLevel::Trace),
        "debug" => Some(LogLevel::Debug),
        "info" => Some(LogLevel::Info),
        "warn" | "warning" => Some(LogLevel::Warn),
        "error" => Some(LogLevel::Error),
        _ => None,
    }
}

fn parse_log_format(value: &str) -> Option<LogFormat> {
    match value.to_lowercase().as_str() {
        "text" => Some(LogFormat::Text),
        "json" => Some(LogFormat::Json),
        "compact" => Some(LogFormat::Compact),
        _ => None,
    }
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads configuration from a file with default settings.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<GatewayConfig> {
    ConfigLoader::new().load(path)
}

/// Loads configuration from a string with the given format.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<GatewayConfig> {
    ConfigLoader::new().load_from_str(content, format)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DriverKind, PayloadFormatConfig};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::Builder;

    const YAML: &str = r#"
gateway:
  id: line-7
logging:
  level: debug
  format: json
drivers:
  - id: plc1
    type: opcua
    reconnect_delay_ms: 2000
    subscribe_on_startup:
      - Opc/plc1/Path/Objects/Line/+/Speed
    opcua:
      endpoint: opc.tcp://10.0.0.5:4840
      write:
        queue_size: 500
        block_size: 50
        with_time: true
  - id: broker
    type: mqtt
    mqtt:
      host: mqtt.local
      qos: 1
      payload_format: raw
"#;

    fn temp_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.YAML")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")).unwrap(), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")).unwrap(), ConfigFormat::Json);
        assert!(ConfigFormat::from_path(Path::new("a.ini")).is_err());
    }

    #[test]
    fn test_load_yaml_file() {
        let file = temp_file(".yaml", YAML);
        let config = ConfigLoader::new().with_env_vars(false).load(file.path()).unwrap();

        assert_eq!(config.gateway.id, "line-7");
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.drivers.len(), 2);

        let plc = config.get_driver("plc1").unwrap();
        assert_eq!(plc.kind, DriverKind::Opcua);
        assert_eq!(plc.reconnect_delay(), Duration::from_secs(2));
        let opcua = plc.opcua.as_ref().unwrap();
        assert_eq!(opcua.write.block_size, 50);
        assert!(opcua.write.with_time);
        assert_eq!(opcua.write.poll_timeout_ms, 1000);
        assert_eq!(opcua.address_cache.maximum_size, 1000);
        assert!(opcua.monitoring.discard_oldest);

        let broker = config.get_driver("broker").unwrap().mqtt_or_default();
        assert_eq!(broker.host, "mqtt.local");
        assert_eq!(broker.port, 1883);
        assert_eq!(broker.qos, 1);
        assert_eq!(broker.payload_format, PayloadFormatConfig::Raw);
    }

    #[test]
    fn test_load_toml_and_json() {
        let toml = r#"
[gateway]
id = "gw"

[[drivers]]
id = "broker"
type = "mqtt"
enabled = false
"#;
        let config = load_config_str(toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.gateway.id, "gw");
        assert!(!config.drivers[0].enabled);
        assert_eq!(config.enabled_drivers().count(), 0);

        let json = r#"{"drivers": [{"id": "plc", "type": "opcua", "opcua": {"endpoint": "opc.tcp://plc:4840"}}]}"#;
        let file = temp_file(".json", json);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.drivers[0].id, "plc");
        assert_eq!(config.bus.channel_capacity, 1024);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let json = r#"{"gateway": {"id": "gw", "name": "extra"}}"#;
        let err = load_config_str(json, ConfigFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::Serialization { .. }));
    }

    #[test]
    fn test_parse_error_names_the_file() {
        let file = temp_file(".toml", "gateway = [");
        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config("/nonexistent/tagway.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_validation_runs_after_load() {
        let json = r#"{"drivers": [{"id": "plc", "type": "opcua"}]}"#;
        let err = load_config_str(json, ConfigFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_placeholders() {
        env::set_var("TAGWAY_TEST_PLACEHOLDER_HOST", "broker.plant");
        let resolved =
            resolve_placeholders("host: ${TAGWAY_TEST_PLACEHOLDER_HOST}, port: ${TAGWAY_TEST_UNSET_PORT:1884}")
                .unwrap();
        assert_eq!(resolved, "host: broker.plant, port: 1884");

        assert_eq!(resolve_placeholders("cost: ${oops").unwrap(), "cost: ${oops");

        let err = resolve_placeholders("${TAGWAY_TEST_UNSET_REQUIRED}").unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarNotFound { .. }));
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("TAGWAYTEST_GATEWAY_ID", "from-env");
        env::set_var("TAGWAYTEST_DRIVERS_BROKER_ENABLED", "false");
        let loader = ConfigLoader::new().with_env_prefix("TAGWAYTEST");
        let config = loader.load_from_str(YAML, ConfigFormat::Yaml).unwrap();

        assert_eq!(config.gateway.id, "from-env");
        assert!(!config.get_driver("broker").unwrap().enabled);
        assert!(config.get_driver("plc1").unwrap().enabled);
    }
}
