// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use serde_json::json;
use tagway_config::GatewayConfig;

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::{BinError, BinResult};

/// Returns the summary and warnings for a valid configuration.
pub fn validation_report(config: &GatewayConfig) -> (serde_json::Value, Vec<String>) {
    let mut warnings = Vec::new();

    if config.drivers.is_empty() {
        warnings.push("No drivers configured".to_string());
    }
    for driver in &config.drivers {
        if !driver.enabled {
            warnings.push(format!("Driver '{}' is disabled", driver.id));
        }
    }

    let drivers: Vec<serde_json::Value> = config
        .drivers
        .iter()
        .map(|d| {
            json!({
                "id": d.id,
                "type": d.kind,
                "enabled": d.enabled,
                "startup_topics": d.subscribe_on_startup.len(),
            })
        })
        .collect();

    let summary = json!({
        "gateway_id": config.gateway.id,
        "request_timeout_ms": config.bus.request_timeout_ms,
        "channel_capacity": config.bus.channel_capacity,
        "drivers": drivers,
    });
    (summary, warnings)
}

/// Validates the configuration file and prints the result.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let config_path = &cli.config;
    let config = tagway_config::load_config(config_path)
        .map_err(|e| BinError::from(e).context("configuration validation failed"))?;
    let (summary, warnings) = validation_report(&config);

    match args.format {
        OutputFormat::Text => {
            println!("Configuration is valid: {}", config_path.display());
            println!();
            println!("Summary:");
            println!("  Gateway ID: {}", config.gateway.id);
            println!("  Drivers: {}", config.drivers.len());
            for driver in &config.drivers {
                println!(
                    "    - {} ({:?}, {})",
                    driver.id,
                    driver.kind,
                    if driver.enabled { "enabled" } else { "disabled" }
                );
            }

            if !warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }

            if args.show_config {
                println!();
                println!("Parsed configuration:");
                let text = serde_json::to_string_pretty(&config)?;
                println!("{}", text);
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "valid": true,
                "config_path": config_path.display().to_string(),
                "summary": summary,
                "warnings": warnings,
                "config": if args.show_config { Some(&config) } else { None },
            });
            let text = serde_json::to_string_pretty(&output)?;
            println!("{}", text);
        }
    }

    Ok(())
}
