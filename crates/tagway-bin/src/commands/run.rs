// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `run` command.

use tracing::info;

use crate::cli::Cli;
use crate::error::BinResult;
use crate::logging::init_logging;
use crate::runtime::RuntimeBuilder;

/// Loads the configuration, sets up logging and runs the gateway.
pub async fn run(cli: &Cli) -> BinResult<()> {
    let config = tagway_config::load_config(&cli.config)?;

    init_logging(
        cli.effective_log_level(config.logging.level.as_str()),
        cli.effective_log_format(config.logging.format),
    )?;
    info!(config = %cli.config.display(), "Configuration loaded");

    RuntimeBuilder::new().config(config).build()?.run().await
}
