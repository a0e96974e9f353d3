// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! tagway - topic-addressed industrial gateway.

use tagway_bin::error::report_error;
use tagway_bin::{commands, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    if let Err(error) = commands::execute(cli).await {
        report_error(&error);
        std::process::exit(error.exit_code());
    }
}
