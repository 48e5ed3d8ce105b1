// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;

use clap::Parser;
use tracing::error;

use ttyhost::config::Config;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    // The coordinator reads this launch line to verify the host started
    // for the right session.
    println!(
        "tty-host {} starting for session {}",
        env!("CARGO_PKG_VERSION"),
        config.session
    );
    let _ = std::io::stdout().flush();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    match ttyhost::run::run(config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("fatal: {e:#}");
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
