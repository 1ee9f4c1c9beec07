// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use upsd::config::{Config, UpsdConf};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = Config::parse();

    println!("Network UPS Tools upsd {}", upsd::UPS_VERSION);
    if config.version {
        return;
    }

    let default_level = match config.debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    // -c signals the already-running instance and exits.
    if let Some(cmd) = config.signal {
        let result = UpsdConf::load(&config.confpath)
            .and_then(|conf| upsd::pidfile::signal_running(&conf.statepath.join("upsd.pid"), cmd));

        if let Err(e) = result {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
        return;
    }

    let local = tokio::task::LocalSet::new();
    if let Err(e) = local.run_until(upsd::run(config)).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
