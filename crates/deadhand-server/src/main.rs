//! deadhand Server: headless daemon for the beneficiary index
//!
//! Serves the HTTP API that mirrors confirmed ledger events into the index
//! and replays events that could not be mirrored at the time.
//!
//! # Usage
//!
//! ```bash
//! deadhand-server --config /path/to/deadhand-server.toml
//! deadhand-server --replay    # Replay the outbox once and exit
//! deadhand-server --validate  # Validate config and exit
//! ```

mod api;
mod config;
mod daemon;

use anyhow::{Context, Result};
use std::path::PathBuf;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = PathBuf::from("/config/deadhand-server.toml");
    let mut replay_only = false;
    let mut validate_only = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = PathBuf::from(&args[i]);
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--replay" => {
                replay_only = true;
            }
            "--validate" => {
                validate_only = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("deadhand-server {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    // Every setting has a default, so a missing file is not an error
    let mut server_config = config::ServerConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    server_config.apply_env_overrides();

    server_config
        .validate()
        .context("Configuration validation failed")?;

    std::env::set_var("RUST_LOG", &server_config.server.log_level);
    env_logger::init();

    if !config_path.exists() {
        log::warn!(
            "Config file {} not found; using defaults",
            config_path.display()
        );
    }

    if validate_only {
        println!("Configuration is valid.");
        println!("  Listen:          {}", server_config.server.listen_addr);
        println!(
            "  Data dir:        {}",
            server_config.server.data_dir.display()
        );
        println!("  Ledger:          {}", server_config.ledger.graphql_url);
        println!(
            "  Confirm timeout: {} secs",
            server_config.ledger.confirm_timeout_secs
        );
        println!(
            "  Replay interval: {} secs",
            server_config.server.replay_interval_secs
        );
        println!(
            "  Retry:           {} attempts, {}-{} ms",
            server_config.retry.max_attempts,
            server_config.retry.base_delay_ms,
            server_config.retry.max_delay_ms
        );
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;

    if replay_only {
        rt.block_on(daemon::run_replay_cycle(&server_config))?;
        log::info!("Done.");
    } else {
        let shutdown = rt.block_on(async {
            tokio::select! {
                result = daemon::run(server_config) => result,
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Received shutdown signal. Exiting…");
                    Ok(())
                }
            }
        });

        if let Err(e) = shutdown {
            log::error!("Server error: {:#}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"deadhand Server: beneficiary index daemon

USAGE:
    deadhand-server [OPTIONS]

OPTIONS:
    -c, --config <PATH>   Config file path (default: /config/deadhand-server.toml)
    --replay              Replay queued events once and exit
    --validate            Validate config file and exit
    -h, --help            Show this help message
    -V, --version         Show version

ENVIRONMENT VARIABLES (override config file):
    DEADHAND_DATA_DIR         Data directory path
    DEADHAND_LISTEN_ADDR      HTTP listen address
    DEADHAND_LOG_LEVEL        Log level (error/warn/info/debug/trace)
    DEADHAND_REPLAY_INTERVAL  Outbox replay interval in seconds
    DEADHAND_GRAPHQL_URL      Ledger GraphQL endpoint
    DEADHAND_CONFIRM_TIMEOUT  Ledger response timeout in seconds
    DEADHAND_DEBUG            Include error detail in responses (true/false)

EXAMPLES:
    # Run as daemon with config file
    deadhand-server --config /path/to/config.toml

    # Replay queued events (useful for cron jobs)
    deadhand-server --config config.toml --replay

    # Validate configuration
    deadhand-server --config config.toml --validate
"#
    );
}
