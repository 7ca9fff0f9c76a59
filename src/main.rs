//! The server's command-line entry point, trimmed from the teacher's
//! `main.rs`: no `--warden` mode (clustering/failover is out of scope),
//! same `--version`/`--config`/`--port` surface and reloadable log filter.

use std::env;
use std::sync::Arc;

use anyhow::Result;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

use kvcored::config::Config;
use kvcored::server;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("kvcored version {VERSION}");
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    let mut config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        match args.get(port_index + 1).map(|s| s.parse::<u16>()) {
            Some(Ok(port)) => config.port = port,
            Some(Err(_)) => {
                eprintln!("Invalid port number: {}", args[port_index + 1]);
                std::process::exit(1);
            }
            None => {
                eprintln!("--port flag requires a value");
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();
    // Held for a future `CONFIG SET loglevel` handler; unused today beyond
    // proving the filter is swappable without restarting the process.
    let _reload_handle = Arc::new(reload_handle);

    if let Err(e) = server::run(config) {
        error!("server runtime error: {e}");
        return Err(e);
    }

    Ok(())
}
