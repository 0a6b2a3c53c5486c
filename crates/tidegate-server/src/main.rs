//! Tidegate echo server: loads config, starts the gateway and runs the drain
//! loop until Ctrl-C.

mod echo;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use tidegate_config::{CliArgs, Config, default_config_dir};
use tidegate_net::NetServer;

fn main() {
    let args = CliArgs::parse();
    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);

    let mut config = match Config::load_or_create(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_dir.display());
            std::process::exit(1);
        }
    };
    config.apply_cli_overrides(&args);
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    tidegate_log::init_logging(Some(&config_dir.join("logs")), Some(&config));

    let (server_config, handlers, outbox) = echo::build(&config);
    let mut server = match NetServer::start(server_config, handlers) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to start server on {}: {e}", config.server.bind_addr);
            std::process::exit(1);
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    if let Some(handle) = server.runtime_handle() {
        let stop = Arc::clone(&stop);
        handle.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received, shutting down");
            }
            stop.store(true, Ordering::Release);
        });
    }

    let tick = Duration::from_secs(1) / config.server.tick_rate_hz.max(1);
    while !stop.load(Ordering::Acquire) {
        let started = Instant::now();
        server.update();
        echo::flush(&outbox, server.gateway());
        if let Some(rest) = tick.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    server.shutdown();
}
