//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Tidegate server command-line arguments.
///
/// CLI values override settings loaded from the config file.
#[derive(Parser, Debug, Default)]
#[command(name = "tidegate", about = "TCP session gateway for game servers")]
pub struct CliArgs {
    /// Listen address, `host:port` or `[v6]:port`.
    #[arg(long)]
    pub bind: Option<String>,

    /// Server id reported with connection events.
    #[arg(long)]
    pub server_id: Option<i32>,

    /// Maximum concurrent clients.
    #[arg(long)]
    pub max_clients: Option<usize>,

    /// Socket I/O worker threads.
    #[arg(long)]
    pub threads: Option<usize>,

    /// Drain passes per second.
    #[arg(long)]
    pub tick_rate: Option<u32>,

    /// Log level (error, warn, info, debug, trace) or a full filter directive.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref bind) = args.bind {
            self.server.bind_addr = bind.clone();
        }
        if let Some(id) = args.server_id {
            self.server.server_id = id;
        }
        if let Some(max) = args.max_clients {
            self.server.max_clients = max;
        }
        if let Some(threads) = args.threads {
            self.server.thread_count = threads;
        }
        if let Some(rate) = args.tick_rate {
            self.server.tick_rate_hz = rate;
        }
        if let Some(ref level) = args.log_level {
            self.log.level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            bind: Some("127.0.0.1:9100".to_string()),
            threads: Some(2),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.server.bind_addr, "127.0.0.1:9100");
        assert_eq!(config.server.thread_count, 2);
        // Non-overridden fields retain defaults
        assert_eq!(config.server.max_clients, 1024);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::try_parse_from([
            "tidegate",
            "--bind",
            "[::1]:8080",
            "--server-id",
            "3",
            "--tick-rate",
            "60",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.bind.as_deref(), Some("[::1]:8080"));
        assert_eq!(args.server_id, Some(3));
        assert_eq!(args.tick_rate, Some(60));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.config.is_none());
    }
}
