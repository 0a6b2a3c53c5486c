//! Configuration structs with defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name of the config inside its directory.
pub const CONFIG_FILE: &str = "server.ron";

/// Size of the fixed frame header on the wire.
const FRAME_HEADER_LEN: usize = 22;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listener and drain-loop settings.
    pub server: ServerSection,
    /// Framing and socket settings.
    pub net: NetConfig,
    /// Logging settings.
    pub log: LogConfig,
}

/// Listener and drain-loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    /// `host:port` to listen on. Bracketed IPv6 literals are accepted.
    pub bind_addr: String,
    /// Id reported to the application with every connection event.
    pub server_id: i32,
    /// Maximum concurrent client sessions.
    pub max_clients: usize,
    /// Socket I/O worker threads.
    pub thread_count: usize,
    /// Drain passes per second.
    pub tick_rate_hz: u32,
    /// High half of every client id this server assigns.
    pub client_id_namespace: u64,
}

/// Framing and socket settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetConfig {
    /// Largest accepted frame body in bytes.
    pub max_frame_body: u32,
    /// Largest amount of unframed data buffered per session, in bytes.
    pub max_recv_buffer: usize,
    /// Disable Nagle's algorithm on client sockets.
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive on client sockets.
    pub keepalive_enabled: bool,
    /// Idle seconds before the first keepalive probe.
    pub keepalive_idle_secs: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive (e.g., "info", "debug,tidegate_net=trace").
    pub level: String,
    /// Also write JSON logs to the log directory.
    pub file_logging: bool,
}

// --- Default implementations ---

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7777".to_string(),
            server_id: 1,
            max_clients: 1024,
            thread_count: 4,
            tick_rate_hz: 30,
            client_id_namespace: 0,
        }
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            // 1 MiB frames including the 22-byte header.
            max_frame_body: (1 << 20) - 22,
            max_recv_buffer: 1 << 20,
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle_secs: 60,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: false,
        }
    }
}

/// Per-user config directory, falling back to the working directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("tidegate"))
        .unwrap_or_else(|| PathBuf::from("."))
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::WriteError)
    }

    /// Re-read the file: `Some(new_config)` if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let contents =
            std::fs::read_to_string(config_dir.join(CONFIG_FILE)).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(bool, &'static str, &'static str); 5] = [
            (
                self.server.bind_addr.is_empty(),
                "server.bind_addr",
                "must not be empty",
            ),
            (
                self.server.max_clients == 0,
                "server.max_clients",
                "must be at least 1",
            ),
            (
                self.server.thread_count == 0,
                "server.thread_count",
                "must be at least 1",
            ),
            (
                self.server.tick_rate_hz == 0,
                "server.tick_rate_hz",
                "must be at least 1",
            ),
            (
                self.net.max_recv_buffer < FRAME_HEADER_LEN + self.net.max_frame_body as usize,
                "net.max_recv_buffer",
                "must hold at least one full frame (header plus body)",
            ),
        ];

        match checks.into_iter().find(|(bad, _, _)| *bad) {
            Some((_, field, reason)) => Err(ConfigError::Invalid { field, reason }),
            None => Ok(()),
        }
    }
}
