//! Configuration for the Tidegate server.
//!
//! Settings persist to disk as a RON file with per-section defaults, so older
//! files keep loading as fields are added. CLI flags override the file.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{CONFIG_FILE, Config, LogConfig, NetConfig, ServerSection, default_config_dir};
pub use error::ConfigError;
