//! State declarations and configuration for devstate.
//!
//! This crate defines the schema layer: the `StateName` identifier, state
//! declarations with their actions and readiness probes (`StateDeclaration`,
//! `ActionSpec`, `ReadinessSpec`), poll bounds (`PollPolicy`), and parsing of
//! the `devstate.toml` file into a read-only `StateConfig`.

pub mod config;
pub mod state;
pub mod types;

pub use config::{
    load_config, parse_config_file, parse_config_str, ActionEntry, ActionSection, ConfigV1,
    StateConfig, StateSection, CONFIG_FILE_NAME,
};
pub use state::{
    ActionKind, ActionSpec, LaunchMode, PollPolicy, ProbeTarget, ReadinessSpec, StateDeclaration,
};
pub use types::StateName;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported config_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("alias '{0}' must have a non-empty name and replacement")]
    InvalidAlias(String),
    #[error("invalid state '{state}': {reason}")]
    InvalidState { state: String, reason: String },
}
