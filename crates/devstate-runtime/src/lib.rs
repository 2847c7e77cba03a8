//! Process execution and readiness probing for devstate.
//!
//! This crate implements the execution layer: command alias resolution
//! (`AliasTable`), launch-mode transforms into structured process
//! descriptors (`CommandSpec`), deadline-bounded process supervision with
//! merged output capture, action success classification (`ActionExecutor`),
//! and command/HTTP readiness probes with the bounded poll loop
//! (`ReadinessProber`).

pub mod alias;
pub mod command;
pub mod executor;
pub mod patterns;
pub mod probe;
pub mod process;

pub use alias::AliasTable;
pub use command::{build_command, CommandSpec};
pub use executor::{classify, ActionExecutor, ActionFailure, ActionOutcome};
pub use patterns::{find_error_pattern, ERROR_PATTERNS};
pub use probe::{
    poll_until_ready, PollAttempt, PollFailure, PollOutcome, ProbeResult, ReadinessProber,
};
pub use process::{run_captured, spawn_detached, CapturedOutput};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to start '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("working directory does not exist: {}", .0.display())]
    MissingWorkingDir(PathBuf),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("timeout after {secs}s")]
    Timeout { secs: u64, output: String },
}
