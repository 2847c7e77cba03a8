use crate::alias::AliasTable;
use crate::command::build_command;
use crate::patterns::find_error_pattern;
use crate::process::{run_captured, spawn_detached};
use crate::RuntimeError;
use devstate_schema::ActionSpec;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why an action did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionFailure {
    #[error("timeout after {0}s")]
    Timeout(u64),
    #[error("exited with code {0}")]
    NonZeroExit(i32),
    #[error("output contains error pattern '{0}'")]
    ErrorPatternDetected(&'static str),
    #[error("failed to launch: {0}")]
    LaunchException(String),
}

/// Result of running one action: success is `failure.is_none()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub output: String,
    pub failure: Option<ActionFailure>,
    pub duration: Duration,
}

impl ActionOutcome {
    pub fn success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Decide success from an exit code and the combined output.
///
/// A missing exit code counts as zero. A zero exit whose output mentions an
/// error pattern is still a failure.
pub fn classify(exit_code: Option<i32>, output: &str) -> Result<(), ActionFailure> {
    match exit_code {
        Some(code) if code != 0 => Err(ActionFailure::NonZeroExit(code)),
        _ => match find_error_pattern(output) {
            Some(pattern) => Err(ActionFailure::ErrorPatternDetected(pattern)),
            None => Ok(()),
        },
    }
}

/// Runs state actions: alias resolution, launch-mode transform, optional
/// deadline, and output classification. Never retries.
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    aliases: AliasTable,
    base_dir: PathBuf,
}

impl ActionExecutor {
    pub fn new(aliases: AliasTable, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            aliases,
            base_dir: base_dir.into(),
        }
    }

    pub fn run(&self, action: &ActionSpec, state: &str) -> ActionOutcome {
        let start = Instant::now();
        let (output, failure) = match self.execute(action, state) {
            Ok(output) => (output, None),
            Err((output, failure)) => (output, Some(failure)),
        };
        let duration = start.elapsed();
        match &failure {
            None => info!("[{state}] action '{}' succeeded", action.label()),
            Some(f) => warn!("[{state}] action '{}' failed: {f}", action.label()),
        }
        ActionOutcome {
            output,
            failure,
            duration,
        }
    }

    fn execute(&self, action: &ActionSpec, state: &str) -> Result<String, (String, ActionFailure)> {
        let spec = build_command(action, &self.aliases, &self.base_dir)
            .map_err(|e| (String::new(), ActionFailure::LaunchException(e.to_string())))?;
        debug!(
            "[{state}] running {} action ({} launch): {spec}",
            action.kind, action.launch
        );

        if spec.detached {
            return spawn_detached(&spec)
                .map(|pid| format!("started detached process (pid {pid})"))
                .map_err(|e| (String::new(), ActionFailure::LaunchException(e.to_string())));
        }

        match run_captured(&spec, action.timeout()) {
            Ok(captured) => match classify(captured.exit_code, &captured.output) {
                Ok(()) => Ok(captured.output),
                Err(failure) => Err((captured.output, failure)),
            },
            Err(RuntimeError::Timeout { secs, output }) => {
                Err((output, ActionFailure::Timeout(secs)))
            }
            Err(e) => Err((String::new(), ActionFailure::LaunchException(e.to_string()))),
        }
    }
}
