//! Core orchestration engine for devstate.
//!
//! This crate ties the schema and runtime layers together into the
//! `Orchestrator`: depth-first dependency resolution of named states, with a
//! pre-check short-circuit, sequential actions, and a bounded readiness poll
//! per state. Progress is reported through `EventSink` implementations and
//! recorded per run by the `Tracker`.

pub mod events;
pub mod orchestrator;
pub mod tracker;

pub use events::{CheckPhase, Event, EventSink, FanoutSink, MemorySink, NullSink, TracingSink};
pub use orchestrator::{Orchestrator, RunContext, RunReport};
pub use tracker::{ActionResult, ActionStatus, RunSummary, StateResult, StateStatus, Tracker};

use devstate_runtime::ActionFailure;
use devstate_schema::{ConfigError, StateName};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown state '{0}'")]
    UnknownState(StateName),
    #[error("invalid state '{state}': {reason}")]
    InvalidStateConfig { state: StateName, reason: String },
    #[error("dependency cycle detected: {}", format_path(.path))]
    CycleDetected { path: Vec<StateName> },
    #[error("dependency '{dependency}' failed")]
    DependencyFailed {
        state: StateName,
        dependency: StateName,
        #[source]
        source: Box<ResolveError>,
    },
    #[error("action {index} ('{label}') failed: {failure}")]
    ActionFailed {
        state: StateName,
        index: usize,
        label: String,
        failure: ActionFailure,
    },
    #[error("'{state}' not ready after {elapsed_secs}s ({attempts} attempts) waiting on {probe}")]
    ReadinessTimeout {
        state: StateName,
        probe: String,
        attempts: u32,
        elapsed_secs: u64,
    },
    #[error("'{state}' not ready: retries exceeded after {attempts} attempts waiting on {probe}")]
    ReadinessRetriesExhausted {
        state: StateName,
        probe: String,
        attempts: u32,
    },
}

impl ResolveError {
    pub(crate) fn invalid(state: &StateName, err: ConfigError) -> Self {
        let reason = match err {
            ConfigError::InvalidState { reason, .. } => reason,
            other => other.to_string(),
        };
        ResolveError::InvalidStateConfig {
            state: state.clone(),
            reason,
        }
    }

    /// The innermost error, following `DependencyFailed` links.
    pub fn root_cause(&self) -> &ResolveError {
        match self {
            ResolveError::DependencyFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Chain of states from this error down to the root cause.
    pub fn failure_path(&self) -> Vec<&StateName> {
        let mut path = Vec::new();
        let mut current = self;
        while let ResolveError::DependencyFailed {
            state,
            dependency,
            source,
        } = current
        {
            path.push(state);
            if !matches!(**source, ResolveError::DependencyFailed { .. }) {
                path.push(dependency);
            }
            current = &**source;
        }
        path
    }

    /// One-line account of the failure: the chain of states down to the
    /// root cause, followed by the root cause itself.
    ///
    /// `C -> B -> A: action 1 ('exit 4') failed: exited with code 4`
    pub fn report(&self) -> String {
        let path = self.failure_path();
        if path.is_empty() {
            return self.to_string();
        }
        let names: Vec<&str> = path.into_iter().map(StateName::as_str).collect();
        format!("{}: {}", names.join(" -> "), self.root_cause())
    }
}

fn format_path(path: &[StateName]) -> String {
    path.iter()
        .map(StateName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}
