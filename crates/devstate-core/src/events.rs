//! Lifecycle events emitted by the orchestrator and the sinks that consume them.
//!
//! Sinks are fire-and-forget: `emit` returns nothing, and the orchestrator's
//! control flow never depends on what a sink does with an event.

use crate::tracker::RunSummary;
use devstate_schema::{ActionKind, StateName};
use serde::Serialize;
use std::sync::Mutex;
use tracing::{info, warn};

/// Which readiness evaluation a check event belongs to.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckPhase {
    PreCheck,
    Wait,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    StateStarted {
        state: StateName,
        needs: Vec<StateName>,
    },
    CheckPerformed {
        state: StateName,
        phase: CheckPhase,
        kind: String,
        detail: String,
    },
    CheckResult {
        state: StateName,
        phase: CheckPhase,
        ready: bool,
        detail: String,
    },
    ActionsStarted {
        state: StateName,
        count: usize,
    },
    ActionStarted {
        state: StateName,
        index: usize,
        kind: ActionKind,
        command: String,
        description: Option<String>,
    },
    ActionCompleted {
        state: StateName,
        index: usize,
        success: bool,
        duration_secs: f64,
        error: Option<String>,
    },
    PollAttempt {
        state: StateName,
        attempt: u32,
        ready: bool,
        streak: u32,
        detail: String,
    },
    StateCompleted {
        state: StateName,
        success: bool,
        already_ready: bool,
        duration_secs: f64,
        error: Option<String>,
    },
    RunSummary(RunSummary),
    Fatal {
        message: String,
    },
}

impl Event {
    /// Short name of the event, as used in the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Event::StateStarted { .. } => "state_started",
            Event::CheckPerformed { .. } => "check_performed",
            Event::CheckResult { .. } => "check_result",
            Event::ActionsStarted { .. } => "actions_started",
            Event::ActionStarted { .. } => "action_started",
            Event::ActionCompleted { .. } => "action_completed",
            Event::PollAttempt { .. } => "poll_attempt",
            Event::StateCompleted { .. } => "state_completed",
            Event::RunSummary(_) => "run_summary",
            Event::Fatal { .. } => "fatal",
        }
    }
}

pub trait EventSink {
    fn emit(&self, event: &Event);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &Event) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::StateStarted { state, needs } => {
                info!("state '{state}' started (needs: {})", join(needs));
            }
            Event::CheckPerformed {
                state, kind, detail, ..
            } => info!("state '{state}': checking {kind} '{detail}'"),
            Event::CheckResult {
                state, ready, detail, ..
            } => info!("state '{state}': ready={ready} ({detail})"),
            Event::ActionsStarted { state, count } => {
                info!("state '{state}': running {count} action(s)");
            }
            Event::ActionStarted {
                state,
                index,
                command,
                ..
            } => info!("state '{state}': action {index} '{command}'"),
            Event::ActionCompleted {
                state,
                index,
                success,
                duration_secs,
                error,
            } => {
                if *success {
                    info!("state '{state}': action {index} ok in {duration_secs:.2}s");
                } else {
                    warn!(
                        "state '{state}': action {index} failed in {duration_secs:.2}s: {}",
                        error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
            Event::PollAttempt {
                state,
                attempt,
                ready,
                streak,
                ..
            } => info!("state '{state}': poll {attempt} ready={ready} streak={streak}"),
            Event::StateCompleted {
                state,
                success,
                duration_secs,
                error,
                ..
            } => {
                if *success {
                    info!("state '{state}' completed in {duration_secs:.2}s");
                } else {
                    warn!(
                        "state '{state}' failed after {duration_secs:.2}s: {}",
                        error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
            Event::RunSummary(summary) => info!(
                "run for '{}' finished: success={} in {:.2}s",
                summary.target, summary.success, summary.duration_secs
            ),
            Event::Fatal { message } => warn!("fatal: {message}"),
        }
    }
}

fn join(names: &[StateName]) -> String {
    if names.is_empty() {
        return "-".to_owned();
    }
    names
        .iter()
        .map(StateName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Event names in emission order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(Event::name).collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Sends each event to several sinks in order.
#[derive(Default)]
pub struct FanoutSink<'a> {
    sinks: Vec<&'a dyn EventSink>,
}

impl<'a> FanoutSink<'a> {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    #[must_use]
    pub fn with(mut self, sink: &'a dyn EventSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink<'_> {
    fn emit(&self, event: &Event) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
