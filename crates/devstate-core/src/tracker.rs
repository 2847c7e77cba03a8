use chrono::{DateTime, Utc};
use devstate_schema::{ActionKind, ActionSpec, StateName};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StateStatus {
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for StateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateStatus::Processing => write!(f, "processing"),
            StateStatus::Completed => write!(f, "completed"),
            StateStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Executing,
    Success,
    Failed,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Executing => write!(f, "executing"),
            ActionStatus::Success => write!(f, "success"),
            ActionStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActionResult {
    /// 1-based position within the state's action list.
    pub index: usize,
    pub kind: ActionKind,
    pub command: String,
    pub description: Option<String>,
    pub status: ActionStatus,
    pub duration_secs: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StateResult {
    pub name: StateName,
    pub status: StateStatus,
    pub needs: Vec<StateName>,
    pub actions: Vec<ActionResult>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub error: Option<String>,
    /// The pre-check found the state ready, so no actions ran.
    pub already_ready: bool,
    #[serde(skip)]
    started: Instant,
}

impl StateResult {
    fn new(name: &StateName, needs: &[StateName]) -> Self {
        Self {
            name: name.clone(),
            status: StateStatus::Processing,
            needs: needs.to_vec(),
            actions: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            duration_secs: None,
            error: None,
            already_ready: false,
            started: Instant::now(),
        }
    }

    fn finish(&mut self, status: StateStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.ended_at = Some(Utc::now());
        self.duration_secs = Some(self.started.elapsed().as_secs_f64());
    }

    pub fn succeeded_actions(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.status == ActionStatus::Success)
            .count()
    }
}

/// Immutable snapshot of a run, handed to the presentation layer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub target: StateName,
    pub success: bool,
    pub error: Option<String>,
    pub duration_secs: f64,
    pub states: Vec<StateResult>,
}

impl RunSummary {
    pub fn state(&self, name: &str) -> Option<&StateResult> {
        self.states.iter().find(|s| s.name == name)
    }
}

/// Per-run bookkeeping of state and action timing.
///
/// Purely observational: updates for unknown states or actions are ignored
/// rather than treated as errors.
#[derive(Debug, Default)]
pub struct Tracker {
    states: Vec<StateResult>,
    index: HashMap<StateName, usize>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state_mut(&mut self, name: &str) -> Option<&mut StateResult> {
        let i = *self.index.get(name)?;
        self.states.get_mut(i)
    }

    pub fn get(&self, name: &str) -> Option<&StateResult> {
        self.index.get(name).and_then(|&i| self.states.get(i))
    }

    pub fn begin_state(&mut self, name: &StateName, needs: &[StateName]) {
        let result = StateResult::new(name, needs);
        match self.index.get(name.as_str()) {
            Some(&i) => self.states[i] = result,
            None => {
                self.index.insert(name.clone(), self.states.len());
                self.states.push(result);
            }
        }
    }

    pub fn begin_action(&mut self, state: &str, index: usize, action: &ActionSpec) {
        if let Some(s) = self.state_mut(state) {
            s.actions.push(ActionResult {
                index,
                kind: action.kind,
                command: action.command.clone(),
                description: action.description.clone(),
                status: ActionStatus::Executing,
                duration_secs: 0.0,
                error: None,
            });
        }
    }

    pub fn finish_action(
        &mut self,
        state: &str,
        index: usize,
        duration: Duration,
        error: Option<String>,
    ) {
        let Some(action) = self
            .state_mut(state)
            .and_then(|s| s.actions.iter_mut().find(|a| a.index == index))
        else {
            return;
        };
        action.status = if error.is_some() {
            ActionStatus::Failed
        } else {
            ActionStatus::Success
        };
        action.duration_secs = duration.as_secs_f64();
        action.error = error;
    }

    pub fn complete_state(&mut self, name: &str, already_ready: bool) {
        if let Some(s) = self.state_mut(name) {
            s.already_ready = already_ready;
            s.finish(StateStatus::Completed, None);
        }
    }

    pub fn fail_state(&mut self, name: &str, error: &str) {
        if let Some(s) = self.state_mut(name) {
            s.finish(StateStatus::Failed, Some(error.to_owned()));
        }
    }

    /// States in the order they started.
    pub fn states(&self) -> &[StateResult] {
        &self.states
    }

    pub fn summary(&self, target: &str, error: Option<String>, elapsed: Duration) -> RunSummary {
        RunSummary {
            target: StateName::from(target),
            success: error.is_none(),
            error,
            duration_secs: elapsed.as_secs_f64(),
            states: self.states.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_lifecycle_is_recorded() {
        let mut t = Tracker::new();
        let name = StateName::new("db");
        t.begin_state(&name, &[StateName::new("net")]);
        assert_eq!(t.get("db").unwrap().status, StateStatus::Processing);

        t.begin_action("db", 1, &ActionSpec::command("docker start db"));
        assert_eq!(t.get("db").unwrap().actions[0].status, ActionStatus::Executing);
        t.finish_action("db", 1, Duration::from_millis(1500), None);
        t.complete_state("db", false);

        let s = t.get("db").unwrap();
        assert_eq!(s.status, StateStatus::Completed);
        assert_eq!(s.actions[0].status, ActionStatus::Success);
        assert!((s.actions[0].duration_secs - 1.5).abs() < f64::EPSILON);
        assert!(s.duration_secs.is_some());
        assert!(s.ended_at.is_some());
        assert_eq!(s.succeeded_actions(), 1);
        assert!(!s.already_ready);
    }

    #[test]
    fn failure_keeps_error_text() {
        let mut t = Tracker::new();
        t.begin_state(&StateName::new("api"), &[]);
        t.begin_action("api", 1, &ActionSpec::command("false"));
        t.finish_action("api", 1, Duration::ZERO, Some("exited with code 1".to_owned()));
        t.fail_state("api", "action failed");

        let s = t.get("api").unwrap();
        assert_eq!(s.status, StateStatus::Failed);
        assert_eq!(s.error.as_deref(), Some("action failed"));
        assert_eq!(s.actions[0].status, ActionStatus::Failed);
        assert_eq!(s.actions[0].error.as_deref(), Some("exited with code 1"));
    }

    #[test]
    fn unknown_names_are_ignored() {
        let mut t = Tracker::new();
        t.begin_action("ghost", 1, &ActionSpec::command("true"));
        t.finish_action("ghost", 1, Duration::ZERO, None);
        t.complete_state("ghost", true);
        t.fail_state("ghost", "x");
        assert!(t.states().is_empty());
    }

    #[test]
    fn summary_preserves_start_order() {
        let mut t = Tracker::new();
        for name in ["c", "a", "b"] {
            t.begin_state(&StateName::new(name), &[]);
            t.complete_state(name, true);
        }
        let summary = t.summary("b", None, Duration::from_secs(2));
        assert!(summary.success);
        let names: Vec<&str> = summary.states.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["c", "a", "b"]);
        assert!(summary.state("a").unwrap().already_ready);
    }

    #[test]
    fn summary_serializes_statuses_lowercase() {
        let mut t = Tracker::new();
        t.begin_state(&StateName::new("x"), &[]);
        t.fail_state("x", "boom");
        let json = serde_json::to_value(t.summary("x", Some("boom".to_owned()), Duration::ZERO))
            .unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["states"][0]["status"], "failed");
        assert!(json["states"][0].get("started").is_none());
    }
}
