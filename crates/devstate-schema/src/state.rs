use crate::types::StateName;
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 3;
pub const DEFAULT_SUCCESSFUL_RETRIES_REQUIRED: u32 = 1;
pub const DEFAULT_MAX_TIME_SECS: u64 = 30;

/// What an action launches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// A shell command line.
    Command,
    /// An application started by path.
    Application,
    /// A bare string entry in the `actions` array.
    Legacy,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Command => write!(f, "command"),
            ActionKind::Application => write!(f, "application"),
            ActionKind::Legacy => write!(f, "legacy"),
        }
    }
}

/// How an action's process is started relative to devstate itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    /// Run to completion and capture output.
    Inline,
    /// Let the OS shell resolve and start the application path.
    Shell,
    /// Spawn an independent process and do not wait for it.
    Detached,
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchMode::Inline => write!(f, "inline"),
            LaunchMode::Shell => write!(f, "shell"),
            LaunchMode::Detached => write!(f, "detached"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionSpec {
    pub kind: ActionKind,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Seconds; 0 means unbounded.
    #[serde(default)]
    pub timeout_secs: u64,
    pub launch: LaunchMode,
}

impl ActionSpec {
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Command,
            command: command.into(),
            args: Vec::new(),
            description: None,
            working_dir: None,
            timeout_secs: 0,
            launch: LaunchMode::Inline,
        }
    }

    pub fn legacy(command: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Legacy,
            ..Self::command(command)
        }
    }

    pub fn application(path: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Application,
            launch: LaunchMode::Shell,
            ..Self::command(path)
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_owned());
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_launch(mut self, launch: LaunchMode) -> Self {
        self.launch = launch;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Human-readable label: the description if set, otherwise the command.
    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.command)
    }
}

/// What a readiness probe talks to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "target", rename_all = "lowercase")]
pub enum ProbeTarget {
    Command(String),
    Endpoint(String),
}

impl ProbeTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeTarget::Command(_) => "command",
            ProbeTarget::Endpoint(_) => "endpoint",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            ProbeTarget::Command(c) | ProbeTarget::Endpoint(c) => c,
        }
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind(), self.detail())
    }
}

/// Bounds for the poll-until-ready loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub successful_retries_required: u32,
    pub max_time: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval: Duration::from_secs(DEFAULT_RETRY_INTERVAL_SECS),
            successful_retries_required: DEFAULT_SUCCESSFUL_RETRIES_REQUIRED,
            max_time: Duration::from_secs(DEFAULT_MAX_TIME_SECS),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ReadinessSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_endpoint: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds between poll attempts.
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,
    #[serde(default = "default_successful_retries_required")]
    pub successful_retries_required: u32,
    /// Upper bound on the whole poll loop, in seconds.
    #[serde(default = "default_max_time")]
    pub max_time: u64,
}

impl Default for ReadinessSpec {
    fn default() -> Self {
        Self {
            check_command: None,
            check_endpoint: None,
            wait_command: None,
            wait_endpoint: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL_SECS,
            successful_retries_required: DEFAULT_SUCCESSFUL_RETRIES_REQUIRED,
            max_time: DEFAULT_MAX_TIME_SECS,
        }
    }
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_interval() -> u64 {
    DEFAULT_RETRY_INTERVAL_SECS
}

fn default_successful_retries_required() -> u32 {
    DEFAULT_SUCCESSFUL_RETRIES_REQUIRED
}

fn default_max_time() -> u64 {
    DEFAULT_MAX_TIME_SECS
}

impl ReadinessSpec {
    /// The one-shot pre-check. Endpoint wins when both are configured.
    pub fn pre_check(&self) -> Option<ProbeTarget> {
        pick_probe(self.check_endpoint.as_ref(), self.check_command.as_ref())
    }

    /// The poll-until-ready probe. Endpoint wins when both are configured.
    pub fn wait_probe(&self) -> Option<ProbeTarget> {
        pick_probe(self.wait_endpoint.as_ref(), self.wait_command.as_ref())
    }

    pub fn has_probe(&self) -> bool {
        self.pre_check().is_some() || self.wait_probe().is_some()
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            max_retries: self.max_retries,
            retry_interval: Duration::from_secs(self.retry_interval),
            successful_retries_required: self.successful_retries_required,
            max_time: Duration::from_secs(self.max_time),
        }
    }

    fn endpoints(&self) -> impl Iterator<Item = &String> {
        self.check_endpoint.iter().chain(self.wait_endpoint.iter())
    }

    fn probe_strings(&self) -> impl Iterator<Item = &String> {
        self.check_command
            .iter()
            .chain(self.check_endpoint.iter())
            .chain(self.wait_command.iter())
            .chain(self.wait_endpoint.iter())
    }
}

fn pick_probe(endpoint: Option<&String>, command: Option<&String>) -> Option<ProbeTarget> {
    endpoint
        .map(|e| ProbeTarget::Endpoint(e.clone()))
        .or_else(|| command.map(|c| ProbeTarget::Command(c.clone())))
}

/// A named unit of work: dependencies, actions, and an optional readiness block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateDeclaration {
    pub name: StateName,
    #[serde(default)]
    pub needs: Vec<StateName>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessSpec>,
}

impl StateDeclaration {
    pub fn new(name: impl Into<StateName>) -> Self {
        Self {
            name: name.into(),
            needs: Vec::new(),
            actions: Vec::new(),
            readiness: None,
        }
    }

    #[must_use]
    pub fn needs(mut self, deps: &[&str]) -> Self {
        self.needs = deps.iter().map(|d| StateName::from(*d)).collect();
        self
    }

    #[must_use]
    pub fn action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn readiness(mut self, readiness: ReadinessSpec) -> Self {
        self.readiness = Some(readiness);
        self
    }

    pub fn pre_check(&self) -> Option<ProbeTarget> {
        self.readiness.as_ref().and_then(ReadinessSpec::pre_check)
    }

    pub fn wait_probe(&self) -> Option<ProbeTarget> {
        self.readiness.as_ref().and_then(ReadinessSpec::wait_probe)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.readiness
            .as_ref()
            .map(ReadinessSpec::poll_policy)
            .unwrap_or_default()
    }

    /// Structural checks that must hold before anything about the state runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidState {
            state: self.name.to_string(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("state name must not be empty".to_owned()));
        }

        let has_probe = self.readiness.as_ref().is_some_and(ReadinessSpec::has_probe);
        if self.actions.is_empty() && !has_probe {
            return Err(invalid(
                "declares neither actions nor a readiness probe".to_owned(),
            ));
        }

        if self.needs.iter().any(|dep| *dep == self.name) {
            return Err(invalid("depends on itself".to_owned()));
        }

        for (i, action) in self.actions.iter().enumerate() {
            if action.command.trim().is_empty() {
                return Err(invalid(format!("action {} has an empty command", i + 1)));
            }
            if action.kind != ActionKind::Application && !action.args.is_empty() {
                return Err(invalid(format!(
                    "action {}: args are only supported for application actions",
                    i + 1
                )));
            }
        }

        if let Some(readiness) = &self.readiness {
            if readiness.probe_strings().any(|p| p.trim().is_empty()) {
                return Err(invalid("readiness probe must not be empty".to_owned()));
            }
            if let Some(bad) = readiness
                .endpoints()
                .find(|e| !(e.starts_with("http://") || e.starts_with("https://")))
            {
                return Err(invalid(format!(
                    "endpoint '{bad}' must start with http:// or https://"
                )));
            }
            if readiness.successful_retries_required == 0 {
                return Err(invalid(
                    "successful_retries_required must be at least 1".to_owned(),
                ));
            }
        }

        Ok(())
    }
}
