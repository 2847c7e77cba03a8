use crate::state::{ActionKind, ActionSpec, LaunchMode, ReadinessSpec, StateDeclaration};
use crate::types::StateName;
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "devstate.toml";

/// On-disk shape of `devstate.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigV1 {
    pub config_version: u32,
    #[serde(default)]
    pub target: Option<StateName>,
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub states: BTreeMap<StateName, StateSection>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StateSection {
    #[serde(default)]
    pub needs: Vec<StateName>,
    #[serde(default)]
    pub actions: Vec<ActionEntry>,
    #[serde(default)]
    pub readiness: Option<ReadinessSpec>,
}

/// An `actions` entry: either a bare command string or a table.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ActionEntry {
    Legacy(String),
    Structured(ActionSection),
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    #[default]
    Command,
    Application,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ActionSection {
    #[serde(rename = "type", default)]
    pub kind: ActionType,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub launch: Option<LaunchMode>,
}

impl ActionEntry {
    fn into_spec(self) -> ActionSpec {
        match self {
            ActionEntry::Legacy(command) => ActionSpec::legacy(command),
            ActionEntry::Structured(section) => {
                let (kind, default_launch) = match section.kind {
                    ActionType::Command => (ActionKind::Command, LaunchMode::Inline),
                    ActionType::Application => (ActionKind::Application, LaunchMode::Shell),
                };
                ActionSpec {
                    kind,
                    command: section.command,
                    args: section.args,
                    description: section.description,
                    working_dir: section.working_dir,
                    timeout_secs: section.timeout,
                    launch: section.launch.unwrap_or(default_launch),
                }
            }
        }
    }
}

/// Loaded configuration: the read-only state graph handed to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateConfig {
    pub target: Option<StateName>,
    pub aliases: BTreeMap<String, Vec<String>>,
    pub states: BTreeMap<StateName, StateDeclaration>,
    /// Directory relative working directories are resolved against.
    pub base_dir: PathBuf,
}

impl StateConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_state(mut self, decl: StateDeclaration) -> Self {
        self.states.insert(decl.name.clone(), decl);
        self
    }

    pub fn get(&self, name: &str) -> Option<&StateDeclaration> {
        self.states.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &StateName> {
        self.states.keys()
    }
}

impl ConfigV1 {
    /// Check the version and turn sections into named declarations.
    ///
    /// Per-state structural validation is left to the orchestrator, which
    /// rejects invalid states only when they are reached.
    pub fn into_config(self, base_dir: &Path) -> Result<StateConfig, ConfigError> {
        if self.config_version != 1 {
            return Err(ConfigError::UnsupportedVersion(self.config_version));
        }
        if let Some((alias, _)) = self
            .aliases
            .iter()
            .find(|(k, v)| k.trim().is_empty() || v.is_empty())
        {
            return Err(ConfigError::InvalidAlias(alias.clone()));
        }

        let states = self
            .states
            .into_iter()
            .map(|(name, section)| {
                let decl = StateDeclaration {
                    name: name.clone(),
                    needs: section.needs,
                    actions: section
                        .actions
                        .into_iter()
                        .map(ActionEntry::into_spec)
                        .collect(),
                    readiness: section.readiness,
                };
                (name, decl)
            })
            .collect();

        Ok(StateConfig {
            target: self.target,
            aliases: self.aliases,
            states,
            base_dir: base_dir.to_path_buf(),
        })
    }
}

pub fn parse_config_str(input: &str) -> Result<ConfigV1, ConfigError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<ConfigV1, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Read, parse, and convert a config file; its directory becomes the base dir.
pub fn load_config(path: &Path) -> Result<StateConfig, ConfigError> {
    let base_dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    parse_config_file(path)?.into_config(&base_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
config_version = 1
target = "frontend"

[aliases]
pnpm = ["corepack", "pnpm"]

[states.docker]
actions = ["docker compose up -d"]
[states.docker.readiness]
check_command = "docker compose ps -q db"
wait_command = "pg_isready"
max_retries = 20
retry_interval = 2
successful_retries_required = 2
max_time = 60

[states.backend]
needs = ["docker"]
[[states.backend.actions]]
command = "cargo run"
description = "start API"
working_dir = "backend"
timeout = 120
launch = "detached"
[states.backend.readiness]
wait_endpoint = "http://localhost:8080/health"

[states.frontend]
needs = ["backend"]
[[states.frontend.actions]]
type = "application"
command = "/usr/bin/code"
args = ["."]
"#;

    #[test]
    fn parses_full_config() {
        let config = parse_config_str(FULL)
            .expect("should parse")
            .into_config(Path::new("/project"))
            .expect("should convert");

        assert_eq!(config.target.as_deref(), Some("frontend"));
        assert_eq!(config.aliases["pnpm"], vec!["corepack", "pnpm"]);
        assert_eq!(config.base_dir, PathBuf::from("/project"));

        let docker = config.get("docker").unwrap();
        assert_eq!(docker.actions[0].kind, ActionKind::Legacy);
        assert_eq!(docker.actions[0].launch, LaunchMode::Inline);
        let policy = docker.poll_policy();
        assert_eq!(policy.max_retries, 20);
        assert_eq!(policy.successful_retries_required, 2);

        let backend = config.get("backend").unwrap();
        assert_eq!(backend.needs, vec![StateName::new("docker")]);
        let action = &backend.actions[0];
        assert_eq!(action.kind, ActionKind::Command);
        assert_eq!(action.launch, LaunchMode::Detached);
        assert_eq!(action.timeout_secs, 120);
        assert_eq!(action.label(), "start API");
        assert_eq!(action.working_dir.as_deref(), Some(Path::new("backend")));

        let frontend = config.get("frontend").unwrap();
        assert_eq!(frontend.actions[0].kind, ActionKind::Application);
        assert_eq!(frontend.actions[0].launch, LaunchMode::Shell);
        assert_eq!(frontend.actions[0].args, vec!["."]);

        for decl in config.states.values() {
            decl.validate().unwrap();
        }
    }

    #[test]
    fn readiness_defaults_apply() {
        let input = r#"
config_version = 1
[states.api.readiness]
wait_endpoint = "http://localhost:3000"
"#;
        let config = parse_config_str(input)
            .unwrap()
            .into_config(Path::new("."))
            .unwrap();
        let readiness = config.get("api").unwrap().readiness.clone().unwrap();
        assert_eq!(readiness.max_retries, 10);
        assert_eq!(readiness.retry_interval, 3);
        assert_eq!(readiness.successful_retries_required, 1);
        assert_eq!(readiness.max_time, 30);
    }

    #[test]
    fn rejects_unknown_fields() {
        let input = r#"
config_version = 1
[states.api]
needs = []
restart = true
"#;
        assert!(parse_config_str(input).is_err());
    }

    #[test]
    fn rejects_unknown_action_field() {
        let input = r#"
config_version = 1
[[states.api.actions]]
command = "true"
retries = 3
"#;
        assert!(parse_config_str(input).is_err());
    }

    #[test]
    fn rejects_unsupported_version() {
        let err = parse_config_str("config_version = 2")
            .unwrap()
            .into_config(Path::new("."))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedVersion(2)));
    }

    #[test]
    fn rejects_empty_alias() {
        let input = r"
config_version = 1
[aliases]
npm = []
";
        let err = parse_config_str(input)
            .unwrap()
            .into_config(Path::new("."))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAlias(a) if a == "npm"));
    }

    #[test]
    fn invalid_states_survive_loading() {
        let input = r"
config_version = 1
[states.empty]
";
        let config = parse_config_str(input)
            .unwrap()
            .into_config(Path::new("."))
            .unwrap();
        assert!(config.get("empty").unwrap().validate().is_err());
    }

    #[test]
    fn load_config_uses_file_directory_as_base() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "config_version = 1\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.base_dir, dir.path());
        assert!(config.states.is_empty());
    }

    #[test]
    fn load_config_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
