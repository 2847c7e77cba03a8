use crate::alias::AliasTable;
use crate::RuntimeError;
use devstate_schema::{ActionKind, ActionSpec, LaunchMode};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Structured description of a process to start.
///
/// User text is never re-quoted into another command line: shell commands
/// travel as a single `-c` argument and application arguments as argv.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Appended after `args` exactly as written, with no quoting applied.
    /// Used for `cmd` command lines, whose parsing differs from argv rules.
    pub raw_args: Vec<String>,
    /// Start in its own process group (or console) and do not wait for it.
    pub detached: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            raw_args: Vec::new(),
            detached: false,
        }
    }

    /// Run a command line through the platform shell.
    pub fn shell(line: &str) -> Self {
        if cfg!(windows) {
            Self::new("cmd").args(["/C", line])
        } else {
            Self::new("sh").args(["-c", line])
        }
    }

    /// Start an application by path, letting the shell resolve it.
    ///
    /// On Windows this is `cmd /C start "" /WAIT ...`; `/WAIT` keeps the
    /// exit status of the application, as for an inline launch.
    pub fn via_shell(path: &str, app_args: &[String]) -> Self {
        if cfg!(windows) {
            Self::new("cmd")
                .args(["/C"])
                .raw_arg(cmd_start_line(path, app_args))
        } else {
            Self::new("sh")
                .args(["-c", "exec \"$0\" \"$@\"", path])
                .args(app_args)
        }
    }

    #[must_use]
    pub fn raw_arg(mut self, raw: impl Into<String>) -> Self {
        self.raw_args.push(raw.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_owned(), value.to_owned()));
        self
    }

    #[must_use]
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            for raw in &self.raw_args {
                cmd.raw_arg(raw);
            }
        }
        #[cfg(not(windows))]
        cmd.args(&self.raw_args);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", crate::alias::shell_quote(arg))?;
        }
        for raw in &self.raw_args {
            write!(f, " {raw}")?;
        }
        Ok(())
    }
}

/// `start "" /WAIT "<path>" <args>` for `cmd /C`. The empty title keeps
/// `start` from taking a quoted path as the window title.
fn cmd_start_line(path: &str, app_args: &[String]) -> String {
    let mut line = format!("start \"\" /WAIT \"{path}\"");
    for arg in app_args {
        line.push(' ');
        line.push_str(&windows_quote(arg));
    }
    line
}

/// Quote one argument for the Microsoft C runtime argv parser, also
/// quoting anything `cmd` would treat as an operator.
fn windows_quote(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '&' | '|' | '<' | '>' | '^' | '(' | ')'));
    if !needs_quotes {
        return arg.to_owned();
    }
    let mut quoted = String::from("\"");
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.push_str(&"\\".repeat(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.push_str(&"\\".repeat(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.push_str(&"\\".repeat(backslashes * 2));
    quoted.push('"');
    quoted
}

/// Resolve an action's working directory against `base_dir`.
pub fn resolve_working_dir(
    action: &ActionSpec,
    base_dir: &Path,
) -> Result<Option<PathBuf>, RuntimeError> {
    let Some(dir) = &action.working_dir else {
        return Ok(None);
    };
    let resolved = if dir.is_absolute() {
        dir.clone()
    } else {
        base_dir.join(dir)
    };
    if !resolved.is_dir() {
        return Err(RuntimeError::MissingWorkingDir(resolved));
    }
    Ok(Some(resolved))
}

/// Turn an action into a process descriptor: alias resolution, then the
/// launch-mode transform. Actions without a working directory run in
/// `base_dir`.
pub fn build_command(
    action: &ActionSpec,
    aliases: &AliasTable,
    base_dir: &Path,
) -> Result<CommandSpec, RuntimeError> {
    let working_dir =
        resolve_working_dir(action, base_dir)?.unwrap_or_else(|| base_dir.to_path_buf());

    let spec = match action.kind {
        ActionKind::Application => {
            let argv = aliases.resolve_argv(&[action.command.clone()]);
            let (program, alias_args) = argv
                .split_first()
                .ok_or_else(|| RuntimeError::InvalidCommand("empty application path".to_owned()))?;
            let app_args: Vec<String> = alias_args.iter().chain(&action.args).cloned().collect();
            match action.launch {
                LaunchMode::Inline => CommandSpec::new(program.as_str()).args(app_args),
                LaunchMode::Shell => CommandSpec::via_shell(program, &app_args),
                LaunchMode::Detached => CommandSpec::new(program.as_str()).args(app_args).detached(),
            }
        }
        ActionKind::Command | ActionKind::Legacy => {
            let line = aliases.resolve_line(&action.command);
            match action.launch {
                LaunchMode::Inline | LaunchMode::Shell => CommandSpec::shell(&line),
                LaunchMode::Detached => CommandSpec::shell(&line).detached(),
            }
        }
    };

    Ok(spec.current_dir(working_dir))
}
