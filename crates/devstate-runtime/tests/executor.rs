//! Action executor tests against real shell processes.
#![cfg(unix)]

use devstate_runtime::{ActionExecutor, ActionFailure, AliasTable};
use devstate_schema::{ActionSpec, LaunchMode};
use std::fs;
use std::time::{Duration, Instant};

fn executor(base: &std::path::Path) -> ActionExecutor {
    ActionExecutor::new(AliasTable::new(), base)
}

#[test]
fn echo_succeeds_and_captures_output() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = executor(dir.path()).run(&ActionSpec::command("echo ok"), "b");
    assert!(outcome.success());
    assert_eq!(outcome.output.trim(), "ok");
}

#[test]
fn nonzero_exit_fails() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = executor(dir.path()).run(&ActionSpec::command("exit 4"), "b");
    assert_eq!(outcome.failure, Some(ActionFailure::NonZeroExit(4)));
}

#[test]
fn zero_exit_with_connection_refused_fails() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = executor(dir.path()).run(
        &ActionSpec::command("echo 'dial tcp 127.0.0.1:5432: connection REFUSED'; exit 0"),
        "db",
    );
    assert!(!outcome.success());
    assert_eq!(
        outcome.failure,
        Some(ActionFailure::ErrorPatternDetected("connection refused"))
    );
}

#[test]
fn stderr_counts_toward_classification() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = executor(dir.path()).run(&ActionSpec::command("echo 'Unable to bind' >&2"), "x");
    assert_eq!(
        outcome.failure,
        Some(ActionFailure::ErrorPatternDetected("unable"))
    );
}

#[test]
fn timeout_is_reported_distinctly() {
    let dir = tempfile::tempdir().unwrap();
    let start = Instant::now();
    let outcome = executor(dir.path()).run(&ActionSpec::command("sleep 30").with_timeout(1), "slow");
    assert_eq!(outcome.failure, Some(ActionFailure::Timeout(1)));
    assert_eq!(outcome.failure.unwrap().to_string(), "timeout after 1s");
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn working_dir_is_scoped_to_the_child() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("web")).unwrap();
    let before = std::env::current_dir().unwrap();

    let action = ActionSpec::command("touch marker").with_working_dir("web");
    let outcome = executor(dir.path()).run(&action, "web");

    assert!(outcome.success(), "{:?}", outcome.failure);
    assert!(dir.path().join("web/marker").exists());
    assert_eq!(std::env::current_dir().unwrap(), before);
}

#[test]
fn missing_working_dir_is_launch_exception() {
    let dir = tempfile::tempdir().unwrap();
    let action = ActionSpec::command("true").with_working_dir("nope");
    let outcome = executor(dir.path()).run(&action, "x");
    match outcome.failure {
        Some(ActionFailure::LaunchException(msg)) => {
            assert!(msg.contains("working directory does not exist"));
        }
        other => panic!("expected launch exception, got {other:?}"),
    }
}

#[test]
fn missing_application_fails() {
    let dir = tempfile::tempdir().unwrap();
    let action = ActionSpec::application("/nonexistent/devstate-app");
    let outcome = executor(dir.path()).run(&action, "app");
    assert!(!outcome.success());
}

#[test]
fn inline_application_launch_exception() {
    let dir = tempfile::tempdir().unwrap();
    let action = ActionSpec::application("/nonexistent/devstate-app").with_launch(LaunchMode::Inline);
    let outcome = executor(dir.path()).run(&action, "app");
    assert!(matches!(outcome.failure, Some(ActionFailure::LaunchException(_))));
}

#[test]
fn application_via_shell_receives_args() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("app.sh");
    fs::write(&script, "#!/bin/sh\necho \"args: $1 | $2\"\n").unwrap();
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    }

    let mut action = ActionSpec::application(script.to_string_lossy());
    action.args = vec!["one".to_owned(), "two words".to_owned()];
    let outcome = executor(dir.path()).run(&action, "app");
    assert!(outcome.success(), "{:?}", outcome.failure);
    assert_eq!(outcome.output.trim(), "args: one | two words");
}

#[test]
fn alias_rewrites_leading_token() {
    let dir = tempfile::tempdir().unwrap();
    let mut aliases = AliasTable::new();
    aliases.insert("greet", vec!["echo".to_owned(), "hello".to_owned()]);
    let exec = ActionExecutor::new(aliases, dir.path());
    let outcome = exec.run(&ActionSpec::legacy("greet world"), "x");
    assert!(outcome.success());
    assert_eq!(outcome.output.trim(), "hello world");
}

#[test]
fn detached_action_returns_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let action = ActionSpec::command("sleep 5; touch late")
        .with_launch(LaunchMode::Detached)
        .with_timeout(1);
    let start = Instant::now();
    let outcome = executor(dir.path()).run(&action, "bg");
    assert!(outcome.success());
    assert!(outcome.output.contains("started detached process"));
    assert!(start.elapsed() < Duration::from_secs(3));
}
