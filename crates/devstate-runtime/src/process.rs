use crate::command::CommandSpec;
use crate::RuntimeError;
use std::io::Read;
use std::process::{Child, ExitStatus, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often a deadline-bounded wait checks on the child.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long to keep draining pipes after the child exited. Background
/// grandchildren may inherit the pipes and hold them open indefinitely.
///
/// Reader threads still blocked when the grace period ends are detached,
/// not joined: each lives until the last holder of its pipe exits. Their
/// writes stay bounded by [`MAX_CAPTURED_BYTES`].
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on captured output per process. Readers keep draining past
/// it so the child never blocks on a full pipe, but the excess is dropped.
pub(crate) const MAX_CAPTURED_BYTES: usize = 1024 * 1024;

/// Exit information and merged stdout/stderr of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    /// `None` when the platform reports no code (e.g. killed by a signal).
    pub exit_code: Option<i32>,
    pub output: String,
}

impl CapturedOutput {
    fn from_parts(status: ExitStatus, output: String) -> Self {
        Self {
            exit_code: status.code(),
            output,
        }
    }
}

fn configure_group(cmd: &mut std::process::Command, spec: &CommandSpec) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
        let _ = spec;
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;
        let flags = if spec.detached {
            CREATE_NEW_CONSOLE
        } else {
            CREATE_NEW_PROCESS_GROUP
        };
        cmd.creation_flags(flags);
    }
}

fn spawn(spec: &CommandSpec, stdio: fn() -> Stdio) -> Result<Child, RuntimeError> {
    let mut cmd = spec.to_command();
    cmd.stdin(Stdio::null()).stdout(stdio()).stderr(stdio());
    configure_group(&mut cmd, spec);
    debug!("spawning: {spec}");
    cmd.spawn().map_err(|source| RuntimeError::Launch {
        program: spec.program.clone(),
        source,
    })
}

/// Copy a pipe into the shared buffer, up to [`MAX_CAPTURED_BYTES`],
/// signalling `done` at EOF.
fn drain<R: Read + Send + 'static>(
    mut pipe: R,
    buffer: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Sender<()>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = buffer.lock() {
                        let room = MAX_CAPTURED_BYTES.saturating_sub(buf.len());
                        buf.extend_from_slice(&chunk[..n.min(room)]);
                    }
                }
            }
        }
        let _ = done.send(());
    })
}

fn snapshot(buffer: &Mutex<Vec<u8>>) -> String {
    buffer
        .lock()
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

/// Kill the child and every process in its group, then reap it.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        match i32::try_from(child.id()) {
            Ok(pid) => {
                // SAFETY: kill() takes no pointers; the negative pid addresses the
                // process group created for this child by `process_group(0)`.
                #[allow(unsafe_code)]
                let ret = unsafe { libc::kill(-pid, libc::SIGKILL) };
                if ret != 0 {
                    let errno = std::io::Error::last_os_error();
                    if errno.raw_os_error() != Some(libc::ESRCH) {
                        warn!("failed to kill process group {pid}: {errno}");
                    }
                }
            }
            Err(_) => warn!("pid {} exceeds i32 range", child.id()),
        }
    }
    if let Err(e) = child.kill() {
        debug!("kill after group signal: {e}");
    }
    if let Err(e) = child.wait() {
        warn!("failed to reap killed process: {e}");
    }
}

/// Wait for `child`, killing it once `limit` has elapsed.
/// Returns `None` on timeout.
fn wait_with_deadline(child: &mut Child, limit: Duration) -> Result<Option<ExitStatus>, RuntimeError> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            warn!("process {} exceeded {}s, killing", child.id(), limit.as_secs());
            kill_tree(child);
            return Ok(None);
        }
        thread::sleep(WAIT_POLL_INTERVAL.min(deadline - now));
    }
}

/// Run a process to completion, capturing stdout and stderr into one buffer.
///
/// With a `timeout`, the process (and its process group) is killed when the
/// deadline passes and [`RuntimeError::Timeout`] is returned.
pub fn run_captured(
    spec: &CommandSpec,
    timeout: Option<Duration>,
) -> Result<CapturedOutput, RuntimeError> {
    let mut child = spawn(spec, Stdio::piped)?;

    let buffer = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = mpsc::channel();
    let mut readers = Vec::new();
    if let Some(out) = child.stdout.take() {
        readers.push(drain(out, Arc::clone(&buffer), done_tx.clone()));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(drain(err, Arc::clone(&buffer), done_tx.clone()));
    }
    drop(done_tx);

    let status = match timeout {
        Some(limit) => wait_with_deadline(&mut child, limit),
        None => child.wait().map(Some).map_err(RuntimeError::from),
    };
    let status = match status {
        Ok(s) => s,
        Err(e) => {
            kill_tree(&mut child);
            return Err(e);
        }
    };

    // Readers still blocked after the grace period are detached; the output
    // collected so far is returned.
    let grace_deadline = Instant::now() + DRAIN_GRACE;
    let mut finished = 0;
    while finished < readers.len() {
        let remaining = grace_deadline.saturating_duration_since(Instant::now());
        match done_rx.recv_timeout(remaining) {
            Ok(()) => finished += 1,
            Err(_) => {
                debug!("output pipes still open after exit; not waiting further");
                break;
            }
        }
    }
    if finished == readers.len() {
        for reader in readers {
            let _ = reader.join();
        }
    }

    let output = snapshot(&buffer);
    match status {
        Some(status) => Ok(CapturedOutput::from_parts(status, output)),
        None => Err(RuntimeError::Timeout {
            secs: timeout.map_or(0, |t| t.as_secs()),
            output,
        }),
    }
}

/// Start a process that outlives the current action.
///
/// Stdio is detached and the process gets its own process group (a new
/// console on Windows). A background thread reaps it when it exits.
pub fn spawn_detached(spec: &CommandSpec) -> Result<u32, RuntimeError> {
    let mut child = spawn(spec, Stdio::null)?;
    let pid = child.id();
    thread::spawn(move || {
        let _ = child.wait();
    });
    Ok(pid)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_stderr() {
        let out = run_captured(&CommandSpec::shell("echo out; echo err >&2"), None).unwrap();
        assert_eq!(out.exit_code, Some(0));
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
    }

    #[test]
    fn captured_output_is_capped() {
        let out = run_captured(&CommandSpec::shell("yes | head -c 3000000"), None).unwrap();
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.output.len(), MAX_CAPTURED_BYTES);
        assert!(out.output.starts_with("y\ny\n"));
    }

    #[test]
    fn reports_exit_code() {
        let out = run_captured(&CommandSpec::shell("exit 3"), None).unwrap();
        assert_eq!(out.exit_code, Some(3));
    }

    #[test]
    fn honours_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::shell("pwd").current_dir(dir.path());
        let out = run_captured(&spec, None).unwrap();
        let reported = std::path::PathBuf::from(out.output.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn passes_environment() {
        let spec = CommandSpec::shell("echo $DEVSTATE_TEST_VALUE").env("DEVSTATE_TEST_VALUE", "xyz");
        let out = run_captured(&spec, None).unwrap();
        assert_eq!(out.output.trim(), "xyz");
    }

    #[test]
    fn timeout_kills_process() {
        let start = Instant::now();
        let err = run_captured(
            &CommandSpec::shell("echo started; sleep 30"),
            Some(Duration::from_secs(1)),
        )
        .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(10));
        match err {
            RuntimeError::Timeout { secs, output } => {
                assert_eq!(secs, 1);
                assert!(output.contains("started"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn finishes_before_deadline() {
        let out = run_captured(&CommandSpec::shell("echo quick"), Some(Duration::from_secs(10))).unwrap();
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.output.trim(), "quick");
    }

    #[test]
    fn missing_program_is_launch_error() {
        let err = run_captured(&CommandSpec::new("/nonexistent/devstate-binary"), None).unwrap_err();
        assert!(matches!(err, RuntimeError::Launch { .. }));
    }

    #[test]
    fn background_grandchild_does_not_block() {
        let start = Instant::now();
        let out = run_captured(&CommandSpec::shell("sleep 20 & echo parent-done"), None).unwrap();
        assert_eq!(out.exit_code, Some(0));
        assert!(out.output.contains("parent-done"));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn detached_spawn_returns_pid() {
        let pid = spawn_detached(&CommandSpec::shell("exit 0").detached()).unwrap();
        assert!(pid > 0);
    }
}
