//! Readiness probes: the one-shot pre-check and the bounded poll loop.
//!
//! Command probes reuse the action classification (exit code plus error
//! patterns); endpoint probes issue a single HTTP GET. The poll loop itself is
//! probe-agnostic so it can be driven by any closure.

use crate::alias::AliasTable;
use crate::command::CommandSpec;
use crate::executor::classify;
use crate::process::run_captured;
use crate::RuntimeError;
use devstate_schema::{PollPolicy, ProbeTarget};
use serde::Serialize;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Per-request limit for endpoint probes.
pub const HTTP_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on a single probe command.
pub const COMMAND_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a single probe evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub ready: bool,
    pub detail: String,
}

impl ProbeResult {
    pub fn ready(detail: impl Into<String>) -> Self {
        Self {
            ready: true,
            detail: detail.into(),
        }
    }

    pub fn not_ready(detail: impl Into<String>) -> Self {
        Self {
            ready: false,
            detail: detail.into(),
        }
    }
}

/// Reported after every poll attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollAttempt {
    pub attempt: u32,
    pub ready: bool,
    pub streak: u32,
    pub detail: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PollFailure {
    #[error("timed out after {elapsed_secs}s ({attempts} attempts)")]
    Timeout { attempts: u32, elapsed_secs: u64 },
    #[error("retries exceeded after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub attempts: u32,
    pub elapsed: Duration,
    pub last_detail: String,
    pub failure: Option<PollFailure>,
}

impl PollOutcome {
    pub fn ready(&self) -> bool {
        self.failure.is_none()
    }
}

/// Poll `probe` until it reports ready often enough in a row, or a bound hits.
///
/// After each attempt the stop conditions are checked in order: success
/// streak, elapsed whole seconds against `max_time`, attempts against
/// `max_retries`. Only then does the loop sleep for the fixed interval.
pub fn poll_until_ready<F, A>(policy: &PollPolicy, mut probe: F, mut on_attempt: A) -> PollOutcome
where
    F: FnMut() -> ProbeResult,
    A: FnMut(&PollAttempt),
{
    let required = policy.successful_retries_required.max(1);
    let start = Instant::now();
    let mut attempts = 0u32;
    let mut streak = 0u32;

    loop {
        attempts += 1;
        let result = probe();
        if result.ready {
            streak += 1;
        } else {
            streak = 0;
        }
        debug!(
            "poll attempt {attempts}: ready={} streak={streak}/{required} ({})",
            result.ready, result.detail
        );
        on_attempt(&PollAttempt {
            attempt: attempts,
            ready: result.ready,
            streak,
            detail: result.detail.clone(),
        });

        let elapsed = start.elapsed();
        let failure = if streak >= required {
            None
        } else if elapsed.as_secs() >= policy.max_time.as_secs() {
            Some(PollFailure::Timeout {
                attempts,
                elapsed_secs: elapsed.as_secs(),
            })
        } else if attempts >= policy.max_retries {
            Some(PollFailure::RetriesExhausted { attempts })
        } else {
            thread::sleep(policy.retry_interval);
            continue;
        };

        return PollOutcome {
            attempts,
            elapsed,
            last_detail: result.detail,
            failure,
        };
    }
}

/// Evaluates readiness probes against commands and HTTP(S) endpoints.
pub struct ReadinessProber {
    aliases: AliasTable,
    base_dir: PathBuf,
    agent: ureq::Agent,
}

impl ReadinessProber {
    pub fn new(aliases: AliasTable, base_dir: impl Into<PathBuf>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(HTTP_PROBE_TIMEOUT))
            .build()
            .into();
        Self {
            aliases,
            base_dir: base_dir.into(),
            agent,
        }
    }

    /// Single evaluation, no retries.
    pub fn check_now(&self, target: &ProbeTarget) -> ProbeResult {
        match target {
            ProbeTarget::Command(command) => self.probe_command(command),
            ProbeTarget::Endpoint(url) => self.probe_endpoint(url),
        }
    }

    /// Bounded poll loop against `target`.
    pub fn wait_until_ready<A>(
        &self,
        target: &ProbeTarget,
        policy: &PollPolicy,
        on_attempt: A,
    ) -> PollOutcome
    where
        A: FnMut(&PollAttempt),
    {
        poll_until_ready(policy, || self.check_now(target), on_attempt)
    }

    fn probe_command(&self, command: &str) -> ProbeResult {
        let line = self.aliases.resolve_line(command);
        let spec = CommandSpec::shell(&line).current_dir(&self.base_dir);
        match run_captured(&spec, Some(COMMAND_PROBE_TIMEOUT)) {
            Ok(captured) => match classify(captured.exit_code, &captured.output) {
                Ok(()) => ProbeResult::ready(summarize(&captured.output, "command succeeded")),
                Err(failure) => ProbeResult::not_ready(failure.to_string()),
            },
            Err(RuntimeError::Timeout { secs, .. }) => {
                ProbeResult::not_ready(format!("probe command timed out after {secs}s"))
            }
            Err(e) => ProbeResult::not_ready(e.to_string()),
        }
    }

    fn probe_endpoint(&self, url: &str) -> ProbeResult {
        debug!("GET {url}");
        match self.agent.get(url).call() {
            Ok(resp) => ProbeResult::ready(format!("HTTP {}", resp.status().as_u16())),
            Err(ureq::Error::StatusCode(code)) => ProbeResult::not_ready(format!("HTTP {code}")),
            Err(e) => ProbeResult::not_ready(e.to_string()),
        }
    }
}

/// Last non-empty output line, or `fallback` when there is none.
fn summarize(output: &str, fallback: &str) -> String {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or(fallback)
        .to_owned()
}
