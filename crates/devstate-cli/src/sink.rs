//! Terminal presentations of orchestrator events.

use crate::commands::{colorize_status, spin_fail, spin_ok, spinner};
use console::Style;
use devstate_core::{CheckPhase, Event, EventSink, RunSummary};
use devstate_schema::StateName;
use indicatif::ProgressBar;
use std::io::{Stdout, Write};
use std::sync::Mutex;

const NAME_WIDTH: usize = 20;
const STATUS_WIDTH: usize = 12;
const ACTIONS_WIDTH: usize = 9;

/// Human-oriented output: one line per state, a spinner per running action
/// or readiness wait, and a summary table at the end.
///
/// Write errors (a closed pipe, a full disk) are ignored so that losing the
/// terminal never interrupts a run.
pub struct ConsoleSink<W: Write = Stdout> {
    out: Mutex<W>,
    active: Mutex<Option<ProgressBar>>,
}

impl ConsoleSink<Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            active: Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn line(&self, text: impl std::fmt::Display) {
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{text}");
            let _ = out.flush();
        }
    }

    fn start_spinner(&self, msg: &str) {
        if let Ok(mut active) = self.active.lock() {
            *active = Some(spinner(msg));
        }
    }

    fn update_spinner(&self, msg: &str) {
        if let Ok(active) = self.active.lock() {
            if let Some(pb) = active.as_ref() {
                pb.set_message(msg.to_owned());
            }
        }
    }

    fn finish_spinner(&self, ok: bool, msg: &str) {
        let Ok(mut active) = self.active.lock() else {
            return;
        };
        match active.take() {
            Some(pb) if ok => spin_ok(&pb, msg),
            Some(pb) => spin_fail(&pb, msg),
            None => self.line(format_args!("  {} {msg}", if ok { "✓" } else { "✗" })),
        }
    }

    fn summary(&self, summary: &RunSummary) {
        self.line(format_args!(""));
        self.line(format_args!(
            "{:<NAME_WIDTH$} {:<STATUS_WIDTH$} {:<ACTIONS_WIDTH$} DURATION",
            "STATE", "STATUS", "ACTIONS"
        ));
        for state in &summary.states {
            let status = if state.already_ready {
                format!("{:<STATUS_WIDTH$}", "ready")
            } else {
                colorize_status(&state.status.to_string(), STATUS_WIDTH)
            };
            let actions = format!("{}/{}", state.succeeded_actions(), state.actions.len());
            let duration = state
                .duration_secs
                .map_or_else(|| "-".to_owned(), |d| format!("{d:.1}s"));
            self.line(format_args!(
                "{:<NAME_WIDTH$} {status} {actions:<ACTIONS_WIDTH$} {duration}",
                state.name
            ));
        }
        self.line(format_args!(""));
        if summary.success {
            self.line(format_args!(
                "{} '{}' is ready ({:.1}s)",
                Style::new().green().bold().apply_to("success:"),
                summary.target,
                summary.duration_secs
            ));
        } else {
            self.line(format_args!(
                "{} {}",
                Style::new().red().bold().apply_to("failed:"),
                summary.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }
}

impl<W: Write> EventSink for ConsoleSink<W> {
    fn emit(&self, event: &Event) {
        let dim = Style::new().dim();
        match event {
            Event::StateStarted { state, needs } => {
                let bold = Style::new().bold();
                if needs.is_empty() {
                    self.line(format_args!("{} {}", Style::new().cyan().apply_to("▸"), bold.apply_to(state)));
                } else {
                    let needs: Vec<&str> = needs.iter().map(StateName::as_str).collect();
                    self.line(format_args!(
                        "{} {} {}",
                        Style::new().cyan().apply_to("▸"),
                        bold.apply_to(state),
                        dim.apply_to(format!("(needs {})", needs.join(", ")))
                    ));
                }
            }
            Event::CheckPerformed {
                phase: CheckPhase::PreCheck,
                kind,
                detail,
                ..
            } => self.line(format_args!("  {}", dim.apply_to(format!("checking {kind}: {detail}")))),
            Event::CheckPerformed {
                phase: CheckPhase::Wait,
                detail,
                ..
            } => self.start_spinner(&format!("waiting for {detail}")),
            Event::CheckResult {
                phase: CheckPhase::PreCheck,
                ready,
                detail,
                ..
            } => {
                if *ready {
                    self.line(format_args!(
                        "  {}",
                        Style::new()
                            .green()
                            .apply_to(format!("already ready ({detail})"))
                    ));
                } else {
                    self.line(format_args!("  {}", Style::new().yellow().apply_to(format!("not ready ({detail})"))));
                }
            }
            Event::CheckResult {
                phase: CheckPhase::Wait,
                ready,
                detail,
                ..
            } => {
                let msg = if *ready {
                    format!("ready ({detail})")
                } else {
                    format!("not ready ({detail})")
                };
                self.finish_spinner(*ready, &msg);
            }
            Event::ActionsStarted { count, .. } => {
                self.line(format_args!("  {}", dim.apply_to(format!("running {count} action(s)"))));
            }
            Event::ActionStarted {
                index,
                command,
                description,
                ..
            } => {
                let label = description.as_deref().unwrap_or(command);
                self.start_spinner(&format!("[{index}] {label}"));
            }
            Event::ActionCompleted {
                index,
                success,
                duration_secs,
                error,
                ..
            } => {
                let msg = match error {
                    Some(e) => format!("[{index}] {e} ({duration_secs:.1}s)"),
                    None => format!("[{index}] done ({duration_secs:.1}s)"),
                };
                self.finish_spinner(*success, &msg);
            }
            Event::PollAttempt {
                state,
                attempt,
                streak,
                detail,
                ..
            } => self.update_spinner(&format!(
                "waiting for {state}: attempt {attempt}, streak {streak} ({detail})"
            )),
            Event::StateCompleted {
                state,
                success,
                duration_secs,
                error,
                ..
            } => {
                if *success {
                    self.line(format_args!(
                        "{} {state} {}",
                        Style::new().green().apply_to("✓"),
                        dim.apply_to(format!("{duration_secs:.1}s"))
                    ));
                } else {
                    self.line(format_args!(
                        "{} {state}: {}",
                        Style::new().red().apply_to("✗"),
                        error.as_deref().unwrap_or("failed")
                    ));
                }
            }
            Event::RunSummary(summary) => self.summary(summary),
            Event::Fatal { message } => {
                let mut err = std::io::stderr().lock();
                let _ = writeln!(err, "{} {message}", Style::new().red().bold().apply_to("fatal:"));
            }
        }
    }
}

/// Machine-oriented output: one JSON object per event, one per line.
pub struct JsonLinesSink<W: Write> {
    out: Mutex<W>,
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn emit(&self, event: &Event) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("failed to serialize {} event: {e}", event.name());
                return;
            }
        };
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devstate_core::Tracker;
    use std::time::Duration;

    #[test]
    fn json_lines_one_object_per_event() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.emit(&Event::StateStarted {
            state: StateName::new("db"),
            needs: vec![],
        });
        sink.emit(&Event::Fatal {
            message: "boom".to_owned(),
        });
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "state_started");
        assert_eq!(lines[1]["message"], "boom");
    }

    #[test]
    fn console_sink_handles_unpaired_events() {
        let sink = ConsoleSink::new(Vec::new());
        sink.emit(&Event::ActionCompleted {
            state: StateName::new("x"),
            index: 1,
            success: true,
            duration_secs: 0.0,
            error: None,
        });
        sink.emit(&Event::PollAttempt {
            state: StateName::new("x"),
            attempt: 1,
            ready: false,
            streak: 0,
            detail: "HTTP 503".to_owned(),
        });
    }

    #[test]
    fn console_sink_keeps_going_when_output_is_closed() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::ErrorKind::BrokenPipe.into())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Err(std::io::ErrorKind::BrokenPipe.into())
            }
        }
        let sink = ConsoleSink::new(Closed);
        sink.emit(&Event::StateStarted {
            state: StateName::new("db"),
            needs: vec![StateName::new("net")],
        });
        sink.emit(&Event::RunSummary(RunSummary {
            target: StateName::new("db"),
            success: false,
            error: Some("boom".to_owned()),
            duration_secs: 0.0,
            states: vec![],
        }));
    }

    #[test]
    fn summary_columns_line_up_with_header() {
        console::set_colors_enabled(false);
        let sink = ConsoleSink::new(Vec::new());
        let mut tracker = Tracker::new();
        tracker.begin_state(&StateName::new("web"), &[]);
        tracker.complete_state("web", false);
        tracker.begin_state(&StateName::new("db"), &[]);
        tracker.complete_state("db", true);
        sink.emit(&Event::RunSummary(tracker.summary(
            "web",
            None,
            Duration::from_secs(1),
        )));
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let row = |prefix: &str| text.lines().find(|l| l.starts_with(prefix)).unwrap();
        let column = |line: &str, word: &str| line.find(word).unwrap();
        let header = row("STATE");
        assert_eq!(column(row("web "), "completed"), column(header, "STATUS"));
        assert_eq!(column(row("web "), "0/0"), column(header, "ACTIONS"));
        assert_eq!(column(row("db "), "ready"), column(header, "STATUS"));
        assert_eq!(column(row("db "), "0/0"), column(header, "ACTIONS"));
    }
}
