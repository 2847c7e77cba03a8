use super::{load, resolve_target, EXIT_FAILURE, EXIT_SUCCESS};
use crate::sink::{ConsoleSink, JsonLinesSink};
use devstate_core::{FanoutSink, Orchestrator, TracingSink};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set while the orchestrator is running, cleared once a report exists.
pub static RUN_IN_PROGRESS: AtomicBool = AtomicBool::new(false);

pub fn run(config_path: &Path, target: Option<&str>, json: bool) -> Result<u8, String> {
    let config = load(config_path)?;
    let target = resolve_target(&config, target)?;

    let console = ConsoleSink::stdout();
    let lines = JsonLinesSink::stdout();
    let sink = if json {
        FanoutSink::new().with(&lines)
    } else {
        FanoutSink::new().with(&console)
    }
    .with(&TracingSink);

    RUN_IN_PROGRESS.store(true, Ordering::SeqCst);
    let report = Orchestrator::new(&config, &sink).run(&target);
    RUN_IN_PROGRESS.store(false, Ordering::SeqCst);
    Ok(if report.success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
