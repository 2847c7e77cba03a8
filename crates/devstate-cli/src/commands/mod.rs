pub mod check;
pub mod completions;
pub mod list;
pub mod plan;
pub mod up;

use devstate_schema::{load_config, StateConfig};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_FATAL: u8 = 3;

/// Prefix of every error message that maps to [`EXIT_CONFIG_ERROR`].
pub const CONFIG_ERROR_PREFIX: &str = "config error:";

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn load(path: &Path) -> Result<StateConfig, String> {
    load_config(path).map_err(|e| format!("{CONFIG_ERROR_PREFIX} {}: {e}", path.display()))
}

/// The explicit target, or the config's default one.
pub fn resolve_target(config: &StateConfig, target: Option<&str>) -> Result<String, String> {
    match (target, &config.target) {
        (Some(t), _) => Ok(t.to_owned()),
        (None, Some(t)) => Ok(t.to_string()),
        (None, None) => Err(format!(
            "{CONFIG_ERROR_PREFIX} no target given and the config declares no default target"
        )),
    }
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("  {spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("  {msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("  {msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Pads `status` to `width` columns, then styles it, so escape codes never
/// count toward the column width.
pub fn colorize_status(status: &str, width: usize) -> String {
    use console::Style;
    let padded = format!("{status:<width$}");
    let style = match status {
        "completed" | "success" => Style::new().green(),
        "failed" => Style::new().red().bold(),
        "processing" => Style::new().yellow(),
        "executing" => Style::new().cyan(),
        _ => return padded,
    };
    style.apply_to(padded).to_string()
}
