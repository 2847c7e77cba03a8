use super::{json_pretty, load, EXIT_FAILURE, EXIT_SUCCESS};
use console::Style;
use devstate_core::{Orchestrator, TracingSink};
use std::path::Path;

pub fn run(config_path: &Path, state: &str, json: bool) -> Result<u8, String> {
    let config = load(config_path)?;
    let result = Orchestrator::new(&config, &TracingSink)
        .check(state)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("state '{state}' declares no check_command or check_endpoint"))?;

    if json {
        let payload = serde_json::json!({
            "state": state,
            "ready": result.ready,
            "detail": result.detail,
        });
        println!("{}", json_pretty(&payload)?);
    } else if result.ready {
        println!("{} {state} ({})", Style::new().green().apply_to("ready:"), result.detail);
    } else {
        println!(
            "{} {state} ({})",
            Style::new().yellow().apply_to("not ready:"),
            result.detail
        );
    }
    Ok(if result.ready { EXIT_SUCCESS } else { EXIT_FAILURE })
}
