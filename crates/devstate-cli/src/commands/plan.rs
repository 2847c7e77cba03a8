use super::{json_pretty, load, resolve_target, EXIT_SUCCESS};
use devstate_core::{NullSink, Orchestrator};
use devstate_schema::StateName;
use std::path::Path;

pub fn run(config_path: &Path, target: Option<&str>, json: bool) -> Result<u8, String> {
    let config = load(config_path)?;
    let target = resolve_target(&config, target)?;
    let order = Orchestrator::new(&config, &NullSink)
        .plan(&target)
        .map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "target": target,
            "order": order,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for (i, name) in order.iter().enumerate() {
            let needs = config
                .get(name)
                .map(|d| {
                    d.needs
                        .iter()
                        .map(StateName::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            if needs.is_empty() {
                println!("{:>3}. {name}", i + 1);
            } else {
                println!("{:>3}. {name} (after {needs})", i + 1);
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
