use super::{json_pretty, load, EXIT_SUCCESS};
use devstate_schema::{StateDeclaration, StateName};
use std::path::Path;

pub fn run(config_path: &Path, json: bool) -> Result<u8, String> {
    let config = load(config_path)?;
    let states: Vec<&StateDeclaration> = config.states.values().collect();
    if json {
        println!("{}", json_pretty(&states)?);
    } else if states.is_empty() {
        println!("no states declared");
    } else {
        println!("{:<20} {:<24} {:<8} PROBES", "STATE", "NEEDS", "ACTIONS");
        for decl in states {
            let needs = decl
                .needs
                .iter()
                .map(StateName::as_str)
                .collect::<Vec<_>>()
                .join(",");
            let mut probes = Vec::new();
            if let Some(p) = decl.pre_check() {
                probes.push(format!("check {p}"));
            }
            if let Some(p) = decl.wait_probe() {
                probes.push(format!("wait {p}"));
            }
            let marker = if config.target.as_ref() == Some(&decl.name) {
                "*"
            } else {
                ""
            };
            println!(
                "{:<20} {:<24} {:<8} {}",
                format!("{}{marker}", decl.name),
                if needs.is_empty() { "-" } else { needs.as_str() },
                decl.actions.len(),
                if probes.is_empty() {
                    "-".to_owned()
                } else {
                    probes.join("; ")
                }
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
