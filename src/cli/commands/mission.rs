//! Mission command handlers.
//!
//! Implements `mission validate` and `mission inspect`.

use serde_json::json;

use super::{FileReport, print_reports};
use crate::cli::args::{MissionInspectArgs, MissionValidateArgs, OutputFormat};
use crate::error::{ConfigError, SortieError};
use crate::mission::{Mission, MissionDocument, MissionLibrary, MissionValidator};

/// Validate mission save files.
///
/// # Errors
///
/// Returns a config error if any file fails validation.
pub fn validate(args: &MissionValidateArgs) -> Result<(), SortieError> {
    let reports: Vec<FileReport> = args
        .files
        .iter()
        .map(|path| {
            tracing::info!(file = %path.display(), "validating mission");
            let parsed = MissionLibrary::read_file(path).and_then(|text| {
                serde_json::from_str::<MissionDocument>(&text).map_err(SortieError::from)
            });
            let (errors, warnings) = match parsed {
                Ok(doc) => {
                    let result = MissionValidator::new().validate(&doc);
                    (
                        result.errors.iter().map(ToString::to_string).collect(),
                        result.warnings.iter().map(ToString::to_string).collect(),
                    )
                }
                Err(e) => (vec![e.to_string()], Vec::new()),
            };
            FileReport::new(path, errors, warnings, args.strict)
        })
        .collect();

    let failed = print_reports(&reports, args.format);
    if failed > 0 {
        return Err(ConfigError::InvalidValue {
            field: "files".to_string(),
            value: format!("{failed} of {} invalid", reports.len()),
            expected: "valid mission files".to_string(),
        }
        .into());
    }
    Ok(())
}

/// Describe one mission.
///
/// # Errors
///
/// Returns an error if the mission does not load.
pub fn inspect(args: &MissionInspectArgs) -> Result<(), SortieError> {
    let mission = MissionLibrary::load_file(&args.file)?;
    match args.format {
        OutputFormat::Human => print!("{}", describe(&mission)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outline(&mission))?),
    }
    Ok(())
}

fn describe(mission: &Mission) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} ({}) v{}, seed \"{}\"",
        mission.name, mission.id, mission.version_number, mission.seed
    );
    for force in mission.forces.values() {
        let _ = writeln!(
            out,
            "  force {} \"{}\": {} {}, {} nodes",
            force.id,
            force.name,
            force.initial_resources,
            mission.resource_label,
            force.nodes.len()
        );
        for node in force.nodes.values() {
            let kind = if node.executable { "executable" } else { "container" };
            let _ = writeln!(out, "    node {} \"{}\" [{kind}]", node.id, node.name);
            for action in node.actions.values() {
                let _ = writeln!(
                    out,
                    "      action {} \"{}\": cost {}, {} ms, {:.0}% success, {} outcomes",
                    action.id,
                    action.name,
                    action.resource_cost,
                    action.process_time,
                    action.success_chance * 100.0,
                    action.remaining_outcomes()
                );
            }
        }
    }
    let _ = writeln!(out, "  {} session effects", mission.effects.len());
    out
}

fn outline(mission: &Mission) -> serde_json::Value {
    json!({
        "id": mission.id,
        "name": mission.name,
        "versionNumber": mission.version_number,
        "seed": mission.seed,
        "resourceLabel": mission.resource_label,
        "effects": mission.effects.len(),
        "forces": mission.forces.values().map(|force| json!({
            "id": force.id,
            "name": force.name,
            "initialResources": force.initial_resources,
            "nodes": force.nodes.values().map(|node| json!({
                "id": node.id,
                "name": node.name,
                "executable": node.executable,
                "actions": node.actions.values().map(|action| json!({
                    "id": action.id,
                    "name": action.name,
                    "resourceCost": action.resource_cost,
                    "processTime": action.process_time,
                    "successChance": action.success_chance,
                    "outcomes": action.remaining_outcomes(),
                })).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
        })).collect::<Vec<_>>(),
    })
}
