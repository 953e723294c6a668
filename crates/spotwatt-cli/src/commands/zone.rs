use serde::Serialize;
use spotwatt_core::zone::{effective_zone_map, is_area_code};
use spotwatt_core::{resolve_zone, SettingsProvider};

use crate::cli::ZoneArgs;
use crate::error::CliError;

use super::{CommandResult, Table};

#[derive(Debug, Serialize)]
struct ZoneResponseData {
    input: Option<String>,
    area: String,
    /// Other areas of the same country, in map order.
    alternatives: Vec<String>,
}

pub fn run(args: &ZoneArgs, settings: &dyn SettingsProvider) -> Result<CommandResult, CliError> {
    let area = resolve_zone(settings, args.input.as_deref(), None)?;

    let alternatives = match args.input.as_deref().map(str::trim) {
        Some(input) if !input.is_empty() && !is_area_code(input) => {
            effective_zone_map(settings, None)
                .areas(input)
                .iter()
                .filter(|code| **code != area)
                .cloned()
                .collect()
        }
        _ => Vec::new(),
    };

    let table = Table {
        headers: vec!["area", "alternatives"],
        rows: vec![vec![area.clone(), alternatives.join(",")]],
    };
    let data = serde_json::to_value(ZoneResponseData {
        input: args.input.clone(),
        area,
        alternatives,
    })?;

    Ok(CommandResult::ok(data).with_table(table))
}
