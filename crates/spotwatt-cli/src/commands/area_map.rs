use serde::Serialize;
use spotwatt_core::area_directory::{load_existing_maps, load_source, render_area_map};
use spotwatt_core::{build_area_map, parse_area_directory, ReqwestHttpClient};
use tracing::info;

use crate::cli::AreaMapArgs;
use crate::error::CliError;

use super::{CommandResult, Table};

#[derive(Debug, Serialize)]
struct AreaMapResponseData {
    output: String,
    domains: usize,
    countries: usize,
    areas: usize,
}

pub async fn run(args: &AreaMapArgs) -> Result<CommandResult, CliError> {
    let transport = ReqwestHttpClient::new();
    let xml = load_source(&args.source, &transport).await?;
    let domains = parse_area_directory(&xml)?;

    let existing = load_existing_maps(&args.merge_existing);
    let map = build_area_map(&domains, args.default_iso.as_deref(), &existing);

    tokio::fs::write(&args.output, render_area_map(&map)?).await?;
    info!(output = %args.output.display(), countries = map.len(), "area map written");

    let table = Table {
        headers: vec!["iso", "areas"],
        rows: map
            .iter()
            .map(|(iso, codes)| vec![iso.clone(), codes.join(",")])
            .collect(),
    };
    let mut result = CommandResult::ok(serde_json::to_value(AreaMapResponseData {
        output: args.output.display().to_string(),
        domains: domains.len(),
        countries: map.len(),
        areas: map.values().map(Vec::len).sum(),
    })?)
    .with_table(table);
    if domains.is_empty() {
        result = result.with_warning("no Domain elements found; check the source document");
    }
    Ok(result)
}
