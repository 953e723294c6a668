mod area_map;
mod prices;
mod zone;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use spotwatt_core::{JsonFileSettings, MemorySettings, SettingsProvider};

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Rows rendered by `--format table`.
pub struct Table {
    pub headers: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
}

pub struct CommandResult {
    pub data: Value,
    pub table: Option<Table>,
    pub warnings: Vec<String>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            table: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.table = Some(table);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandResult, CliError> {
    let timeout = Duration::from_millis(cli.timeout_ms.max(1));

    match &cli.command {
        Command::Prices(args) => prices::run(args, load_settings(cli)?, timeout).await,
        Command::Zone(args) => zone::run(args, load_settings(cli)?.as_ref()),
        Command::AreaMap(args) => area_map::run(args).await,
    }
}

fn load_settings(cli: &Cli) -> Result<Arc<dyn SettingsProvider>, CliError> {
    Ok(match &cli.settings {
        Some(path) => Arc::new(JsonFileSettings::load(path)?),
        None => Arc::new(MemorySettings::new()),
    })
}
