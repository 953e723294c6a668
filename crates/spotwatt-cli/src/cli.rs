//! CLI argument definitions for spotwatt.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `prices` | Fetch day-ahead prices for a zone and window |
//! | `zone` | Show which area code a country or area input resolves to |
//! | `area-map` | Generate a zone map from the ENTSO-E area directory |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--format` | `json` | Output format (json, table) |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--settings` | none | JSON settings file (`SPOTWATT_SETTINGS`) |
//! | `--timeout-ms` | `30000` | Per-attempt request timeout in ms |
//!
//! # Examples
//!
//! ```bash
//! # Today and tomorrow for Finland
//! SPOTWATT_ENTSOE_TOKEN=... spotwatt prices --zone FI --format table
//!
//! # Explicit window for a Swedish bidding zone
//! spotwatt prices --zone 10Y1001A1001A46L --start 2024-01-01T00:00Z --end 2024-01-03T00:00Z
//!
//! # Rebuild the zone map
//! spotwatt area-map --source AreaDirectory.xml --merge-existing entsoe_area_map.json
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Day-ahead electricity prices from the ENTSO-E transparency platform.
#[derive(Debug, Parser)]
#[command(
    name = "spotwatt",
    author,
    version,
    about = "Day-ahead electricity price CLI",
    long_about = "spotwatt fetches day-ahead electricity prices from the ENTSO-E transparency \
platform with caching, retries and a circuit breaker.\n\
\n\
The security token is read from --token, SPOTWATT_ENTSOE_TOKEN, or the \
'entsoe_token' key of the settings file.\n\
\n\
Use 'spotwatt <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// JSON object file with settings such as `price_country` or `fx_rate`.
    #[arg(long, global = true, env = "SPOTWATT_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Per-attempt request timeout in milliseconds.
    #[arg(long, global = true, default_value_t = 30_000)]
    pub timeout_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format for terminal display.
    Table,
    /// Single JSON object output.
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch day-ahead prices.
    Prices(PricesArgs),
    /// Resolve a country or area code to the area code that is queried.
    Zone(ZoneArgs),
    /// Generate an ISO country to area code map from the area directory.
    AreaMap(AreaMapArgs),
}

#[derive(Debug, Args)]
pub struct PricesArgs {
    /// Country code (`SE`) or area code (`10Y1001A1001A46L`). Defaults to
    /// the `entsoe_area` or `price_country` setting.
    #[arg(long)]
    pub zone: Option<String>,

    /// Window start (RFC3339). Defaults to today 00:00 UTC.
    #[arg(long)]
    pub start: Option<String>,

    /// Window end, exclusive (RFC3339). Defaults to start + `--hours`.
    #[arg(long)]
    pub end: Option<String>,

    /// Window length used when `--end` is omitted.
    #[arg(long, default_value_t = 48)]
    pub hours: u32,

    /// Security token; overrides environment and settings.
    #[arg(long)]
    pub token: Option<String>,
}

#[derive(Debug, Args)]
pub struct ZoneArgs {
    /// Country or area code; defaults to the configured setting.
    pub input: Option<String>,
}

#[derive(Debug, Args)]
pub struct AreaMapArgs {
    /// Path or URL to AreaDirectory.xml (or an A86 response).
    #[arg(long)]
    pub source: String,

    /// Where to write the JSON map.
    #[arg(long, default_value = "entsoe_area_map.json")]
    pub output: PathBuf,

    /// Existing JSON maps merged into the output.
    #[arg(long, num_args = 0..)]
    pub merge_existing: Vec<PathBuf>,

    /// ISO code used when detection fails.
    #[arg(long)]
    pub default_iso: Option<String>,
}
