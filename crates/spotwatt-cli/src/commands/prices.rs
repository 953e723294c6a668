use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use spotwatt_core::{
    FetchOptions, PriceError, PricePoint, PriceService, PriceServiceConfig, ReqwestHttpClient,
    SettingsProvider, UtcDateTime,
};
use tracing::debug;

use crate::cli::PricesArgs;
use crate::error::CliError;

use super::{CommandResult, Table};

#[derive(Debug, Serialize)]
struct PricesResponseData {
    zone: String,
    start: String,
    end: String,
    count: usize,
    points: Vec<PricePoint>,
}

pub async fn run(
    args: &PricesArgs,
    settings: Arc<dyn SettingsProvider>,
    timeout: Duration,
) -> Result<CommandResult, CliError> {
    let (start, end) = window(args)?;

    let config = PriceServiceConfig {
        request_timeout: timeout,
        ..PriceServiceConfig::from_env()
    };
    let service = PriceService::new(Arc::new(ReqwestHttpClient::new()), settings, config);
    let zone = service.resolve_zone(args.zone.as_deref(), None)?;
    debug!(zone = %zone, start = %start, end = %end, "fetching day-ahead prices");

    let options = FetchOptions {
        token: args.token.clone(),
        ..FetchOptions::default()
    };
    let points = service
        .fetch_prices(Some(&zone), &start, &end, options)
        .await?;

    let table = Table {
        headers: vec!["timestamp_utc", "eur_per_mwh", "eur_per_kwh", "local_per_kwh"],
        rows: points
            .iter()
            .map(|point| {
                vec![
                    point.timestamp_utc.to_string(),
                    format!("{:.2}", point.price_eur_per_mwh),
                    format!("{:.5}", point.price_eur_per_kwh),
                    point
                        .price_local_per_kwh
                        .map(|value| format!("{value:.6}"))
                        .unwrap_or_default(),
                ]
            })
            .collect(),
    };

    let empty = points.is_empty();
    let mut result = CommandResult::ok(serde_json::to_value(PricesResponseData {
        zone,
        start,
        end,
        count: points.len(),
        points,
    })?)
    .with_table(table);
    if empty {
        result = result.with_warning("no prices published for the requested window");
    }
    Ok(result)
}

/// Start defaults to today 00:00 UTC; end defaults to start + `--hours`.
fn window(args: &PricesArgs) -> Result<(String, String), CliError> {
    if args.end.is_none() && args.hours == 0 {
        return Err(CliError::Command(String::from("--hours must be at least 1")));
    }
    let start = match args.start.as_deref() {
        Some(raw) => UtcDateTime::parse_lenient(raw).map_err(PriceError::from)?,
        None => UtcDateTime::now().start_of_day(),
    };
    let end = match args.end.as_deref() {
        Some(raw) => UtcDateTime::parse_lenient(raw).map_err(PriceError::from)?,
        None => start.saturating_add(time::Duration::hours(i64::from(args.hours))),
    };
    Ok((start.to_string(), end.to_string()))
}
