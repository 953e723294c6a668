use serde::{Deserialize, Serialize};

use crate::{UtcDateTime, ValidationError};

/// One parsed point as it comes out of a market document, before enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPricePoint {
    pub timestamp_utc: UtcDateTime,
    /// Price in the document's major currency unit per measure unit
    /// (EUR/MWh for day-ahead auctions).
    pub price_major_per_unit: f64,
}

/// Day-ahead price for one delivery interval, as handed to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub timestamp_utc: UtcDateTime,
    pub price_eur_per_mwh: f64,
    pub price_eur_per_kwh: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_local_per_kwh: Option<f64>,
}

impl PricePoint {
    /// Builds a point from an EUR/MWh price, deriving EUR/kWh and, when an
    /// exchange rate is given, the local per-kWh price rounded to 6 decimals.
    pub fn new(
        timestamp_utc: UtcDateTime,
        price_eur_per_mwh: f64,
        fx_rate: Option<f64>,
    ) -> Result<Self, ValidationError> {
        if !price_eur_per_mwh.is_finite() {
            return Err(ValidationError::NonFiniteValue {
                field: "price_eur_per_mwh",
            });
        }

        let price_eur_per_kwh = price_eur_per_mwh / 1000.0;
        let price_local_per_kwh = fx_rate
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .map(|rate| round_to(price_eur_per_kwh * rate, 6));

        Ok(Self {
            timestamp_utc,
            price_eur_per_mwh,
            price_eur_per_kwh,
            price_local_per_kwh,
        })
    }
}

/// Sorts ascending by timestamp and keeps the first point seen for each
/// timestamp.
pub fn dedupe_sorted(mut points: Vec<PricePoint>) -> Vec<PricePoint> {
    points.sort_by_key(|point| point.timestamp_utc);
    points.dedup_by_key(|point| point.timestamp_utc);
    points
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}
