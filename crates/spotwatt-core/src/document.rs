//! Market document decoding.
//!
//! The transparency platform answers a price query with one of two XML
//! documents:
//!
//! - `Publication_MarketDocument`: one or more `TimeSeries`, each holding
//!   `Period`s of positioned `Point`s at a declared ISO 8601 resolution.
//! - `Acknowledgement_MarketDocument`: no data, only a machine-readable
//!   `Reason` (`code` + `text`).
//!
//! The root element's local name selects the variant of [`MarketDocument`];
//! the body is then decoded with quick-xml's serde support.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use time::Duration;

use crate::domain::{RawPricePoint, UtcDateTime};
use crate::error::DocumentError;

const PUBLICATION_ROOT: &str = "Publication_MarketDocument";
const ACKNOWLEDGEMENT_ROOT: &str = "Acknowledgement_MarketDocument";
const DEFAULT_RESOLUTION_MINUTES: i64 = 60;

/// Why a window could not be served as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackCause {
    /// Nothing is published for (part of) the window.
    NoData,
    /// The window is too long or not aligned for a single query.
    InvalidInterval,
}

/// Maps an upstream reason to a fallback cause; `None` for reasons that
/// chunking cannot fix (bad token, unknown area, ...).
pub fn classify_reason(code: &str, text: &str) -> Option<FallbackCause> {
    let text = text.to_ascii_lowercase();

    // "No matching data found for ... and interval [...]" is a no-data reply.
    if text.contains("no matching data") || text.contains("no data") {
        return Some(FallbackCause::NoData);
    }

    if text.contains("interval")
        || text.contains("time range")
        || text.contains("allowed limit")
        || text.contains("exceeds")
    {
        return Some(FallbackCause::InvalidInterval);
    }

    if code.trim() == "999" {
        return Some(FallbackCause::NoData);
    }

    None
}

/// First reason of an acknowledgement document, if `body` is one.
pub fn acknowledgement_reason(body: &str) -> Option<(String, String)> {
    match MarketDocument::decode(body) {
        Ok(MarketDocument::Acknowledgement(document)) => document
            .reasons
            .into_iter()
            .next()
            .map(|reason| (reason.code.trim().to_owned(), reason.text.trim().to_owned())),
        _ => None,
    }
}

/// Decodes a day-ahead price response into points sorted by timestamp.
pub fn parse_price_document(xml: &str) -> Result<Vec<RawPricePoint>, DocumentError> {
    match MarketDocument::decode(xml)? {
        MarketDocument::Acknowledgement(document) => Err(document.into_error()),
        MarketDocument::Publication(document) => document.into_points(xml),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarketDocument {
    Acknowledgement(AcknowledgementDocument),
    Publication(PublicationDocument),
}

impl MarketDocument {
    pub fn decode(xml: &str) -> Result<Self, DocumentError> {
        let root = root_local_name(xml).map_err(|message| DocumentError::Malformed {
            message,
            body: xml.to_owned(),
        })?;

        let malformed = |error: quick_xml::de::DeError| DocumentError::Malformed {
            message: error.to_string(),
            body: xml.to_owned(),
        };

        match root.as_deref() {
            Some(ACKNOWLEDGEMENT_ROOT) => quick_xml::de::from_str(xml)
                .map(Self::Acknowledgement)
                .map_err(malformed),
            Some(PUBLICATION_ROOT) => quick_xml::de::from_str(xml)
                .map(Self::Publication)
                .map_err(malformed),
            _ => Err(DocumentError::Unrecognized {
                body: xml.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Reason {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub text: String,
}

impl Reason {
    fn into_error(self) -> DocumentError {
        DocumentError::Acknowledgement {
            code: self.code.trim().to_owned(),
            text: self.text.trim().to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AcknowledgementDocument {
    #[serde(rename = "Reason", default)]
    pub reasons: Vec<Reason>,
}

impl AcknowledgementDocument {
    fn into_error(self) -> DocumentError {
        self.reasons
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_error()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PublicationDocument {
    #[serde(rename = "Reason", default)]
    pub reasons: Vec<Reason>,
    #[serde(rename = "TimeSeries", default)]
    pub time_series: Vec<TimeSeries>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TimeSeries {
    #[serde(rename = "Reason", default)]
    pub reasons: Vec<Reason>,
    #[serde(rename = "Period", default)]
    pub periods: Vec<Period>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Period {
    #[serde(rename = "timeInterval")]
    pub time_interval: TimeInterval,
    #[serde(default)]
    pub resolution: String,
    #[serde(rename = "Point", default)]
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TimeInterval {
    pub start: String,
    #[serde(default)]
    pub end: String,
}

/// Kept as text so one bad point does not reject the whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Point {
    #[serde(default)]
    pub position: String,
    #[serde(rename = "price.amount", default)]
    pub price_amount: Option<String>,
}

impl PublicationDocument {
    fn into_points(self, xml: &str) -> Result<Vec<RawPricePoint>, DocumentError> {
        if let Some(reason) = self.reasons.into_iter().next() {
            return Err(reason.into_error());
        }

        if self.time_series.is_empty() {
            return Err(DocumentError::Unrecognized {
                body: xml.to_owned(),
            });
        }

        let mut points = Vec::new();
        for series in self.time_series {
            if let Some(reason) = series.reasons.into_iter().next() {
                return Err(reason.into_error());
            }
            for period in series.periods {
                period.collect_into(&mut points, xml)?;
            }
        }

        if points.is_empty() {
            return Err(DocumentError::Empty);
        }

        points.sort_by_key(|point| point.timestamp_utc);
        Ok(points)
    }
}

impl Period {
    fn collect_into(self, out: &mut Vec<RawPricePoint>, xml: &str) -> Result<(), DocumentError> {
        let start = UtcDateTime::parse_lenient(&self.time_interval.start).map_err(|_| {
            DocumentError::Malformed {
                message: format!(
                    "period start '{}' is not a timestamp",
                    self.time_interval.start
                ),
                body: xml.to_owned(),
            }
        })?;
        let step = parse_resolution_minutes(&self.resolution).unwrap_or(DEFAULT_RESOLUTION_MINUTES);

        for point in self.points {
            let Some(position) = point
                .position
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|position| *position > 0)
            else {
                continue;
            };
            let Some(price) = point
                .price_amount
                .as_deref()
                .and_then(|value| value.trim().parse::<f64>().ok())
                .filter(|price| price.is_finite())
            else {
                continue;
            };

            let offset = Duration::minutes((position - 1).saturating_mul(step));
            out.push(RawPricePoint {
                timestamp_utc: start.saturating_add(offset),
                price_major_per_unit: price,
            });
        }

        Ok(())
    }
}

/// `PT15M` → 15, `PT1H` → 60, `P1D` → 1440, `PT1H30M` → 90.
pub fn parse_resolution_minutes(resolution: &str) -> Option<i64> {
    let rest = resolution.trim().strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((date, time)) => (date, time),
        None => (rest, ""),
    };

    let mut minutes = 0_i64;
    let mut seen = false;

    for (part, units) in [
        (date_part, &[('W', 7 * 24 * 60), ('D', 24 * 60)][..]),
        (time_part, &[('H', 60), ('M', 1)][..]),
    ] {
        let mut number = String::new();
        for ch in part.chars() {
            if ch.is_ascii_digit() {
                number.push(ch);
                continue;
            }
            let factor = units.iter().find(|(unit, _)| *unit == ch)?.1;
            let value = number.parse::<i64>().ok()?;
            minutes = minutes.checked_add(value.checked_mul(factor)?)?;
            number.clear();
            seen = true;
        }
        if !number.is_empty() {
            return None;
        }
    }

    (seen && minutes > 0).then_some(minutes)
}

fn root_local_name(xml: &str) -> Result<Option<String>, String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                let name = element.local_name();
                return Ok(Some(String::from_utf8_lossy(name.as_ref()).into_owned()));
            }
            Ok(Event::Eof) => return Ok(None),
            Ok(_) => {}
            Err(error) => return Err(error.to_string()),
        }
    }
}
