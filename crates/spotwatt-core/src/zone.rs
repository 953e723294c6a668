//! Price zone resolution: country codes and direct area codes to the EIC
//! area code queried upstream.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigurationError;
use crate::settings::{keys, SettingsProvider};

/// Compiled default bidding zones. The first code of each country is the
/// one used when only the country is known.
const DEFAULT_ZONES: &[(&str, &[&str])] = &[
    ("AT", &["10YAT-APG------L"]),
    ("BE", &["10YBE----------2"]),
    ("BG", &["10YCA-BULGARIA-R"]),
    ("CH", &["10YCH-SWISSGRIDZ"]),
    ("CZ", &["10YCZ-CEPS-----N"]),
    ("DE", &["10Y1001A1001A82H"]),
    ("DK", &["10YDK-1--------W", "10YDK-2--------M"]),
    ("EE", &["10Y1001A1001A39I"]),
    ("ES", &["10YES-REE------0"]),
    ("FI", &["10YFI-1--------U"]),
    ("FR", &["10YFR-RTE------C"]),
    ("GR", &["10YGR-HTSO-----Y"]),
    ("HR", &["10YHR-HEP------M"]),
    ("HU", &["10YHU-MAVIR----U"]),
    ("IE", &["10Y1001A1001A59C"]),
    ("IT", &["10Y1001A1001A73I"]),
    ("LT", &["10YLT-1001A0008Q"]),
    ("LU", &["10Y1001A1001A82H"]),
    ("LV", &["10YLV-1001A00074"]),
    ("NL", &["10YNL----------L"]),
    (
        "NO",
        &[
            "10YNO-1--------2",
            "10YNO-2--------T",
            "10YNO-3--------J",
            "10YNO-4--------9",
            "10Y1001A1001A48H",
        ],
    ),
    ("PL", &["10YPL-AREA-----S"]),
    ("PT", &["10YPT-REN------W"]),
    ("RO", &["10YRO-TEL------P"]),
    (
        "SE",
        &[
            "10Y1001A1001A44P",
            "10Y1001A1001A45N",
            "10Y1001A1001A46L",
            "10Y1001A1001A47J",
        ],
    ),
    ("SI", &["10YSI-ELES-----O"]),
    ("SK", &["10YSK-SEPS-----K"]),
];

const AREA_CODE_LEN: usize = 16;
const AREA_CODE_PREFIX: &str = "10Y";

/// `10Y` followed by 13 characters of `[0-9A-Z-]`, case-insensitive.
pub fn is_area_code(input: &str) -> bool {
    let upper = input.trim().to_ascii_uppercase();
    upper.len() == AREA_CODE_LEN
        && upper.starts_with(AREA_CODE_PREFIX)
        && upper
            .chars()
            .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '-')
}

fn is_country_code(input: &str) -> bool {
    input.len() == 2 && input.chars().all(|ch| ch.is_ascii_alphabetic())
}

/// ISO country code to ordered area codes. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneMap(BTreeMap<String, Vec<String>>);

impl Default for ZoneMap {
    fn default() -> Self {
        Self::default_map()
    }
}

impl ZoneMap {
    pub fn default_map() -> Self {
        Self(
            DEFAULT_ZONES
                .iter()
                .map(|(country, codes)| {
                    (
                        (*country).to_owned(),
                        codes.iter().map(|code| (*code).to_owned()).collect(),
                    )
                })
                .collect(),
        )
    }

    /// Uppercases two-letter keys, trims and dedups codes, and drops
    /// anything invalid. Falls back to the default map when nothing is left.
    pub fn normalized<I, K, C, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = (K, C)>,
        K: AsRef<str>,
        C: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (country, codes) in raw {
            let country = country.as_ref().trim().to_ascii_uppercase();
            if !is_country_code(&country) {
                continue;
            }
            let entry = map.entry(country).or_default();
            for code in codes {
                let code = code.as_ref().trim().to_ascii_uppercase();
                if !code.is_empty() && !entry.contains(&code) {
                    entry.push(code);
                }
            }
        }

        map.retain(|_, codes| !codes.is_empty());
        if map.is_empty() {
            return Self::default_map();
        }
        Self(map)
    }

    /// Accepts `{"SE": ["10Y…", …]}` or `{"SE": "10Y…"}` values.
    pub fn from_json(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default_map();
        };

        Self::normalized(object.iter().map(|(country, codes)| {
            let codes: Vec<String> = match codes {
                Value::String(code) => vec![code.clone()],
                Value::Array(items) => items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_owned))
                    .collect(),
                _ => Vec::new(),
            };
            (country.clone(), codes)
        }))
    }

    pub fn primary_area(&self, country: &str) -> Option<&str> {
        self.areas(country).first().map(String::as_str)
    }

    pub fn areas(&self, country: &str) -> &[String] {
        self.0
            .get(&country.trim().to_ascii_uppercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn countries(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Vec<String>> {
        &self.0
    }
}

/// Zone map in effect: override, else the stored `entsoe_area_map`, else
/// the compiled defaults.
pub fn effective_zone_map(
    settings: &dyn SettingsProvider,
    override_map: Option<&ZoneMap>,
) -> ZoneMap {
    if let Some(map) = override_map {
        return map.clone();
    }
    settings
        .get_object(keys::ENTSOE_AREA_MAP)
        .map(|value| ZoneMap::from_json(&value))
        .unwrap_or_default()
}

/// Resolves the area code to query.
///
/// Input precedence: `explicit`, then the `entsoe_area` setting, then the
/// `price_country` setting. Area codes pass through uppercased; two-letter
/// country codes go through the zone map.
pub fn resolve_zone(
    settings: &dyn SettingsProvider,
    explicit: Option<&str>,
    zone_map_override: Option<&ZoneMap>,
) -> Result<String, ConfigurationError> {
    let input = explicit
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .or_else(|| settings.get_non_empty(keys::ENTSOE_AREA))
        .or_else(|| settings.get_non_empty(keys::PRICE_COUNTRY))
        .ok_or(ConfigurationError::MissingZone)?;

    if is_area_code(&input) {
        return Ok(input.to_ascii_uppercase());
    }

    if !is_country_code(&input) {
        return Err(ConfigurationError::InvalidZone { value: input });
    }

    let country = input.to_ascii_uppercase();
    effective_zone_map(settings, zone_map_override)
        .primary_area(&country)
        .map(str::to_owned)
        .ok_or(ConfigurationError::UnmappedZone { country })
}
