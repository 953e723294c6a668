//! Zone map generation from the platform's area directory.
//!
//! The directory (`AreaDirectory.xml`, or a `documentType=A86` response)
//! lists every EIC area with a human-readable name. ISO detection is best
//! effort; review generated maps before shipping them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::http_client::{HttpClient, HttpRequest};

/// EIC codes whose names carry no usable ISO token.
const FORCED_ISO: &[(&str, &str)] = &[
    ("10Y1001A1001A48H", "NO"),
    ("10YBE----------2", "BE"),
    ("10YNL----------L", "NL"),
    ("10YPT-REN------W", "PT"),
    ("10YFR-RTE------C", "FR"),
    ("10YDE-VE-------2", "DE"),
    ("10YDE-ENBW-----N", "DE"),
    ("10YDE-RWENET---I", "DE"),
    ("10YDE-EON------1", "DE"),
    ("10YGB----------A", "GB"),
    ("10YGB-NIR------Y", "GB"),
    ("10YIE-1001A00010", "IE"),
    ("10YCH-SWISSGRIDZ", "CH"),
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AreaDirectoryError {
    #[error("failed to read '{source_name}': {message}")]
    Io {
        source_name: String,
        message: String,
    },

    #[error("failed to fetch '{source_name}': {message}")]
    Http {
        source_name: String,
        message: String,
    },

    #[error("invalid area directory XML: {message}")]
    Xml { message: String },
}

/// One `Domain` entry of the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaDomain {
    pub eic: String,
    pub name: String,
}

/// Reads the directory from a file path or an `http(s)://` URL.
pub async fn load_source(
    source: &str,
    transport: &dyn HttpClient,
) -> Result<String, AreaDirectoryError> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let response = transport
            .execute(HttpRequest::get(source).with_timeout_ms(60_000))
            .await
            .map_err(|e| AreaDirectoryError::Http {
                source_name: source.to_owned(),
                message: e.to_string(),
            })?;
        if !response.is_success() {
            return Err(AreaDirectoryError::Http {
                source_name: source.to_owned(),
                message: format!("status {}", response.status),
            });
        }
        return Ok(response.body);
    }

    let path = expand_home(source);
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| AreaDirectoryError::Io {
            source_name: path.display().to_string(),
            message: e.to_string(),
        })
}

fn expand_home(source: &str) -> PathBuf {
    match (source.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => Path::new(&home).join(rest),
        _ => PathBuf::from(source),
    }
}

/// Collects every `Domain` element, namespaced or not, that has an `mRID`.
/// `name` wins over `shortName`.
pub fn parse_area_directory(xml: &str) -> Result<Vec<AreaDomain>, AreaDirectoryError> {
    #[derive(Default)]
    struct Pending {
        eic: String,
        name: String,
        short_name: String,
    }

    let mut reader = Reader::from_str(xml);
    let mut domains = Vec::new();
    let mut current: Option<Pending> = None;
    // Depth below the open `Domain`; 1 means a direct child.
    let mut depth = 0_usize;
    let mut field: Option<String> = None;

    loop {
        let event = reader.read_event().map_err(|e| AreaDirectoryError::Xml {
            message: e.to_string(),
        })?;

        match event {
            Event::Start(element) => {
                let local = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
                if current.is_none() {
                    if local == "Domain" {
                        current = Some(Pending::default());
                        depth = 0;
                    }
                    continue;
                }
                depth += 1;
                field = (depth == 1).then_some(local);
            }
            Event::Text(text) => {
                let (Some(pending), Some(name)) = (current.as_mut(), field.as_deref()) else {
                    continue;
                };
                let value = text.unescape().map_err(|e| AreaDirectoryError::Xml {
                    message: e.to_string(),
                })?;
                let target = match name {
                    "mRID" => &mut pending.eic,
                    "name" => &mut pending.name,
                    "shortName" => &mut pending.short_name,
                    _ => continue,
                };
                target.push_str(&value);
            }
            Event::End(_) => {
                if current.is_none() {
                    continue;
                }
                field = None;
                if depth == 0 {
                    if let Some(pending) = current.take() {
                        let eic = pending.eic.trim().to_owned();
                        if eic.is_empty() {
                            continue;
                        }
                        let name = if pending.name.trim().is_empty() {
                            pending.short_name.trim().to_owned()
                        } else {
                            pending.name.trim().to_owned()
                        };
                        domains.push(AreaDomain { eic, name });
                    }
                } else {
                    depth -= 1;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if domains.is_empty() {
        warn!("no Domain elements found in area directory");
    }
    Ok(domains)
}

/// Best-effort ISO country for an area.
pub fn guess_iso(name: &str, eic: &str) -> Option<String> {
    if let Some((_, iso)) = FORCED_ISO.iter().find(|(code, _)| *code == eic) {
        return Some((*iso).to_owned());
    }

    let upper = name.to_uppercase();
    for token in upper
        .split_whitespace()
        .map(|token| token.trim_matches(|ch| matches!(ch, '(' | ')' | '[' | ']' | ':' | '/')))
    {
        let chars: Vec<char> = token.chars().collect();
        if chars.len() == 2 && chars.iter().all(|ch| ch.is_alphabetic()) {
            return Some(token.to_owned());
        }
        if chars.len() >= 3
            && chars[0].is_alphabetic()
            && chars[1].is_alphabetic()
            && chars[2].is_ascii_digit()
        {
            return Some(chars[..2].iter().collect());
        }
    }

    if eic.starts_with("10Y") {
        let candidate: String = eic
            .chars()
            .skip(3)
            .take(2)
            .filter(|ch| ch.is_ascii_alphabetic())
            .collect();
        if candidate.len() == 2 {
            return Some(candidate);
        }
    }

    None
}

fn normalize_iso(value: &str) -> Option<String> {
    let value = value.trim().to_ascii_uppercase();
    (value.len() == 2 && value.chars().all(|ch| ch.is_ascii_alphabetic())).then_some(value)
}

/// Groups domains by detected ISO code, merges `existing` maps, and sorts
/// the codes of every country. Keys come out sorted.
pub fn build_area_map(
    domains: &[AreaDomain],
    default_iso: Option<&str>,
    existing: &[Value],
) -> BTreeMap<String, Vec<String>> {
    let default_iso = default_iso.and_then(normalize_iso);
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for domain in domains {
        let iso = guess_iso(&domain.name, &domain.eic)
            .as_deref()
            .and_then(normalize_iso)
            .or_else(|| default_iso.clone());
        let Some(iso) = iso else {
            debug!(eic = %domain.eic, name = %domain.name, "no ISO code detected");
            continue;
        };
        let bucket = map.entry(iso).or_default();
        if !bucket.contains(&domain.eic) {
            bucket.push(domain.eic.clone());
        }
    }

    for value in existing {
        let Some(object) = value.as_object() else {
            warn!("existing area map is not a JSON object, skipping");
            continue;
        };
        for (iso, codes) in object {
            let (Some(iso), Some(codes)) = (normalize_iso(iso), codes.as_array()) else {
                continue;
            };
            let bucket = map.entry(iso).or_default();
            for code in codes.iter().filter_map(Value::as_str) {
                if !code.is_empty() && !bucket.iter().any(|known| known == code) {
                    bucket.push(code.to_owned());
                }
            }
        }
    }

    for codes in map.values_mut() {
        codes.sort();
    }
    map
}

/// Loads existing JSON maps; missing or unparseable files are skipped.
pub fn load_existing_maps(paths: &[PathBuf]) -> Vec<Value> {
    paths
        .iter()
        .filter(|path| path.exists())
        .filter_map(|path| {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| warn!(path = %path.display(), error = %e, "failed to read existing map"))
                .ok()?;
            serde_json::from_str(&raw)
                .map_err(|e| warn!(path = %path.display(), error = %e, "failed to parse existing map"))
                .ok()
        })
        .collect()
}

/// Pretty JSON with a trailing newline.
pub fn render_area_map(map: &BTreeMap<String, Vec<String>>) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(map).map(|mut json| {
        json.push('\n');
        json
    })
}
