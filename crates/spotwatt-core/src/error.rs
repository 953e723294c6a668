use std::time::Duration;

use thiserror::Error;

use crate::document::{self, FallbackCause};

const BODY_SNIPPET_CHARS: usize = 512;

/// Validation errors raised by domain constructors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("timestamp must be RFC3339: '{value}'")]
    InvalidTimestamp { value: String },

    #[error("timestamp must be UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
}

/// Problems the user has to fix in their settings. Never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error(
        "ENTSO-E security token not found; set SPOTWATT_ENTSOE_TOKEN or the 'entsoe_token' setting"
    )]
    MissingToken,

    #[error("no price zone configured; pass a zone or set 'entsoe_area' or 'price_country'")]
    MissingZone,

    #[error("'{value}' is neither an ENTSO-E area code nor a two-letter country code")]
    InvalidZone { value: String },

    #[error(
        "no ENTSO-E area is mapped for country '{country}'; set 'entsoe_area' or extend 'entsoe_area_map'"
    )]
    UnmappedZone { country: String },
}

impl ConfigurationError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingToken => "config.missing_token",
            Self::MissingZone => "config.missing_zone",
            Self::InvalidZone { .. } => "config.invalid_zone",
            Self::UnmappedZone { .. } => "config.unmapped_zone",
        }
    }
}

/// Failure of one logical request through the resilient client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("circuit '{name}' is open; service unavailable, retry in {:.1}s", .retry_in.as_secs_f64())]
    CircuitOpen { name: String, retry_in: Duration },

    #[error("request timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("upstream returned status {status}: {}", snippet(.body))]
    Status { status: u16, body: String },

    #[error("invalid request url: {message}")]
    InvalidUrl { message: String },

    #[error("failed to decode response body: {message}")]
    Decode { message: String },
}

impl RequestError {
    /// Whether another attempt could plausibly succeed.
    pub const fn retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::CircuitOpen { .. } | Self::InvalidUrl { .. } | Self::Decode { .. } => false,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "request.circuit_open",
            Self::Timeout { .. } => "request.timeout",
            Self::Transport { .. } => "request.transport",
            Self::Status { .. } => "request.status",
            Self::InvalidUrl { .. } => "request.invalid_url",
            Self::Decode { .. } => "request.decode",
        }
    }

    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Upstream answered, but not with usable price data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("upstream acknowledgement {code}: {text}")]
    Acknowledgement { code: String, text: String },

    #[error("response is not a recognizable market document: {}", snippet(.body))]
    Unrecognized { body: String },

    #[error("malformed market document ({message}): {}", snippet(.body))]
    Malformed { message: String, body: String },

    #[error("market document contained no price points")]
    Empty,
}

impl DocumentError {
    pub fn fallback_cause(&self) -> Option<FallbackCause> {
        match self {
            Self::Acknowledgement { code, text } => document::classify_reason(code, text),
            Self::Empty => Some(FallbackCause::NoData),
            Self::Unrecognized { .. } | Self::Malformed { .. } => None,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::Acknowledgement { .. } => "document.acknowledgement",
            Self::Unrecognized { .. } => "document.unrecognized",
            Self::Malformed { .. } => "document.malformed",
            Self::Empty => "document.empty",
        }
    }
}

/// Top-level error returned by price acquisition.
///
/// Cloneable so every caller coalesced onto one upstream request observes the
/// same failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PriceError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("price window end '{end}' must be after start '{start}'")]
    InvalidRange { start: String, end: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl PriceError {
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub const fn retryable(&self) -> bool {
        match self {
            Self::Request(error) => error.retryable(),
            _ => false,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::Configuration(error) => error.code(),
            Self::Request(error) => error.code(),
            Self::Document(error) => error.code(),
            Self::Validation(_) => "price.invalid_input",
            Self::InvalidRange { .. } => "price.invalid_range",
            Self::Internal(_) => "price.internal",
        }
    }

    /// Whether this failure means "the requested window is not servable as a
    /// whole", which switches the orchestrator to chunked retrieval.
    ///
    /// The platform reports these either as an acknowledgement document with a
    /// 200 status or as a 4xx whose body is an acknowledgement document.
    pub fn fallback_cause(&self) -> Option<FallbackCause> {
        match self {
            Self::Document(error) => error.fallback_cause(),
            Self::Request(RequestError::Status { status, body })
                if (400..500).contains(status) && *status != 429 =>
            {
                document::acknowledgement_reason(body)
                    .and_then(|(code, text)| document::classify_reason(&code, &text))
            }
            _ => None,
        }
    }
}

fn snippet(body: &str) -> String {
    if body.chars().count() <= BODY_SNIPPET_CHARS {
        return body.to_owned();
    }
    let truncated: String = body.chars().take(BODY_SNIPPET_CHARS).collect();
    format!("{truncated}…")
}
