//! # Spotwatt Core
//!
//! Resilient acquisition of day-ahead electricity prices from the ENTSO-E
//! transparency platform.
//!
//! ## Overview
//!
//! - **Price orchestrator** with caching, request coalescing and chunked fallback
//! - **Resilient HTTP client**: timeouts, pacing, retry with jittered backoff, response cache
//! - **Adaptive circuit breaker** per upstream
//! - **Market document parser** for publication and acknowledgement documents
//! - **Zone resolution** from country codes or direct area codes
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`area_directory`] | Zone map generation from the area directory |
//! | [`cache`] | Bounded TTL cache |
//! | [`circuit_breaker`] | Adaptive circuit breaker |
//! | [`document`] | Market document decoding |
//! | [`domain`] | Timestamps and price points |
//! | [`error`] | Error taxonomy |
//! | [`http_client`] | Transport contract and resilient client |
//! | [`prices`] | `PriceService::fetch_prices` |
//! | [`retry`] | Retry policy and backoff |
//! | [`settings`] | Settings interface and adapters |
//! | [`throttling`] | Client-side request pacing |
//! | [`zone`] | Price zone resolution |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use spotwatt_core::{
//!     FetchOptions, MemorySettings, PriceService, PriceServiceConfig, ReqwestHttpClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = MemorySettings::new().with("price_country", "SE");
//!     let service = PriceService::new(
//!         Arc::new(ReqwestHttpClient::new()),
//!         Arc::new(settings),
//!         PriceServiceConfig::from_env(),
//!     );
//!
//!     let prices = service
//!         .fetch_prices(None, "2024-01-01T00:00:00Z", "2024-01-02T00:00:00Z", FetchOptions::default())
//!         .await?;
//!     for point in prices {
//!         println!("{} {:.4} EUR/kWh", point.timestamp_utc, point.price_eur_per_kwh);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use spotwatt_core::PriceError;
//!
//! fn describe(error: &PriceError) -> &'static str {
//!     if error.is_configuration() {
//!         "fix your settings"
//!     } else if error.retryable() {
//!         "upstream trouble, try again later"
//!     } else {
//!         "upstream rejected the request"
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - The security token is masked in every logged URL
//! - The token is read from the environment or settings, never from URLs

pub mod area_directory;
pub mod cache;
pub mod circuit_breaker;
pub mod document;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod prices;
pub mod retry;
pub mod settings;
pub mod throttling;
pub mod zone;

// Re-export commonly used types at crate root for convenience

// Area directory
pub use area_directory::{
    build_area_map, guess_iso, parse_area_directory, AreaDirectoryError, AreaDomain,
};

// Caching
pub use cache::{CacheMode, TtlCache};

// Circuit breaker
pub use circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
};

// Document parsing
pub use document::{parse_price_document, FallbackCause, MarketDocument};

// Domain models
pub use domain::{PricePoint, RawPricePoint, UtcDateTime};

// Error types
pub use error::{ConfigurationError, DocumentError, PriceError, RequestError, ValidationError};

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, RequestOptions,
    ResilientClient, ResilientClientConfig, ReqwestHttpClient,
};

// Price acquisition
pub use prices::{Clock, FetchOptions, FixedClock, PriceService, PriceServiceConfig, SystemClock};

// Retry logic
pub use retry::RetryConfig;

// Settings
pub use settings::{JsonFileSettings, MemorySettings, SettingsError, SettingsProvider};

// Throttling
pub use throttling::RequestPacer;

// Zones
pub use zone::{resolve_zone, ZoneMap};
