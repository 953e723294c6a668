//! Day-ahead price acquisition.
//!
//! [`PriceService::fetch_prices`] resolves the token and zone, serves
//! repeated windows from a TTL cache, coalesces concurrent identical
//! requests onto one upstream call, and falls back to daily chunks when the
//! platform rejects a window as a whole.
//!
//! ```text
//! fetch_prices ─▶ cache hit? ─▶ in-flight? ─▶ spawn fetch ─▶ full range ─┬─▶ points
//!                                                                        └─▶ 24h chunks (on no-data / invalid interval)
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::cache::{CacheMode, TtlCache};
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitSnapshot};
use crate::document::{self, FallbackCause};
use crate::domain::{dedupe_sorted, PricePoint, UtcDateTime};
use crate::error::{ConfigurationError, PriceError};
use crate::http_client::{HttpClient, RequestOptions, ResilientClient, ResilientClientConfig};
use crate::retry::RetryConfig;
use crate::settings::{self, keys, SettingsProvider};
use crate::throttling::RequestPacer;
use crate::zone::{self, ZoneMap};

pub const ENTSOE_BASE_URL: &str = "https://web-api.tp.entsoe.eu/api";
pub const DEFAULT_PRICE_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_EMPTY_CACHE_TTL: Duration = Duration::from_secs(2 * 60);
const CHUNK_HOURS: i64 = 24;

const DOCUMENT_TYPE_DAY_AHEAD: &str = "A44";
const CONTRACT_TYPE_DAILY: &str = "A01";
const PROCESS_TYPE_DAY_AHEAD: &str = "A01";

type FetchResult = Result<Vec<PricePoint>, PriceError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Source of "now"; decides which chunks count as not yet published.
pub trait Clock: Send + Sync {
    fn now(&self) -> UtcDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UtcDateTime {
        UtcDateTime::now()
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub UtcDateTime);

impl Clock for FixedClock {
    fn now(&self) -> UtcDateTime {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct PriceServiceConfig {
    pub base_url: String,
    /// Token taken from the environment; wins over the stored setting.
    pub env_token: Option<String>,
    pub cache_ttl: Duration,
    /// Lifetime of an empty result; zero disables caching of empty windows.
    pub empty_cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,
    pub pacer: RequestPacer,
    pub jitter_seed: Option<u64>,
}

impl Default for PriceServiceConfig {
    fn default() -> Self {
        let client = ResilientClientConfig::new("entsoe", ENTSOE_BASE_URL);
        Self {
            base_url: client.base_url,
            env_token: None,
            cache_ttl: DEFAULT_PRICE_CACHE_TTL,
            empty_cache_ttl: DEFAULT_EMPTY_CACHE_TTL,
            cache_max_entries: client.cache_max_entries,
            request_timeout: client.default_timeout,
            retry: client.retry,
            breaker: client.breaker,
            pacer: RequestPacer::entsoe_default(),
            jitter_seed: None,
        }
    }
}

impl PriceServiceConfig {
    /// Defaults plus the token from `SPOTWATT_ENTSOE_TOKEN`.
    pub fn from_env() -> Self {
        Self {
            env_token: settings::token_from_env(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_env_token(mut self, token: Option<String>) -> Self {
        self.env_token = token;
        self
    }

    fn client_config(&self) -> ResilientClientConfig {
        ResilientClientConfig {
            default_timeout: self.request_timeout,
            retry: self.retry.clone(),
            breaker: self.breaker.clone(),
            jitter_seed: self.jitter_seed,
            ..ResilientClientConfig::new("entsoe", self.base_url.clone())
        }
    }
}

/// Per-call overrides for [`PriceService::fetch_prices`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Skip the cache read; the fresh result still replaces the entry.
    pub force_refresh: bool,
    /// Token that wins over environment and settings.
    pub token: Option<String>,
    /// Zone map that wins over the stored and compiled maps.
    pub zone_map: Option<ZoneMap>,
}

#[derive(Debug, Clone)]
struct PriceRequest {
    token: String,
    zone: String,
    start: UtcDateTime,
    end: UtcDateTime,
    key: String,
}

struct PriceServiceInner {
    client: ResilientClient,
    settings: Arc<dyn SettingsProvider>,
    clock: Arc<dyn Clock>,
    cache: TtlCache<Vec<PricePoint>>,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
    cache_ttl: Duration,
    empty_cache_ttl: Duration,
    env_token: Option<String>,
}

/// Price acquisition entry point. Cheap to clone; clones share the cache,
/// the in-flight registry and the circuit breaker.
#[derive(Clone)]
pub struct PriceService {
    inner: Arc<PriceServiceInner>,
}

impl std::fmt::Debug for PriceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceService")
            .field("client", &self.inner.client)
            .field("cached_windows", &self.inner.cache.len())
            .field("in_flight", &self.in_flight_len())
            .finish()
    }
}

impl PriceService {
    pub fn new(
        transport: Arc<dyn HttpClient>,
        settings: Arc<dyn SettingsProvider>,
        config: PriceServiceConfig,
    ) -> Self {
        Self::with_clock(transport, settings, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        transport: Arc<dyn HttpClient>,
        settings: Arc<dyn SettingsProvider>,
        config: PriceServiceConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let client = ResilientClient::new(transport, config.client_config())
            .with_pacer(config.pacer.clone());
        Self {
            inner: Arc::new(PriceServiceInner {
                client,
                settings,
                clock,
                cache: TtlCache::new(config.cache_max_entries),
                in_flight: Mutex::new(HashMap::new()),
                cache_ttl: config.cache_ttl,
                empty_cache_ttl: config.empty_cache_ttl,
                env_token: config.env_token,
            }),
        }
    }

    /// Enriched day-ahead prices covering `[start, end)`, ascending and
    /// unique by timestamp.
    ///
    /// A partial or empty result without an error is valid: prices for
    /// future days may not be published yet.
    pub async fn fetch_prices(
        &self,
        zone_input: Option<&str>,
        start: &str,
        end: &str,
        options: FetchOptions,
    ) -> Result<Vec<PricePoint>, PriceError> {
        let token = self.resolve_token(options.token.as_deref())?;
        let zone = self.resolve_zone(zone_input, options.zone_map.as_ref())?;
        let (start, end) = parse_window(start, end)?;
        let key = cache_key(&zone, start, end);

        if !options.force_refresh {
            if let Some(points) = self.inner.cache.get(&key) {
                debug!(zone = %zone, %start, %end, "serving prices from cache");
                return Ok(points);
            }
        }

        let request = PriceRequest {
            token,
            zone,
            start,
            end,
            key,
        };
        self.join_or_spawn(request).await
    }

    /// One shared future per key. The fetch runs in its own task so it
    /// finishes and cleans up even when every waiter is dropped.
    fn join_or_spawn(&self, request: PriceRequest) -> SharedFetch {
        let mut in_flight = self.inner.lock_in_flight();
        if let Some(existing) = in_flight.get(&request.key) {
            debug!(key = %request.key, "joining in-flight price request");
            return existing.clone();
        }

        let key = request.key.clone();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run_fetch(request).await });
        let shared = async move {
            handle.await.unwrap_or_else(|e| {
                Err(PriceError::Internal(format!("price fetch task failed: {e}")))
            })
        }
        .boxed()
        .shared();

        in_flight.insert(key, shared.clone());
        shared
    }

    pub fn resolve_zone(
        &self,
        zone_input: Option<&str>,
        zone_map: Option<&ZoneMap>,
    ) -> Result<String, ConfigurationError> {
        zone::resolve_zone(self.inner.settings.as_ref(), zone_input, zone_map)
    }

    /// Token precedence: explicit, environment, `entsoe_token` setting.
    fn resolve_token(&self, explicit: Option<&str>) -> Result<String, ConfigurationError> {
        explicit
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_owned)
            .or_else(|| self.inner.env_token.clone())
            .or_else(|| self.inner.settings.get_non_empty(keys::ENTSOE_TOKEN))
            .ok_or(ConfigurationError::MissingToken)
    }

    /// Drops the cached window; `true` when something was cached.
    pub fn invalidate(
        &self,
        zone_input: Option<&str>,
        start: &str,
        end: &str,
    ) -> Result<bool, PriceError> {
        let zone = self.resolve_zone(zone_input, None)?;
        let (start, end) = parse_window(start, end)?;
        Ok(self
            .inner
            .cache
            .remove(&cache_key(&zone, start, end))
            .is_some())
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn cached_windows(&self) -> usize {
        self.inner.cache.live_len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.inner.lock_in_flight().len()
    }

    pub fn breaker_snapshot(&self) -> CircuitSnapshot {
        self.inner.client.breaker().snapshot()
    }
}

impl PriceServiceInner {
    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, SharedFetch>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run_fetch(self: Arc<Self>, request: PriceRequest) -> FetchResult {
        let result = self.fetch_window(&request).await;

        match &result {
            Ok(points) if !points.is_empty() => {
                self.cache
                    .set(request.key.clone(), points.clone(), self.cache_ttl);
            }
            Ok(points) => {
                self.cache
                    .set(request.key.clone(), points.clone(), self.empty_cache_ttl);
                info!(
                    zone = %request.zone,
                    start = %request.start,
                    end = %request.end,
                    "no prices published for window"
                );
            }
            Err(error) => {
                self.cache.remove(&request.key);
                warn!(
                    zone = %request.zone,
                    code = error.code(),
                    error = %error,
                    "price fetch failed"
                );
            }
        }

        self.lock_in_flight().remove(&request.key);
        result
    }

    async fn fetch_window(&self, request: &PriceRequest) -> FetchResult {
        let error = match self
            .fetch_range(request, request.start, request.end)
            .await
        {
            Ok(points) => return Ok(points),
            Err(error) => error,
        };

        let Some(cause) = error.fallback_cause() else {
            return Err(error);
        };

        info!(
            zone = %request.zone,
            ?cause,
            error = %error,
            "full-range request rejected, retrieving daily chunks"
        );
        self.fetch_chunked(request).await
    }

    /// Sequential 24h chunks over the window. A chunk that is not servable
    /// and starts today or later ends the walk with what was collected.
    async fn fetch_chunked(&self, request: &PriceRequest) -> FetchResult {
        let today = self.clock.now().start_of_day();
        let mut collected = Vec::new();
        let mut chunk_start = request.start;

        while chunk_start < request.end {
            let chunk_end = chunk_start
                .saturating_add(time::Duration::hours(CHUNK_HOURS))
                .min(request.end);

            match self.fetch_range(request, chunk_start, chunk_end).await {
                Ok(points) => collected.extend(points),
                Err(error) => {
                    let cause = error.fallback_cause();
                    if cause.is_some() && chunk_start >= today {
                        info!(
                            zone = %request.zone,
                            chunk_start = %chunk_start,
                            collected = collected.len(),
                            "prices not yet published, returning partial window"
                        );
                        break;
                    }
                    if collected.is_empty() && cause == Some(FallbackCause::NoData) {
                        info!(
                            zone = %request.zone,
                            chunk_start = %chunk_start,
                            "no data for window"
                        );
                        return Ok(Vec::new());
                    }
                    return Err(error);
                }
            }

            chunk_start = chunk_end;
        }

        Ok(dedupe_sorted(collected))
    }

    async fn fetch_range(
        &self,
        request: &PriceRequest,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> FetchResult {
        let options = RequestOptions::new()
            .param("securityToken", request.token.clone())
            .param("documentType", DOCUMENT_TYPE_DAY_AHEAD)
            .param("contract_MarketAgreement.type", CONTRACT_TYPE_DAILY)
            .param("processType", PROCESS_TYPE_DAY_AHEAD)
            .param("in_Domain", request.zone.clone())
            .param("out_Domain", request.zone.clone())
            .param("periodStart", start.format_compact())
            .param("periodEnd", end.format_compact())
            .cache_mode(CacheMode::Bypass);

        let body = self.client.get("", options).await?;
        let raw = document::parse_price_document(&body)?;

        let fx_rate = self.fx_rate();
        let points = raw
            .into_iter()
            .map(|point| {
                PricePoint::new(point.timestamp_utc, point.price_major_per_unit, fx_rate)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(dedupe_sorted(points))
    }

    /// Exchange rate to apply, only when conversion is switched on.
    fn fx_rate(&self) -> Option<f64> {
        if !self.settings.get_flag(keys::USE_FX_CONVERSION) {
            return None;
        }
        self.settings
            .get_number(keys::FX_RATE)
            .filter(|rate| rate.is_finite() && *rate > 0.0)
    }
}

/// `zone|start|end` with RFC3339 bounds.
fn cache_key(zone: &str, start: UtcDateTime, end: UtcDateTime) -> String {
    format!("{zone}|{start}|{end}")
}

fn parse_window(start: &str, end: &str) -> Result<(UtcDateTime, UtcDateTime), PriceError> {
    let start = UtcDateTime::parse_lenient(start)?;
    let end = UtcDateTime::parse_lenient(end)?;
    if end <= start {
        return Err(PriceError::InvalidRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    Ok((start, end))
}
