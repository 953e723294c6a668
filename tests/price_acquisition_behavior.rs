//! Behavior-driven tests for day-ahead price acquisition
//!
//! These tests verify HOW `PriceService::fetch_prices` serves callers:
//! caching, coalescing of concurrent requests, enrichment, zone resolution
//! and the chunked fallback for windows the platform rejects as a whole.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use spotwatt_core::{
    FetchOptions, FixedClock, HttpClient, HttpError, HttpRequest, HttpResponse, MemorySettings,
    PriceError, PriceService, PriceServiceConfig, RequestPacer, RetryConfig, UtcDateTime, ZoneMap,
};

type Responder = dyn Fn(&HttpRequest) -> Result<HttpResponse, HttpError> + Send + Sync;

/// Transport double that answers from a closure and records every URL.
struct ScriptedTransport {
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
    delay: Duration,
    respond: Box<Responder>,
}

impl ScriptedTransport {
    fn new(
        respond: impl Fn(&HttpRequest) -> Result<HttpResponse, HttpError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::with_delay(Duration::ZERO, respond)
    }

    fn with_delay(
        delay: Duration,
        respond: impl Fn(&HttpRequest) -> Result<HttpResponse, HttpError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            delay,
            respond: Box::new(respond),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn urls(&self) -> Vec<String> {
        self.urls.lock().expect("urls lock").clone()
    }
}

impl HttpClient for ScriptedTransport {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().expect("urls lock").push(request.url.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.respond)(&request)
        })
    }
}

fn ts(value: &str) -> UtcDateTime {
    UtcDateTime::parse(value).expect("valid timestamp")
}

fn query_param<'a>(url: &'a str, name: &str) -> Option<&'a str> {
    url.split_once('?')?.1.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then_some(value)
    })
}

/// `202401010000` -> `2024-01-01T00:00Z`
fn compact_to_rfc3339(compact: &str) -> String {
    format!(
        "{}-{}-{}T{}:{}Z",
        &compact[0..4],
        &compact[4..6],
        &compact[6..8],
        &compact[8..10],
        &compact[10..12]
    )
}

fn publication(start: &str, prices: &[f64]) -> String {
    let points: String = prices
        .iter()
        .enumerate()
        .map(|(index, price)| {
            format!(
                "<Point><position>{}</position><price.amount>{price}</price.amount></Point>",
                index + 1
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<Publication_MarketDocument xmlns="urn:iec62325.351:tc57wg16:451-3:publicationdocument:7:3">
  <mRID>test</mRID>
  <TimeSeries>
    <mRID>1</mRID>
    <Period>
      <timeInterval><start>{start}</start><end>{start}</end></timeInterval>
      <resolution>PT60M</resolution>
      {points}
    </Period>
  </TimeSeries>
</Publication_MarketDocument>"#
    )
}

fn acknowledgement(code: &str, text: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<Acknowledgement_MarketDocument xmlns="urn:iec62325.351:tc57wg16:451-1:acknowledgementdocument:7:0">
  <mRID>ack</mRID>
  <Reason>
    <code>{code}</code>
    <text>{text}</text>
  </Reason>
</Acknowledgement_MarketDocument>"#
    )
}

/// Hourly prices `50, 51, ...` covering the requested window.
fn hourly_window(request: &HttpRequest) -> Result<HttpResponse, HttpError> {
    let start = query_param(&request.url, "periodStart").expect("periodStart");
    let end = query_param(&request.url, "periodEnd").expect("periodEnd");
    let start = compact_to_rfc3339(start);
    let hours = (UtcDateTime::parse_lenient(&compact_to_rfc3339(end))
        .expect("end")
        .unix_timestamp()
        - UtcDateTime::parse_lenient(&start)
            .expect("start")
            .unix_timestamp())
        / 3600;
    let prices: Vec<f64> = (0..hours).map(|hour| 50.0 + hour as f64).collect();
    Ok(HttpResponse::ok(publication(&start, &prices)))
}

fn test_config() -> PriceServiceConfig {
    PriceServiceConfig {
        retry: RetryConfig::no_retry(),
        pacer: RequestPacer::unlimited(),
        jitter_seed: Some(7),
        ..PriceServiceConfig::default()
    }
    .with_base_url("https://entsoe.test/api")
    .with_env_token(Some(String::from("test-token")))
}

fn service_at(
    transport: Arc<ScriptedTransport>,
    settings: MemorySettings,
    now: &str,
) -> PriceService {
    PriceService::with_clock(
        transport,
        Arc::new(settings),
        test_config(),
        Arc::new(FixedClock(ts(now))),
    )
}

fn service(transport: Arc<ScriptedTransport>) -> PriceService {
    service_at(transport, MemorySettings::new(), "2024-01-10T12:00:00Z")
}

// =============================================================================
// Price Acquisition: Caching
// =============================================================================

#[tokio::test]
async fn when_same_window_is_requested_twice_second_call_is_served_from_cache() {
    // Given: A service in front of a healthy upstream
    let transport = ScriptedTransport::new(hourly_window);
    let service = service(transport.clone());

    // When: The same window is requested twice
    let first = service
        .fetch_prices(
            Some("FI"),
            "2024-01-01T00:00:00Z",
            "2024-01-02T00:00:00Z",
            FetchOptions::default(),
        )
        .await
        .expect("first fetch");
    let second = service
        .fetch_prices(
            Some("FI"),
            "2024-01-01T00:00:00Z",
            "2024-01-02T00:00:00Z",
            FetchOptions::default(),
        )
        .await
        .expect("second fetch");

    // Then: Upstream is hit once and both callers see the same data
    assert_eq!(transport.calls(), 1);
    assert_eq!(first, second);
    assert_eq!(first.len(), 24);
    assert_eq!(service.cached_windows(), 1);
}

#[tokio::test]
async fn when_window_is_given_with_offset_it_shares_the_utc_cache_entry() {
    // Given: A window already fetched with UTC bounds
    let transport = ScriptedTransport::new(hourly_window);
    let service = service(transport.clone());
    service
        .fetch_prices(
            Some("FI"),
            "2024-01-01T00:00:00Z",
            "2024-01-02T00:00:00Z",
            FetchOptions::default(),
        )
        .await
        .expect("first fetch");

    // When: The same instant range is requested with a +01:00 offset
    service
        .fetch_prices(
            Some("fi"),
            "2024-01-01T01:00:00+01:00",
            "2024-01-02T01:00:00+01:00",
            FetchOptions::default(),
        )
        .await
        .expect("second fetch");

    // Then: No second upstream call is made
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn when_force_refresh_is_set_upstream_is_queried_again() {
    // Given: A cached window
    let transport = ScriptedTransport::new(hourly_window);
    let service = service(transport.clone());
    let options = FetchOptions::default();
    service
        .fetch_prices(Some("FI"), "2024-01-01T00:00Z", "2024-01-02T00:00Z", options)
        .await
        .expect("first fetch");

    // When: The caller forces a refresh
    let refreshed = service
        .fetch_prices(
            Some("FI"),
            "2024-01-01T00:00Z",
            "2024-01-02T00:00Z",
            FetchOptions {
                force_refresh: true,
                ..FetchOptions::default()
            },
        )
        .await
        .expect("refresh");

    // Then: Upstream is queried again and the entry stays cached
    assert_eq!(transport.calls(), 2);
    assert_eq!(refreshed.len(), 24);
    assert_eq!(service.cached_windows(), 1);
}

#[tokio::test]
async fn when_window_is_invalidated_next_call_goes_upstream() {
    // Given: A cached window
    let transport = ScriptedTransport::new(hourly_window);
    let service = service(transport.clone());
    service
        .fetch_prices(
            Some("FI"),
            "2024-01-01T00:00:00Z",
            "2024-01-02T00:00:00Z",
            FetchOptions::default(),
        )
        .await
        .expect("first fetch");

    // When: The window is invalidated
    let removed = service
        .invalidate(Some("FI"), "2024-01-01T00:00:00Z", "2024-01-02T00:00:00Z")
        .expect("valid window");
    service
        .fetch_prices(
            Some("FI"),
            "2024-01-01T00:00:00Z",
            "2024-01-02T00:00:00Z",
            FetchOptions::default(),
        )
        .await
        .expect("second fetch");

    // Then: The entry existed and upstream was queried again
    assert!(removed);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn when_fetch_fails_nothing_is_cached_and_next_call_retries() {
    // Given: An upstream that fails once and then recovers
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    let transport = ScriptedTransport::new(move |request| {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(HttpResponse::new(503, "maintenance"));
        }
        hourly_window(request)
    });
    let service = service(transport.clone());

    // When: The window is requested twice
    let first = service
        .fetch_prices(
            Some("FI"),
            "2024-01-01T00:00:00Z",
            "2024-01-02T00:00:00Z",
            FetchOptions::default(),
        )
        .await;
    let second = service
        .fetch_prices(
            Some("FI"),
            "2024-01-01T00:00:00Z",
            "2024-01-02T00:00:00Z",
            FetchOptions::default(),
        )
        .await;

    // Then: The failure is surfaced and not remembered
    let error = first.expect_err("first call fails");
    assert!(error.retryable());
    assert_eq!(second.expect("recovered").len(), 24);
    assert_eq!(transport.calls(), 2);
}

// =============================================================================
// Price Acquisition: Coalescing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_many_callers_request_same_window_concurrently_one_upstream_call_is_made() {
    // Given: A slow upstream
    let transport = ScriptedTransport::with_delay(Duration::from_millis(250), hourly_window);
    let service = service(transport.clone());

    // When: Ten callers ask for the same window at once
    let requests = (0..10).map(|_| {
        let service = service.clone();
        async move {
            service
                .fetch_prices(
                    Some("FI"),
                    "2024-01-01T00:00:00Z",
                    "2024-01-02T00:00:00Z",
                    FetchOptions::default(),
                )
                .await
        }
    });
    let results = futures::future::join_all(requests).await;

    // Then: One upstream call served every caller and no request is left in flight
    assert_eq!(transport.calls(), 1);
    let first = results[0].as_ref().expect("fetch succeeded").clone();
    for result in &results {
        assert_eq!(result.as_ref().expect("fetch succeeded"), &first);
    }
    assert_eq!(service.in_flight_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn when_coalesced_request_fails_every_caller_sees_the_same_error() {
    // Given: A slow upstream that rejects the token
    let transport = ScriptedTransport::with_delay(Duration::from_millis(100), |_| {
        Ok(HttpResponse::new(401, "Unauthorized"))
    });
    let service = service(transport.clone());

    // When: Three callers ask for the same window at once
    let requests = (0..3).map(|_| {
        let service = service.clone();
        async move {
            service
                .fetch_prices(
                    Some("FI"),
                    "2024-01-01T00:00:00Z",
                    "2024-01-02T00:00:00Z",
                    FetchOptions::default(),
                )
                .await
        }
    });
    let results = futures::future::join_all(requests).await;

    // Then: The single failure is shared
    assert_eq!(transport.calls(), 1);
    for result in results {
        let error = result.expect_err("upstream rejected the request");
        assert_eq!(error.code(), "request.status");
    }
    assert_eq!(service.cached_windows(), 0);
}

#[tokio::test(start_paused = true)]
async fn when_different_windows_are_requested_concurrently_they_are_not_coalesced() {
    // Given: A slow upstream
    let transport = ScriptedTransport::with_delay(Duration::from_millis(100), hourly_window);
    let service = service(transport.clone());

    // When: Two different windows are requested at once
    let (first, second) = tokio::join!(
        service.fetch_prices(
            Some("FI"),
            "2024-01-01T00:00:00Z",
            "2024-01-02T00:00:00Z",
            FetchOptions::default(),
        ),
        service.fetch_prices(
            Some("SE"),
            "2024-01-01T00:00:00Z",
            "2024-01-02T00:00:00Z",
            FetchOptions::default(),
        ),
    );

    // Then: Each window gets its own upstream call
    assert!(first.is_ok() && second.is_ok());
    assert_eq!(transport.calls(), 2);
}

// =============================================================================
// Price Acquisition: Enrichment And Ordering
// =============================================================================

#[tokio::test]
async fn when_prices_are_returned_kwh_is_derived_from_mwh() {
    // Given: A healthy upstream and no exchange-rate settings
    let transport = ScriptedTransport::new(hourly_window);
    let service = service(transport);

    // When: Prices are fetched
    let points = service
        .fetch_prices(
            Some("FI"),
            "2024-01-01T00:00:00Z",
            "2024-01-01T03:00:00Z",
            FetchOptions::default(),
        )
        .await
        .expect("prices");

    // Then: Each point carries EUR/MWh and EUR/kWh, and no local price
    assert_eq!(points.len(), 3);
    for point in &points {
        assert!((point.price_eur_per_kwh - point.price_eur_per_mwh / 1000.0).abs() < 1e-12);
        assert_eq!(point.price_local_per_kwh, None);
    }
    assert_eq!(points[0].price_eur_per_mwh, 50.0);
}

#[tokio::test]
async fn when_fx_conversion_is_enabled_local_price_is_rounded_to_six_decimals() {
    // Given: Conversion switched on with an exchange rate
    let transport = ScriptedTransport::new(|_| {
        Ok(HttpResponse::ok(publication(
            "2024-01-01T00:00Z",
            &[123.4567],
        )))
    });
    let settings = MemorySettings::new()
        .with("use_fx_conversion", true)
        .with("fx_rate", 11.2345);
    let service = service_at(transport, settings, "2024-01-10T12:00:00Z");

    // When: Prices are fetched
    let points = service
        .fetch_prices(
            Some("SE"),
            "2024-01-01T00:00:00Z",
            "2024-01-01T01:00:00Z",
            FetchOptions::default(),
        )
        .await
        .expect("prices");

    // Then: The local price is kWh * rate rounded to 6 decimals
    let expected = ((123.4567_f64 / 1000.0) * 11.2345 * 1e6).round() / 1e6;
    assert_eq!(points[0].price_local_per_kwh, Some(expected));
}

#[tokio::test]
async fn when_fx_rate_is_set_but_conversion_disabled_no_local_price_is_added() {
    // Given: A rate without the conversion flag
    let transport = ScriptedTransport::new(hourly_window);
    let settings = MemorySettings::new().with("fx_rate", 11.0);
    let service = service_at(transport, settings, "2024-01-10T12:00:00Z");

    // When: Prices are fetched
    let points = service
        .fetch_prices(
            Some("SE"),
            "2024-01-01T00:00:00Z",
            "2024-01-01T02:00:00Z",
            FetchOptions::default(),
        )
        .await
        .expect("prices");

    // Then: Only EUR values are present
    assert!(points.iter().all(|point| point.price_local_per_kwh.is_none()));
}

#[tokio::test]
async fn when_document_periods_overlap_output_is_ascending_and_unique() {
    // Given: A document whose periods arrive out of order and overlap
    let transport = ScriptedTransport::new(|_| {
        Ok(HttpResponse::ok(
            r#"<Publication_MarketDocument>
  <TimeSeries>
    <Period>
      <timeInterval><start>2024-01-01T01:00Z</start><end>2024-01-01T03:00Z</end></timeInterval>
      <resolution>PT60M</resolution>
      <Point><position>2</position><price.amount>30</price.amount></Point>
      <Point><position>1</position><price.amount>20</price.amount></Point>
    </Period>
  </TimeSeries>
  <TimeSeries>
    <Period>
      <timeInterval><start>2024-01-01T00:00Z</start><end>2024-01-01T02:00Z</end></timeInterval>
      <resolution>PT60M</resolution>
      <Point><position>1</position><price.amount>10</price.amount></Point>
      <Point><position>2</position><price.amount>20</price.amount></Point>
    </Period>
  </TimeSeries>
</Publication_MarketDocument>"#,
        ))
    });
    let service = service(transport);

    // When: Prices are fetched
    let points = service
        .fetch_prices(
            Some("FI"),
            "2024-01-01T00:00:00Z",
            "2024-01-01T03:00:00Z",
            FetchOptions::default(),
        )
        .await
        .expect("prices");

    // Then: Timestamps are strictly ascending with no duplicates
    let timestamps: Vec<String> = points
        .iter()
        .map(|point| point.timestamp_utc.to_string())
        .collect();
    assert_eq!(
        timestamps,
        vec![
            "2024-01-01T00:00:00Z",
            "2024-01-01T01:00:00Z",
            "2024-01-01T02:00:00Z",
        ]
    );
}

// =============================================================================
// Price Acquisition: Chunked Fallback
// =============================================================================

#[tokio::test]
async fn when_long_window_is_rejected_and_future_day_is_unpublished_first_day_is_returned() {
    // Given: Today is 2024-01-02; the platform rejects a 72h window as too
    // long and has nothing for today onwards
    let transport = ScriptedTransport::new(|request| {
        let start = query_param(&request.url, "periodStart").unwrap_or_default();
        let end = query_param(&request.url, "periodEnd").unwrap_or_default();
        match (start, end) {
            ("202401010000", "202401040000") => Ok(HttpResponse::new(
                400,
                acknowledgement("999", "The amount of requested data exceeds allowed limit"),
            )),
            ("202401010000", _) => hourly_window(request),
            _ => Ok(HttpResponse::ok(acknowledgement(
                "999",
                "No matching data found for Data item Day-ahead Prices",
            ))),
        }
    });
    let service = service_at(transport.clone(), MemorySettings::new(), "2024-01-02T12:00:00Z");

    // When: 72 hours starting yesterday are requested
    let points = service
        .fetch_prices(
            Some("FI"),
            "2024-01-01T00:00:00Z",
            "2024-01-04T00:00:00Z",
            FetchOptions::default(),
        )
        .await
        .expect("partial window is not an error");

    // Then: The first 24 hours come back and the walk stopped at today
    assert_eq!(points.len(), 24);
    assert_eq!(points[0].timestamp_utc.to_string(), "2024-01-01T00:00:00Z");
    assert_eq!(points[23].timestamp_utc.to_string(), "2024-01-01T23:00:00Z");
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn when_full_range_has_no_data_chunks_are_stitched_together() {
    // Given: A past window the platform only answers per day
    let transport = ScriptedTransport::new(|request| {
        let start = query_param(&request.url, "periodStart").unwrap_or_default();
        let end = query_param(&request.url, "periodEnd").unwrap_or_default();
        if (start, end) == ("202401010000", "202401030000") {
            return Ok(HttpResponse::ok(acknowledgement(
                "999",
                "No matching data found",
            )));
        }
        hourly_window(request)
    });
    let service = service(transport.clone());

    // When: Two days are requested
    let points = service
        .fetch_prices(
            Some("FI"),
            "2024-01-01T00:00:00Z",
            "2024-01-03T00:00:00Z",
            FetchOptions::default(),
        )
        .await
        .expect("chunked retrieval");

    // Then: Both daily chunks are merged in order
    assert_eq!(points.len(), 48);
    assert!(points
        .windows(2)
        .all(|pair| pair[0].timestamp_utc < pair[1].timestamp_utc));
    assert_eq!(transport.calls(), 3);
}

/// Code-999 reply exactly as the platform words it for an empty window.
const NO_DATA_FOR_JANUARY_FIRST: &str = "No matching data found for Data item Day-ahead Prices \
     [12.1.D] (10YFI-1--------U, 10YFI-1--------U) and interval \
     [2024-01-01T00:00:00.000Z/2024-01-02T00:00:00.000Z].";

#[tokio::test]
async fn when_platform_reports_no_matching_data_for_interval_result_is_empty() {
    // Given: An upstream answering with its full no-data wording, which
    // mentions the requested interval
    let transport = ScriptedTransport::new(|_| {
        Ok(HttpResponse::ok(acknowledgement(
            "999",
            NO_DATA_FOR_JANUARY_FIRST,
        )))
    });
    let service = service(transport.clone());

    // When: A past day is requested
    let points = service
        .fetch_prices(
            Some("FI"),
            "2024-01-01T00:00:00Z",
            "2024-01-02T00:00:00Z",
            FetchOptions::default(),
        )
        .await
        .expect("no data is not an error");

    // Then: The window is empty rather than rejected as a bad interval
    assert!(points.is_empty());
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn when_past_window_has_no_data_at_all_empty_result_is_cached_briefly() {
    // Given: An upstream with nothing published for the window
    let transport = ScriptedTransport::new(|_| {
        Ok(HttpResponse::ok(acknowledgement(
            "999",
            "No matching data found",
        )))
    });
    let service = service(transport.clone());

    // When: A past day is requested twice
    for _ in 0..2 {
        let points = service
            .fetch_prices(
                Some("FI"),
                "2024-01-01T00:00:00Z",
                "2024-01-02T00:00:00Z",
                FetchOptions::default(),
            )
            .await
            .expect("no data is not an error");
        assert!(points.is_empty());
    }

    // Then: Only the first call reached upstream (full range plus one chunk)
    assert_eq!(service.cached_windows(), 1);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn when_empty_result_caching_is_disabled_every_call_goes_upstream() {
    // Given: A service that never caches empty windows
    let transport = ScriptedTransport::new(|_| {
        Ok(HttpResponse::ok(acknowledgement(
            "999",
            "No matching data found",
        )))
    });
    let service = PriceService::with_clock(
        transport.clone(),
        Arc::new(MemorySettings::new()),
        PriceServiceConfig {
            empty_cache_ttl: Duration::ZERO,
            ..test_config()
        },
        Arc::new(FixedClock(ts("2024-01-10T12:00:00Z"))),
    );

    // When: A past day is requested twice
    for _ in 0..2 {
        service
            .fetch_prices(
                Some("FI"),
                "2024-01-01T00:00:00Z",
                "2024-01-02T00:00:00Z",
                FetchOptions::default(),
            )
            .await
            .expect("no data is not an error");
    }

    // Then: Nothing was cached
    assert_eq!(service.cached_windows(), 0);
    assert_eq!(transport.calls(), 4);
}

#[tokio::test]
async fn when_upstream_rejects_for_other_reasons_no_fallback_is_attempted() {
    // Given: An upstream that rejects the token
    let transport = ScriptedTransport::new(|_| {
        Ok(HttpResponse::new(
            401,
            "<html><body>Unauthorized</body></html>",
        ))
    });
    let service = service(transport.clone());

    // When: A multi-day window is requested
    let error = service
        .fetch_prices(
            Some("FI"),
            "2024-01-01T00:00:00Z",
            "2024-01-04T00:00:00Z",
            FetchOptions::default(),
        )
        .await
        .expect_err("unauthorized");

    // Then: The error surfaces after a single call
    assert!(matches!(error, PriceError::Request(_)));
    assert!(!error.retryable());
    assert_eq!(transport.calls(), 1);
}

// =============================================================================
// Price Acquisition: Zone And Token Resolution
// =============================================================================

#[tokio::test]
async fn when_country_is_given_first_mapped_area_is_queried() {
    // Given: A healthy upstream
    let transport = ScriptedTransport::new(hourly_window);
    let service = service(transport.clone());

    // When: Prices for Sweden are requested
    service
        .fetch_prices(
            Some("se"),
            "2024-01-01T00:00:00Z",
            "2024-01-01T01:00:00Z",
            FetchOptions::default(),
        )
        .await
        .expect("prices");

    // Then: The first Swedish area is used on both sides of the query
    let url = &transport.urls()[0];
    assert_eq!(query_param(url, "in_Domain"), Some("10Y1001A1001A44P"));
    assert_eq!(query_param(url, "out_Domain"), Some("10Y1001A1001A44P"));
    assert_eq!(query_param(url, "documentType"), Some("A44"));
    assert_eq!(query_param(url, "periodStart"), Some("202401010000"));
    assert_eq!(query_param(url, "securityToken"), Some("test-token"));
}

#[tokio::test]
async fn when_zone_is_omitted_settings_decide_and_overrides_win() {
    // Given: A configured country and an override map for one call
    let transport = ScriptedTransport::new(hourly_window);
    let settings = MemorySettings::new().with("price_country", "SE");
    let service = service_at(transport.clone(), settings, "2024-01-10T12:00:00Z");
    let override_map = ZoneMap::from_json(&json!({ "SE": ["10Y1001A1001A46L"] }));

    // When: One call uses the settings, another the override map
    service
        .fetch_prices(
            None,
            "2024-01-01T00:00:00Z",
            "2024-01-01T01:00:00Z",
            FetchOptions::default(),
        )
        .await
        .expect("settings zone");
    service
        .fetch_prices(
            None,
            "2024-01-01T00:00:00Z",
            "2024-01-01T01:00:00Z",
            FetchOptions {
                zone_map: Some(override_map),
                ..FetchOptions::default()
            },
        )
        .await
        .expect("override zone");

    // Then: Each call queried the area its map resolves to
    let urls = transport.urls();
    assert_eq!(query_param(&urls[0], "in_Domain"), Some("10Y1001A1001A44P"));
    assert_eq!(query_param(&urls[1], "in_Domain"), Some("10Y1001A1001A46L"));
}

#[tokio::test]
async fn when_token_or_zone_is_missing_no_request_is_made() {
    // Given: No token anywhere
    let transport = ScriptedTransport::new(hourly_window);
    let service = PriceService::new(
        transport.clone(),
        Arc::new(MemorySettings::new()),
        test_config().with_env_token(None),
    );

    // When: Prices are requested
    let missing_token = service
        .fetch_prices(
            Some("FI"),
            "2024-01-01T00:00:00Z",
            "2024-01-02T00:00:00Z",
            FetchOptions::default(),
        )
        .await
        .expect_err("no token");
    let with_token_no_zone = service
        .fetch_prices(
            None,
            "2024-01-01T00:00:00Z",
            "2024-01-02T00:00:00Z",
            FetchOptions {
                token: Some(String::from("explicit")),
                ..FetchOptions::default()
            },
        )
        .await
        .expect_err("no zone");

    // Then: Both are configuration errors and upstream was never called
    assert_eq!(missing_token.code(), "config.missing_token");
    assert!(with_token_no_zone.is_configuration());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn when_window_is_empty_or_unparseable_request_is_rejected_locally() {
    // Given: A healthy upstream
    let transport = ScriptedTransport::new(hourly_window);
    let service = service(transport.clone());

    // When: Inverted and unparseable windows are requested
    let inverted = service
        .fetch_prices(
            Some("FI"),
            "2024-01-02T00:00:00Z",
            "2024-01-02T00:00:00Z",
            FetchOptions::default(),
        )
        .await
        .expect_err("empty window");
    let garbage = service
        .fetch_prices(Some("FI"), "soon", "later", FetchOptions::default())
        .await
        .expect_err("garbage window");

    // Then: Validation errors come back without touching upstream
    assert!(matches!(inverted, PriceError::InvalidRange { .. }));
    assert!(matches!(garbage, PriceError::Validation(_)));
    assert_eq!(transport.calls(), 0);
}
