//! Forecast-window locator.
//!
//! Publication lags real time by a variable amount, so the most recent model
//! run with a fully published 48-hour horizon is found by probing a single
//! cheap representative tile at the horizon's far end and walking the
//! candidate run backwards one hour at a time until the probe answers with
//! data. The search only moves backward: if this candidate's horizon is not
//! out yet, no newer run can have one either.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use smoke_common::{ForecastError, ForecastResult, TileCoord, TileOutcome, TileRequest};

use crate::fetch::TileFetch;

/// The representative tile probed to test horizon availability.
const PROBE_COORD: TileCoord = TileCoord { z: 5, x: 25, y: 25 };

/// Tuning for the locator's transient-failure handling.
#[derive(Debug, Clone)]
pub struct LocatorConfig {
    /// Layer code used for probing
    pub probe_layer: String,
    pub rate_limit_backoff: StdDuration,
    pub transport_retry_delay: StdDuration,
    pub failure_budget: u32,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            probe_layer: "sfc_smoke".to_string(),
            rate_limit_backoff: StdDuration::from_millis(15_360),
            transport_retry_delay: StdDuration::from_secs(3),
            failure_budget: 25,
        }
    }
}

/// Find the most recent model run whose full horizon is published, starting
/// from `start_candidate` and searching backwards.
///
/// The search itself is unbounded (upstream retention bounds it in
/// practice); callers that need a hard ceiling impose one externally.
/// Transient failures while probing do consume the failure budget.
pub async fn locate_forecast_window(
    fetcher: &dyn TileFetch,
    start_candidate: DateTime<Utc>,
    horizon_hours: u32,
    cfg: &LocatorConfig,
) -> ForecastResult<DateTime<Utc>> {
    let mut candidate = start_candidate;
    let mut failures: u32 = 0;

    loop {
        let request = TileRequest {
            layer: cfg.probe_layer.clone(),
            coord: PROBE_COORD,
            valid_time: candidate + Duration::hours(horizon_hours as i64),
            model_run: candidate,
        };

        debug!(candidate = %candidate, "Probing forecast horizon");

        match fetcher.fetch(&request).await.outcome {
            TileOutcome::Success(_) => {
                info!(model_run = %candidate, "Found fully published forecast run");
                return Ok(candidate);
            }
            TileOutcome::NotFound => {
                debug!(candidate = %candidate, "Horizon not yet published, stepping back");
                candidate = candidate - Duration::hours(1);
            }
            TileOutcome::RateLimited => {
                failures += 1;
                if failures > cfg.failure_budget {
                    return Err(ForecastError::BudgetExhausted(failures));
                }
                warn!(candidate = %candidate, failures, "Throttled while probing, backing off");
                tokio::time::sleep(cfg.rate_limit_backoff).await;
            }
            TileOutcome::TransportError => {
                failures += 1;
                if failures > cfg.failure_budget {
                    return Err(ForecastError::BudgetExhausted(failures));
                }
                warn!(candidate = %candidate, failures, "Probe failed, retrying");
                tokio::time::sleep(cfg.transport_retry_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::TimeZone;
    use smoke_common::TileResult;

    /// Probe succeeds only for model runs at or before the published run.
    struct PublishedUpTo {
        published: DateTime<Utc>,
    }

    #[async_trait]
    impl TileFetch for PublishedUpTo {
        async fn fetch(&self, request: &TileRequest) -> TileResult {
            let outcome = if request.model_run <= self.published {
                TileOutcome::Success(Bytes::from_static(b"t"))
            } else {
                TileOutcome::NotFound
            };
            TileResult {
                request: request.clone(),
                outcome,
            }
        }
    }

    fn fast_config() -> LocatorConfig {
        LocatorConfig {
            rate_limit_backoff: StdDuration::from_millis(1),
            transport_retry_delay: StdDuration::from_millis(1),
            ..LocatorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_walks_back_to_published_run() {
        let published = Utc.with_ymd_and_hms(2021, 8, 17, 6, 0, 0).unwrap();
        let fetcher = PublishedUpTo { published };

        // Regardless of how far ahead the candidate starts, the locator
        // lands exactly on the published run.
        for lag_hours in [0, 1, 5] {
            let start = published + Duration::hours(lag_hours);
            let found = locate_forecast_window(&fetcher, start, 48, &fast_config())
                .await
                .unwrap();
            assert_eq!(found, published);
        }
    }

    #[tokio::test]
    async fn test_transient_failures_retry_same_candidate() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct FlakyThenPublished {
            calls: AtomicU32,
        }

        #[async_trait]
        impl TileFetch for FlakyThenPublished {
            async fn fetch(&self, request: &TileRequest) -> TileResult {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                let outcome = match call {
                    0 => TileOutcome::RateLimited,
                    1 => TileOutcome::TransportError,
                    _ => TileOutcome::Success(Bytes::from_static(b"t")),
                };
                TileResult {
                    request: request.clone(),
                    outcome,
                }
            }
        }

        let fetcher = FlakyThenPublished {
            calls: AtomicU32::new(0),
        };
        let start = Utc.with_ymd_and_hms(2021, 8, 17, 6, 0, 0).unwrap();

        let found = locate_forecast_window(&fetcher, start, 48, &fast_config())
            .await
            .unwrap();
        // Transient failures never move the candidate backwards.
        assert_eq!(found, start);
    }

    #[tokio::test]
    async fn test_dead_upstream_exhausts_budget() {
        struct AlwaysDown;

        #[async_trait]
        impl TileFetch for AlwaysDown {
            async fn fetch(&self, request: &TileRequest) -> TileResult {
                TileResult {
                    request: request.clone(),
                    outcome: TileOutcome::TransportError,
                }
            }
        }

        let cfg = LocatorConfig {
            failure_budget: 2,
            ..fast_config()
        };
        let start = Utc.with_ymd_and_hms(2021, 8, 17, 6, 0, 0).unwrap();

        let err = locate_forecast_window(&AlwaysDown, start, 48, &cfg)
            .await
            .unwrap_err();
        assert!(matches!(err, ForecastError::BudgetExhausted(_)));
    }
}
