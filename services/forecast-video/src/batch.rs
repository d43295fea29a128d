//! Batch retrieval engine.
//!
//! Drives an arbitrary grid x horizon tile sequence to completion against a
//! rate-limited upstream: sequential batches with a cool-down between them,
//! bounded concurrency inside a batch, whole-batch re-issue on throttling,
//! per-tile retry for transport failures, and one global failure budget
//! shared by every retry path. A 204 on a batch's probe tile means the
//! queried timestep is beyond the published horizon and ends the retrieval
//! normally.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use smoke_common::{ForecastError, ForecastResult, TileOutcome, TileRequest, TileResult};

use crate::fetch::TileFetch;

/// Tuning for one retrieval.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Requests issued per batch. Callers size this to the area's tile
    /// count so each batch maps to one timestep.
    pub batch_size: usize,
    /// Concurrent in-flight requests within a batch
    pub concurrency: usize,
    /// Pause between successive batches
    pub batch_pause: Duration,
    /// Backoff after the upstream throttles a batch; substantially longer
    /// than the inter-batch pause
    pub rate_limit_backoff: Duration,
    /// Delay before retrying individual transport failures
    pub transport_retry_delay: Duration,
    /// Total failures tolerated before the retrieval aborts
    pub failure_budget: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            concurrency: 12,
            batch_pause: Duration::from_secs(2),
            rate_limit_backoff: Duration::from_millis(15_360),
            transport_retry_delay: Duration::from_secs(3),
            failure_budget: 25,
        }
    }
}

/// What a retrieval produced.
#[derive(Debug)]
pub struct BatchOutcome {
    /// One `Success` result per request, unordered within a batch
    pub results: Vec<TileResult>,
    /// The upstream stopped publishing before the requested range ended
    pub horizon_truncated: bool,
}

/// Retrieve every request, or abort once the failure budget is exhausted.
///
/// Returns only when each request not cut off by horizon truncation has a
/// `Success` result. Truncation discards the truncated batch's results and
/// keeps everything accumulated before it.
pub async fn fetch_all(
    fetcher: &dyn TileFetch,
    requests: &[TileRequest],
    cfg: &RetrievalConfig,
) -> ForecastResult<BatchOutcome> {
    let mut results: Vec<TileResult> = Vec::with_capacity(requests.len());
    let mut failures: u32 = 0;
    let mut truncated = false;

    'batches: for (batch_no, batch) in requests.chunks(cfg.batch_size.max(1)).enumerate() {
        if batch_no > 0 {
            tokio::time::sleep(cfg.batch_pause).await;
        }

        let probe = &batch[0];

        loop {
            debug!(batch = batch_no, size = batch.len(), "Issuing tile batch");

            let attempt: Vec<TileResult> = stream::iter(batch)
                .map(|request| fetcher.fetch(request))
                .buffer_unordered(cfg.concurrency.max(1))
                .collect()
                .await;

            // The probe tile answering "no content" means this timestep is
            // beyond the published horizon. Normal termination: keep what
            // earlier batches produced and stop issuing.
            let probe_missing = attempt
                .iter()
                .any(|r| r.request == *probe && r.outcome == TileOutcome::NotFound);
            if probe_missing {
                info!(
                    batch = batch_no,
                    "Probe tile beyond published horizon, stopping retrieval"
                );
                truncated = true;
                break 'batches;
            }

            // Throttling anywhere invalidates the whole batch.
            if attempt
                .iter()
                .any(|r| r.outcome == TileOutcome::RateLimited)
            {
                failures += 1;
                if failures > cfg.failure_budget {
                    return Err(ForecastError::BudgetExhausted(failures));
                }
                warn!(
                    batch = batch_no,
                    failures,
                    backoff_ms = cfg.rate_limit_backoff.as_millis() as u64,
                    "Upstream throttled the batch, backing off and re-issuing"
                );
                tokio::time::sleep(cfg.rate_limit_backoff).await;
                continue;
            }

            let mut pending: Vec<TileRequest> = Vec::new();
            for result in attempt {
                match result.outcome {
                    TileOutcome::Success(_) => results.push(result),
                    _ => pending.push(result.request),
                }
            }

            // Retry stragglers individually until the batch is whole.
            while !pending.is_empty() {
                failures += pending.len() as u32;
                if failures > cfg.failure_budget {
                    return Err(ForecastError::BudgetExhausted(failures));
                }
                warn!(
                    batch = batch_no,
                    pending = pending.len(),
                    failures,
                    "Retrying failed tiles"
                );
                tokio::time::sleep(cfg.transport_retry_delay).await;

                let retried: Vec<TileResult> = stream::iter(&pending)
                    .map(|request| fetcher.fetch(request))
                    .buffer_unordered(cfg.concurrency.max(1))
                    .collect()
                    .await;

                pending.clear();
                for result in retried {
                    match result.outcome {
                        TileOutcome::Success(_) => results.push(result),
                        _ => pending.push(result.request),
                    }
                }
            }

            break;
        }
    }

    Ok(BatchOutcome {
        results,
        horizon_truncated: truncated,
    })
}
