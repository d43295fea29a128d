//! Forecast-run time handling.

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

/// Hours of forecast published per model run.
pub const HORIZON_HOURS: u32 = 48;

/// A single model run and the horizon of hourly timesteps it publishes.
/// Immutable for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastRun {
    pub model_run: DateTime<Utc>,
    pub horizon_hours: u32,
}

impl ForecastRun {
    pub fn new(model_run: DateTime<Utc>) -> Self {
        Self {
            model_run,
            horizon_hours: HORIZON_HOURS,
        }
    }

    /// Valid time for a forecast hour offset.
    pub fn valid_time(&self, forecast_hour: u32) -> DateTime<Utc> {
        self.model_run + Duration::hours(forecast_hour as i64)
    }

    /// Hourly timesteps from `resume_from` (0-based offset) to the horizon.
    pub fn timesteps(&self, resume_from: u32) -> impl Iterator<Item = (u32, DateTime<Utc>)> + '_ {
        (resume_from..self.horizon_hours).map(move |hour| (hour, self.valid_time(hour)))
    }
}

/// The candidate model run to probe first: the current hour, truncated,
/// minus one hour. Publication lags real time by roughly that much.
pub fn candidate_model_run(now: DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_hour(now) - Duration::hours(1)
}

/// Truncate a timestamp to the top of its hour.
pub fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::hours(1)).unwrap_or(t)
}

/// Format a timestamp the way the upstream expects its `time` and
/// `modelrun` query parameters: `2021-08-10T00:00:00Z`.
pub fn iso_hour(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Filesystem-safe rendition of a model-run timestamp (`:` → `_`).
pub fn path_safe(t: DateTime<Utc>) -> String {
    iso_hour(t).replace(':', "_")
}
