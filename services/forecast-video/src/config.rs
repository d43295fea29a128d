//! Service configuration: areas, layers, endpoints, and retrieval tuning.
//!
//! Loaded from a YAML file when one is given; falls back to compiled-in
//! defaults otherwise.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Timelike, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use smoke_common::time::truncate_to_hour;
use smoke_common::AreaGrid;

use crate::batch::RetrievalConfig;

/// Root service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub areas: Vec<AreaGrid>,
    pub layers: Vec<LayerConfig>,
    pub endpoints: EndpointsConfig,
    pub retrieval: RetrievalSettings,
    pub schedule: ScheduleConfig,
    /// Frames per second of the encoded videos.
    pub frame_rate: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            areas: vec![
                AreaGrid {
                    code: "utah".to_string(),
                    zoom: 8,
                    starting_x: 46,
                    starting_y: 94,
                    grid_width: 5,
                    grid_height: 5,
                },
                AreaGrid {
                    code: "colorado".to_string(),
                    zoom: 8,
                    starting_x: 50,
                    starting_y: 95,
                    grid_width: 5,
                    grid_height: 5,
                },
            ],
            layers: vec![
                LayerConfig {
                    code: "sfc_smoke".to_string(),
                    slug: "near-surface-smoke".to_string(),
                },
                LayerConfig {
                    code: "vi_smoke".to_string(),
                    slug: "vertically-integrated-smoke".to_string(),
                },
            ],
            endpoints: EndpointsConfig::default(),
            retrieval: RetrievalSettings::default(),
            schedule: ScheduleConfig::default(),
            frame_rate: 4,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ServiceConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        info!(
            path = %path.display(),
            areas = config.areas.len(),
            layers = config.layers.len(),
            "Loaded service configuration"
        );
        Ok(config)
    }

    /// Load from a path if one was given, otherwise use built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                warn!("No config file given, using built-in defaults");
                Ok(Self::default())
            }
        }
    }
}

/// A data layer published by the upstream model.
#[derive(Debug, Clone, Deserialize)]
pub struct LayerConfig {
    /// Upstream query code (e.g. `sfc_smoke`)
    pub code: String,
    /// Path and record-field slug (e.g. `near-surface-smoke`)
    pub slug: String,
}

impl LayerConfig {
    /// Human label for annotations: "near-surface-smoke" → "Near Surface Smoke".
    pub fn label(&self) -> String {
        self.slug
            .split('-')
            .map(capitalize)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Record field stem: "near-surface-smoke" → "near_surface_smoke".
    pub fn field_stem(&self) -> String {
        self.slug.replace('-', "_")
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// External service endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    /// WMTS image endpoint for forecast tiles
    pub tile_service_url: String,
    /// Base-map tile endpoint (path-segment z/y/x)
    pub base_map_url: String,
    /// Record-store endpoint receiving completed forecast records
    pub record_store_url: String,
    pub storage: StorageSettings,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            tile_service_url: "https://hwp-viz.gsd.esrl.noaa.gov/wmts/image/hrrr_smoke"
                .to_string(),
            base_map_url:
                "https://services.arcgisonline.com/ArcGIS/rest/services/World_Street_Map/MapServer/tile"
                    .to_string(),
            record_store_url: "https://noaa-hrrr-smoke-api.herokuapp.com/forecasts".to_string(),
            storage: StorageSettings::default(),
        }
    }
}

/// Object-store connection settings. Credentials come from the environment
/// when present.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub endpoint: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub allow_http: bool,
    /// Base URL under which uploaded keys are publicly reachable
    pub public_url_base: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://minio:9000".to_string(),
            bucket: "forecast-videos".to_string(),
            access_key_id: "minioadmin".to_string(),
            secret_access_key: "minioadmin".to_string(),
            region: "us-east-1".to_string(),
            allow_http: true,
            public_url_base: "http://minio:9000/forecast-videos".to_string(),
        }
    }
}

impl StorageSettings {
    /// Overlay settings from the environment (S3_ENDPOINT, S3_BUCKET,
    /// S3_ACCESS_KEY, S3_SECRET_KEY, S3_PUBLIC_URL_BASE).
    pub fn apply_env(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("S3_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Ok(bucket) = std::env::var("S3_BUCKET") {
            self.bucket = bucket;
        }
        if let Ok(key) = std::env::var("S3_ACCESS_KEY") {
            self.access_key_id = key;
        }
        if let Ok(secret) = std::env::var("S3_SECRET_KEY") {
            self.secret_access_key = secret;
        }
        if let Ok(base) = std::env::var("S3_PUBLIC_URL_BASE") {
            self.public_url_base = base;
        }
        self
    }
}

/// Retrieval tuning. Durations are in milliseconds in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Concurrent in-flight requests within a batch
    pub concurrency: usize,
    /// Pause between successive batches
    pub batch_pause_ms: u64,
    /// Backoff after the upstream throttles a batch
    pub rate_limit_backoff_ms: u64,
    /// Delay before retrying individual transport failures
    pub transport_retry_delay_ms: u64,
    /// Total failures tolerated before a retrieval aborts
    pub failure_budget: u32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            concurrency: 12,
            batch_pause_ms: 2_000,
            rate_limit_backoff_ms: 15_360,
            transport_retry_delay_ms: 3_000,
            failure_budget: 25,
        }
    }
}

impl RetrievalSettings {
    /// Build the engine config for a batch of `batch_size` requests. The
    /// batch size is the area's tile count so each batch maps to one
    /// timestep and the batch's first tile is that timestep's probe.
    pub fn to_retrieval_config(&self, batch_size: usize) -> RetrievalConfig {
        RetrievalConfig {
            batch_size,
            concurrency: self.concurrency,
            batch_pause: Duration::from_millis(self.batch_pause_ms),
            rate_limit_backoff: Duration::from_millis(self.rate_limit_backoff_ms),
            transport_retry_delay: Duration::from_millis(self.transport_retry_delay_ms),
            failure_budget: self.failure_budget,
        }
    }
}

/// Cadence at which the trigger fires in continuous mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// UTC hours at which a run is attempted
    pub run_hours: Vec<u32>,
    /// Minute within the hour after which the run fires
    pub run_minute: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            run_hours: vec![1, 7, 13, 19],
            run_minute: 58,
        }
    }
}

impl ScheduleConfig {
    /// Whether a run is due at `now`, given the hour of the last firing.
    pub fn is_due(&self, now: DateTime<Utc>, last_fired: Option<DateTime<Utc>>) -> bool {
        self.run_hours.contains(&now.hour())
            && now.minute() >= self.run_minute
            && last_fired != Some(truncate_to_hour(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.areas.len(), 2);
        assert_eq!(config.layers.len(), 2);
        assert_eq!(config.frame_rate, 4);
        assert_eq!(config.areas[0].code, "utah");
        assert_eq!(config.areas[0].starting_x, 46);
    }

    #[test]
    fn test_layer_label_and_stem() {
        let layer = LayerConfig {
            code: "sfc_smoke".to_string(),
            slug: "near-surface-smoke".to_string(),
        };
        assert_eq!(layer.label(), "Near Surface Smoke");
        assert_eq!(layer.field_stem(), "near_surface_smoke");
    }

    #[test]
    fn test_parse_config_yaml() {
        let yaml = r#"
areas:
  - code: utah
    zoom: 8
    starting_x: 46
    starting_y: 94
    grid_width: 5
    grid_height: 5

layers:
  - code: sfc_smoke
    slug: near-surface-smoke

retrieval:
  concurrency: 8
  failure_budget: 10

schedule:
  run_hours: [1, 13]
  run_minute: 58
"#;

        let config: ServiceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.areas.len(), 1);
        assert_eq!(config.layers.len(), 1);
        assert_eq!(config.retrieval.concurrency, 8);
        assert_eq!(config.retrieval.failure_budget, 10);
        // Unspecified settings keep their defaults
        assert_eq!(config.retrieval.rate_limit_backoff_ms, 15_360);
        assert_eq!(config.schedule.run_hours, vec![1, 13]);
    }

    #[test]
    fn test_schedule_is_due() {
        let schedule = ScheduleConfig::default();
        let due = Utc.with_ymd_and_hms(2021, 8, 26, 1, 58, 30).unwrap();
        let early = Utc.with_ymd_and_hms(2021, 8, 26, 1, 57, 0).unwrap();
        let off_hour = Utc.with_ymd_and_hms(2021, 8, 26, 2, 58, 0).unwrap();

        assert!(schedule.is_due(due, None));
        assert!(!schedule.is_due(early, None));
        assert!(!schedule.is_due(off_hour, None));
        // Never fires twice within the same hour
        assert!(!schedule.is_due(due, Some(truncate_to_hour(due))));
        // A previous hour's firing does not suppress this one
        let prior = Utc.with_ymd_and_hms(2021, 8, 25, 19, 58, 0).unwrap();
        assert!(schedule.is_due(due, Some(truncate_to_hour(prior))));
    }
}
