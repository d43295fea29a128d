//! Tile fetching against the upstream WMTS and base-map services.
//!
//! A fetcher performs exactly one network call per request and classifies
//! the response. It never retries and never sleeps; all retry policy lives
//! in the batch retrieval engine.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use smoke_common::time::iso_hour;
use smoke_common::{TileOutcome, TileRequest, TileResult};

/// A source of tiles.
#[async_trait]
pub trait TileFetch: Send + Sync {
    async fn fetch(&self, request: &TileRequest) -> TileResult;
}

/// Classify a non-payload-bearing HTTP status. Success statuses return
/// `None`; the caller reads the body and builds the `Success` outcome.
pub(crate) fn outcome_for_status(status: StatusCode) -> Option<TileOutcome> {
    match status {
        StatusCode::NO_CONTENT => Some(TileOutcome::NotFound),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            Some(TileOutcome::RateLimited)
        }
        s if s.is_success() => None,
        _ => Some(TileOutcome::TransportError),
    }
}

async fn classify_response(request: &TileRequest, url: &str, client: &Client) -> TileResult {
    let outcome = match client.get(url).send().await {
        Ok(response) => match outcome_for_status(response.status()) {
            Some(outcome) => outcome,
            None => match response.bytes().await {
                Ok(body) => TileOutcome::Success(body),
                Err(e) => {
                    debug!(url = %url, error = %e, "Failed to read tile body");
                    TileOutcome::TransportError
                }
            },
        },
        Err(e) => {
            debug!(url = %url, error = %e, "Tile request failed");
            TileOutcome::TransportError
        }
    };

    TileResult {
        request: request.clone(),
        outcome,
    }
}

/// Fetcher for the forecast tile service (query-parameter WMTS endpoint).
pub struct HttpTileFetcher {
    client: Client,
    base_url: String,
}

impl HttpTileFetcher {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn tile_url(&self, request: &TileRequest) -> String {
        format!(
            "{}?var={}&x={}&y={}&z={}&time={}&modelrun={}&level=0",
            self.base_url,
            request.layer,
            request.coord.x,
            request.coord.y,
            request.coord.z,
            iso_hour(request.valid_time),
            iso_hour(request.model_run),
        )
    }
}

#[async_trait]
impl TileFetch for HttpTileFetcher {
    async fn fetch(&self, request: &TileRequest) -> TileResult {
        let url = self.tile_url(request);
        classify_response(request, &url, &self.client).await
    }
}

/// Fetcher for the base-map tile service (path-segment endpoint). Base maps
/// are static; the request's time fields are ignored.
pub struct BaseMapFetcher {
    client: Client,
    base_url: String,
}

impl BaseMapFetcher {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn tile_url(&self, request: &TileRequest) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url, request.coord.z, request.coord.y, request.coord.x
        )
    }
}

#[async_trait]
impl TileFetch for BaseMapFetcher {
    async fn fetch(&self, request: &TileRequest) -> TileResult {
        let url = self.tile_url(request);
        classify_response(request, &url, &self.client).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use smoke_common::TileCoord;

    fn request() -> TileRequest {
        TileRequest {
            layer: "sfc_smoke".to_string(),
            coord: TileCoord::new(8, 46, 94),
            valid_time: Utc.with_ymd_and_hms(2021, 8, 10, 3, 0, 0).unwrap(),
            model_run: Utc.with_ymd_and_hms(2021, 8, 10, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            outcome_for_status(StatusCode::NO_CONTENT),
            Some(TileOutcome::NotFound)
        );
        assert_eq!(
            outcome_for_status(StatusCode::TOO_MANY_REQUESTS),
            Some(TileOutcome::RateLimited)
        );
        assert_eq!(
            outcome_for_status(StatusCode::SERVICE_UNAVAILABLE),
            Some(TileOutcome::RateLimited)
        );
        assert_eq!(
            outcome_for_status(StatusCode::INTERNAL_SERVER_ERROR),
            Some(TileOutcome::TransportError)
        );
        assert_eq!(outcome_for_status(StatusCode::OK), None);
    }

    #[test]
    fn test_forecast_tile_url() {
        let fetcher =
            HttpTileFetcher::new("https://hwp-viz.gsd.esrl.noaa.gov/wmts/image/hrrr_smoke")
                .unwrap();
        assert_eq!(
            fetcher.tile_url(&request()),
            "https://hwp-viz.gsd.esrl.noaa.gov/wmts/image/hrrr_smoke?var=sfc_smoke&x=46&y=94&z=8&time=2021-08-10T03:00:00Z&modelrun=2021-08-10T00:00:00Z&level=0"
        );
    }

    #[test]
    fn test_base_map_tile_url() {
        let fetcher = BaseMapFetcher::new(
            "https://services.arcgisonline.com/ArcGIS/rest/services/World_Street_Map/MapServer/tile",
        )
        .unwrap();
        // Path order is zoom/row/column
        assert_eq!(
            fetcher.tile_url(&request()),
            "https://services.arcgisonline.com/ArcGIS/rest/services/World_Street_Map/MapServer/tile/8/94/46"
        );
    }
}
