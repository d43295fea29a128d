//! Tile request and result types for the rate-limited WMTS upstream.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tile coordinate (z/x/y).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    /// Zoom level
    pub z: u32,
    /// Column (x)
    pub x: u32,
    /// Row (y)
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u32, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }
}

/// One tile to retrieve: a layer, a grid cell, a forecast hour, a model run.
///
/// Uniquely identifies a single network call; equality covers every field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileRequest {
    /// Upstream layer code (e.g. `sfc_smoke`)
    pub layer: String,
    pub coord: TileCoord,
    /// Forecast timestep this tile depicts
    pub valid_time: DateTime<Utc>,
    /// Model run the timestep belongs to
    pub model_run: DateTime<Utc>,
}

/// Classified response for a single tile request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileOutcome {
    /// 2xx with an image payload.
    Success(Bytes),
    /// The upstream throttled the request.
    RateLimited,
    /// 204 No Content: the requested timestep is beyond the published
    /// horizon. A normal signal, not an error.
    NotFound,
    /// Connect failure, timeout, or an unexpected status.
    TransportError,
}

/// The result of exactly one fetch attempt. The fetcher never retries;
/// retry policy lives in the batch retrieval engine.
#[derive(Debug, Clone)]
pub struct TileResult {
    pub request: TileRequest,
    pub outcome: TileOutcome,
}

impl TileResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TileOutcome::Success(_))
    }
}
