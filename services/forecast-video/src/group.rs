//! Groups out-of-order tile results into per-timestep tile sets.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::warn;

use smoke_common::{AreaGrid, TileOutcome, TileResult};

/// A successfully fetched tile placed at its local grid offset.
#[derive(Debug, Clone)]
pub struct PlacedTile {
    pub col: u32,
    pub row: u32,
    pub data: Bytes,
}

/// All tiles for one forecast timestep.
#[derive(Debug, Clone)]
pub struct TileSet {
    pub valid_time: DateTime<Utc>,
    pub tiles: Vec<PlacedTile>,
}

impl TileSet {
    /// Complete means exactly one tile per grid cell. Incomplete sets are
    /// never forwarded to rendering.
    pub fn is_complete(&self, grid: &AreaGrid) -> bool {
        self.tiles.len() == grid.tile_count()
    }
}

/// Bucket successful results by timestep, tolerating any arrival order, and
/// emit the buckets in ascending timestamp order.
///
/// Buckets are keyed by epoch seconds so formatting can never split one
/// timestep across two keys. Local offsets are recomputed from the absolute
/// tile coordinates and the grid's starting corner.
pub fn group_by_timestep(results: &[TileResult], grid: &AreaGrid) -> Vec<TileSet> {
    let mut buckets: BTreeMap<i64, TileSet> = BTreeMap::new();

    for result in results {
        let TileOutcome::Success(data) = &result.outcome else {
            continue;
        };
        let request = &result.request;
        let Some((col, row)) = grid.local_offset(request.coord.x, request.coord.y) else {
            warn!(
                x = request.coord.x,
                y = request.coord.y,
                area = %grid.code,
                "Tile outside the area grid, dropping"
            );
            continue;
        };

        buckets
            .entry(request.valid_time.timestamp())
            .or_insert_with(|| TileSet {
                valid_time: request.valid_time,
                tiles: Vec::with_capacity(grid.tile_count()),
            })
            .tiles
            .push(PlacedTile {
                col,
                row,
                data: data.clone(),
            });
    }

    buckets.into_values().collect()
}
