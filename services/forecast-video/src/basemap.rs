//! Base-map retrieval and per-area caching.
//!
//! The base map for an area is its tile grid fetched from the street-map
//! service, stitched into one PNG, and cached on disk. It is fetched at
//! most once per area per process lifetime and shared read-only afterwards.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

use smoke_common::{AreaGrid, TileOutcome, TileRequest, TILE_SIZE_PX};

use crate::batch::{self, RetrievalConfig};
use crate::fetch::TileFetch;
use crate::mosaic::{self, MosaicPiece};

/// Layer code carried by base-map requests; the base-map fetcher ignores it
/// along with the time fields.
const BASE_MAP_LAYER: &str = "base-map";

pub struct BaseMapCache {
    dir: PathBuf,
    /// Areas already ensured this process
    fetched: Mutex<HashSet<String>>,
}

impl BaseMapCache {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            fetched: Mutex::new(HashSet::new()),
        }
    }

    /// Path to the cached base map for `area`, fetching and stitching it on
    /// first use.
    pub async fn ensure(
        &self,
        fetcher: &dyn TileFetch,
        area: &AreaGrid,
        retrieval: &RetrievalConfig,
    ) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}.png", area.code));

        // The lock both serializes concurrent callers and records which
        // areas this process has already handled.
        let mut fetched = self.fetched.lock().await;
        if fetched.contains(&area.code) || path.exists() {
            fetched.insert(area.code.clone());
            return Ok(path);
        }

        info!(area = %area.code, "Fetching base map");
        let png = fetch_and_stitch(fetcher, area, retrieval).await?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        tokio::fs::write(&path, &png)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        fetched.insert(area.code.clone());
        Ok(path)
    }
}

async fn fetch_and_stitch(
    fetcher: &dyn TileFetch,
    area: &AreaGrid,
    retrieval: &RetrievalConfig,
) -> Result<Vec<u8>> {
    let epoch: DateTime<Utc> = DateTime::UNIX_EPOCH;
    let requests: Vec<TileRequest> = area
        .coords()
        .into_iter()
        .map(|coord| TileRequest {
            layer: BASE_MAP_LAYER.to_string(),
            coord,
            valid_time: epoch,
            model_run: epoch,
        })
        .collect();

    let outcome = batch::fetch_all(fetcher, &requests, retrieval).await?;
    if outcome.horizon_truncated || outcome.results.len() != area.tile_count() {
        return Err(anyhow!(
            "base map for {} incomplete: {}/{} tiles",
            area.code,
            outcome.results.len(),
            area.tile_count()
        ));
    }

    let mut pieces = Vec::with_capacity(outcome.results.len());
    for result in outcome.results {
        let TileOutcome::Success(data) = result.outcome else {
            continue;
        };
        let (col, row) = area
            .local_offset(result.request.coord.x, result.request.coord.y)
            .ok_or_else(|| anyhow!("base-map tile outside the area grid"))?;
        pieces.push(MosaicPiece {
            data,
            offset_x: col * TILE_SIZE_PX,
            offset_y: row * TILE_SIZE_PX,
        });
    }

    let png = mosaic::compose(&pieces, area.canvas_width(), area.canvas_height())?;
    Ok(png)
}
