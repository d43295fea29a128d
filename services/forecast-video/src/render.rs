//! Per-timestep render pipeline.
//!
//! One tile set becomes one annotated frame: mosaic assembly, transparency
//! adjustment, base-map composite, then the timestamp label. A timestep's
//! failure is logged and its frame skipped; sibling timesteps are never
//! affected. Timesteps render concurrently on a worker pool sized to the
//! available CPU parallelism, since frames are independent.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::America::Denver;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use smoke_common::{AreaGrid, ForecastError, TILE_SIZE_PX};

use crate::config::LayerConfig;
use crate::group::TileSet;
use crate::magick;
use crate::mosaic::{self, MosaicPiece};

/// The fixed opacity applied to the data overlay before compositing.
pub const OVERLAY_OPACITY: f64 = 0.75;

/// Everything a timestep render needs, shared across the worker pool.
pub struct RenderContext {
    pub area: AreaGrid,
    pub layer: LayerConfig,
    /// Cached base map for the area, read-only
    pub base_map: PathBuf,
    /// Frame output directory, exclusively owned by this run
    pub work_dir: PathBuf,
}

/// Deterministic 4-digit frame name the encoder consumes in sequence.
pub fn frame_filename(seq: u32) -> String {
    format!("final{:04}.png", seq)
}

/// Annotation text for a frame: layer label, fixed zone label, localized
/// weekday and human-readable timestamp derived from the UTC instant.
pub fn annotation_label(layer_label: &str, valid_time: DateTime<Utc>) -> String {
    let local = valid_time.with_timezone(&Denver);
    format!(
        "{} - Mountain Time - {}, {}",
        layer_label,
        local.format("%A"),
        local.format("%b %d %Y %I:%M %p"),
    )
}

/// Render one timestep into `final{seq:04}.png` inside the work directory.
pub async fn render_timestep(ctx: &RenderContext, seq: u32, set: &TileSet) -> Result<PathBuf> {
    if !set.is_complete(&ctx.area) {
        // Upstream data loss for this hour: surfaced, not silently dropped.
        return Err(ForecastError::IncompleteTileSet {
            timestamp: set.valid_time.to_rfc3339(),
            got: set.tiles.len(),
            want: ctx.area.tile_count(),
        }
        .into());
    }

    let pieces: Vec<MosaicPiece> = set
        .tiles
        .iter()
        .map(|tile| MosaicPiece {
            data: tile.data.clone(),
            offset_x: tile.col * TILE_SIZE_PX,
            offset_y: tile.row * TILE_SIZE_PX,
        })
        .collect();

    let png = mosaic::compose(&pieces, ctx.area.canvas_width(), ctx.area.canvas_height())?;

    let overlay_path = ctx.work_dir.join(format!("overlay-{:04}.png", seq));
    tokio::fs::write(&overlay_path, &png)
        .await
        .with_context(|| format!("failed to write {}", overlay_path.display()))?;

    magick::alpha_scale(&overlay_path, OVERLAY_OPACITY).await?;

    let flattened = ctx.work_dir.join(format!("{}.png", Uuid::new_v4()));
    magick::flatten_composite(&ctx.base_map, &overlay_path, &flattened).await?;

    let final_path = ctx.work_dir.join(frame_filename(seq));
    let label = annotation_label(&ctx.layer.label(), set.valid_time);
    magick::annotate_text(&flattened, &final_path, &label).await?;

    tokio::fs::remove_file(&flattened).await.ok();

    debug!(seq, path = %final_path.display(), "Rendered frame");
    Ok(final_path)
}

/// Render every timestep, isolating failures, and return how many frames
/// were produced.
pub async fn render_all(ctx: &RenderContext, sets: Vec<(u32, TileSet)>) -> usize {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    let rendered: Vec<bool> = stream::iter(sets)
        .map(|(seq, set)| async move {
            match render_timestep(ctx, seq, &set).await {
                Ok(_) => true,
                Err(e) => {
                    warn!(seq, error = %e, "Frame render failed, skipping timestep");
                    false
                }
            }
        })
        .buffer_unordered(workers)
        .collect()
        .await;

    rendered.into_iter().filter(|ok| *ok).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::TimeZone;
    use smoke_common::AreaGrid;

    use crate::group::PlacedTile;

    fn area() -> AreaGrid {
        AreaGrid {
            code: "utah".to_string(),
            zoom: 8,
            starting_x: 46,
            starting_y: 94,
            grid_width: 5,
            grid_height: 5,
        }
    }

    #[test]
    fn test_frame_filename_zero_padded() {
        assert_eq!(frame_filename(1), "final0001.png");
        assert_eq!(frame_filename(48), "final0048.png");
    }

    #[test]
    fn test_annotation_label_in_mountain_time() {
        // 2021-08-10T09:00Z is 03:00 AM Tuesday in Denver (MDT, UTC-6).
        let valid = Utc.with_ymd_and_hms(2021, 8, 10, 9, 0, 0).unwrap();
        assert_eq!(
            annotation_label("Near Surface Smoke", valid),
            "Near Surface Smoke - Mountain Time - Tuesday, Aug 10 2021 03:00 AM"
        );
    }

    #[test]
    fn test_annotation_label_winter_offset() {
        // Standard time is UTC-7: 2021-12-10T09:00Z is 02:00 AM in Denver.
        let valid = Utc.with_ymd_and_hms(2021, 12, 10, 9, 0, 0).unwrap();
        let label = annotation_label("Vertically Integrated Smoke", valid);
        assert!(label.ends_with("Friday, Dec 10 2021 02:00 AM"));
    }

    #[tokio::test]
    async fn test_incomplete_set_is_rejected_before_any_io() {
        let ctx = RenderContext {
            area: area(),
            layer: LayerConfig {
                code: "sfc_smoke".to_string(),
                slug: "near-surface-smoke".to_string(),
            },
            base_map: PathBuf::from("/nonexistent/base.png"),
            work_dir: PathBuf::from("/nonexistent"),
        };
        let set = TileSet {
            valid_time: Utc.with_ymd_and_hms(2021, 8, 10, 0, 0, 0).unwrap(),
            tiles: vec![PlacedTile {
                col: 0,
                row: 0,
                data: Bytes::from_static(b"t"),
            }],
        };

        let err = render_timestep(&ctx, 1, &set).await.unwrap_err();
        let forecast_err = err.downcast_ref::<ForecastError>().unwrap();
        assert!(matches!(
            forecast_err,
            ForecastError::IncompleteTileSet { got: 1, want: 25, .. }
        ));
    }
}
