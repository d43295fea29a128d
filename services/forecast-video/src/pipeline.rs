//! One forecast run end to end.
//!
//! Locates the newest fully published model run, then per area: base map,
//! per-layer tile retrieval, grouping, frame rendering, encoding, upload,
//! and the all-or-nothing record publication. Budget-exhaustion aborts the
//! whole run; everything else isolates to the layer or area that failed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{debug, error, info, instrument, warn};

use smoke_common::time::{candidate_model_run, path_safe};
use smoke_common::{AreaGrid, ForecastError, ForecastRun, TileRequest};

use crate::basemap::BaseMapCache;
use crate::batch::{self, RetrievalConfig};
use crate::config::{LayerConfig, ServiceConfig};
use crate::encode::{self, Codec, EncodeJob};
use crate::fetch::{BaseMapFetcher, HttpTileFetcher, TileFetch};
use crate::group::{group_by_timestep, TileSet};
use crate::locate::{locate_forecast_window, LocatorConfig};
use crate::publish::{self, ArtifactStore, HttpRecordSink, RecordSink, RecordSlots, S3ArtifactStore};
use crate::render::{render_all, RenderContext};

/// Drives complete forecast runs.
pub struct RunPipeline {
    config: ServiceConfig,
    tiles: Arc<dyn TileFetch>,
    base_map_fetcher: Arc<dyn TileFetch>,
    base_maps: BaseMapCache,
    artifacts: Arc<dyn ArtifactStore>,
    records: Arc<dyn RecordSink>,
    work_dir: PathBuf,
}

impl RunPipeline {
    pub fn new(config: ServiceConfig, work_dir: PathBuf, base_map_dir: PathBuf) -> Result<Self> {
        let tiles = HttpTileFetcher::new(config.endpoints.tile_service_url.clone())?;
        let base_map_fetcher = BaseMapFetcher::new(config.endpoints.base_map_url.clone())?;
        let storage = config.endpoints.storage.clone().apply_env();
        let artifacts = S3ArtifactStore::new(&storage)?;
        let records = HttpRecordSink::new(config.endpoints.record_store_url.clone())?;

        Ok(Self {
            config,
            tiles: Arc::new(tiles),
            base_map_fetcher: Arc::new(base_map_fetcher),
            base_maps: BaseMapCache::new(base_map_dir),
            artifacts: Arc::new(artifacts),
            records: Arc::new(records),
            work_dir,
        })
    }

    /// Execute one full run: locate the forecast window once, then process
    /// every configured area (optionally filtered to one).
    ///
    /// `resume_from` is the forecast-hour offset to start retrieval at,
    /// threaded explicitly from the CLI rather than held as process state.
    pub async fn execute(&self, resume_from: u32, area_filter: Option<&str>) -> Result<()> {
        let probe_layer = self
            .config
            .layers
            .first()
            .ok_or_else(|| anyhow!("no layers configured"))?
            .code
            .clone();

        let locator = LocatorConfig {
            probe_layer,
            rate_limit_backoff: std::time::Duration::from_millis(
                self.config.retrieval.rate_limit_backoff_ms,
            ),
            transport_retry_delay: std::time::Duration::from_millis(
                self.config.retrieval.transport_retry_delay_ms,
            ),
            failure_budget: self.config.retrieval.failure_budget,
        };

        let candidate = candidate_model_run(chrono::Utc::now());
        let model_run =
            locate_forecast_window(self.tiles.as_ref(), candidate, smoke_common::HORIZON_HOURS, &locator)
                .await?;
        let run = ForecastRun::new(model_run);

        let mut failed_areas = 0usize;
        for area in self.config.areas.iter() {
            if let Some(filter) = area_filter {
                if area.code != filter {
                    continue;
                }
            }

            if let Err(e) = self.run_area(&run, area, resume_from).await {
                if is_fatal(&e) {
                    // Exceeded budgets cancel everything still pending.
                    return Err(e);
                }
                error!(area = %area.code, error = %e, "Area run failed");
                failed_areas += 1;
            }
        }

        if failed_areas > 0 {
            return Err(anyhow!("{failed_areas} area(s) failed to publish"));
        }

        info!(model_run = %run.model_run, "Forecast run complete");
        Ok(())
    }

    #[instrument(skip(self, run), fields(area = %area.code, model_run = %run.model_run))]
    async fn run_area(&self, run: &ForecastRun, area: &AreaGrid, resume_from: u32) -> Result<()> {
        // Batches are sized to the grid so each batch is one timestep and
        // its first tile is the timestep's probe.
        let retrieval = self.config.retrieval.to_retrieval_config(area.tile_count());

        let base_map = self
            .base_maps
            .ensure(self.base_map_fetcher.as_ref(), area, &retrieval)
            .await?;

        let mut slots = RecordSlots::new(&self.config.layers, &Codec::ALL);

        for layer in &self.config.layers {
            match self
                .run_layer(run, area, layer, resume_from, &base_map, &retrieval, &mut slots)
                .await
            {
                Ok(()) => {}
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => error!(layer = %layer.code, error = %e, "Layer pipeline failed"),
            }
        }

        match publish::publish_gated(slots, self.records.as_ref(), &area.code, run.model_run).await
        {
            Ok(()) => {
                self.cleanup_workdir(run, area).await;
                Ok(())
            }
            Err(e) => {
                error!(area = %area.code, error = %e, "Publication abandoned, record discarded");
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_layer(
        &self,
        run: &ForecastRun,
        area: &AreaGrid,
        layer: &LayerConfig,
        resume_from: u32,
        base_map: &PathBuf,
        retrieval: &RetrievalConfig,
        slots: &mut RecordSlots,
    ) -> Result<()> {
        let requests = build_requests(layer, area, run, resume_from);
        info!(
            layer = %layer.code,
            requests = requests.len(),
            "Starting tile retrieval"
        );

        let outcome = batch::fetch_all(self.tiles.as_ref(), &requests, retrieval).await?;
        if outcome.horizon_truncated {
            info!(
                layer = %layer.code,
                tiles = outcome.results.len(),
                "Upstream horizon truncated, continuing with the published hours"
            );
        }

        let sets = group_by_timestep(&outcome.results, area);
        for set in &sets {
            if !set.is_complete(area) {
                // Upstream data loss for this hour; the render stage will
                // skip it, but the defect is surfaced here.
                warn!(
                    layer = %layer.code,
                    timestamp = %set.valid_time,
                    got = set.tiles.len(),
                    want = area.tile_count(),
                    "Incomplete tile set after grouping"
                );
            }
        }

        let stamp = path_safe(run.model_run);
        let layer_dir = self
            .work_dir
            .join(&layer.slug)
            .join(&stamp)
            .join(&area.code);
        tokio::fs::create_dir_all(&layer_dir).await?;

        let ctx = RenderContext {
            area: area.clone(),
            layer: layer.clone(),
            base_map: base_map.clone(),
            work_dir: layer_dir.clone(),
        };
        let indexed: Vec<(u32, TileSet)> = sets
            .into_iter()
            .map(|set| {
                let hour = (set.valid_time - run.model_run).num_hours().max(0) as u32;
                // 1-based sequence numbering for the encoder
                (hour + 1, set)
            })
            .collect();

        let expected = indexed.len();
        let rendered = render_all(&ctx, indexed).await;
        info!(layer = %layer.code, rendered, expected, "Rendered frames");
        if rendered == 0 {
            return Err(anyhow!("no frames rendered for layer {}", layer.code));
        }

        for codec in Codec::ALL {
            let filename = encode::video_filename(&stamp, codec);
            let output = layer_dir.join(&filename);
            let job = EncodeJob {
                frames_dir: layer_dir.clone(),
                output: output.clone(),
                width: area.canvas_width(),
                height: area.canvas_height(),
                frame_rate: self.config.frame_rate,
            };

            // A codec failure leaves its slot empty; the publication gate
            // decides the run's fate after every slot was attempted.
            match encode::encode(&job, codec).await {
                Ok(()) => {
                    let key = format!("{}/{}/{}/{}", layer.slug, stamp, area.code, filename);
                    match self.artifacts.upload(&output, &key).await {
                        Ok(url) => slots.fill(layer, codec, url),
                        Err(e) => {
                            warn!(codec = codec.key(), error = %e, "Artifact upload failed")
                        }
                    }
                }
                Err(e) => warn!(codec = codec.key(), error = %e, "Encode failed"),
            }
        }

        Ok(())
    }

    /// The run exclusively owns its working directories; remove them once
    /// the record is published.
    async fn cleanup_workdir(&self, run: &ForecastRun, area: &AreaGrid) {
        let stamp = path_safe(run.model_run);
        for layer in &self.config.layers {
            let dir = self.work_dir.join(&layer.slug).join(&stamp).join(&area.code);
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                debug!(dir = %dir.display(), error = %e, "Workdir cleanup skipped");
            }
        }
    }
}

fn is_fatal(e: &anyhow::Error) -> bool {
    e.downcast_ref::<ForecastError>()
        .map(ForecastError::is_fatal)
        .unwrap_or(false)
}

/// Every tile request for one layer across the run's horizon, hour-major so
/// batches sized to the grid line up with timesteps.
pub(crate) fn build_requests(
    layer: &LayerConfig,
    area: &AreaGrid,
    run: &ForecastRun,
    resume_from: u32,
) -> Vec<TileRequest> {
    let mut requests =
        Vec::with_capacity(area.tile_count() * run.horizon_hours.saturating_sub(resume_from) as usize);
    for (_, valid_time) in run.timesteps(resume_from) {
        for coord in area.coords() {
            requests.push(TileRequest {
                layer: layer.code.clone(),
                coord,
                valid_time,
                model_run: run.model_run,
            });
        }
    }
    requests
}
