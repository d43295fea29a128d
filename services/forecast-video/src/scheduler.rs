//! Cadence trigger for continuous operation.
//!
//! Fires a full forecast run at the configured UTC hours, once per hour at
//! most. The run itself supplies no inputs beyond "run now"; availability
//! gating is the forecast-window locator's job.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Timelike, Utc};
use tokio::sync::broadcast;
use tracing::{error, info};

use smoke_common::time::truncate_to_hour;

use crate::config::ScheduleConfig;
use crate::pipeline::RunPipeline;

pub struct Scheduler {
    pipeline: Arc<RunPipeline>,
    schedule: ScheduleConfig,
}

impl Scheduler {
    pub fn new(pipeline: Arc<RunPipeline>, schedule: ScheduleConfig) -> Self {
        Self { pipeline, schedule }
    }

    /// Run until shutdown, firing at the configured cadence.
    pub async fn run_forever(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut last_fired: Option<DateTime<Utc>> = None;

        loop {
            let now = Utc::now();
            if self.schedule.is_due(now, last_fired) {
                info!(hour = now.hour(), "Cadence trigger fired");
                last_fired = Some(truncate_to_hour(now));

                if let Err(e) = self.pipeline.execute(0, None).await {
                    error!(error = %e, "Forecast run failed");
                }
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutting down scheduler");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(30)) => {
                    // Keep ticking
                }
            }
        }

        Ok(())
    }
}
