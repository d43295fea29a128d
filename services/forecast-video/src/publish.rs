//! Artifact upload and forecast-record publication.
//!
//! Uploads go through `ArtifactStore`; the completed record goes through
//! `RecordSink`. Publication is all-or-nothing: the record is submitted at
//! most once, and only when every expected (layer, codec) slot holds a URL.
//! A partial record is never handed to the record store.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use smoke_common::{ForecastError, ForecastResult};

use crate::config::{LayerConfig, StorageSettings};
use crate::encode::Codec;

/// Encoded artifacts are immutable once published.
const CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Durable storage for encoded artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload a local file under `key` and return its durable URL.
    async fn upload(&self, local_path: &Path, key: &str) -> Result<String>;
}

/// S3-compatible artifact store.
pub struct S3ArtifactStore {
    store: Arc<dyn ObjectStore>,
    public_url_base: String,
}

impl S3ArtifactStore {
    pub fn new(settings: &StorageSettings) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_endpoint(&settings.endpoint)
            .with_bucket_name(&settings.bucket)
            .with_access_key_id(&settings.access_key_id)
            .with_secret_access_key(&settings.secret_access_key)
            .with_region(&settings.region);

        if settings.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder
            .build()
            .context("Failed to create S3 client")?;

        Ok(Self {
            store: Arc::new(store),
            public_url_base: settings.public_url_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    #[instrument(skip(self), fields(key = %key))]
    async fn upload(&self, local_path: &Path, key: &str) -> Result<String> {
        let data = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("failed to read {}", local_path.display()))?;

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::CacheControl, CACHE_CONTROL.into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        let location = ObjectPath::from(key);
        debug!(size = data.len(), "Uploading artifact");

        self.store
            .put_opts(&location, Bytes::from(data).into(), opts)
            .await
            .with_context(|| format!("failed to upload {}", key))?;

        Ok(format!("{}/{}", self.public_url_base, key))
    }
}

/// Destination for completed forecast records. Offers no idempotency, so
/// callers invoke it at most once per run.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn append(&self, record: &ForecastRecord) -> Result<()>;
}

/// POSTs records to the forecast API.
pub struct HttpRecordSink {
    client: Client,
    url: String,
}

impl HttpRecordSink {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RecordSink for HttpRecordSink {
    async fn append(&self, record: &ForecastRecord) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "data": record }))
            .send()
            .await
            .context("record-store request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("record-store rejected record: {}", response.status()));
        }

        info!(run_id = %record.run_id, area = %record.area_code, "Forecast record appended");
        Ok(())
    }
}

/// The metadata record for one completed forecast run over one area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub run_id: Uuid,
    pub area_code: String,
    /// Model-run instant, epoch seconds
    pub timestamp: i64,
    /// `{layer_stem}_video_url_{codec}` → durable URL
    #[serde(flatten)]
    pub video_urls: BTreeMap<String, String>,
}

/// Record field name for one (layer, codec) artifact slot.
pub fn slot_key(layer: &LayerConfig, codec: Codec) -> String {
    format!("{}_video_url_{}", layer.field_stem(), codec.key())
}

/// Tracks which (layer, codec) slots have produced a URL, and gates the
/// record on all of them being present.
#[derive(Debug)]
pub struct RecordSlots {
    expected: BTreeSet<String>,
    filled: BTreeMap<String, String>,
}

impl RecordSlots {
    pub fn new(layers: &[LayerConfig], codecs: &[Codec]) -> Self {
        let expected = layers
            .iter()
            .flat_map(|layer| codecs.iter().map(|codec| slot_key(layer, *codec)))
            .collect();

        Self {
            expected,
            filled: BTreeMap::new(),
        }
    }

    pub fn fill(&mut self, layer: &LayerConfig, codec: Codec, url: String) {
        self.filled.insert(slot_key(layer, codec), url);
    }

    /// Slots still missing a URL.
    pub fn missing(&self) -> Vec<&str> {
        self.expected
            .iter()
            .filter(|key| !self.filled.contains_key(*key))
            .map(String::as_str)
            .collect()
    }

    /// Produce the record, or fail when any expected slot is empty. A
    /// partial record is discarded here, never published.
    pub fn into_record(
        self,
        area_code: &str,
        model_run: DateTime<Utc>,
    ) -> ForecastResult<ForecastRecord> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(ForecastError::PublicationIncomplete(missing.join(", ")));
        }

        Ok(ForecastRecord {
            run_id: Uuid::new_v4(),
            area_code: area_code.to_string(),
            timestamp: model_run.timestamp(),
            video_urls: self.filled,
        })
    }
}

/// Gate and publish in one step: the sink is invoked exactly once when
/// every slot is filled, and not at all otherwise.
pub async fn publish_gated(
    slots: RecordSlots,
    sink: &dyn RecordSink,
    area_code: &str,
    model_run: DateTime<Utc>,
) -> Result<()> {
    let record = slots.into_record(area_code, model_run)?;
    sink.append(&record).await
}
