//! Thumbnail generation pipeline.
//!
//! One run per finalized upload:
//! `Filtered -> Staged -> Converted -> Published -> LinksIssued -> Recorded`,
//! with staged files cleaned up on every exit path once staging starts.
//! Failures are terminal; nothing already written remotely is rolled back.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use bytes::Bytes;
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::converter::{Bounds, ImageConverter};
use crate::errors::PipelineError;
use crate::metadata::store::{DocumentStore, ImageRecord};
use crate::metrics::{STAGE_DURATION_SECONDS, THUMBNAILS_TOTAL};
use crate::staging::{ensure_parent, StagedFiles, Staging};
use crate::storage::backend::ObjectStorage;

/// A finalized object as reported by the storage platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedObject {
    pub bucket: String,
    pub path: String,
    pub content_type: Option<String>,
}

/// Why an object was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Content type missing or not `image/*`.
    NotAnImage,
    /// Basename already carries the thumbnail prefix.
    AlreadyThumbnail,
}

/// Successful end states of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The trigger filter rejected the object; nothing was touched.
    Skipped(SkipReason),
    /// A thumbnail was published and its links recorded.
    Recorded {
        thumbnail_path: String,
        record_id: String,
        record: ImageRecord,
    },
}

/// Tunables for the pipeline.
#[derive(Debug, Clone)]
pub struct ThumbnailSettings {
    pub bounds: Bounds,
    pub prefix: String,
    pub signed_url_ttl: std::time::Duration,
    pub records_list: String,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            bounds: Bounds::new(200, 200),
            prefix: "thumb_".to_string(),
            signed_url_ttl: std::time::Duration::from_secs(15_778_800_000),
            records_list: "images".to_string(),
        }
    }
}

/// Last `/`-separated segment of an object path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Derive the thumbnail path: same directory, prefixed basename.
///
/// `images/cat.png` -> `images/thumb_cat.png`, `cat.png` -> `thumb_cat.png`.
/// The directory is normalized: empty and `.` segments are dropped and `..`
/// consumes the segment before it.
pub fn thumbnail_path(path: &str, prefix: &str) -> String {
    let (dir, name) = path.rsplit_once('/').unwrap_or(("", path));
    let mut segments: Vec<&str> = Vec::new();
    for segment in dir.split('/') {
        match segment {
            "" | "." => {}
            ".." if segments.last().is_some_and(|s| *s != "..") => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        format!("{prefix}{name}")
    } else {
        format!("{}/{prefix}{name}", segments.join("/"))
    }
}

/// Trigger filter: `Some(reason)` when the object must be ignored.
pub fn skip_reason(object: &FinalizedObject, prefix: &str) -> Option<SkipReason> {
    let is_image = object
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("image/"));
    if !is_image {
        return Some(SkipReason::NotAnImage);
    }
    if basename(&object.path).starts_with(prefix) {
        return Some(SkipReason::AlreadyThumbnail);
    }
    None
}

/// Records how long a stage took.
fn observe_stage(stage: &'static str, started: Instant) {
    histogram!(STAGE_DURATION_SECONDS, "stage" => stage).record(started.elapsed().as_secs_f64());
}

/// The thumbnail pipeline with its injected collaborators.
pub struct ThumbnailPipeline {
    storage: Arc<dyn ObjectStorage>,
    converter: Arc<dyn ImageConverter>,
    store: Arc<dyn DocumentStore>,
    staging: Staging,
    settings: ThumbnailSettings,
}

impl ThumbnailPipeline {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        converter: Arc<dyn ImageConverter>,
        store: Arc<dyn DocumentStore>,
        staging: Staging,
        settings: ThumbnailSettings,
    ) -> Self {
        Self {
            storage,
            converter,
            store,
            staging,
            settings,
        }
    }

    pub fn settings(&self) -> &ThumbnailSettings {
        &self.settings
    }

    /// Run the pipeline for one finalized object.
    #[instrument(skip(self, object), fields(bucket = %object.bucket, path = %object.path))]
    pub async fn run(&self, object: &FinalizedObject) -> Result<Outcome, PipelineError> {
        if let Some(reason) = skip_reason(object, &self.settings.prefix) {
            info!(?reason, "object filtered out");
            counter!(THUMBNAILS_TOTAL, "outcome" => "skipped").increment(1);
            return Ok(Outcome::Skipped(reason));
        }

        let result = self.process(object).await;
        match &result {
            Ok(_) => counter!(THUMBNAILS_TOTAL, "outcome" => "recorded").increment(1),
            Err(e) => {
                error!(stage = e.stage(), error = %e, "thumbnail pipeline failed");
                counter!(THUMBNAILS_TOTAL, "outcome" => "failed", "stage" => e.stage())
                    .increment(1);
            }
        }
        result
    }

    async fn process(&self, object: &FinalizedObject) -> Result<Outcome, PipelineError> {
        let content_type = object.content_type.clone().unwrap_or_default();
        let thumb_path = thumbnail_path(&object.path, &self.settings.prefix);

        let files = self
            .staging
            .files_for(&object.path, &thumb_path)
            .map_err(|source| PipelineError::Staging {
                path: object.path.clone(),
                source,
            })?;

        // Local files are removed whatever happens from here on.
        let published = self
            .stage_convert_publish(object, &thumb_path, &content_type, &files)
            .await;
        files.cleanup().await;
        published?;

        let (thumbnail_url, original_url) = self.issue_links(object, &thumb_path).await?;
        let record = ImageRecord {
            path: original_url,
            thumbnail: thumbnail_url,
        };

        let started = Instant::now();
        let record_id = self
            .store
            .append(&self.settings.records_list, record.to_fields())
            .await
            .map_err(|source| PipelineError::Recording {
                path: object.path.clone(),
                source,
            })?;
        observe_stage("recording", started);
        info!(record_id = %record_id, list = %self.settings.records_list, "thumbnail URLs saved to database");

        Ok(Outcome::Recorded {
            thumbnail_path: thumb_path,
            record_id,
            record,
        })
    }

    async fn stage_convert_publish(
        &self,
        object: &FinalizedObject,
        thumb_path: &str,
        content_type: &str,
        files: &StagedFiles,
    ) -> Result<(), PipelineError> {
        let started = Instant::now();
        self.stage(object, files)
            .await
            .map_err(|source| PipelineError::Staging {
                path: object.path.clone(),
                source,
            })?;
        observe_stage("staging", started);
        info!(local = %files.source.display(), "object staged locally");

        let started = Instant::now();
        ensure_parent(&files.thumbnail)
            .await
            .map_err(|e| PipelineError::Conversion {
                path: object.path.clone(),
                source: e.into(),
            })?;
        self.converter
            .thumbnail(&files.source, &files.thumbnail, self.settings.bounds)
            .await
            .map_err(|source| PipelineError::Conversion {
                path: object.path.clone(),
                source,
            })?;
        observe_stage("conversion", started);
        info!(local = %files.thumbnail.display(), "thumbnail created");

        let started = Instant::now();
        let publish = async {
            let data = tokio::fs::read(&files.thumbnail).await?;
            self.storage
                .upload(&object.bucket, thumb_path, Bytes::from(data), content_type)
                .await
        };
        publish.await.map_err(|source| PipelineError::Publish {
            path: thumb_path.to_string(),
            source,
        })?;
        observe_stage("publish", started);
        info!(thumbnail = %thumb_path, "thumbnail uploaded to storage");

        Ok(())
    }

    async fn stage(&self, object: &FinalizedObject, files: &StagedFiles) -> anyhow::Result<()> {
        ensure_parent(&files.source).await?;
        let data = self.storage.download(&object.bucket, &object.path).await?;
        tokio::fs::write(&files.source, &data).await?;
        Ok(())
    }

    /// Returns `(thumbnail_url, original_url)`.
    async fn issue_links(
        &self,
        object: &FinalizedObject,
        thumb_path: &str,
    ) -> Result<(String, String), PipelineError> {
        let started = Instant::now();
        let expires_at = SystemTime::now()
            .checked_add(self.settings.signed_url_ttl)
            .ok_or_else(|| PipelineError::LinkIssuance {
                path: object.path.clone(),
                source: anyhow::anyhow!(
                    "link lifetime of {}s is out of range",
                    self.settings.signed_url_ttl.as_secs()
                ),
            })?;
        let links = tokio::try_join!(
            self.storage
                .signed_url(&object.bucket, thumb_path, expires_at),
            self.storage
                .signed_url(&object.bucket, &object.path, expires_at),
        )
        .map_err(|source| PipelineError::LinkIssuance {
            path: object.path.clone(),
            source,
        })?;
        observe_stage("link_issuance", started);
        info!("got signed URLs");
        Ok(links)
    }
}
