//! In-process FFmpeg pipeline.
//!
//! Steps run strictly in order: fetch source, analyze it, one encode per
//! quality, thumbnails, preview, HLS segments and master playlist. Scratch files
//! live under `temp_root/{job_id}` and are removed whatever the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{Completion, ExecutionStrategy, JobContext, ProgressBand, StrategyKind};
use crate::config::model::{PartialVariantPolicy, PipelineConfig, UpscalePolicy};
use crate::encoder::ffmpeg::{self, RenditionPaths};
use crate::encoder::EncoderRunner;
use crate::error::{StorageError, StrategyError};
use crate::job::model::{Quality, QualityVariant, TranscodingJob, VideoArtifacts};
use crate::media::storage::keys;
use crate::media::{fetch_source, master_playlist, MediaAnalyzer, ObjectStore};

const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Last progress value reported before the job is marked completed.
const POST_PROCESSING_END: u8 = 99;

/// Runs every step of a job on this host.
pub struct LocalPipeline {
    runner: Arc<dyn EncoderRunner>,
    objects: Arc<dyn ObjectStore>,
    /// Without one, every requested quality is encoded as is.
    analyzer: Option<Arc<dyn MediaAnalyzer>>,
    client: reqwest::Client,
    config: PipelineConfig,
    temp_root: PathBuf,
}

/// Everything published so far, for rollback.
#[derive(Debug, Default)]
struct Published {
    variants: Vec<String>,
    objects: Vec<String>,
}

impl LocalPipeline {
    pub fn new(
        runner: Arc<dyn EncoderRunner>,
        objects: Arc<dyn ObjectStore>,
        config: PipelineConfig,
        temp_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            objects,
            analyzer: None,
            client: reqwest::Client::new(),
            config,
            temp_root: temp_root.into(),
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn MediaAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Scratch directory of a job.
    pub fn workspace_for(&self, job_id: &str) -> PathBuf {
        self.temp_root.join(job_id)
    }

    async fn run(
        &self,
        job: &TranscodingJob,
        ctx: &JobContext,
        workspace: &Path,
        published: &mut Published,
    ) -> Result<VideoArtifacts, StrategyError> {
        let source = workspace.join("source");
        fetch_source(&self.client, &job.input_url, &source).await?;
        ctx.check_cancelled()?;

        let qualities = self.plan_qualities(job, ctx, &source).await?;
        ctx.check_cancelled()?;

        let watermark = match &job.options.watermark {
            Some(spec) => {
                let image = workspace.join("watermark");
                fetch_source(&self.client, &spec.image_url, &image).await?;
                Some(image)
            }
            None => None,
        };

        let watermark = watermark.as_deref();
        self.encode_renditions(job, &qualities, ctx, workspace, &source, watermark, published)
            .await?;

        let mut artifacts = VideoArtifacts {
            format: Some(job.output_format),
            ..Default::default()
        };

        let post_steps = [
            job.options.generate_thumbnails,
            job.options.generate_preview,
            job.wants_manifest(),
        ]
        .iter()
        .filter(|enabled| **enabled)
        .count();
        let post_band = ProgressBand::new(self.config.rendition_band.end, POST_PROCESSING_END);
        let mut done = 0;

        if job.options.generate_thumbnails {
            ctx.check_cancelled()?;
            self.generate_thumbnails(job, ctx, workspace, &source, &mut artifacts, published)
                .await?;
            done += 1;
            ctx.report_progress(&job.id, post_band.at_step(done, post_steps), None)
                .await;
        }

        if job.options.generate_preview {
            ctx.check_cancelled()?;
            let output = workspace.join("preview.mp4");
            let command = ffmpeg::preview_command(&source, &output, &self.config.preview);
            self.runner.run(&command, &ctx.cancel).await?;

            let key = keys::preview(&job.video_id);
            let stored = self.objects.put_file(&output, &key).await?;
            published.objects.push(key);
            artifacts.preview_url = Some(stored.url);
            remove_scratch(&output).await;

            done += 1;
            ctx.report_progress(&job.id, post_band.at_step(done, post_steps), None)
                .await;
        }

        if job.wants_manifest() {
            ctx.check_cancelled()?;
            let url = self
                .generate_hls(job, &qualities, ctx, workspace, &source, watermark, published)
                .await?;
            artifacts.manifest_url = Some(url);
            done += 1;
            ctx.report_progress(&job.id, post_band.at_step(done, post_steps), None)
                .await;
        }

        Ok(artifacts)
    }

    /// Qualities to encode once the source dimensions are known.
    async fn plan_qualities(
        &self,
        job: &TranscodingJob,
        ctx: &JobContext,
        source: &Path,
    ) -> Result<Vec<Quality>, StrategyError> {
        let Some(analyzer) = &self.analyzer else {
            return Ok(job.qualities.clone());
        };

        let info = analyzer.analyze(source, &ctx.cancel).await?;
        let Some(source_height) = info.height() else {
            debug!(job_id = %job.id, format = %info.format, "Source has no video stream");
            return Ok(job.qualities.clone());
        };
        info!(
            job_id = %job.id,
            format = %info.format,
            duration = info.duration,
            height = source_height,
            "Source analyzed"
        );

        let planned = fit_to_source(&job.qualities, source_height, self.config.upscale)?;
        if planned.len() < job.qualities.len() {
            let skipped: Vec<&str> = job
                .qualities
                .iter()
                .filter(|q| !planned.iter().any(|p| p.label == q.label))
                .map(|q| q.label.as_str())
                .collect();
            info!(job_id = %job.id, skipped = ?skipped, source_height, "Skipping upscaled qualities");
        }
        Ok(planned)
    }

    #[allow(clippy::too_many_arguments)]
    async fn encode_renditions(
        &self,
        job: &TranscodingJob,
        qualities: &[Quality],
        ctx: &JobContext,
        workspace: &Path,
        source: &Path,
        watermark: Option<&Path>,
        published: &mut Published,
    ) -> Result<(), StrategyError> {
        let band = self.config.rendition_band;
        let total = qualities.len();

        for (index, quality) in qualities.iter().enumerate() {
            ctx.check_cancelled()?;
            ctx.report_progress(&job.id, band.at_step(index, total), Some(quality.label.as_str()))
                .await;

            let output = workspace.join(format!("{}.mp4", quality.label));
            let passlog = workspace.join(format!("{}-pass", quality.label));
            let paths = RenditionPaths {
                source,
                watermark,
                output: &output,
                passlog: &passlog,
            };

            for command in ffmpeg::rendition_commands(quality, &job.options, paths) {
                self.runner.run(&command, &ctx.cancel).await?;
            }

            let key = keys::variant(&job.video_id, &quality.label);
            let stored = self.objects.put_file(&output, &key).await?;
            published.objects.push(key);

            let variant = QualityVariant::from_quality(&job.video_id, quality, stored.size, stored.url);
            ctx.store.upsert_variant(&variant).await?;
            published.variants.push(quality.label.clone());

            info!(
                job_id = %job.id,
                quality = %quality.label,
                size = stored.size,
                "Rendition published"
            );
            remove_scratch(&output).await;
        }

        ctx.report_progress(&job.id, band.end, None).await;
        Ok(())
    }

    async fn generate_thumbnails(
        &self,
        job: &TranscodingJob,
        ctx: &JobContext,
        workspace: &Path,
        source: &Path,
        artifacts: &mut VideoArtifacts,
        published: &mut Published,
    ) -> Result<(), StrategyError> {
        let thumbnails = &self.config.thumbnails;

        for (index, offset) in thumbnails.offsets_seconds.iter().enumerate() {
            let output = workspace.join(format!("thumb_{}.jpg", index));
            let command = ffmpeg::thumbnail_command(source, &output, *offset, thumbnails);
            self.runner.run(&command, &ctx.cancel).await?;

            let key = keys::thumbnail(&job.video_id, index);
            let stored = self.objects.put_file(&output, &key).await?;
            published.objects.push(key);
            artifacts.thumbnails.push(stored.url);
            remove_scratch(&output).await;
        }

        artifacts.thumbnail_url = artifacts
            .thumbnails
            .get(thumbnails.primary_index)
            .or_else(|| artifacts.thumbnails.first())
            .cloned();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn generate_hls(
        &self,
        job: &TranscodingJob,
        qualities: &[Quality],
        ctx: &JobContext,
        workspace: &Path,
        source: &Path,
        watermark: Option<&Path>,
        published: &mut Published,
    ) -> Result<String, StrategyError> {
        for quality in qualities {
            ctx.check_cancelled()?;
            let dir = workspace.join("hls").join(&quality.label);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StorageError::Io {
                    path: dir.clone(),
                    source: e,
                })?;

            let command = ffmpeg::hls_command(
                quality,
                &job.options,
                source,
                watermark,
                &dir,
                self.config.segment_duration_seconds,
            );
            self.runner.run(&command, &ctx.cancel).await?;

            for file in list_files(&dir).await? {
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let key = keys::hls_file(&job.video_id, &quality.label, &name);
                self.objects.put_file(&file, &key).await?;
                published.objects.push(key);
            }
            debug!(job_id = %job.id, quality = %quality.label, "HLS rendition published");
        }

        let key = keys::master_manifest(&job.video_id);
        let stored = self
            .objects
            .put_bytes(
                master_playlist(qualities).into_bytes(),
                &key,
                MANIFEST_CONTENT_TYPE,
            )
            .await?;
        published.objects.push(key);
        Ok(stored.url)
    }

    /// Removes what a failed job published. Best effort.
    async fn rollback(&self, job: &TranscodingJob, ctx: &JobContext, published: &Published) {
        for label in &published.variants {
            if let Err(e) = ctx.store.delete_variant(&job.video_id, label).await {
                warn!(job_id = %job.id, quality = %label, error = %e, "Failed to roll back variant");
            }
        }
        for key in &published.objects {
            if let Err(e) = self.objects.delete(key).await {
                warn!(job_id = %job.id, key = %key, error = %e, "Failed to roll back object");
            }
        }
        info!(
            job_id = %job.id,
            variants = published.variants.len(),
            objects = published.objects.len(),
            "Rolled back partial outputs"
        );
    }
}

#[async_trait]
impl ExecutionStrategy for LocalPipeline {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Local
    }

    async fn execute(
        &self,
        job: &TranscodingJob,
        ctx: &JobContext,
    ) -> Result<Completion, StrategyError> {
        ctx.check_cancelled()?;

        let workspace = self.workspace_for(&job.id);
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| StorageError::Io {
                path: workspace.clone(),
                source: e,
            })?;

        let mut published = Published::default();
        let result = self.run(job, ctx, &workspace, &mut published).await;

        if result.is_err() && self.config.partial_variants == PartialVariantPolicy::Rollback {
            self.rollback(job, ctx, &published).await;
        }

        if let Err(e) = tokio::fs::remove_dir_all(&workspace).await {
            warn!(job_id = %job.id, error = %e, "Failed to clean up job workspace");
        }

        result.map(Completion::Finished)
    }
}

/// Applies the upscale policy to the requested qualities.
///
/// `Skip` keeps the qualities no taller than the source; when none are, the
/// shortest requested one is kept so the job still produces a rendition.
pub fn fit_to_source(
    qualities: &[Quality],
    source_height: u32,
    policy: UpscalePolicy,
) -> Result<Vec<Quality>, StrategyError> {
    match policy {
        UpscalePolicy::Allow => Ok(qualities.to_vec()),
        UpscalePolicy::Reject => match qualities.iter().find(|q| q.height > source_height) {
            Some(q) => Err(StrategyError::Upscale {
                label: q.label.clone(),
                height: q.height,
                source_height,
            }),
            None => Ok(qualities.to_vec()),
        },
        UpscalePolicy::Skip => {
            let kept: Vec<Quality> = qualities
                .iter()
                .filter(|q| q.height <= source_height)
                .cloned()
                .collect();
            if !kept.is_empty() {
                return Ok(kept);
            }
            Ok(qualities
                .iter()
                .min_by_key(|q| q.height)
                .cloned()
                .into_iter()
                .collect())
        }
    }
}

async fn list_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let io_err = |e: std::io::Error| StorageError::Io {
        path: dir.to_path_buf(),
        source: e,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        if entry.file_type().await.map_err(io_err)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

async fn remove_scratch(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = ?path, error = %e, "Failed to remove scratch file");
    }
}
