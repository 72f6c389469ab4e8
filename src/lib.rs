//! Transcoding Orchestrator - turns one uploaded video into delivery-ready
//! renditions, thumbnails, a preview clip and an HLS manifest.
//!
//! Each job runs on one of three strategies: a managed cloud video service
//! (polled), a remote edge worker (webhook driven) or the in-process FFmpeg
//! pipeline. All of them share one job lifecycle owned by [`job::JobRegistry`].

pub mod cli;
pub mod config;
pub mod encoder;
pub mod error;
pub mod ingest;
pub mod job;
pub mod media;
pub mod orchestrator;
pub mod server;
pub mod store;
pub mod strategy;
pub mod validation;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cli::{Cli, Commands, ServeArgs};
use crate::config::model::{AppConfig, StoreConfig};
use crate::encoder::FfmpegRunner;
use crate::ingest::WebhookIngest;
use crate::job::JobRegistry;
use crate::media::{FfprobeAnalyzer, FsObjectStore, MediaAnalyzer};
use crate::orchestrator::{Orchestrator, Strategies};
use crate::server::{AppState, Metrics};
use crate::store::{MemoryStore, RecordStore, RedisStore};
use crate::strategy::cloud::HttpCloudVideoService;
use crate::strategy::edge::HttpEdgeDispatcher;
use crate::strategy::{CloudStrategy, EdgeStrategy, ExecutionStrategy, LocalPipeline};
use crate::validation::SubmissionPolicy;

/// Runs the orchestrator with the provided CLI arguments.
pub async fn run(cli: Cli) -> Result<()> {
    setup_logging(cli.log_level())?;

    match cli.command {
        Commands::Serve(args) => serve(args, &cli.config).await,
        Commands::ConfigValidate => validate_config(&cli.config),
        Commands::ConfigShow => show_config(&cli.config),
        Commands::Presets { source_height } => list_presets(source_height),
        Commands::JobStatus { job_id } => job_status(&cli.config, &job_id).await,
        Commands::Analyze { path, ffprobe } => analyze(&path, ffprobe).await,
    }
}

/// Initializes the tracing subscriber for structured logging.
fn setup_logging(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .json()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

/// Runs the HTTP service until Ctrl+C.
async fn serve(args: ServeArgs, config_path: &Path) -> Result<()> {
    info!("Starting transcoding orchestrator");

    let config = config::load_and_validate(config_path)?;
    let store = open_store(&config.global.store).await?;

    let metrics = if config.global.prometheus.enabled {
        Some(Arc::new(Metrics::new()?))
    } else {
        None
    };

    let mut registry = JobRegistry::new(Arc::clone(&store));
    if let Some(metrics) = &metrics {
        registry = registry.with_metrics(Arc::clone(metrics));
    }
    let registry = Arc::new(registry);

    let strategies = build_strategies(&config)?;
    info!(
        cloud = strategies.cloud.is_some(),
        edge = strategies.edge.is_some(),
        "Strategies configured"
    );
    let policy = SubmissionPolicy {
        allow_file_sources: config.pipeline.allow_file_sources,
    };
    let orchestrator = Arc::new(
        Orchestrator::new(Arc::clone(&registry), strategies).with_submission_policy(policy),
    );

    let mut ingest = WebhookIngest::new(Arc::clone(&registry));
    if let Some(metrics) = &metrics {
        ingest = ingest.with_metrics(Arc::clone(metrics));
    }

    let state = Arc::new(AppState {
        orchestrator,
        ingest: Arc::new(ingest),
        metrics,
        webhook_secret: config.edge.as_ref().and_then(|e| e.webhook_secret.clone()),
    });

    let host = args.host.unwrap_or(config.global.server.host.clone());
    let port = args.port.unwrap_or(config.global.server.port);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(server::serve(state, addr, shutdown.clone()));

    info!("Transcoding orchestrator is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    shutdown.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
        Err(e) => error!(error = %e, "HTTP server task panicked"),
    }

    info!("Shutting down transcoding orchestrator");
    Ok(())
}

/// Opens the configured record store.
async fn open_store(config: &StoreConfig) -> Result<Arc<dyn RecordStore>> {
    Ok(match config {
        StoreConfig::Memory => {
            info!("Using in-memory record store");
            Arc::new(MemoryStore::new())
        }
        StoreConfig::Redis(redis) => {
            let store = RedisStore::new(&redis.url()).await?;
            info!(host = %redis.host, port = redis.port, "Connected to Redis");
            Arc::new(store)
        }
    })
}

/// Builds every strategy the configuration enables.
fn build_strategies(config: &AppConfig) -> Result<Strategies> {
    let objects = Arc::new(FsObjectStore::new(
        &config.storage.output_root,
        &config.storage.public_base_url,
    ));
    let local = Arc::new(
        LocalPipeline::new(
            Arc::new(FfmpegRunner::new(&config.pipeline.ffmpeg_path)),
            objects,
            config.pipeline.clone(),
            &config.global.temp_dir,
        )
        .with_analyzer(Arc::new(FfprobeAnalyzer::new(&config.pipeline.ffprobe_path))),
    );

    let cloud = match &config.cloud {
        Some(cloud) => {
            let interval = Duration::try_from_secs_f64(cloud.poll_interval_seconds)
                .context("Invalid cloud poll interval")?;
            let strategy: Arc<dyn ExecutionStrategy> = Arc::new(CloudStrategy::new(
                Arc::new(HttpCloudVideoService::new(cloud)),
                interval,
                cloud.max_poll_attempts,
                cloud.progress_band,
            ));
            Some(strategy)
        }
        None => None,
    };

    let edge = config.edge.as_ref().map(|edge| {
        let strategy: Arc<dyn ExecutionStrategy> = Arc::new(EdgeStrategy::new(
            Arc::new(HttpEdgeDispatcher::new(edge)),
            &edge.callback_base_url,
        ));
        strategy
    });

    Ok(Strategies {
        cloud,
        cloud_watermarks: config.cloud.as_ref().is_some_and(|c| c.supports_watermarks),
        edge,
        local,
    })
}

/// Validates the configuration file and reports any issues.
fn validate_config(config_path: &Path) -> Result<()> {
    let config = config::load_and_validate(config_path)?;

    println!("Configuration is valid.");
    println!("Record store: {}", match config.global.store {
        StoreConfig::Memory => "memory",
        StoreConfig::Redis(_) => "redis",
    });
    println!("Strategies:");
    println!(
        "  - local (ffmpeg: {}, ffprobe: {}, upscale: {:?})",
        config.pipeline.ffmpeg_path.display(),
        config.pipeline.ffprobe_path.display(),
        config.pipeline.upscale
    );
    if config.pipeline.allow_file_sources {
        println!("    file:// sources are accepted");
    }
    if let Some(cloud) = &config.cloud {
        println!(
            "  - cloud ({}, {} polls every {}s)",
            cloud.api_base, cloud.max_poll_attempts, cloud.poll_interval_seconds
        );
    }
    if let Some(edge) = &config.edge {
        println!("  - edge ({})", edge.dispatch_url);
    }

    Ok(())
}

/// Displays the parsed configuration.
fn show_config(config_path: &Path) -> Result<()> {
    let config = config::load_and_validate(config_path)?;
    let yaml = serde_yaml::to_string(&config)?;
    println!("{}", yaml);
    Ok(())
}

/// Prints the quality preset catalog.
fn list_presets(source_height: Option<u32>) -> Result<()> {
    let presets = match source_height {
        Some(height) => job::presets::recommended_for_height(height),
        None => job::presets::catalog(),
    };

    print_presets(&presets);
    Ok(())
}

fn print_presets(presets: &[job::model::Quality]) {
    for quality in presets {
        println!(
            "  {:<6} {:>9} {:>6} kbps {:>3} fps",
            quality.label,
            quality.resolution(),
            quality.bitrate,
            quality.frame_rate
        );
    }
}

/// Prints what ffprobe reports about a media file and the presets it supports.
async fn analyze(path: &Path, ffprobe: PathBuf) -> Result<()> {
    let info = FfprobeAnalyzer::new(ffprobe)
        .analyze(path, &CancellationToken::new())
        .await
        .with_context(|| format!("Failed to analyze {}", path.display()))?;

    println!("Format:   {}", info.format);
    println!("Duration: {:.2}s", info.duration);
    println!("Size:     {} bytes", info.size);
    println!("Bitrate:  {} kbps", info.bitrate / 1000);
    match &info.video {
        Some(video) => println!(
            "Video:    {} {}x{} @ {}",
            video.codec,
            video.width,
            video.height,
            video
                .fps()
                .map(|fps| format!("{:.2} fps", fps))
                .unwrap_or_else(|| video.frame_rate.clone())
        ),
        None => println!("Video:    none"),
    }
    for audio in &info.audio {
        println!(
            "Audio:    {} {}ch {} Hz",
            audio.codec, audio.channels, audio.sample_rate
        );
    }

    println!("Recommended qualities:");
    print_presets(&info.recommended_qualities());
    Ok(())
}

/// Prints the persisted status of a job.
async fn job_status(config_path: &Path, job_id: &str) -> Result<()> {
    let config = config::load_and_validate(config_path)?;
    let store = open_store(&config.global.store).await?;

    match store.get_job(job_id).await? {
        Some(job) => {
            println!("{}", serde_json::to_string_pretty(&job.snapshot())?);
            if let Some(video) = store.get_video(&job.video_id).await? {
                println!("Video {}: {:?}", job.video_id, video.status);
            }
        }
        None => anyhow::bail!("Job {} not found", job_id),
    }
    Ok(())
}
