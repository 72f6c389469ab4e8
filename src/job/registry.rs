//! Job registry: the owner of the job lifecycle state machine.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::model::{JobStatus, ProgressSnapshot, TranscodingJob, VideoArtifacts, VideoUpdate};
use crate::error::StoreError;
use crate::server::metrics::Metrics;
use crate::store::RecordStore;

/// One tracked job.
struct Entry {
    job: Mutex<TranscodingJob>,
    /// Registered by this instance rather than adopted from the store.
    registered_here: bool,
}

impl Entry {
    fn new(job: TranscodingJob, registered_here: bool) -> Arc<Self> {
        Arc::new(Self {
            job: Mutex::new(job),
            registered_here,
        })
    }
}

/// Tracks in-flight jobs in memory and persists every transition.
///
/// Entries are evicted once a job is terminal; the record store is the
/// fallback for anything not held in memory. Each entry has its own lock,
/// so writers for one job never block writers for another.
pub struct JobRegistry {
    entries: RwLock<HashMap<String, Arc<Entry>>>,
    store: Arc<dyn RecordStore>,
    metrics: Option<Arc<Metrics>>,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The durable store behind this registry.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Persists a new queued job and starts tracking it.
    ///
    /// The job row is written before the video is flagged as processing.
    /// If flagging the video fails the job row is removed again, so a
    /// rejected submission never leaves a queued row behind.
    pub async fn register(&self, job: TranscodingJob) -> Result<(), StoreError> {
        self.store.insert_job(&job).await?;
        if let Err(e) = self
            .store
            .update_video(&job.video_id, VideoUpdate::processing())
            .await
        {
            warn!(job_id = %job.id, error = %e, "Failed to flag video, removing job row");
            if let Err(cleanup) = self.store.delete_job(&job.id).await {
                error!(job_id = %job.id, error = %cleanup, "Failed to remove orphaned job row");
            }
            return Err(e);
        }

        if let Some(metrics) = &self.metrics {
            metrics.job_started(job.strategy);
        }

        info!(job_id = %job.id, video_id = %job.video_id, "Job queued");
        self.entries
            .write()
            .await
            .insert(job.id.clone(), Entry::new(job, true));
        Ok(())
    }

    /// Returns the status of a job, from memory first, then from the store.
    pub async fn get_status(&self, job_id: &str) -> Result<Option<ProgressSnapshot>, StoreError> {
        let entry = self.entries.read().await.get(job_id).cloned();
        if let Some(entry) = entry {
            return Ok(Some(entry.job.lock().await.snapshot()));
        }
        Ok(self.store.get_job(job_id).await?.map(|job| job.snapshot()))
    }

    /// Returns a copy of a job that is not yet terminal.
    pub async fn active_job(&self, job_id: &str) -> Result<Option<TranscodingJob>, StoreError> {
        match self.entry(job_id).await? {
            Some(entry) => {
                let job = entry.job.lock().await;
                Ok((!job.status.is_terminal()).then(|| job.clone()))
            }
            None => Ok(None),
        }
    }

    /// Moves a queued job into processing.
    pub async fn mark_processing(&self, job_id: &str) -> Result<bool, StoreError> {
        let Some(entry) = self.entry(job_id).await? else {
            return Ok(false);
        };
        let mut job = entry.job.lock().await;
        if job.status != JobStatus::Queued {
            return Ok(false);
        }
        job.start();
        self.store.update_job(&job).await?;
        info!(job_id = %job.id, strategy = ?job.strategy, "Job processing");
        Ok(true)
    }

    /// Records progress for a job.
    ///
    /// Unknown and terminal jobs are ignored, which absorbs late or
    /// duplicate webhook deliveries.
    pub async fn on_progress(
        &self,
        job_id: &str,
        percent: u8,
        current_quality: Option<String>,
    ) -> Result<bool, StoreError> {
        let Some(entry) = self.entry(job_id).await? else {
            debug!(job_id, "Ignoring progress for unknown job");
            return Ok(false);
        };
        let mut job = entry.job.lock().await;
        if percent < job.progress {
            debug!(job_id, percent, current = job.progress, "Ignoring progress regression");
        }
        if !job.update_progress(percent, current_quality) {
            debug!(job_id, "Ignoring progress for terminal job");
            return Ok(false);
        }
        self.store.update_job(&job).await?;
        Ok(true)
    }

    /// Terminal success. A no-op if the job is unknown or already terminal.
    pub async fn mark_completed(
        &self,
        job_id: &str,
        artifacts: VideoArtifacts,
    ) -> Result<bool, StoreError> {
        let Some(entry) = self.entry(job_id).await? else {
            return Ok(false);
        };
        let mut job = entry.job.lock().await;
        if job.status.is_terminal() {
            return Ok(false);
        }

        job.complete();
        self.store.update_job(&job).await?;
        self.store
            .update_video(&job.video_id, VideoUpdate::ready(artifacts))
            .await?;

        if let Some(metrics) = &self.metrics {
            metrics.job_finished(&job, entry.registered_here);
        }
        info!(job_id = %job.id, video_id = %job.video_id, "Job completed");
        drop(job);

        self.evict(job_id).await;
        Ok(true)
    }

    /// Terminal failure. A no-op if the job is unknown or already terminal.
    pub async fn mark_failed(&self, job_id: &str, reason: &str) -> Result<bool, StoreError> {
        let Some(entry) = self.entry(job_id).await? else {
            return Ok(false);
        };
        let mut job = entry.job.lock().await;
        if job.status.is_terminal() {
            return Ok(false);
        }

        job.fail(reason.to_string());
        self.store.update_job(&job).await?;
        self.store
            .update_video(&job.video_id, VideoUpdate::failed(reason.to_string()))
            .await?;

        if let Some(metrics) = &self.metrics {
            metrics.job_finished(&job, entry.registered_here);
        }
        warn!(job_id = %job.id, video_id = %job.video_id, reason, "Job failed");
        drop(job);

        self.evict(job_id).await;
        Ok(true)
    }

    /// Number of jobs currently held in memory.
    pub async fn in_flight(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns the in-memory entry, adopting a non-terminal row from the
    /// store when another instance created the job.
    async fn entry(&self, job_id: &str) -> Result<Option<Arc<Entry>>, StoreError> {
        if let Some(entry) = self.entries.read().await.get(job_id) {
            return Ok(Some(Arc::clone(entry)));
        }

        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(None);
        };
        if job.status.is_terminal() {
            return Ok(None);
        }

        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(job_id.to_string())
            .or_insert_with(|| Entry::new(job, false));
        Ok(Some(Arc::clone(entry)))
    }

    async fn evict(&self, job_id: &str) {
        self.entries.write().await.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::job::model::{
        OutputFormat, Quality, QualityVariant, TranscodingOptions, VideoRecord, VideoStatus,
    };
    use crate::store::MemoryStore;

    /// Memory store whose video writes always fail.
    #[derive(Default)]
    struct BrokenVideos(MemoryStore);

    #[async_trait]
    impl RecordStore for BrokenVideos {
        async fn insert_job(&self, job: &TranscodingJob) -> Result<(), StoreError> {
            self.0.insert_job(job).await
        }
        async fn update_job(&self, job: &TranscodingJob) -> Result<(), StoreError> {
            self.0.update_job(job).await
        }
        async fn get_job(&self, job_id: &str) -> Result<Option<TranscodingJob>, StoreError> {
            self.0.get_job(job_id).await
        }
        async fn delete_job(&self, job_id: &str) -> Result<(), StoreError> {
            self.0.delete_job(job_id).await
        }
        async fn upsert_variant(&self, variant: &QualityVariant) -> Result<(), StoreError> {
            self.0.upsert_variant(variant).await
        }
        async fn list_variants(&self, video_id: &str) -> Result<Vec<QualityVariant>, StoreError> {
            self.0.list_variants(video_id).await
        }
        async fn delete_variant(&self, video_id: &str, quality: &str) -> Result<(), StoreError> {
            self.0.delete_variant(video_id, quality).await
        }
        async fn update_video(&self, _video_id: &str, _update: VideoUpdate) -> Result<(), StoreError> {
            Err(StoreError::Backend("videos table unavailable".to_string()))
        }
        async fn get_video(&self, video_id: &str) -> Result<Option<VideoRecord>, StoreError> {
            self.0.get_video(video_id).await
        }
    }

    fn job() -> TranscodingJob {
        TranscodingJob::new(
            "video-1".to_string(),
            "https://cdn.example.com/in.mp4".to_string(),
            OutputFormat::Single,
            vec![Quality::new("360p", 640, 360, 800, 30)],
            TranscodingOptions::default(),
        )
    }

    async fn registry_with_job() -> (JobRegistry, Arc<MemoryStore>, String) {
        let store = Arc::new(MemoryStore::new());
        let registry = JobRegistry::new(store.clone());
        let job = job();
        let id = job.id.clone();
        registry.register(job).await.unwrap();
        (registry, store, id)
    }

    #[tokio::test]
    async fn register_persists_queued_row_and_flags_video() {
        let (registry, store, id) = registry_with_job().await;

        let snapshot = registry.get_status(&id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, JobStatus::Queued);
        assert_eq!(snapshot.progress, 0);

        let video = store.get_video("video-1").await.unwrap().unwrap();
        assert_eq!(video.status, VideoStatus::Processing);
    }

    #[tokio::test]
    async fn progress_reads_are_non_decreasing() {
        let (registry, _store, id) = registry_with_job().await;
        registry.mark_processing(&id).await.unwrap();

        let mut last = 0;
        for percent in [10, 35, 20, 60, 59, 90] {
            registry.on_progress(&id, percent, None).await.unwrap();
            let snapshot = registry.get_status(&id).await.unwrap().unwrap();
            assert!(snapshot.progress >= last);
            last = snapshot.progress;
        }
        assert_eq!(last, 90);
    }

    #[tokio::test]
    async fn terminal_transitions_are_idempotent() {
        let (registry, store, id) = registry_with_job().await;

        assert!(registry.mark_failed(&id, "first").await.unwrap());
        let before = registry.get_status(&id).await.unwrap().unwrap();

        assert!(!registry.mark_failed(&id, "second").await.unwrap());
        assert!(!registry.mark_completed(&id, VideoArtifacts::default()).await.unwrap());
        assert!(!registry.on_progress(&id, 99, None).await.unwrap());

        let after = registry.get_status(&id).await.unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(after.error.as_deref(), Some("first"));

        let video = store.get_video("video-1").await.unwrap().unwrap();
        assert_eq!(video.status, VideoStatus::Failed);
        assert_eq!(video.error.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn status_falls_back_to_store_after_eviction() {
        let (registry, _store, id) = registry_with_job().await;
        registry.mark_completed(&id, VideoArtifacts::default()).await.unwrap();

        assert_eq!(registry.in_flight().await, 0);
        let snapshot = registry.get_status(&id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.progress, 100);
    }

    #[tokio::test]
    async fn unknown_jobs_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let registry = JobRegistry::new(store);
        assert!(!registry.on_progress("missing", 50, None).await.unwrap());
        assert!(!registry.mark_failed("missing", "x").await.unwrap());
        assert!(registry.get_status("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn adopts_active_rows_created_elsewhere() {
        let store = Arc::new(MemoryStore::new());
        let job = job();
        let id = job.id.clone();
        store.insert_job(&job).await.unwrap();

        let registry = JobRegistry::new(store);
        assert!(registry.on_progress(&id, 40, Some("360p".to_string())).await.unwrap());
        let snapshot = registry.get_status(&id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, JobStatus::Processing);
        assert_eq!(snapshot.progress, 40);
    }

    #[tokio::test]
    async fn failed_video_flag_leaves_no_orphaned_job_row() {
        let store = Arc::new(BrokenVideos::default());
        let registry = JobRegistry::new(store.clone());
        let job = job();
        let id = job.id.clone();

        let err = registry.register(job).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(store.get_job(&id).await.unwrap().is_none());
        assert_eq!(store.0.job_count().await, 0);
        assert_eq!(registry.in_flight().await, 0);
    }

    #[tokio::test]
    async fn in_flight_gauge_counts_only_jobs_registered_here() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let registry = JobRegistry::new(store.clone()).with_metrics(Arc::clone(&metrics));

        let adopted = job();
        store.insert_job(&adopted).await.unwrap();
        let local = job();
        registry.register(local.clone()).await.unwrap();
        assert_eq!(metrics.jobs_in_flight.get(), 1.0);

        assert!(registry.mark_failed(&adopted.id, "worker lost").await.unwrap());
        assert_eq!(metrics.jobs_in_flight.get(), 1.0);

        assert!(registry.mark_completed(&local.id, VideoArtifacts::default()).await.unwrap());
        assert_eq!(metrics.jobs_in_flight.get(), 0.0);
    }
}
