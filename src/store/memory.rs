//! In-process record store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::RecordStore;
use crate::error::StoreError;
use crate::job::model::{QualityVariant, TranscodingJob, VideoRecord, VideoUpdate};

/// Record store backed by in-memory maps.
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<String, TranscodingJob>>,
    /// video id -> quality label -> variant
    variants: RwLock<HashMap<String, HashMap<String, QualityVariant>>>,
    videos: RwLock<HashMap<String, VideoRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of job rows held.
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_job(&self, job: &TranscodingJob) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &TranscodingJob) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<TranscodingJob>, StoreError> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), StoreError> {
        self.jobs.write().await.remove(job_id);
        Ok(())
    }

    async fn upsert_variant(&self, variant: &QualityVariant) -> Result<(), StoreError> {
        let mut variants = self.variants.write().await;
        let by_quality = variants.entry(variant.video_id.clone()).or_default();

        let mut row = variant.clone();
        if let Some(existing) = by_quality.get(&variant.quality) {
            row.created_at = existing.created_at;
        }
        row.updated_at = Utc::now();
        by_quality.insert(row.quality.clone(), row);
        Ok(())
    }

    async fn list_variants(&self, video_id: &str) -> Result<Vec<QualityVariant>, StoreError> {
        let variants = self.variants.read().await;
        let mut rows: Vec<_> = variants
            .get(video_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by_key(|v| v.created_at);
        Ok(rows)
    }

    async fn delete_variant(&self, video_id: &str, quality: &str) -> Result<(), StoreError> {
        if let Some(by_quality) = self.variants.write().await.get_mut(video_id) {
            by_quality.remove(quality);
        }
        Ok(())
    }

    async fn update_video(&self, video_id: &str, update: VideoUpdate) -> Result<(), StoreError> {
        let mut videos = self.videos.write().await;
        let video = videos.entry(video_id.to_string()).or_insert_with(|| VideoRecord {
            id: video_id.to_string(),
            ..Default::default()
        });
        update.apply(video);
        Ok(())
    }

    async fn get_video(&self, video_id: &str) -> Result<Option<VideoRecord>, StoreError> {
        Ok(self.videos.read().await.get(video_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::VideoStatus;

    fn variant(url: &str) -> QualityVariant {
        QualityVariant::new("video-1", "720p".to_string(), 1280, 720, 2800, 1024, url.to_string())
    }

    #[tokio::test]
    async fn upsert_replaces_url_without_duplicating() {
        let store = MemoryStore::new();
        store.upsert_variant(&variant("https://cdn/old.mp4")).await.unwrap();
        store.upsert_variant(&variant("https://cdn/new.mp4")).await.unwrap();

        let rows = store.list_variants("video-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].url, "https://cdn/new.mp4");
        assert!(rows[0].updated_at >= rows[0].created_at);
    }

    #[tokio::test]
    async fn delete_variant_removes_only_that_quality() {
        let store = MemoryStore::new();
        store.upsert_variant(&variant("https://cdn/720.mp4")).await.unwrap();
        let mut other = variant("https://cdn/360.mp4");
        other.quality = "360p".to_string();
        store.upsert_variant(&other).await.unwrap();

        store.delete_variant("video-1", "720p").await.unwrap();
        let rows = store.list_variants("video-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quality, "360p");
    }

    #[tokio::test]
    async fn update_video_creates_missing_row() {
        let store = MemoryStore::new();
        store.update_video("video-9", VideoUpdate::processing()).await.unwrap();
        let video = store.get_video("video-9").await.unwrap().unwrap();
        assert_eq!(video.status, VideoStatus::Processing);
    }
}
