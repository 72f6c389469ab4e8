//! Persistence of job, variant, and video rows.

pub mod memory;
pub mod redis;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::job::model::{QualityVariant, TranscodingJob, VideoRecord, VideoUpdate};

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

/// Durable record store for jobs, quality variants, and videos.
///
/// Each call is atomic on its own; no cross-call transaction is assumed.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a new job row.
    async fn insert_job(&self, job: &TranscodingJob) -> Result<(), StoreError>;

    /// Overwrites an existing job row.
    async fn update_job(&self, job: &TranscodingJob) -> Result<(), StoreError>;

    /// Reads a job row.
    async fn get_job(&self, job_id: &str) -> Result<Option<TranscodingJob>, StoreError>;

    /// Removes a job row, if any.
    async fn delete_job(&self, job_id: &str) -> Result<(), StoreError>;

    /// Inserts or replaces the variant for (video id, quality).
    async fn upsert_variant(&self, variant: &QualityVariant) -> Result<(), StoreError>;

    /// Lists the variants of a video.
    async fn list_variants(&self, video_id: &str) -> Result<Vec<QualityVariant>, StoreError>;

    /// Removes the variant for (video id, quality), if any.
    async fn delete_variant(&self, video_id: &str, quality: &str) -> Result<(), StoreError>;

    /// Applies a partial update to a video row, creating it if absent.
    async fn update_video(&self, video_id: &str, update: VideoUpdate) -> Result<(), StoreError>;

    /// Reads a video row.
    async fn get_video(&self, video_id: &str) -> Result<Option<VideoRecord>, StoreError>;
}
