//! Redis-backed record store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::RecordStore;
use crate::error::StoreError;
use crate::job::model::{QualityVariant, TranscodingJob, VideoRecord, VideoStatus, VideoUpdate};

const JOB_PREFIX: &str = "transcode:job:";
const VARIANTS_PREFIX: &str = "transcode:variants:";
const VIDEO_PREFIX: &str = "transcode:video:";

/// Stores rows in Redis.
///
/// Variants live in one hash per video, keyed by quality label, so a
/// (video id, quality) pair can only ever hold one row. Videos are hashes
/// too, one field per column, and an update only writes the fields it sets.
#[derive(Clone)]
pub struct RedisStore {
    connection: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Connects to the specified Redis URL.
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(|e| StoreError::ConnectionFailed {
            url: redis_url.to_string(),
            message: e.to_string(),
        })?;

        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                url: redis_url.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self { connection })
    }

    async fn write_job(&self, job: &TranscodingJob) -> Result<(), StoreError> {
        let json = serde_json::to_string(job)?;
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(format!("{}{}", JOB_PREFIX, job.id), json)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for RedisStore {
    async fn insert_job(&self, job: &TranscodingJob) -> Result<(), StoreError> {
        self.write_job(job).await
    }

    async fn update_job(&self, job: &TranscodingJob) -> Result<(), StoreError> {
        self.write_job(job).await
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<TranscodingJob>, StoreError> {
        let mut conn = self.connection.clone();
        let json: Option<String> = conn.get(format!("{}{}", JOB_PREFIX, job_id)).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(format!("{}{}", JOB_PREFIX, job_id)).await?;
        Ok(())
    }

    async fn upsert_variant(&self, variant: &QualityVariant) -> Result<(), StoreError> {
        let key = format!("{}{}", VARIANTS_PREFIX, variant.video_id);
        let mut conn = self.connection.clone();

        let existing: Option<String> = conn.hget(&key, &variant.quality).await?;
        let mut row = variant.clone();
        if let Some(existing) = existing {
            let existing: QualityVariant = serde_json::from_str(&existing)?;
            row.created_at = existing.created_at;
        }
        row.updated_at = Utc::now();

        let json = serde_json::to_string(&row)?;
        conn.hset::<_, _, _, ()>(&key, &row.quality, json).await?;
        Ok(())
    }

    async fn list_variants(&self, video_id: &str) -> Result<Vec<QualityVariant>, StoreError> {
        let mut conn = self.connection.clone();
        let rows: HashMap<String, String> =
            conn.hgetall(format!("{}{}", VARIANTS_PREFIX, video_id)).await?;

        let mut variants = rows
            .values()
            .map(|json| serde_json::from_str::<QualityVariant>(json))
            .collect::<Result<Vec<_>, _>>()?;
        variants.sort_by_key(|v| v.created_at);
        Ok(variants)
    }

    async fn delete_variant(&self, video_id: &str, quality: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        conn.hdel::<_, _, ()>(format!("{}{}", VARIANTS_PREFIX, video_id), quality)
            .await?;
        Ok(())
    }

    async fn update_video(&self, video_id: &str, update: VideoUpdate) -> Result<(), StoreError> {
        let key = format!("{}{}", VIDEO_PREFIX, video_id);
        let write = VideoWrite::from_update(video_id, update, Utc::now())?;

        let mut pipe = redis::pipe();
        pipe.atomic().hset_multiple(&key, &write.set).ignore();
        if !write.clear.is_empty() {
            pipe.hdel(&key, &write.clear).ignore();
        }
        let mut conn = self.connection.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn get_video(&self, video_id: &str) -> Result<Option<VideoRecord>, StoreError> {
        let mut conn = self.connection.clone();
        let fields: HashMap<String, String> =
            conn.hgetall(format!("{}{}", VIDEO_PREFIX, video_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        video_from_fields(video_id, &fields).map(Some)
    }
}

/// Field writes for one video update.
#[derive(Debug, PartialEq)]
struct VideoWrite {
    set: Vec<(&'static str, String)>,
    clear: Vec<&'static str>,
}

impl VideoWrite {
    /// Mirrors `VideoUpdate::apply` field by field.
    fn from_update(
        video_id: &str,
        update: VideoUpdate,
        now: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let mut set = vec![("id", video_id.to_string())];
        let mut clear = Vec::new();

        if let Some(status) = update.status {
            set.push(("status", enum_field(&status)?));
            if status != VideoStatus::Failed {
                clear.push("error");
            }
        }
        if let Some(error) = update.error {
            clear.retain(|f| *f != "error");
            set.push(("error", error));
        }
        if let Some(artifacts) = update.artifacts {
            if !artifacts.thumbnails.is_empty() {
                set.push(("thumbnails", serde_json::to_string(&artifacts.thumbnails)?));
            }
            if let Some(url) = artifacts.thumbnail_url {
                set.push(("thumbnailUrl", url));
            }
            if let Some(url) = artifacts.preview_url {
                set.push(("previewUrl", url));
            }
            if let Some(url) = artifacts.manifest_url {
                set.push(("manifestUrl", url));
            }
            if let Some(format) = artifacts.format {
                set.push(("format", enum_field(&format)?));
            }
        }
        set.push(("updatedAt", now.to_rfc3339()));
        Ok(Self { set, clear })
    }
}

fn video_from_fields(
    video_id: &str,
    fields: &HashMap<String, String>,
) -> Result<VideoRecord, StoreError> {
    let text = |name: &str| fields.get(name).cloned();

    Ok(VideoRecord {
        id: video_id.to_string(),
        status: match fields.get("status") {
            Some(status) => parse_enum(status)?,
            None => VideoStatus::default(),
        },
        thumbnails: match fields.get("thumbnails") {
            Some(json) => serde_json::from_str(json)?,
            None => Vec::new(),
        },
        thumbnail_url: text("thumbnailUrl"),
        preview_url: text("previewUrl"),
        manifest_url: text("manifestUrl"),
        format: fields.get("format").map(|f| parse_enum(f)).transpose()?,
        error: text("error"),
        updated_at: fields
            .get("updatedAt")
            .map(|at| {
                DateTime::parse_from_rfc3339(at)
                    .map(|at| at.with_timezone(&Utc))
                    .map_err(|e| StoreError::SerializationFailed(e.to_string()))
            })
            .transpose()?,
    })
}

/// Serializes a unit enum to its bare wire name.
fn enum_field<T: Serialize>(value: &T) -> Result<String, StoreError> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(name) => Ok(name),
        other => Ok(other.to_string()),
    }
}

fn parse_enum<T: DeserializeOwned>(name: &str) -> Result<T, StoreError> {
    Ok(serde_json::from_value(serde_json::Value::String(name.to_string()))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::{OutputFormat, VideoArtifacts};

    fn fields(write: &VideoWrite) -> HashMap<String, String> {
        write
            .set
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn updates_write_only_the_fields_they_set() {
        let now = Utc::now();
        let write = VideoWrite::from_update("v1", VideoUpdate::processing(), now).unwrap();
        let names: Vec<_> = write.set.iter().map(|(k, _)| *k).collect();
        assert_eq!(names, vec!["id", "status", "updatedAt"]);
        assert_eq!(write.clear, vec!["error"]);

        let ready = VideoUpdate::ready(VideoArtifacts {
            manifest_url: Some("https://cdn/master.m3u8".to_string()),
            format: Some(OutputFormat::Manifest),
            ..Default::default()
        });
        let write = VideoWrite::from_update("v1", ready, now).unwrap();
        let names: Vec<_> = write.set.iter().map(|(k, _)| *k).collect();
        assert_eq!(names, vec!["id", "status", "manifestUrl", "format", "updatedAt"]);
        assert!(!names.contains(&"previewUrl"));
        assert!(!names.contains(&"thumbnails"));
    }

    #[test]
    fn failure_sets_the_reason_instead_of_clearing_it() {
        let write =
            VideoWrite::from_update("v1", VideoUpdate::failed("boom".to_string()), Utc::now())
                .unwrap();
        assert!(write.clear.is_empty());
        assert!(write.set.contains(&("status", "failed".to_string())));
        assert!(write.set.contains(&("error", "boom".to_string())));
    }

    #[test]
    fn hash_fields_read_back_into_a_record() {
        let now = Utc::now();
        let mut stored = fields(
            &VideoWrite::from_update(
                "v1",
                VideoUpdate::ready(VideoArtifacts {
                    thumbnails: vec!["https://cdn/t0.jpg".to_string()],
                    thumbnail_url: Some("https://cdn/t0.jpg".to_string()),
                    format: Some(OutputFormat::Single),
                    ..Default::default()
                }),
                now,
            )
            .unwrap(),
        );
        // A concurrent writer adds the preview without touching anything else.
        stored.insert("previewUrl".to_string(), "https://cdn/preview.mp4".to_string());

        let video = video_from_fields("v1", &stored).unwrap();
        assert_eq!(video.status, VideoStatus::Ready);
        assert_eq!(video.thumbnails, vec!["https://cdn/t0.jpg".to_string()]);
        assert_eq!(video.preview_url.as_deref(), Some("https://cdn/preview.mp4"));
        assert_eq!(video.format, Some(OutputFormat::Single));
        assert!(video.error.is_none());
        assert_eq!(
            video.updated_at.map(|at| at.timestamp_millis()),
            Some(now.timestamp_millis())
        );
    }
}
