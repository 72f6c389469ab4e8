//! Transcoding jobs, quality presets, and the job registry.

pub mod model;
pub mod presets;
pub mod registry;

pub use model::{
    JobStatus, JobSubmission, OutputFormat, ProgressSnapshot, Quality, QualityVariant,
    TranscodingJob, TranscodingOptions, VideoArtifacts,
};
pub use registry::JobRegistry;
