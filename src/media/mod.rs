//! Source retrieval and analysis, output publishing and streaming manifests.

pub mod analysis;
pub mod download;
pub mod manifest;
pub mod storage;

pub use analysis::{FfprobeAnalyzer, MediaAnalyzer, SourceInfo};
pub use download::fetch_source;
pub use manifest::master_playlist;
pub use storage::{FsObjectStore, ObjectStore, StoredObject};
