//! Strategy selection.

use super::StrategyKind;
use crate::job::model::TranscodingJob;

/// Which remote strategies this process can use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrategyAvailability {
    /// Managed cloud video service is configured.
    pub cloud: bool,
    /// The managed service accepts watermark assets.
    pub cloud_watermarks: bool,
    /// Edge worker is configured.
    pub edge: bool,
}

/// Picks the strategy for a job. Evaluated once, at submission.
///
/// Cloud is chosen when a streaming manifest is wanted (manifest format or
/// `generate_manifest`) and there is no watermark (unless the
/// service supports watermarks); otherwise edge if configured; otherwise
/// the local pipeline.
pub fn select_strategy(job: &TranscodingJob, available: &StrategyAvailability) -> StrategyKind {
    let watermark_ok = job.options.watermark.is_none() || available.cloud_watermarks;
    if available.cloud && job.wants_manifest() && watermark_ok {
        return StrategyKind::Cloud;
    }
    if available.edge {
        return StrategyKind::Edge;
    }
    StrategyKind::Local
}
