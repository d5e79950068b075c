//! Observability - store の集計ビュー

use serde::{Deserialize, Serialize};

/// Number of jobs per state, as held by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    /// Declared chain steps that were not enqueued yet.
    pub pending: usize,
    /// Pending steps dropped because their chain stopped first.
    pub dropped: usize,
    pub enqueued: usize,
    pub blocked: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}
