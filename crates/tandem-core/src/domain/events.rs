//! Events - 状態遷移イベント
//!
//! store に書き込まれた遷移ひとつにつき `StateEvent` がひとつ作られ、
//! notifier から observer へ配送されます。

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ChainId, JobId};
use super::state::JobState;

/// One state transition as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEvent {
    pub job_id: JobId,
    pub chain_id: ChainId,
    pub state: JobState,

    /// Record version after the write; strictly increasing per job.
    pub version: u64,

    pub tags: BTreeSet<String>,
    pub at: DateTime<Utc>,
}

impl StateEvent {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
