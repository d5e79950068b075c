//! State - ジョブと chain の状態
//!
//! # 状態遷移（JobState）
//! - Enqueued -> Running (制約なし、または満たされている)
//! - Enqueued -> Blocked (制約が満たされていない)
//! - Blocked <-> Running (制約の再評価、retry 時)
//! - Running -> Succeeded | Failed
//! - 非終端状態 -> Cancelled
//!
//! 終端状態（Succeeded / Failed / Cancelled）からの遷移はありません。

use serde::{Deserialize, Serialize};

/// Lifecycle state of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Enqueued,
    Blocked,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    /// Is `self -> next` a legal transition?
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (from, Cancelled) => !from.is_terminal(),
            (Enqueued, Blocked | Running) => true,
            (Blocked, Running) => true,
            (Running, Blocked | Succeeded | Failed) => true,
            // blocked_timeout で Blocked のまま諦める
            (Blocked, Failed) => true,
            _ => false,
        }
    }
}

/// Aggregated state of one chain run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    /// At least one step has not finished yet.
    Running,

    /// Every step succeeded.
    Succeeded,

    /// A step failed; later steps never ran.
    Failed,

    /// The chain was cancelled by a caller.
    Cancelled,
}

impl ChainState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ChainState::Running)
    }
}
