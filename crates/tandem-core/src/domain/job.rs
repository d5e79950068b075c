//! Job record: the store's single source of truth for one job.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ChainId, JobId};
use super::spec::Payload;
use super::state::JobState;

/// Metadata + current state for a job in the store.
///
/// Design:
/// - `state == None` means declared but not enqueued yet (a pending chain step).
/// - `dropped` marks a pending step whose chain stopped before reaching it.
///   The record stays as a tombstone so late observers can tell it will never run.
/// - State changes go through [`JobRecord::apply`], which enforces the
///   transition table and bumps `version`.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: JobId,
    pub chain_id: ChainId,
    pub tags: BTreeSet<String>,
    pub state: Option<JobState>,

    /// Bumped on every state write. Observers use it to drop stale replays.
    pub version: u64,

    /// Number of executions started (including the current one if Running).
    pub attempts: u32,

    /// Result payload of a successful execution.
    pub output: Option<Payload>,

    /// Last failure / retry reason.
    pub last_error: Option<String>,

    /// Pending step that will never run. Only set while `state == None`.
    pub dropped: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn pending(
        job_id: JobId,
        chain_id: ChainId,
        tags: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            chain_id,
            tags,
            state: None,
            version: 0,
            attempts: 0,
            output: None,
            last_error: None,
            dropped: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a transition. Returns false (and changes nothing) if illegal.
    pub fn apply(&mut self, next: JobState, now: DateTime<Utc>) -> bool {
        let legal = match self.state {
            None if self.dropped => false,
            None => matches!(next, JobState::Enqueued | JobState::Cancelled),
            Some(current) => current.can_transition_to(next),
        };
        if !legal {
            return false;
        }
        self.state = Some(next);
        self.version += 1;
        self.updated_at = now;
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_some_and(JobState::is_terminal)
    }

    /// Mark a pending step as never going to run. No-op once it has a state.
    pub fn drop_pending(&mut self, now: DateTime<Utc>) -> bool {
        if self.state.is_some() {
            return false;
        }
        self.dropped = true;
        self.updated_at = now;
        true
    }

    /// Terminal, or dropped before it started: no further events will follow.
    pub fn is_settled(&self) -> bool {
        self.dropped || self.is_terminal()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id.clone(),
            chain_id: self.chain_id,
            state: self.state,
            version: self.version,
            attempts: self.attempts,
            tags: self.tags.clone(),
            output: self.output.clone(),
            last_error: self.last_error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Serializable view of a [`JobRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub chain_id: ChainId,
    /// `None` while the job is a pending chain step.
    pub state: Option<JobState>,
    pub version: u64,
    pub attempts: u32,
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
