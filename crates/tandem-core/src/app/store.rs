//! JobStateStore - ジョブ状態の正本（source of truth）
//!
//! # 設計
//! - primary map: `JobId -> JobRecord`
//! - secondary index: `tag -> {JobId}`（primary と同じロックの中で更新）
//! - 書き込みは scheduler のみ、読み取りはどのスレッドからでも可
//! - ロック内で await しないので `std::sync::RwLock` を使う
//! - 終端・破棄済みのレコードは `prune` を呼ぶまで残す（遅れて来た observer に最終状態を返すため）

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::{
    ChainError, ChainId, JobId, JobRecord, JobSnapshot, JobSpec, JobState, StateEvent,
};
use crate::observability::StateCounts;
use crate::ports::{Clock, SystemClock};

#[derive(Default)]
struct StoreInner {
    records: HashMap<JobId, JobRecord>,
    by_tag: HashMap<String, BTreeSet<JobId>>,
}

impl StoreInner {
    fn unindex(&mut self, record: &JobRecord) {
        for tag in &record.tags {
            if let Some(ids) = self.by_tag.get_mut(tag) {
                ids.remove(&record.job_id);
                if ids.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
    }
}

pub struct JobStateStore {
    inner: RwLock<StoreInner>,
    clock: Arc<dyn Clock>,
}

impl Default for JobStateStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl JobStateStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            clock,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declare every step of a chain as pending, all or nothing.
    ///
    /// A job id may be reused once its previous record is settled; the old
    /// record is replaced. A live (pending or non-terminal) id is rejected.
    pub fn declare_chain(&self, chain_id: ChainId, specs: &[JobSpec]) -> Result<(), ChainError> {
        let mut inner = self.write();
        for spec in specs {
            if let Some(existing) = inner.records.get(spec.id())
                && !existing.is_settled()
            {
                return Err(ChainError::JobAlreadyLive(spec.id().clone()));
            }
        }

        let now = self.clock.now();
        for spec in specs {
            if let Some(old) = inner.records.remove(spec.id()) {
                inner.unindex(&old);
            }
            for tag in spec.tags() {
                inner
                    .by_tag
                    .entry(tag.clone())
                    .or_default()
                    .insert(spec.id().clone());
            }
            let record = JobRecord::pending(spec.id().clone(), chain_id, spec.tags().clone(), now);
            inner.records.insert(spec.id().clone(), record);
        }
        Ok(())
    }

    /// Write a new state. Returns the event to hand to the notifier.
    pub fn set(&self, job_id: &JobId, next: JobState) -> Result<StateEvent, ChainError> {
        self.set_with(job_id, next, |_| {})
    }

    /// Write a new state and, only if the transition is legal, let `f`
    /// update the record under the same lock.
    pub fn set_with<F>(&self, job_id: &JobId, next: JobState, f: F) -> Result<StateEvent, ChainError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let now = self.clock.now();
        let mut inner = self.write();
        let record = inner
            .records
            .get_mut(job_id)
            .ok_or_else(|| ChainError::UnknownJob(job_id.clone()))?;

        let from = record.state;
        if !record.apply(next, now) {
            return Err(ChainError::InvalidTransition {
                job_id: job_id.clone(),
                from,
                to: next,
            });
        }
        f(record);

        Ok(StateEvent {
            job_id: record.job_id.clone(),
            chain_id: record.chain_id,
            state: next,
            version: record.version,
            tags: record.tags.clone(),
            at: now,
        })
    }

    /// Update a record without a state change (no version bump, no event).
    pub fn touch<F>(&self, job_id: &JobId, f: F) -> Result<(), ChainError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let now = self.clock.now();
        let mut inner = self.write();
        let record = inner
            .records
            .get_mut(job_id)
            .ok_or_else(|| ChainError::UnknownJob(job_id.clone()))?;
        f(record);
        record.updated_at = now;
        Ok(())
    }

    /// Mark a pending record as dropped (a step that will never run).
    ///
    /// The record stays behind as a tombstone: `get` keeps reporting it as
    /// pending and its tags count it as settled. Records that already have a
    /// state are left alone.
    pub fn forget(&self, job_id: &JobId) -> Option<JobRecord> {
        let now = self.clock.now();
        let mut inner = self.write();
        let record = inner.records.get_mut(job_id)?;
        if !record.drop_pending(now) {
            return None;
        }
        Some(record.clone())
    }

    /// Remove settled records of chains for which `keep` is false.
    /// Returns the number of records removed.
    pub fn prune<F>(&self, keep: F) -> usize
    where
        F: Fn(ChainId) -> bool,
    {
        let mut inner = self.write();
        let doomed: Vec<JobId> = inner
            .records
            .values()
            .filter(|r| r.is_settled() && !keep(r.chain_id))
            .map(|r| r.job_id.clone())
            .collect();
        for job_id in &doomed {
            if let Some(record) = inner.records.remove(job_id) {
                inner.unindex(&record);
            }
        }
        doomed.len()
    }

    /// Current state. `None` for unknown jobs and pending chain steps.
    pub fn get(&self, job_id: &JobId) -> Option<JobState> {
        self.read().records.get(job_id).and_then(|r| r.state)
    }

    /// Snapshot of a live or finished job. Dropped steps have none.
    pub fn snapshot(&self, job_id: &JobId) -> Option<JobSnapshot> {
        self.read()
            .records
            .get(job_id)
            .filter(|r| !r.dropped)
            .map(JobRecord::snapshot)
    }

    /// Jobs carrying `tag` that have a state, queried fresh on every call.
    pub fn get_by_tag(&self, tag: &str) -> Vec<(JobId, JobState)> {
        let inner = self.read();
        inner
            .by_tag
            .get(tag)
            .into_iter()
            .flatten()
            .filter_map(|id| {
                let state = inner.records.get(id)?.state?;
                Some((id.clone(), state))
            })
            .collect()
    }

    /// Events describing the current state of every stated job under `tag`.
    pub(crate) fn tag_snapshot_events(&self, tag: &str) -> Vec<StateEvent> {
        let inner = self.read();
        inner
            .by_tag
            .get(tag)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.records.get(id))
            .filter_map(event_for)
            .collect()
    }

    pub(crate) fn snapshot_event(&self, job_id: &JobId) -> Option<StateEvent> {
        self.read().records.get(job_id).and_then(event_for)
    }

    pub(crate) fn is_dropped(&self, job_id: &JobId) -> bool {
        self.read().records.get(job_id).is_some_and(|r| r.dropped)
    }

    /// Does any record carry `tag`?
    pub(crate) fn tag_known(&self, tag: &str) -> bool {
        self.read().by_tag.contains_key(tag)
    }

    /// Is every job under `tag` terminal or dropped? A tag with no jobs is settled.
    pub fn tag_settled(&self, tag: &str) -> bool {
        let inner = self.read();
        inner.by_tag.get(tag).into_iter().flatten().all(|id| {
            inner
                .records
                .get(id)
                .is_none_or(JobRecord::is_settled)
        })
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for record in self.read().records.values() {
            match record.state {
                None if record.dropped => counts.dropped += 1,
                None => counts.pending += 1,
                Some(JobState::Enqueued) => counts.enqueued += 1,
                Some(JobState::Blocked) => counts.blocked += 1,
                Some(JobState::Running) => counts.running += 1,
                Some(JobState::Succeeded) => counts.succeeded += 1,
                Some(JobState::Failed) => counts.failed += 1,
                Some(JobState::Cancelled) => counts.cancelled += 1,
            }
        }
        counts
    }
}

fn event_for(record: &JobRecord) -> Option<StateEvent> {
    Some(StateEvent {
        job_id: record.job_id.clone(),
        chain_id: record.chain_id,
        state: record.state?,
        version: record.version,
        tags: record.tags.clone(),
        at: record.updated_at,
    })
}
