//! StateNotifier - 状態遷移の fan-out
//!
//! # 設計
//! - observer ごとに unbounded mpsc キューを持つ（配送が scheduler を止めない、取りこぼさない）
//! - 登録時に現在の状態をまず送る（遅れて登録しても終端状態を見逃さない）
//! - 終端状態を送ったら identity 向けの sender を drop してストリームを閉じる
//! - tag 向けのストリームは tag 配下のジョブがすべて終端（または破棄済み）になったら閉じる
//! - 破棄済みの step を後から購読すると、すぐに閉じたストリームを返す
//! - 受信側が drop した sender は publish 時か `prune_closed` で掃除する
//! - 登録時の snapshot と publish が重なった場合の重複は `StateStream` が version で捨てる

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;

use super::store::JobStateStore;
use crate::domain::{JobId, StateEvent};

type Sender = mpsc::UnboundedSender<StateEvent>;

#[derive(Default)]
struct Observers {
    by_job: HashMap<JobId, Vec<Sender>>,
    by_tag: HashMap<String, Vec<Sender>>,
}

pub struct StateNotifier {
    store: Arc<JobStateStore>,
    observers: Mutex<Observers>,
}

impl StateNotifier {
    pub fn new(store: Arc<JobStateStore>) -> Self {
        Self {
            store,
            observers: Mutex::new(Observers::default()),
        }
    }

    fn observers(&self) -> MutexGuard<'_, Observers> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stream of transitions for one job, starting with its current state.
    ///
    /// The stream ends after the job's terminal state, or at once for a step
    /// that was dropped. A job that is unknown or still pending yields
    /// nothing until it is enqueued.
    pub fn observe(&self, job_id: impl Into<JobId>) -> StateStream {
        let job_id = job_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut observers = self.observers();

        if self.store.is_dropped(&job_id) {
            return StateStream::new(rx);
        }
        if let Some(current) = self.store.snapshot_event(&job_id) {
            let terminal = current.is_terminal();
            let _ = tx.send(current);
            if terminal {
                return StateStream::new(rx);
            }
        }
        observers.by_job.entry(job_id).or_default().push(tx);
        StateStream::new(rx)
    }

    /// Stream of `(job, state)` transitions for every job carrying `tag`.
    ///
    /// Starts with the current state of each tagged job. Ends once every job
    /// under the tag is terminal or dropped.
    pub fn observe_tag(&self, tag: impl Into<String>) -> StateStream {
        let tag = tag.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut observers = self.observers();

        for event in self.store.tag_snapshot_events(&tag) {
            let _ = tx.send(event);
        }
        if self.store.tag_known(&tag) && self.store.tag_settled(&tag) {
            return StateStream::new(rx);
        }
        observers.by_tag.entry(tag).or_default().push(tx);
        StateStream::new(rx)
    }

    /// Deliver one transition that was already written to the store.
    pub fn publish(&self, event: &StateEvent) {
        let mut observers = self.observers();
        let terminal = event.is_terminal();

        if let Some(senders) = observers.by_job.get_mut(&event.job_id) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
            if terminal || senders.is_empty() {
                observers.by_job.remove(&event.job_id);
            }
        }

        for tag in &event.tags {
            let Some(senders) = observers.by_tag.get_mut(tag) else {
                continue;
            };
            senders.retain(|tx| tx.send(event.clone()).is_ok());
            if senders.is_empty() || (terminal && self.store.tag_settled(tag)) {
                trace!(tag = %tag, "closing tag observers");
                observers.by_tag.remove(tag);
            }
        }
    }

    /// Close streams for a job that will never run (already dropped by the store).
    pub fn retire(&self, job_id: &JobId, tags: &BTreeSet<String>) {
        let mut observers = self.observers();
        observers.by_job.remove(job_id);
        for tag in tags {
            if self.store.tag_settled(tag) {
                observers.by_tag.remove(tag);
            }
        }
    }

    /// Forget registrations whose stream was dropped. Returns how many went.
    pub fn prune_closed(&self) -> usize {
        let mut guard = self.observers();
        let observers = &mut *guard;
        let before = count(observers);
        for senders in observers
            .by_job
            .values_mut()
            .chain(observers.by_tag.values_mut())
        {
            senders.retain(|tx| !tx.is_closed());
        }
        observers.by_job.retain(|_, senders| !senders.is_empty());
        observers.by_tag.retain(|_, senders| !senders.is_empty());
        before - count(observers)
    }

    /// Number of open registrations (job + tag).
    pub fn observer_count(&self) -> usize {
        count(&self.observers())
    }
}

fn count(observers: &Observers) -> usize {
    observers.by_job.values().map(Vec::len).sum::<usize>()
        + observers.by_tag.values().map(Vec::len).sum::<usize>()
}

/// Receiving end of one registration.
///
/// Each registration owns its own queue; two `observe` calls on the same
/// key never share a cursor.
pub struct StateStream {
    rx: mpsc::UnboundedReceiver<StateEvent>,
    seen: HashMap<JobId, u64>,
    finished: HashSet<JobId>,
}

impl StateStream {
    fn new(rx: mpsc::UnboundedReceiver<StateEvent>) -> Self {
        Self {
            rx,
            seen: HashMap::new(),
            finished: HashSet::new(),
        }
    }

    /// Next transition, or `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<StateEvent> {
        loop {
            let event = self.rx.recv().await?;
            if self.accept(&event) {
                return Some(event);
            }
        }
    }

    /// Non-blocking variant for callers that poll.
    pub fn try_recv(&mut self) -> Option<StateEvent> {
        while let Ok(event) = self.rx.try_recv() {
            if self.accept(&event) {
                return Some(event);
            }
        }
        None
    }

    /// Skip ahead to the next terminal event.
    pub async fn terminal(&mut self) -> Option<StateEvent> {
        while let Some(event) = self.recv().await {
            if event.is_terminal() {
                return Some(event);
            }
        }
        None
    }

    fn accept(&mut self, event: &StateEvent) -> bool {
        if self.finished.contains(&event.job_id) {
            return false;
        }
        if let Some(&version) = self.seen.get(&event.job_id)
            && event.version <= version
        {
            return false;
        }
        self.seen.insert(event.job_id.clone(), event.version);
        if event.is_terminal() {
            self.finished.insert(event.job_id.clone());
        }
        true
    }
}
