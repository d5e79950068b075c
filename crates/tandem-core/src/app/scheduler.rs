//! ChainScheduler - chain の逐次実行
//!
//! # フロー（chain ごとに 1 つの driver task）
//! 1. permit を取る（全 chain 合計の同時実行数を制限）
//! 2. ConstraintEvaluator で制約を評価。満たされなければ Blocked にして次の tick を待つ
//! 3. Running にして Job を実行 → Outcome
//! 4. Success: Succeeded + 次の step を Enqueued（最後なら chain Succeeded）
//! 5. Failure: Failed + chain Failed（後続の step は pending のまま破棄）
//! 6. Retry: Decider に従って backoff 後に 2 へ戻る、または Failed
//!
//! # 不変条件
//! - 状態は必ず store に書いてから notifier に渡す
//! - 遷移は chain の `run` ロックの中で行い、chain が Running でなければ捨てる
//!   （cancel 後に終わった Job の結果はここで破棄される）

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::builder::SchedulerBuilder;
use super::config::SchedulerConfig;
use super::notifier::{StateNotifier, StateStream};
use super::runtime::JobRegistry;
use super::store::JobStateStore;
use crate::domain::{
    ChainError, ChainId, ChainRun, ChainState, Decider, Decision, JobId, JobRecord, JobSnapshot,
    JobSpec, JobState, Outcome, Payload,
};
use crate::observability::StateCounts;
use crate::ports::{Clock, ConstraintEvaluator, IdGenerator, UlidGenerator};

/// Cheap, cloneable handle to one scheduler instance.
#[derive(Clone)]
pub struct ChainScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<JobStateStore>,
    notifier: StateNotifier,
    evaluator: Arc<dyn ConstraintEvaluator>,
    registry: Arc<JobRegistry>,
    decider: Arc<dyn Decider>,
    ids: Box<dyn IdGenerator>,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
    chains: Mutex<HashMap<ChainId, Arc<ChainControl>>>,
}

struct ChainControl {
    chain_id: ChainId,
    run: Mutex<ChainRun>,
    cancel_tx: watch::Sender<bool>,
    state_tx: watch::Sender<ChainState>,
}

impl ChainControl {
    fn run(&self) -> MutexGuard<'_, ChainRun> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChainScheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub(super) fn assemble(
        registry: JobRegistry,
        evaluator: Arc<dyn ConstraintEvaluator>,
        decider: Arc<dyn Decider>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let store = Arc::new(JobStateStore::new(Arc::clone(&clock)));
        let notifier = StateNotifier::new(Arc::clone(&store));
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            inner: Arc::new(Inner {
                store,
                notifier,
                evaluator,
                registry: Arc::new(registry),
                decider,
                ids: Box::new(UlidGenerator::new(clock)),
                config,
                permits,
                chains: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Validate and start a chain. Must be called inside a tokio runtime.
    ///
    /// Step 0 is `Enqueued` by the time this returns; later steps are
    /// pending until their predecessor succeeds.
    pub fn submit(&self, specs: Vec<JobSpec>) -> Result<ChainHandle, ChainError> {
        let declared = self.inner.validate(&specs).and_then(|()| {
            let chain_id = self.inner.ids.generate_chain_id();
            self.inner
                .store
                .declare_chain(chain_id, &specs)
                .map(|()| chain_id)
        });
        let chain_id = match declared {
            Ok(chain_id) => chain_id,
            Err(err) => {
                warn!(error = %err, validation = err.is_validation(), "chain rejected");
                return Err(err);
            }
        };

        let job_ids: Vec<JobId> = specs.iter().map(|s| s.id().clone()).collect();
        let (cancel_tx, _) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ChainState::Running);
        let control = Arc::new(ChainControl {
            chain_id,
            run: Mutex::new(ChainRun::new(specs)),
            cancel_tx,
            state_tx,
        });
        self.inner
            .chains()
            .insert(chain_id, Arc::clone(&control));
        info!(chain_id = %chain_id, steps = job_ids.len(), "chain submitted");

        {
            let run = control.run();
            if let Some(first) = run.current() {
                let first = first.id().clone();
                self.inner.write(chain_id, &first, JobState::Enqueued, |_| {});
            }
        }
        tokio::spawn(Arc::clone(&self.inner).drive(Arc::clone(&control)));

        Ok(ChainHandle {
            chain_id,
            job_ids,
            state_rx,
            control,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Cancel a live chain. Cancelling a chain that already finished is a no-op.
    pub fn cancel(&self, chain_id: ChainId) -> Result<(), ChainError> {
        let control = self
            .inner
            .chains()
            .get(&chain_id)
            .cloned()
            .ok_or(ChainError::UnknownChain(chain_id))?;
        self.inner.cancel(&control);
        Ok(())
    }

    pub fn observe(&self, job_id: impl Into<JobId>) -> StateStream {
        self.inner.notifier.observe(job_id)
    }

    pub fn observe_tag(&self, tag: impl Into<String>) -> StateStream {
        self.inner.notifier.observe_tag(tag)
    }

    pub fn job_state(&self, job_id: &JobId) -> Option<JobState> {
        self.inner.store.get(job_id)
    }

    pub fn job_snapshot(&self, job_id: &JobId) -> Option<JobSnapshot> {
        self.inner.store.snapshot(job_id)
    }

    pub fn jobs_by_tag(&self, tag: &str) -> Vec<(JobId, JobState)> {
        self.inner.store.get_by_tag(tag)
    }

    pub fn counts(&self) -> StateCounts {
        self.inner.store.counts()
    }

    /// State of a chain that is still being driven. `None` once it has finished.
    pub fn chain_state(&self, chain_id: ChainId) -> Option<ChainState> {
        self.inner
            .chains()
            .get(&chain_id)
            .map(|control| *control.state_tx.borrow())
    }

    /// Release what finished chains left behind: settled job records and
    /// registrations whose stream was dropped. Returns the number of records removed.
    ///
    /// Until this is called, finished jobs stay queryable and late observers
    /// still receive their final state.
    pub fn prune(&self) -> usize {
        let live: HashSet<ChainId> = self
            .inner
            .chains()
            .values()
            .filter(|control| !control.state_tx.borrow().is_terminal())
            .map(|control| control.chain_id)
            .collect();
        let removed = self.inner.store.prune(|chain_id| live.contains(&chain_id));
        let closed = self.inner.notifier.prune_closed();
        debug!(removed, closed, "pruned finished jobs");
        removed
    }

    pub fn live_chains(&self) -> usize {
        self.inner.chains().len()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }
}

impl Inner {
    fn chains(&self) -> MutexGuard<'_, HashMap<ChainId, Arc<ChainControl>>> {
        self.chains.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn validate(&self, specs: &[JobSpec]) -> Result<(), ChainError> {
        if specs.is_empty() {
            return Err(ChainError::EmptyChain);
        }
        let mut seen = HashSet::new();
        for spec in specs {
            if !seen.insert(spec.id()) {
                return Err(ChainError::DuplicateJobId(spec.id().clone()));
            }
            if !self.registry.contains(spec.kind()) {
                return Err(ChainError::UnknownJobKind(spec.kind().clone()));
            }
        }
        Ok(())
    }

    async fn drive(self: Arc<Self>, control: Arc<ChainControl>) {
        let mut cancel_rx = control.cancel_tx.subscribe();
        loop {
            let spec = {
                let run = control.run();
                match run.current() {
                    Some(spec) if run.is_running() => spec.clone(),
                    _ => break,
                }
            };
            self.run_step(&control, &spec, &mut cancel_rx).await;
        }

        let state = control.run().state();
        self.chains().remove(&control.chain_id);
        info!(chain_id = %control.chain_id, state = ?state, "chain finished");
    }

    /// Drive one step until it leaves the chain's hands (terminal, or the chain stopped).
    async fn run_step(
        &self,
        control: &ChainControl,
        spec: &JobSpec,
        cancel_rx: &mut watch::Receiver<bool>,
    ) {
        let chain_id = control.chain_id;
        let job_id = spec.id();
        let mut blocked_since: Option<Instant> = None;

        loop {
            let Some(permit) = self.acquire(cancel_rx).await else {
                return;
            };

            if !self.evaluator.is_satisfied(spec.constraints()) {
                drop(permit);
                let since = *blocked_since.get_or_insert_with(Instant::now);
                if self.store.get(job_id) != Some(JobState::Blocked)
                    && !self.transition(control, job_id, JobState::Blocked, |_| {})
                {
                    return;
                }
                if let Some(limit) = self.config.blocked_timeout
                    && since.elapsed() >= limit
                {
                    self.fail(control, job_id, format!("blocked for longer than {limit:?}"));
                    return;
                }
                if pause(self.config.constraint_poll_interval, cancel_rx).await {
                    return;
                }
                continue;
            }
            blocked_since = None;

            let started = if self.store.get(job_id) == Some(JobState::Running) {
                self.touch(control, job_id, |r| r.attempts += 1)
            } else {
                self.transition(control, job_id, JobState::Running, |r| r.attempts += 1)
            };
            if !started {
                return;
            }

            debug!(chain_id = %chain_id, job_id = %job_id, kind = %spec.kind(), "executing job");
            let outcome = self.registry.execute(spec.kind(), spec.payload()).await;
            drop(permit);

            match outcome {
                Outcome::Success(output) => {
                    self.succeed(control, job_id, output);
                    return;
                }
                Outcome::Failure(reason) => {
                    self.fail(control, job_id, reason);
                    return;
                }
                Outcome::Retry(reason) => {
                    let attempts = self.store.snapshot(job_id).map_or(0, |s| s.attempts);
                    match self.decider.decide(attempts, &reason) {
                        Decision::GiveUp { reason } => {
                            self.fail(control, job_id, reason);
                            return;
                        }
                        Decision::Retry { delay, reason } => {
                            warn!(chain_id = %chain_id, job_id = %job_id, attempts, "{reason}");
                            if !self.touch(control, job_id, |r| r.last_error = Some(reason)) {
                                return;
                            }
                            if pause(delay, cancel_rx).await {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn acquire(&self, cancel_rx: &mut watch::Receiver<bool>) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => None,
        }
    }

    /// Store write + publish. Callers hold the chain's `run` lock.
    fn write<F>(&self, chain_id: ChainId, job_id: &JobId, next: JobState, f: F) -> bool
    where
        F: FnOnce(&mut JobRecord),
    {
        match self.store.set_with(job_id, next, f) {
            Ok(event) => {
                info!(
                    chain_id = %chain_id,
                    job_id = %job_id,
                    state = ?next,
                    version = event.version,
                    "job state changed"
                );
                self.notifier.publish(&event);
                true
            }
            Err(err) => {
                warn!(chain_id = %chain_id, job_id = %job_id, error = %err, "state write rejected");
                false
            }
        }
    }

    fn transition<F>(&self, control: &ChainControl, job_id: &JobId, next: JobState, f: F) -> bool
    where
        F: FnOnce(&mut JobRecord),
    {
        let run = control.run();
        run.is_running() && self.write(control.chain_id, job_id, next, f)
    }

    fn touch<F>(&self, control: &ChainControl, job_id: &JobId, f: F) -> bool
    where
        F: FnOnce(&mut JobRecord),
    {
        let run = control.run();
        run.is_running() && self.store.touch(job_id, f).is_ok()
    }

    fn succeed(&self, control: &ChainControl, job_id: &JobId, output: Payload) {
        let mut run = control.run();
        if !run.is_running()
            || !self.write(control.chain_id, job_id, JobState::Succeeded, |r| {
                r.output = Some(output)
            })
        {
            return;
        }

        match run.advance().map(|next| next.id().clone()) {
            Some(next) => {
                if !self.write(control.chain_id, &next, JobState::Enqueued, |_| {}) {
                    run.finish(ChainState::Failed);
                    self.retire_remaining(&run);
                    control.state_tx.send_replace(ChainState::Failed);
                }
            }
            None => {
                run.finish(ChainState::Succeeded);
                control.state_tx.send_replace(ChainState::Succeeded);
            }
        }
    }

    fn fail(&self, control: &ChainControl, job_id: &JobId, reason: String) {
        let mut run = control.run();
        if !run.is_running() {
            return;
        }
        warn!(chain_id = %control.chain_id, job_id = %job_id, reason = %reason, "job failed");
        self.write(control.chain_id, job_id, JobState::Failed, |r| {
            r.last_error = Some(reason)
        });
        run.finish(ChainState::Failed);
        self.retire_remaining(&run);
        control.state_tx.send_replace(ChainState::Failed);
    }

    /// Pending steps after the current one will never run: drop them and close their streams.
    fn retire_remaining(&self, run: &ChainRun) {
        for spec in run.remaining() {
            if let Some(record) = self.store.forget(spec.id()) {
                self.notifier.retire(&record.job_id, &record.tags);
            }
        }
    }

    fn cancel(&self, control: &ChainControl) -> bool {
        let mut run = control.run();
        if !run.finish(ChainState::Cancelled) {
            return false;
        }
        info!(chain_id = %control.chain_id, step = run.step(), "cancelling chain");

        let current = run.current().map(|spec| spec.id().clone());
        if let Some(current) = current {
            self.write(control.chain_id, &current, JobState::Cancelled, |_| {});
        }
        for spec in run.remaining() {
            self.write(control.chain_id, spec.id(), JobState::Cancelled, |_| {});
        }
        control.state_tx.send_replace(ChainState::Cancelled);
        control.cancel_tx.send_replace(true);
        true
    }
}

/// Sleep for `delay`. Returns true if the chain was cancelled meanwhile.
async fn pause(delay: Duration, cancel_rx: &mut watch::Receiver<bool>) -> bool {
    let cancelled = tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = cancel_rx.wait_for(|cancelled| *cancelled) => true,
    };
    cancelled || *cancel_rx.borrow()
}

/// Caller's view of one submitted chain.
pub struct ChainHandle {
    chain_id: ChainId,
    job_ids: Vec<JobId>,
    state_rx: watch::Receiver<ChainState>,
    control: Arc<ChainControl>,
    inner: Arc<Inner>,
}

impl ChainHandle {
    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Job ids in submission order.
    pub fn job_ids(&self) -> &[JobId] {
        &self.job_ids
    }

    pub fn state(&self) -> ChainState {
        *self.state_rx.borrow()
    }

    /// Resolves once the chain is terminal.
    pub async fn wait(&self) -> ChainState {
        let mut rx = self.state_rx.clone();
        if let Ok(state) = rx.wait_for(|state| state.is_terminal()).await.map(|s| *s) {
            return state;
        }
        *rx.borrow()
    }

    /// Returns false if the chain had already finished.
    pub fn cancel(&self) -> bool {
        self.inner.cancel(&self.control)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::RetryPolicy;
    use crate::domain::{JobError, StateEvent};
    use crate::impls::{ConstraintFlags, FirstWorker, SecondWorker, ThirdWorker};
    use crate::ports::Job;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::timeout;

    const LIMIT: Duration = Duration::from_secs(2);

    struct Succeed;

    #[async_trait]
    impl Job for Succeed {
        async fn execute(&self, _payload: &Payload) -> Result<Outcome, JobError> {
            Ok(Outcome::success())
        }
    }

    struct Fail;

    #[async_trait]
    impl Job for Fail {
        async fn execute(&self, _payload: &Payload) -> Result<Outcome, JobError> {
            Ok(Outcome::failure("x"))
        }
    }

    /// Asks to be retried until it has run `succeed_on` times.
    struct Flaky {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl Job for Flaky {
        async fn execute(&self, _payload: &Payload) -> Result<Outcome, JobError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(Outcome::success())
            } else {
                Ok(Outcome::retry(format!("call {call}")))
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl Job for Slow {
        async fn execute(&self, _payload: &Payload) -> Result<Outcome, JobError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(Outcome::success())
        }
    }

    /// Loses the network on its first run and asks to be retried.
    struct DropsNetwork {
        flags: Arc<ConstraintFlags>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Job for DropsNetwork {
        async fn execute(&self, _payload: &Payload) -> Result<Outcome, JobError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.flags.set_network(false);
                return Ok(Outcome::retry("connection lost"));
            }
            Ok(Outcome::success())
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_retry(RetryPolicy {
                base_delay: Duration::from_millis(5),
                multiplier: 1.0,
                max_attempts: 5,
            })
    }

    fn registry() -> JobRegistry {
        JobRegistry::new()
            .with("ok", Arc::new(Succeed))
            .unwrap()
            .with("fail", Arc::new(Fail))
            .unwrap()
            .with("slow", Arc::new(Slow))
            .unwrap()
    }

    fn scheduler(flags: &Arc<ConstraintFlags>) -> ChainScheduler {
        scheduler_with(registry(), flags, config())
    }

    fn scheduler_with(
        registry: JobRegistry,
        flags: &Arc<ConstraintFlags>,
        config: SchedulerConfig,
    ) -> ChainScheduler {
        ChainScheduler::builder()
            .registry(registry)
            .evaluator(Arc::clone(flags) as Arc<dyn ConstraintEvaluator>)
            .config(config)
            .build()
            .unwrap()
    }

    fn job(kind: &str, id: &str) -> JobSpec {
        JobSpec::builder(kind).id(id).build()
    }

    async fn next(stream: &mut StateStream) -> Option<StateEvent> {
        timeout(LIMIT, stream.recv()).await.expect("stream stalled")
    }

    async fn drain(stream: &mut StateStream) -> Vec<JobState> {
        let mut states = Vec::new();
        while let Some(event) = next(stream).await {
            states.push(event.state);
        }
        states
    }

    async fn wait(handle: &ChainHandle) -> ChainState {
        timeout(LIMIT, handle.wait()).await.expect("chain stalled")
    }

    #[tokio::test]
    async fn all_success_chain_reports_each_step_in_order() {
        let flags = Arc::new(ConstraintFlags::new());
        let scheduler = scheduler(&flags);
        let mut tagged = scheduler.observe_tag("t");

        let specs = ["a", "b", "c"]
            .iter()
            .map(|id| JobSpec::builder("ok").id(*id).tag("t").build())
            .collect();
        let handle = scheduler.submit(specs).unwrap();

        let mut succeeded = Vec::new();
        while let Some(event) = next(&mut tagged).await {
            if event.state == JobState::Succeeded {
                succeeded.push(event.job_id.to_string());
            }
        }
        assert_eq!(succeeded, vec!["a", "b", "c"]);
        assert_eq!(wait(&handle).await, ChainState::Succeeded);
        assert_eq!(scheduler.counts().succeeded, 3);
    }

    #[tokio::test]
    async fn unmet_constraint_keeps_the_step_blocked() {
        let flags = Arc::new(ConstraintFlags::with_network(false));
        let scheduler = scheduler(&flags);
        let handle = scheduler
            .submit(vec![
                JobSpec::builder("ok").id("a").requires_network().build(),
                job("ok", "b"),
            ])
            .unwrap();
        let mut a = scheduler.observe("a");

        assert_eq!(next(&mut a).await.unwrap().state, JobState::Enqueued);
        assert_eq!(next(&mut a).await.unwrap().state, JobState::Blocked);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.job_state(&JobId::new("a")), Some(JobState::Blocked));
        assert_eq!(scheduler.job_state(&JobId::new("b")), None);
        assert_eq!(handle.state(), ChainState::Running);

        assert!(handle.cancel());
        assert_eq!(wait(&handle).await, ChainState::Cancelled);
        assert_eq!(drain(&mut a).await, vec![JobState::Cancelled]);
        assert_eq!(scheduler.job_state(&JobId::new("b")), Some(JobState::Cancelled));
    }

    #[tokio::test]
    async fn network_gated_three_stage_chain() {
        let flags = Arc::new(ConstraintFlags::with_network(false));
        let registry = JobRegistry::new()
            .with(FirstWorker::KIND, Arc::new(FirstWorker))
            .unwrap()
            .with(SecondWorker::KIND, Arc::new(SecondWorker))
            .unwrap()
            .with(ThirdWorker::KIND, Arc::new(ThirdWorker))
            .unwrap();
        let scheduler = scheduler_with(registry, &flags, config());

        let handle = scheduler
            .submit(vec![
                JobSpec::builder(FirstWorker::KIND).id("A").input("id", "001").build(),
                JobSpec::builder(SecondWorker::KIND)
                    .id("B")
                    .input("id", "001")
                    .requires_network()
                    .build(),
                JobSpec::builder(ThirdWorker::KIND)
                    .id("C")
                    .input("id", "001")
                    .tag("stage3")
                    .build(),
            ])
            .unwrap();
        let mut a = scheduler.observe("A");
        let mut b = scheduler.observe("B");
        let mut stage3 = scheduler.observe_tag("stage3");

        assert_eq!(drain(&mut a).await, vec![JobState::Enqueued, JobState::Running, JobState::Succeeded]);

        let mut b_states = vec![next(&mut b).await.unwrap().state];
        b_states.push(next(&mut b).await.unwrap().state);
        assert_eq!(b_states, vec![JobState::Enqueued, JobState::Blocked]);
        assert!(stage3.try_recv().is_none());

        flags.set_network(true);
        let running = next(&mut b).await.unwrap();
        let succeeded = next(&mut b).await.unwrap();
        assert_eq!(running.state, JobState::Running);
        assert_eq!(succeeded.state, JobState::Succeeded);
        assert!(next(&mut b).await.is_none());

        let mut c_events = Vec::new();
        while let Some(event) = next(&mut stage3).await {
            c_events.push(event);
        }
        let c_states: Vec<_> = c_events.iter().map(|e| e.state).collect();
        assert_eq!(c_states, vec![JobState::Enqueued, JobState::Running, JobState::Succeeded]);
        assert!(c_events.iter().all(|e| e.job_id.as_str() == "C"));
        assert!(c_events[1].at >= succeeded.at);

        assert_eq!(wait(&handle).await, ChainState::Succeeded);
        let output = scheduler.job_snapshot(&JobId::new("C")).unwrap().output.unwrap();
        assert_eq!(output.get("id").map(String::as_str), Some("001"));
    }

    #[tokio::test]
    async fn failure_stops_the_chain() {
        let flags = Arc::new(ConstraintFlags::new());
        let scheduler = scheduler(&flags);
        let handle = scheduler
            .submit(vec![job("fail", "a"), job("ok", "b")])
            .unwrap();
        let mut b = scheduler.observe("b");

        assert_eq!(wait(&handle).await, ChainState::Failed);
        assert_eq!(scheduler.job_state(&JobId::new("a")), Some(JobState::Failed));
        assert_eq!(
            scheduler.job_snapshot(&JobId::new("a")).unwrap().last_error.as_deref(),
            Some("x")
        );
        assert_eq!(scheduler.job_state(&JobId::new("b")), None);
        assert!(scheduler.job_snapshot(&JobId::new("b")).is_none());
        assert!(drain(&mut b).await.is_empty());
    }

    #[tokio::test]
    async fn observers_of_a_dropped_step_close_after_the_chain_failed() {
        let flags = Arc::new(ConstraintFlags::new());
        let scheduler = scheduler(&flags);
        let handle = scheduler
            .submit(vec![
                job("fail", "a"),
                JobSpec::builder("ok").id("b").tag("tb").build(),
            ])
            .unwrap();
        assert_eq!(wait(&handle).await, ChainState::Failed);

        let mut by_id = scheduler.observe("b");
        let mut by_tag = scheduler.observe_tag("tb");
        assert!(next(&mut by_id).await.is_none());
        assert!(next(&mut by_tag).await.is_none());
        assert_eq!(scheduler.job_state(&JobId::new("b")), None);
        assert_eq!(scheduler.counts().dropped, 1);

        // the dropped id is free again
        let again = scheduler.submit(vec![job("ok", "b")]).unwrap();
        assert_eq!(wait(&again).await, ChainState::Succeeded);
    }

    #[tokio::test]
    async fn prune_releases_finished_chains_only() {
        let flags = Arc::new(ConstraintFlags::with_network(false));
        let scheduler = scheduler(&flags);
        let done = scheduler
            .submit(vec![job("fail", "a"), job("ok", "b")])
            .unwrap();
        assert_eq!(wait(&done).await, ChainState::Failed);
        let live = scheduler
            .submit(vec![
                job("ok", "c"),
                JobSpec::builder("ok").id("d").requires_network().build(),
            ])
            .unwrap();
        let mut d = scheduler.observe("d");
        while scheduler.job_state(&JobId::new("d")) != Some(JobState::Blocked) {
            assert!(next(&mut d).await.is_some());
        }
        drop(scheduler.observe("never"));

        // a (failed) and b (dropped) go; c succeeded but its chain is still running
        assert_eq!(scheduler.prune(), 2);
        assert!(scheduler.job_snapshot(&JobId::new("a")).is_none());
        assert_eq!(scheduler.job_state(&JobId::new("c")), Some(JobState::Succeeded));
        assert_eq!(scheduler.counts().dropped, 0);

        live.cancel();
        assert_eq!(wait(&live).await, ChainState::Cancelled);
    }

    #[tokio::test]
    async fn late_observer_sees_the_terminal_state_once() {
        let flags = Arc::new(ConstraintFlags::new());
        let scheduler = scheduler(&flags);
        let handle = scheduler.submit(vec![job("ok", "a")]).unwrap();
        assert_eq!(wait(&handle).await, ChainState::Succeeded);

        let mut first = scheduler.observe("a");
        let mut second = scheduler.observe("a");
        assert_eq!(drain(&mut first).await, vec![JobState::Succeeded]);
        assert_eq!(drain(&mut second).await, vec![JobState::Succeeded]);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let flags = Arc::new(ConstraintFlags::new());
        let registry = registry()
            .with(
                "flaky",
                Arc::new(Flaky {
                    calls: AtomicU32::new(0),
                    succeed_on: 3,
                }),
            )
            .unwrap();
        let scheduler = scheduler_with(registry, &flags, config());
        let handle = scheduler.submit(vec![job("flaky", "a")]).unwrap();
        let mut a = scheduler.observe("a");

        assert_eq!(wait(&handle).await, ChainState::Succeeded);
        // retries stay Running, so only one Running transition is published
        assert_eq!(
            drain(&mut a).await,
            vec![JobState::Enqueued, JobState::Running, JobState::Succeeded]
        );
        assert_eq!(scheduler.job_snapshot(&JobId::new("a")).unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn retry_cap_fails_the_job() {
        let flags = Arc::new(ConstraintFlags::new());
        let registry = registry()
            .with(
                "flaky",
                Arc::new(Flaky {
                    calls: AtomicU32::new(0),
                    succeed_on: u32::MAX,
                }),
            )
            .unwrap();
        let mut config = config();
        config.retry.max_attempts = 3;
        let scheduler = scheduler_with(registry, &flags, config);
        let handle = scheduler.submit(vec![job("flaky", "a")]).unwrap();

        assert_eq!(wait(&handle).await, ChainState::Failed);
        let snapshot = scheduler.job_snapshot(&JobId::new("a")).unwrap();
        assert_eq!(snapshot.state, Some(JobState::Failed));
        assert_eq!(snapshot.attempts, 3);
        assert!(snapshot.last_error.unwrap().contains("retry cap"));
    }

    #[tokio::test]
    async fn lost_constraint_on_retry_goes_back_to_blocked() {
        let flags = Arc::new(ConstraintFlags::with_network(true));
        let registry = registry()
            .with(
                "drops",
                Arc::new(DropsNetwork {
                    flags: Arc::clone(&flags),
                    calls: AtomicU32::new(0),
                }),
            )
            .unwrap();
        let scheduler = scheduler_with(registry, &flags, config());
        let handle = scheduler
            .submit(vec![JobSpec::builder("drops").id("a").requires_network().build()])
            .unwrap();
        let mut a = scheduler.observe("a");

        let mut states = Vec::new();
        while let Some(event) = next(&mut a).await {
            states.push(event.state);
            if event.state == JobState::Blocked {
                flags.set_network(true);
            }
        }
        assert_eq!(
            states,
            vec![
                JobState::Enqueued,
                JobState::Running,
                JobState::Blocked,
                JobState::Running,
                JobState::Succeeded,
            ]
        );
        assert_eq!(wait(&handle).await, ChainState::Succeeded);
        assert_eq!(scheduler.job_snapshot(&JobId::new("a")).unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn cancel_discards_the_outcome_of_a_running_job() {
        let flags = Arc::new(ConstraintFlags::new());
        let scheduler = scheduler(&flags);
        let handle = scheduler
            .submit(vec![job("slow", "a"), job("ok", "b")])
            .unwrap();
        let mut a = scheduler.observe("a");
        let mut b = scheduler.observe("b");

        assert_eq!(next(&mut a).await.unwrap().state, JobState::Enqueued);
        assert_eq!(next(&mut a).await.unwrap().state, JobState::Running);
        scheduler.cancel(handle.chain_id()).unwrap();

        assert_eq!(wait(&handle).await, ChainState::Cancelled);
        assert_eq!(drain(&mut a).await, vec![JobState::Cancelled]);
        assert_eq!(drain(&mut b).await, vec![JobState::Cancelled]);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(scheduler.job_state(&JobId::new("a")), Some(JobState::Cancelled));
        assert_eq!(scheduler.live_chains(), 0);
        assert!(!handle.cancel());
    }

    #[tokio::test]
    async fn blocked_timeout_fails_the_step() {
        let flags = Arc::new(ConstraintFlags::with_network(false));
        let config = config().with_blocked_timeout(Duration::from_millis(30));
        let scheduler = scheduler_with(registry(), &flags, config);
        let handle = scheduler
            .submit(vec![
                JobSpec::builder("ok").id("a").requires_network().build(),
                job("ok", "b"),
            ])
            .unwrap();

        assert_eq!(wait(&handle).await, ChainState::Failed);
        let snapshot = scheduler.job_snapshot(&JobId::new("a")).unwrap();
        assert_eq!(snapshot.state, Some(JobState::Failed));
        assert!(snapshot.last_error.unwrap().contains("blocked"));
        assert_eq!(scheduler.job_state(&JobId::new("b")), None);
    }

    #[tokio::test]
    async fn independent_chains_run_side_by_side() {
        let flags = Arc::new(ConstraintFlags::new());
        let scheduler = scheduler_with(registry(), &flags, config().with_max_concurrent_jobs(1));
        let first = scheduler.submit(vec![job("slow", "a1"), job("ok", "a2")]).unwrap();
        let second = scheduler.submit(vec![job("ok", "b1")]).unwrap();

        assert_ne!(first.chain_id(), second.chain_id());
        assert_eq!(wait(&first).await, ChainState::Succeeded);
        assert_eq!(wait(&second).await, ChainState::Succeeded);
    }

    #[tokio::test]
    async fn submit_rejects_invalid_chains() {
        let flags = Arc::new(ConstraintFlags::with_network(false));
        let scheduler = scheduler(&flags);

        let empty = scheduler.submit(vec![]).err();
        assert_eq!(empty, Some(ChainError::EmptyChain));
        assert!(empty.is_some_and(|err| err.is_validation()));
        assert_eq!(
            scheduler.submit(vec![job("ok", "a"), job("ok", "a")]).err(),
            Some(ChainError::DuplicateJobId(JobId::new("a")))
        );
        assert!(matches!(
            scheduler.submit(vec![job("nope", "a")]),
            Err(ChainError::UnknownJobKind(kind)) if kind.as_str() == "nope"
        ));

        let handle = scheduler
            .submit(vec![JobSpec::builder("ok").id("gated").requires_network().build()])
            .unwrap();
        assert_eq!(
            scheduler.submit(vec![job("ok", "gated")]).err(),
            Some(ChainError::JobAlreadyLive(JobId::new("gated")))
        );

        handle.cancel();
        assert_eq!(wait(&handle).await, ChainState::Cancelled);
        // a finished id may be reused
        let again = scheduler.submit(vec![job("ok", "gated")]).unwrap();
        assert_eq!(wait(&again).await, ChainState::Succeeded);
    }

    #[tokio::test]
    async fn cancel_unknown_chain_is_an_error() {
        let flags = Arc::new(ConstraintFlags::new());
        let scheduler = scheduler(&flags);
        let chain_id = ChainId::from_ulid(ulid::Ulid::new());
        assert_eq!(
            scheduler.cancel(chain_id),
            Err(ChainError::UnknownChain(chain_id))
        );
    }
}
