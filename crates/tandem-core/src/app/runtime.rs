use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{ChainError, JobKind, Outcome, Payload};
use crate::ports::Job;

/// Registry of jobs (kind -> job).
///
/// Design:
/// - Built during initialization (mutable).
/// - Shared read-only by the scheduler afterwards, so no lock is needed.
#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<JobKind, Arc<dyn Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        kind: impl Into<String>,
        job: Arc<dyn Job>,
    ) -> Result<(), ChainError> {
        let kind = JobKind::new(kind);
        if self.jobs.contains_key(&kind) {
            return Err(ChainError::DuplicateJobKind(kind));
        }
        self.jobs.insert(kind, job);
        Ok(())
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with(mut self, kind: impl Into<String>, job: Arc<dyn Job>) -> Result<Self, ChainError> {
        self.register(kind, job)?;
        Ok(self)
    }

    pub fn get(&self, kind: &JobKind) -> Option<&Arc<dyn Job>> {
        self.jobs.get(kind)
    }

    pub fn contains(&self, kind: &JobKind) -> bool {
        self.jobs.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Execute the job registered for `kind`.
    ///
    /// Errors from the job (or a missing registration) come back as
    /// `Outcome::Failure`, so the scheduler only ever sees an outcome.
    pub async fn execute(&self, kind: &JobKind, payload: &Payload) -> Outcome {
        let Some(job) = self.get(kind) else {
            return Outcome::failure(format!("no job registered for kind={kind}"));
        };
        match job.execute(payload).await {
            Ok(outcome) => outcome,
            Err(err) => Outcome::failure(err.to_string()),
        }
    }
}
