//! Errors - エラー型
//!
//! - `ChainError`: scheduler / store / registry の操作エラー（呼び出し側へ同期的に返す）
//! - `JobError`: Job 実装が返すエラー（scheduler は Failure として扱う）

use thiserror::Error;

use super::ids::{ChainId, JobId};
use super::spec::JobKind;
use super::state::JobState;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain must contain at least one job")]
    EmptyChain,

    #[error("duplicate job id in chain: {0}")]
    DuplicateJobId(JobId),

    #[error("no job registered for kind={0}")]
    UnknownJobKind(JobKind),

    #[error("job {0} is still live in another chain")]
    JobAlreadyLive(JobId),

    #[error("duplicate job registration for kind={0}")]
    DuplicateJobKind(JobKind),

    #[error("unknown chain: {0}")]
    UnknownChain(ChainId),

    #[error("unknown job: {0}")]
    UnknownJob(JobId),

    #[error("illegal transition for job {job_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        job_id: JobId,
        from: Option<JobState>,
        to: JobState,
    },
}

impl ChainError {
    /// Submission was rejected before a chain was created.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ChainError::EmptyChain
                | ChainError::DuplicateJobId(_)
                | ChainError::UnknownJobKind(_)
                | ChainError::JobAlreadyLive(_)
        )
    }
}

/// Error a job implementation may return instead of an `Outcome`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("missing input key: {0}")]
    MissingInput(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use ulid::Ulid;

    #[rstest]
    #[case::empty(ChainError::EmptyChain, true)]
    #[case::duplicate_id(ChainError::DuplicateJobId(JobId::new("a")), true)]
    #[case::unknown_kind(ChainError::UnknownJobKind(JobKind::new("k")), true)]
    #[case::live(ChainError::JobAlreadyLive(JobId::new("a")), true)]
    #[case::duplicate_kind(ChainError::DuplicateJobKind(JobKind::new("k")), false)]
    #[case::unknown_job(ChainError::UnknownJob(JobId::new("a")), false)]
    #[case::unknown_chain(ChainError::UnknownChain(ChainId::from_ulid(Ulid::new())), false)]
    #[case::transition(
        ChainError::InvalidTransition { job_id: JobId::new("a"), from: None, to: JobState::Running },
        false
    )]
    fn validation_errors_are_the_submit_rejections(#[case] err: ChainError, #[case] expected: bool) {
        assert_eq!(err.is_validation(), expected);
    }
}
