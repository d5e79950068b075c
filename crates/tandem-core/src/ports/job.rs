//! Job port - 実際の処理を行う単位

use async_trait::async_trait;

use crate::domain::{JobError, Outcome, Payload};

/// A runnable unit of work.
///
/// The job receives its `JobSpec` input payload and reports an [`Outcome`].
/// Returning `Err` is treated the same as `Outcome::Failure`.
///
/// # 使用例
/// ```ignore
/// struct Upload;
///
/// #[async_trait]
/// impl Job for Upload {
///     async fn execute(&self, payload: &Payload) -> Result<Outcome, JobError> {
///         let id = payload.get("id").ok_or_else(|| JobError::MissingInput("id".into()))?;
///         Ok(Outcome::success())
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Send + Sync {
    async fn execute(&self, payload: &Payload) -> Result<Outcome, JobError>;
}
