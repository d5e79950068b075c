//! Outcome model: what a single job execution reports back.

use serde::{Deserialize, Serialize};

use super::spec::Payload;

/// Classification of an outcome, without its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
    Retry,
}

/// Terminal result of one execution.
///
/// - `Success`: the job is done; its result payload is kept in the store.
/// - `Failure`: permanent; under fail-fast the chain stops here.
/// - `Retry`: transient; the scheduler re-attempts up to the attempt cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success(Payload),
    Failure(String),
    Retry(String),
}

impl Outcome {
    pub fn success() -> Self {
        Outcome::Success(Payload::new())
    }

    pub fn success_with(output: Payload) -> Self {
        Outcome::Success(output)
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Outcome::Failure(reason.into())
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        Outcome::Retry(reason.into())
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success(_) => OutcomeKind::Success,
            Outcome::Failure(_) => OutcomeKind::Failure,
            Outcome::Retry(_) => OutcomeKind::Retry,
        }
    }
}
