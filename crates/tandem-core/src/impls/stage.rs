//! Stage workers - 3 段の chain で使う Job 実装
//!
//! それぞれ入力 `"id"` を読み、同じ `"id"` と自分の stage 名を結果として返します。
//! `"id"` がなければ `JobError::MissingInput`（= Failure）になります。

use async_trait::async_trait;
use tracing::info;

use crate::domain::{JobError, Outcome, Payload};
use crate::ports::Job;

/// Payload key every stage reads.
pub const INPUT_DATA_ID: &str = "id";

/// Result key carrying the stage that produced the output.
pub const OUTPUT_STAGE: &str = "stage";

fn run_stage(stage: &'static str, payload: &Payload) -> Result<Outcome, JobError> {
    let id = payload
        .get(INPUT_DATA_ID)
        .ok_or_else(|| JobError::MissingInput(INPUT_DATA_ID.to_string()))?;
    info!(stage, id = %id, "stage worker processing");

    let mut output = Payload::new();
    output.insert(INPUT_DATA_ID.to_string(), id.clone());
    output.insert(OUTPUT_STAGE.to_string(), stage.to_string());
    Ok(Outcome::success_with(output))
}

pub struct FirstWorker;

impl FirstWorker {
    pub const KIND: &'static str = "stage.first";
}

#[async_trait]
impl Job for FirstWorker {
    async fn execute(&self, payload: &Payload) -> Result<Outcome, JobError> {
        run_stage("first", payload)
    }
}

pub struct SecondWorker;

impl SecondWorker {
    pub const KIND: &'static str = "stage.second";
}

#[async_trait]
impl Job for SecondWorker {
    async fn execute(&self, payload: &Payload) -> Result<Outcome, JobError> {
        run_stage("second", payload)
    }
}

pub struct ThirdWorker;

impl ThirdWorker {
    pub const KIND: &'static str = "stage.third";
}

#[async_trait]
impl Job for ThirdWorker {
    async fn execute(&self, payload: &Payload) -> Result<Outcome, JobError> {
        run_stage("third", payload)
    }
}
