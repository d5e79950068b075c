//! SchedulerBuilder - scheduler の構築とワイヤリング
//!
//! # 起動時検証（Fail-fast）
//! - expect_kinds() で必要な JobKind を宣言
//! - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - 不足があれば submit まで待たずに BuildError を返す

use std::sync::Arc;

use super::config::SchedulerConfig;
use super::runtime::JobRegistry;
use super::scheduler::ChainScheduler;
use crate::domain::{Decider, DefaultDecider, JobKind};
use crate::ports::{Clock, ConstraintEvaluator, NoConstraints, SystemClock};

/// # 使用例
/// ```ignore
/// let scheduler = ChainScheduler::builder()
///     .registry(registry)
///     .evaluator(flags)
///     .expect_kinds(&[FirstWorker::KIND])
///     .build()?;
/// ```
pub struct SchedulerBuilder {
    registry: JobRegistry,
    evaluator: Arc<dyn ConstraintEvaluator>,
    decider: Option<Arc<dyn Decider>>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    expected_kinds: Option<Vec<JobKind>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing job kinds: {0:?}. These kinds were expected but not registered.")]
    MissingJobKinds(Vec<String>),
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            registry: JobRegistry::new(),
            evaluator: Arc::new(NoConstraints),
            decider: None,
            clock: Arc::new(SystemClock),
            config: SchedulerConfig::default(),
            expected_kinds: None,
        }
    }

    pub fn registry(mut self, registry: JobRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn ConstraintEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Override retry decisions. Defaults to a `DefaultDecider` over `config.retry`.
    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn expect_kinds(mut self, kinds: &[&str]) -> Self {
        self.expected_kinds = Some(kinds.iter().map(|k| JobKind::new(*k)).collect());
        self
    }

    pub fn build(self) -> Result<ChainScheduler, BuildError> {
        if let Some(expected) = &self.expected_kinds {
            let missing: Vec<String> = expected
                .iter()
                .filter(|kind| !self.registry.contains(kind))
                .map(|kind| kind.to_string())
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingJobKinds(missing));
            }
        }

        let decider: Arc<dyn Decider> = match self.decider {
            Some(decider) => decider,
            None => Arc::new(DefaultDecider::new(self.config.retry.clone())),
        };
        Ok(ChainScheduler::assemble(
            self.registry,
            self.evaluator,
            decider,
            self.clock,
            self.config,
        ))
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
