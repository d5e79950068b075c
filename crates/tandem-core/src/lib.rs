//! tandem-core
//!
//! Core building blocks for running linear job chains.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, spec, outcome, state, chain, job record, events, errors, decision）
//! - **ports**: 抽象化レイヤー（Job, ConstraintEvaluator, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（builder, scheduler, store, notifier, registry, config）
//! - **impls**: 実装（ConstraintFlags, 3 段の stage worker）
//! - **observability**: 状態ごとの集計ビュー

pub mod app;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use self::app::{ChainHandle, ChainScheduler, SchedulerConfig, StateStream};
pub use self::domain::{ChainError, ChainId, ChainState, JobId, JobSpec, JobState, Outcome};
