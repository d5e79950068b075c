//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **ConstraintFlags**: 名前付きフラグによる ConstraintEvaluator
//! - **FirstWorker / SecondWorker / ThirdWorker**: 3 段 chain の Job

pub mod constraint_flags;
pub mod stage;

pub use self::constraint_flags::ConstraintFlags;
pub use self::stage::{FirstWorker, SecondWorker, ThirdWorker};
