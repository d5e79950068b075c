//! Ports - 抽象化レイヤー
//!
//! scheduler が外部に依存する箇所を trait として切り出します。
//! 実装は `impls`（または利用側）が提供します。

pub mod clock;
pub mod constraint;
pub mod id_generator;
pub mod job;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::constraint::{ConstraintEvaluator, NoConstraints};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job::Job;
