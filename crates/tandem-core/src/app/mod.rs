//! App - アプリケーション層
//!
//! ports を組み合わせて chain の実行を組み立てます。
//!
//! # 主要コンポーネント
//! - **SchedulerBuilder**: scheduler の構築とワイヤリング（起動時検証）
//! - **ChainScheduler**: chain の逐次実行と cancel
//! - **JobStateStore**: ジョブ状態の正本（tag の二次インデックス付き）
//! - **StateNotifier**: 状態遷移の fan-out
//! - **JobRegistry**: JobKind → Job

pub mod builder;
pub mod config;
pub mod notifier;
pub mod retry;
pub mod runtime;
pub mod scheduler;
pub mod store;

pub use self::builder::{BuildError, SchedulerBuilder};
pub use self::config::SchedulerConfig;
pub use self::notifier::{StateNotifier, StateStream};
pub use self::retry::RetryPolicy;
pub use self::runtime::JobRegistry;
pub use self::scheduler::{ChainHandle, ChainScheduler};
pub use self::store::JobStateStore;
