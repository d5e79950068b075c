//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース。Clock を差し替えればタイムスタンプ部分が決定的になる

use crate::domain::ids::ChainId;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は chain の ID を生成
///
/// job の ID は呼び出し側が付けるか、`JobSpec::builder` が `job-<ulid>` を振る。
pub trait IdGenerator: Send + Sync {
    fn generate_chain_id(&self) -> ChainId;
}

/// UlidGenerator は ULID ベースの ID 生成器
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_chain_id(&self) -> ChainId {
        ChainId::from(self.next_ulid())
    }
}
