//! ConstraintFlags - 名前付き boolean フラグによる ConstraintEvaluator
//!
//! front-end が接続状態の変化に応じてフラグを切り替えます。
//! 読み取りは RwLock の read 側のみなので、どのスレッドからでも呼べます。

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::domain::ConstraintName;
use crate::ports::ConstraintEvaluator;

#[derive(Debug, Default)]
pub struct ConstraintFlags {
    flags: RwLock<HashMap<ConstraintName, bool>>,
}

impl ConstraintFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags with `network.connected` preset.
    pub fn with_network(connected: bool) -> Self {
        let flags = Self::new();
        flags.set(ConstraintName::network_connected(), connected);
        flags
    }

    pub fn set(&self, name: ConstraintName, value: bool) {
        debug!(constraint = %name, value, "constraint flag updated");
        self.flags
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, value);
    }

    pub fn set_network(&self, connected: bool) {
        self.set(ConstraintName::network_connected(), connected);
    }

    /// Current value; unknown names read as `false`.
    pub fn is_set(&self, name: &ConstraintName) -> bool {
        self.flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .unwrap_or(false)
    }
}

impl ConstraintEvaluator for ConstraintFlags {
    fn is_satisfied(&self, constraints: &BTreeSet<ConstraintName>) -> bool {
        let flags = self.flags.read().unwrap_or_else(PoisonError::into_inner);
        constraints
            .iter()
            .all(|name| flags.get(name).copied().unwrap_or(false))
    }
}
