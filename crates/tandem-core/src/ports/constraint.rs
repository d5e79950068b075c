//! ConstraintEvaluator port - 実行前提条件の評価
//!
//! scheduler は gated job を Running にする直前に必ず評価します。
//! 満たされていなければ job は Blocked のまま、次の tick で再評価されます。

use std::collections::BTreeSet;

use crate::domain::ConstraintName;

/// Answers whether a set of named preconditions currently hold.
///
/// Implementations must be side-effect free and callable concurrently.
/// Unknown names count as unmet; an empty set is always satisfied.
pub trait ConstraintEvaluator: Send + Sync {
    fn is_satisfied(&self, constraints: &BTreeSet<ConstraintName>) -> bool;
}

/// Evaluator with no constraints known: only ungated jobs may run.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConstraints;

impl ConstraintEvaluator for NoConstraints {
    fn is_satisfied(&self, constraints: &BTreeSet<ConstraintName>) -> bool {
        constraints.is_empty()
    }
}
