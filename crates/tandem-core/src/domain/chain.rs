//! ChainRun - 1 回の chain 実行の進行状況
//!
//! driver task が所有し、chain が終端状態になったら破棄される。

use super::spec::JobSpec;
use super::state::ChainState;

#[derive(Debug, Clone)]
pub struct ChainRun {
    specs: Vec<JobSpec>,
    step: usize,
    state: ChainState,
}

impl ChainRun {
    pub fn new(specs: Vec<JobSpec>) -> Self {
        Self {
            specs,
            step: 0,
            state: ChainState::Running,
        }
    }

    /// The step being driven, or `None` once every step has succeeded.
    pub fn current(&self) -> Option<&JobSpec> {
        self.specs.get(self.step)
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ChainState::Running
    }

    /// Move to the next step. Returns the new current step, if any.
    pub fn advance(&mut self) -> Option<&JobSpec> {
        if self.step < self.specs.len() {
            self.step += 1;
        }
        self.specs.get(self.step)
    }

    /// Steps after the current one (never started).
    pub fn remaining(&self) -> &[JobSpec] {
        self.specs.get(self.step + 1..).unwrap_or(&[])
    }

    /// Only a running chain can finish; the first terminal state wins.
    pub fn finish(&mut self, state: ChainState) -> bool {
        if !self.is_running() || !state.is_terminal() {
            return false;
        }
        self.state = state;
        true
    }
}
