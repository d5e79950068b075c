//! Domain model (IDs, specs, outcomes, states, records, events, errors).

pub mod chain;
pub mod decision;
pub mod errors;
pub mod events;
pub mod ids;
pub mod job;
pub mod outcome;
pub mod spec;
pub mod state;

pub use self::chain::ChainRun;
pub use self::decision::{Decider, Decision, DefaultDecider};
pub use self::errors::{ChainError, JobError};
pub use self::events::StateEvent;
pub use self::ids::{ChainId, JobId};
pub use self::job::{JobRecord, JobSnapshot};
pub use self::outcome::{Outcome, OutcomeKind};
pub use self::spec::{ConstraintName, JobKind, JobSpec, JobSpecBuilder, Payload};
pub use self::state::{ChainState, JobState};
