//! Input specs: what a caller submits to the scheduler.
//!
//! A chain is an ordered `Vec<JobSpec>`. Specs are immutable once built; use
//! [`JobSpec::builder`] to assemble one.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::ids::JobId;

/// Opaque key-value bundle handed to a job and returned by it.
pub type Payload = BTreeMap<String, String>;

/// Names which registered [`Job`](crate::ports::Job) executes a spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKind(String);

impl JobKind {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A named boolean precondition a job may require before it runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintName(String);

impl ConstraintName {
    /// Well-known constraint: the network is reachable.
    pub const NETWORK_CONNECTED: &'static str = "network.connected";

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn network_connected() -> Self {
        Self::new(Self::NETWORK_CONNECTED)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConstraintName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Immutable description of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    id: JobId,
    kind: JobKind,
    #[serde(default)]
    payload: Payload,
    #[serde(default)]
    constraints: BTreeSet<ConstraintName>,
    #[serde(default)]
    tags: BTreeSet<String>,
}

impl JobSpec {
    /// Start building a spec executed by the job registered under `kind`.
    pub fn builder(kind: impl Into<String>) -> JobSpecBuilder {
        JobSpecBuilder {
            id: None,
            kind: JobKind::new(kind),
            payload: Payload::new(),
            constraints: BTreeSet::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn constraints(&self) -> &BTreeSet<ConstraintName> {
        &self.constraints
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn is_gated(&self) -> bool {
        !self.constraints.is_empty()
    }
}

/// Builder for [`JobSpec`].
#[derive(Debug, Clone)]
pub struct JobSpecBuilder {
    id: Option<JobId>,
    kind: JobKind,
    payload: Payload,
    constraints: BTreeSet<ConstraintName>,
    tags: BTreeSet<String>,
}

impl JobSpecBuilder {
    /// Name the job. Without a name a `job-<ulid>` identity is generated.
    pub fn id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn constraint(mut self, name: ConstraintName) -> Self {
        self.constraints.insert(name);
        self
    }

    /// Shorthand for `constraint(ConstraintName::network_connected())`.
    pub fn requires_network(self) -> Self {
        self.constraint(ConstraintName::network_connected())
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn build(self) -> JobSpec {
        JobSpec {
            id: self.id.unwrap_or_else(|| JobId::generated(Ulid::new())),
            kind: self.kind,
            payload: self.payload,
            constraints: self.constraints,
            tags: self.tags,
        }
    }
}
