// Invariant Framework
//
// Invariants are pure rules over a metadata transition. The commit
// coordinator evaluates them on every candidate before attempting the
// pointer swap, so a violation never becomes visible to readers.

use crate::metadata::TableMetadata;

/// Result of invariant evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantResult {
    Pass,
    Fail(String),
}

/// Trait implemented by all invariants.
///
/// Invariants must be:
/// - Pure
/// - Deterministic
/// - Side-effect free
pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, previous: &TableMetadata, next: &TableMetadata) -> InvariantResult;
}

/// Invariant engine that evaluates a set of invariants.
#[derive(Default)]
pub struct InvariantEngine {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantEngine {
    /// Create an engine with no invariants registered.
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    /// Create an engine with every built-in table invariant registered.
    pub fn with_table_invariants() -> Self {
        let mut engine = Self::new();
        engine.register(LogOnlyGrows);
        engine.register(CurrentSnapshotInLog);
        engine.register(ParentIsPreviousCurrent);
        engine.register(SchemaReferenceExists);
        engine.register(SchemaIdsIncrease);
        engine.register(CommitTimeNonDecreasing);
        engine
    }

    /// Register an invariant.
    pub fn register<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }

    /// Evaluate all invariants.
    ///
    /// Stops at the first failure.
    pub fn evaluate(
        &self,
        previous: &TableMetadata,
        next: &TableMetadata,
    ) -> Result<(), InvariantViolation> {
        for invariant in &self.invariants {
            match invariant.validate(previous, next) {
                InvariantResult::Pass => continue,
                InvariantResult::Fail(reason) => {
                    return Err(InvariantViolation {
                        invariant: invariant.name(),
                        reason,
                    })
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for InvariantEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.invariants.iter().map(|i| i.name()))
            .finish()
    }
}

/// Returned when an invariant is violated.
#[derive(Debug, thiserror::Error)]
#[error("invariant `{invariant}` violated: {reason}")]
pub struct InvariantViolation {
    pub invariant: &'static str,
    pub reason: String,
}

/// The snapshot log is append-only.
pub struct LogOnlyGrows;

impl Invariant for LogOnlyGrows {
    fn name(&self) -> &'static str {
        "log-only-grows"
    }

    fn validate(&self, previous: &TableMetadata, next: &TableMetadata) -> InvariantResult {
        if next.snapshots().extends(previous.snapshots()) {
            InvariantResult::Pass
        } else {
            InvariantResult::Fail("snapshot log entries were removed or rewritten".into())
        }
    }
}

/// The current pointer references a snapshot in the log.
pub struct CurrentSnapshotInLog;

impl Invariant for CurrentSnapshotInLog {
    fn name(&self) -> &'static str {
        "current-snapshot-in-log"
    }

    fn validate(&self, _previous: &TableMetadata, next: &TableMetadata) -> InvariantResult {
        match next.current_snapshot_id() {
            Some(id) if !next.snapshots().contains(id) => {
                InvariantResult::Fail(format!("current snapshot {id} is not in the log"))
            }
            _ => InvariantResult::Pass,
        }
    }
}

/// A new current snapshot descends directly from the previous one.
pub struct ParentIsPreviousCurrent;

impl Invariant for ParentIsPreviousCurrent {
    fn name(&self) -> &'static str {
        "parent-is-previous-current"
    }

    fn validate(&self, previous: &TableMetadata, next: &TableMetadata) -> InvariantResult {
        if next.current_snapshot_id() == previous.current_snapshot_id() {
            return InvariantResult::Pass;
        }
        match next.current_snapshot() {
            Some(current) if current.parent_snapshot_id() == previous.current_snapshot_id() => {
                InvariantResult::Pass
            }
            Some(current) => InvariantResult::Fail(format!(
                "snapshot {} has parent {:?}, expected {:?}",
                current.snapshot_id(),
                current.parent_snapshot_id(),
                previous.current_snapshot_id()
            )),
            None => InvariantResult::Fail("current snapshot pointer was cleared".into()),
        }
    }
}

/// Every snapshot pins a schema present in the schema history.
pub struct SchemaReferenceExists;

impl Invariant for SchemaReferenceExists {
    fn name(&self) -> &'static str {
        "schema-reference-exists"
    }

    fn validate(&self, _previous: &TableMetadata, next: &TableMetadata) -> InvariantResult {
        if next.schema_by_id(next.current_schema_id()).is_none() {
            return InvariantResult::Fail(format!(
                "current schema {} is not in the schema history",
                next.current_schema_id()
            ));
        }
        match next
            .snapshots()
            .history()
            .find(|s| next.schema_by_id(s.schema_id()).is_none())
        {
            Some(s) => InvariantResult::Fail(format!(
                "snapshot {} references unknown schema {}",
                s.snapshot_id(),
                s.schema_id()
            )),
            None => InvariantResult::Pass,
        }
    }
}

/// Schema version ids strictly increase in publication order.
pub struct SchemaIdsIncrease;

impl Invariant for SchemaIdsIncrease {
    fn name(&self) -> &'static str {
        "schema-ids-increase"
    }

    fn validate(&self, _previous: &TableMetadata, next: &TableMetadata) -> InvariantResult {
        let ids: Vec<_> = next.schemas().versions().map(|s| s.schema_id()).collect();
        if ids.windows(2).all(|w| w[0] < w[1]) {
            InvariantResult::Pass
        } else {
            InvariantResult::Fail(format!("schema ids are not increasing: {ids:?}"))
        }
    }
}

/// Commit time never decreases from parent to child.
pub struct CommitTimeNonDecreasing;

impl Invariant for CommitTimeNonDecreasing {
    fn name(&self) -> &'static str {
        "commit-time-non-decreasing"
    }

    fn validate(&self, _previous: &TableMetadata, next: &TableMetadata) -> InvariantResult {
        let Some(current) = next.current_snapshot() else {
            return InvariantResult::Pass;
        };
        let Some(parent_id) = current.parent_snapshot_id() else {
            return InvariantResult::Pass;
        };
        match next.snapshots().by_id(parent_id) {
            Ok(parent) if parent.committed_at() > current.committed_at() => {
                InvariantResult::Fail(format!(
                    "snapshot {} committed at {} before parent {} at {}",
                    current.snapshot_id(),
                    current.committed_at(),
                    parent_id,
                    parent.committed_at()
                ))
            }
            Ok(_) => InvariantResult::Pass,
            Err(e) => InvariantResult::Fail(e.to_string()),
        }
    }
}
