// Commit Coordinator
//
// The only write path. A commit reads the current metadata, validates the
// changeset against it, builds the complete candidate metadata, and then
// tries to swap the current pointer. Losing the swap means another writer
// committed first: the changeset is re-validated on top of the new current
// snapshot and retried, a bounded number of times.
//
// Nothing is visible to readers until the swap succeeds, so abandoning a
// commit at any earlier point leaves no trace.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::invariants::{InvariantEngine, InvariantViolation};
use crate::log::{LogError, NotFoundError, PointerStore, StoreError, SwapOutcome};
use crate::manifest::{ManifestError, ManifestList};
use crate::metadata::TableMetadata;
use crate::schema::{IncompatibleSchemaError, SchemaId};
use crate::snapshot::{Operation, Snapshot, SnapshotId};

pub mod changeset;
pub mod clock;
pub mod config;
pub mod state;

pub use changeset::Changeset;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CommitConfig, ConfigError};
pub use state::{CommitEvent, CommitState, CommitStateMachine, StateError};

/// A changeset that can never be committed as given. Not retried.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("incompatible schema change: {0}")]
    IncompatibleSchema(#[from] IncompatibleSchemaError),

    #[error("invalid file change: {0}")]
    Manifest(#[from] ManifestError),

    #[error("changeset is empty")]
    EmptyChangeset,

    #[error("base snapshot {0} does not exist")]
    UnknownBase(SnapshotId),

    #[error("snapshot log rejected the candidate: {0}")]
    Log(#[from] LogError),
}

/// The pointer kept moving until the retry budget ran out.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("commit conflict after {attempts} attempts; current snapshot is {current:?}")]
pub struct CommitConflictError {
    pub attempts: u32,
    pub current: Option<SnapshotId>,
}

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Conflict(#[from] CommitConflictError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error("pointer store error: {0}")]
    Store(#[from] StoreError),

    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("commit state error: {0}")]
    State(#[from] StateError),
}

impl CommitError {
    /// Whether resubmitting the same changeset may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CommitError::Conflict(_))
    }
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReport {
    pub snapshot_id: SnapshotId,
    pub operation: Operation,
    /// Validate-and-swap attempts used, including the successful one.
    pub attempts: u32,
}

pub struct CommitCoordinator<S> {
    store: S,
    clock: Arc<dyn Clock>,
    config: CommitConfig,
    invariants: InvariantEngine,
}

impl<S: PointerStore> CommitCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config: CommitConfig::default_config(),
            invariants: InvariantEngine::with_table_invariants(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: CommitConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_invariants(mut self, invariants: InvariantEngine) -> Self {
        self.invariants = invariants;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn config(&self) -> CommitConfig {
        self.config
    }

    /// Commit `changeset`, returning the id of the new current snapshot.
    ///
    /// `base` is the snapshot the caller built the changeset against (`None`
    /// for a table without snapshots). A stale base is not an error: the
    /// changeset is validated against whatever is current.
    pub fn commit(
        &self,
        base: Option<SnapshotId>,
        changeset: Changeset,
    ) -> Result<SnapshotId, CommitError> {
        self.commit_with_report(base, &changeset)
            .map(|report| report.snapshot_id)
    }

    pub fn commit_with_report(
        &self,
        base: Option<SnapshotId>,
        changeset: &Changeset,
    ) -> Result<CommitReport, CommitError> {
        let mut machine = CommitStateMachine::new();
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut last_seen = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                machine.apply(CommitEvent::Rebased)?;
            }

            let observed = self.store.load()?.ok_or(NotFoundError::Table)?;
            let observed_id = observed.current_snapshot_id();

            if attempt == 1 && base != observed_id {
                if let Some(base) = base.filter(|b| !observed.snapshots().contains(*b)) {
                    machine.apply(CommitEvent::ValidationFailed)?;
                    return Err(ValidationError::UnknownBase(base).into());
                }
                debug!(?base, observed = ?observed_id, "base is stale; validating against current");
            }

            let candidate = match self.validate(&observed, changeset) {
                Ok(candidate) => {
                    machine.apply(CommitEvent::ValidationPassed)?;
                    candidate
                }
                Err(e) => {
                    machine.apply(CommitEvent::ValidationFailed)?;
                    debug!(error = %e, attempt, "changeset rejected");
                    return Err(e);
                }
            };

            let snapshot_id = candidate
                .current_snapshot_id()
                .ok_or_else(|| StoreError::Corrupt("candidate has no current snapshot".into()))?;

            match self
                .store
                .compare_and_swap(observed_id, Arc::new(candidate))?
            {
                SwapOutcome::Swapped => {
                    machine.apply(CommitEvent::SwapSucceeded)?;
                    info!(
                        snapshot_id = %snapshot_id,
                        parent = ?observed_id,
                        operation = %changeset.operation(),
                        attempts = machine.attempts(),
                        "commit succeeded"
                    );
                    return Ok(CommitReport {
                        snapshot_id,
                        operation: changeset.operation(),
                        attempts: machine.attempts(),
                    });
                }
                SwapOutcome::Conflict { current } => {
                    machine.apply(CommitEvent::SwapFailed)?;
                    warn!(expected = ?observed_id, ?current, attempt, "lost pointer swap; rebasing");
                    last_seen = current;
                }
            }
        }

        machine.apply(CommitEvent::RetriesExhausted)?;
        warn!(
            attempts = machine.attempts(),
            operation = %changeset.operation(),
            "giving up on commit after repeated conflicts"
        );
        Err(CommitConflictError {
            attempts: machine.attempts(),
            current: last_seen,
        }
        .into())
    }

    /// Build the candidate metadata for `changeset` on top of `observed` and
    /// check the table invariants against it.
    fn validate(
        &self,
        observed: &TableMetadata,
        changeset: &Changeset,
    ) -> Result<TableMetadata, CommitError> {
        let candidate = self.prepare(observed, changeset)?;
        self.invariants.evaluate(observed, &candidate)?;
        Ok(candidate)
    }

    fn prepare(
        &self,
        observed: &TableMetadata,
        changeset: &Changeset,
    ) -> Result<TableMetadata, ValidationError> {
        let parent = observed.current_snapshot();
        let parent_list = parent
            .map(|s| s.manifest_list().clone())
            .unwrap_or_else(|| Arc::new(ManifestList::empty()));
        let snapshot_id = observed.snapshots().next_snapshot_id();
        let manifests = observed.manifest_store();
        let mut next = observed.clone();

        let (manifest_list, schema_id) = match changeset {
            Changeset::Append { files } => (
                manifests.add_files(&parent_list, snapshot_id, files.clone())?,
                observed.current_schema_id(),
            ),
            Changeset::Overwrite { remove, add } => (
                manifests.replace_files(&parent_list, snapshot_id, remove, add.clone())?,
                observed.current_schema_id(),
            ),
            Changeset::Delete { remove } => (
                manifests.remove_files(&parent_list, snapshot_id, remove)?,
                observed.current_schema_id(),
            ),
            Changeset::EvolveSchema { changes } => {
                if changes.is_empty() {
                    return Err(ValidationError::EmptyChangeset);
                }
                let base = observed.current_schema().clone();
                let schema = next.schemas_mut().evolve(&base, changes)?;
                (manifests.carry(&parent_list, snapshot_id), schema.schema_id())
            }
        };

        // Commit time never runs backwards along the parent chain, even if
        // the clock does.
        let now = self.clock.now();
        let committed_at = parent.map_or(now, |p| now.max(p.committed_at()));

        let operation = changeset.operation();
        let summary = summarize(operation, &manifest_list, schema_id);
        let snapshot = Snapshot::new(
            snapshot_id,
            parent.map(|p| p.snapshot_id()),
            operation,
            committed_at,
            schema_id,
            Arc::new(manifest_list),
        )
        .with_summary(summary);

        next.push_snapshot(snapshot)?;
        Ok(next)
    }
}

fn summarize(
    operation: Operation,
    list: &ManifestList,
    schema_id: SchemaId,
) -> BTreeMap<String, String> {
    let (added_files, added_records) = list
        .added_entries()
        .fold((0u64, 0u64), |(n, r), e| (n + 1, r + e.data_file.record_count));
    let (deleted_files, deleted_records) = list
        .deleted_entries()
        .fold((0u64, 0u64), |(n, r), e| (n + 1, r + e.data_file.record_count));

    let mut summary = BTreeMap::new();
    summary.insert("operation".to_string(), operation.to_string());
    summary.insert("added-data-files".to_string(), added_files.to_string());
    summary.insert("added-records".to_string(), added_records.to_string());
    summary.insert("deleted-data-files".to_string(), deleted_files.to_string());
    summary.insert("deleted-records".to_string(), deleted_records.to_string());
    summary.insert(
        "total-data-files".to_string(),
        list.live_file_count().to_string(),
    );
    summary.insert("total-records".to_string(), list.total_records().to_string());
    if operation == Operation::SchemaChange {
        summary.insert("schema-id".to_string(), schema_id.to_string());
    }
    summary
}
