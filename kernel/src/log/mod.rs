// Snapshot Log
//
// The append-only history of every snapshot committed to a table. Entries
// are never rewritten or removed; appends are checked so that ids stay
// sequential, parents exist, and commit time never runs backwards along a
// parent chain.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::SchemaId;
use crate::snapshot::{Snapshot, SnapshotId};

pub mod fs;
pub mod store;

pub use fs::FileSystemPointerStore;
pub use store::{InMemoryPointerStore, PointerStore, StoreError, SwapOutcome};

/// Shared handle to a snapshot stored in the log.
pub type SnapshotRef = Arc<Snapshot>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LogError {
    #[error("snapshot id out of sequence: expected {expected}, got {actual}")]
    OutOfSequence {
        expected: SnapshotId,
        actual: SnapshotId,
    },

    #[error("snapshot {snapshot} references missing parent {parent}")]
    MissingParent {
        snapshot: SnapshotId,
        parent: SnapshotId,
    },

    #[error("snapshot {snapshot} has no parent but the log already has a root")]
    SecondRoot { snapshot: SnapshotId },

    #[error("snapshot {snapshot} was committed before its parent {parent}")]
    TimeRegression {
        snapshot: SnapshotId,
        parent: SnapshotId,
    },
}

/// Lookup failures on the read side.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("snapshot {0} does not exist")]
    Snapshot(SnapshotId),

    #[error("no snapshot was committed at or before {0}")]
    NoSnapshotAsOf(DateTime<Utc>),

    #[error("schema {0} does not exist")]
    Schema(SchemaId),

    #[error("table does not exist")]
    Table,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotLog {
    snapshots: Vec<SnapshotRef>,
}

impl SnapshotLog {
    pub fn new() -> Self {
        Self {
            snapshots: Vec::new(),
        }
    }

    pub fn append(&mut self, snapshot: Snapshot) -> Result<SnapshotRef, LogError> {
        let expected = self.next_snapshot_id();
        let id = snapshot.snapshot_id();

        if id != expected {
            return Err(LogError::OutOfSequence {
                expected,
                actual: id,
            });
        }

        match snapshot.parent_snapshot_id() {
            Some(parent_id) => {
                let parent = self.by_id(parent_id).map_err(|_| LogError::MissingParent {
                    snapshot: id,
                    parent: parent_id,
                })?;
                if snapshot.committed_at() < parent.committed_at() {
                    return Err(LogError::TimeRegression {
                        snapshot: id,
                        parent: parent_id,
                    });
                }
            }
            None if !self.snapshots.is_empty() => {
                return Err(LogError::SecondRoot { snapshot: id });
            }
            None => {}
        }

        let snapshot = Arc::new(snapshot);
        self.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    /// All snapshots in commit order. The returned iterator can be cloned
    /// to restart the walk.
    pub fn history(&self) -> std::slice::Iter<'_, SnapshotRef> {
        self.snapshots.iter()
    }

    pub fn by_id(&self, id: SnapshotId) -> Result<&SnapshotRef, NotFoundError> {
        // Ids are assigned sequentially from 1, so the id is the position.
        id.0.checked_sub(1)
            .and_then(|idx| usize::try_from(idx).ok())
            .and_then(|idx| self.snapshots.get(idx))
            .filter(|s| s.snapshot_id() == id)
            .ok_or(NotFoundError::Snapshot(id))
    }

    pub fn contains(&self, id: SnapshotId) -> bool {
        self.by_id(id).is_ok()
    }

    /// Walk parent links starting at (and including) `id`.
    pub fn ancestors_of(&self, id: SnapshotId) -> Ancestors<'_> {
        Ancestors {
            log: self,
            next: Some(id),
        }
    }

    /// Latest snapshot committed at or before `t`. Among equal timestamps
    /// the one committed last wins.
    pub fn latest_as_of(&self, t: DateTime<Utc>) -> Result<&SnapshotRef, NotFoundError> {
        let mut found: Option<&SnapshotRef> = None;
        for snapshot in self.history() {
            if snapshot.committed_at() > t {
                continue;
            }
            match found {
                Some(best) if best.committed_at() > snapshot.committed_at() => {}
                _ => found = Some(snapshot),
            }
        }
        found.ok_or(NotFoundError::NoSnapshotAsOf(t))
    }

    pub fn last(&self) -> Option<&SnapshotRef> {
        self.snapshots.last()
    }

    pub fn next_snapshot_id(&self) -> SnapshotId {
        self.last()
            .map(|s| s.snapshot_id().next())
            .unwrap_or(SnapshotId::FIRST)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Whether `self` holds every entry of `earlier`, in the same order.
    pub fn extends(&self, earlier: &SnapshotLog) -> bool {
        earlier.len() <= self.len()
            && earlier
                .history()
                .zip(self.history())
                .all(|(a, b)| Arc::ptr_eq(a, b) || a == b)
    }
}

/// Iterator over a snapshot and its ancestors, newest first.
#[derive(Debug, Clone)]
pub struct Ancestors<'a> {
    log: &'a SnapshotLog,
    next: Option<SnapshotId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a SnapshotRef;

    fn next(&mut self) -> Option<Self::Item> {
        let snapshot = self.log.by_id(self.next?).ok()?;
        self.next = snapshot.parent_snapshot_id();
        Some(snapshot)
    }
}
