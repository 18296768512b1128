// Time-Travel Resolver
//
// Read-side lookups over one immutable TableMetadata. Every read resolves to
// a snapshot and then to the schema version that snapshot was committed
// with, so a dropped or renamed column never leaks into an older read.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::log::{NotFoundError, SnapshotRef};
use crate::manifest::{DataFile, ManifestList};
use crate::metadata::TableMetadata;
use crate::schema::Schema;
use crate::snapshot::SnapshotId;

/// Which table state a read should observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSelector {
    Current,
    ById(SnapshotId),
    AsOf(DateTime<Utc>),
}

/// A consistent (schema, manifest list) pair for one table state.
#[derive(Debug, Clone)]
pub struct ReadView {
    schema: Arc<Schema>,
    manifest_list: Arc<ManifestList>,
    snapshot: Option<SnapshotRef>,
}

impl ReadView {
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn manifest_list(&self) -> &Arc<ManifestList> {
        &self.manifest_list
    }

    /// `None` only for the current state of a table with no commits yet.
    pub fn snapshot(&self) -> Option<&SnapshotRef> {
        self.snapshot.as_ref()
    }

    pub fn snapshot_id(&self) -> Option<SnapshotId> {
        self.snapshot.as_ref().map(|s| s.snapshot_id())
    }

    pub fn files(&self) -> impl Iterator<Item = &DataFile> {
        self.manifest_list.live_files()
    }
}

pub struct TimeTravelResolver<'a> {
    metadata: &'a TableMetadata,
}

impl<'a> TimeTravelResolver<'a> {
    pub fn new(metadata: &'a TableMetadata) -> Self {
        Self { metadata }
    }

    /// The latest snapshot committed at or before `t`.
    pub fn as_of_timestamp(&self, t: DateTime<Utc>) -> Result<&'a SnapshotRef, NotFoundError> {
        self.metadata.snapshots().latest_as_of(t)
    }

    pub fn as_of_snapshot_id(&self, id: SnapshotId) -> Result<&'a SnapshotRef, NotFoundError> {
        self.metadata.snapshots().by_id(id)
    }

    pub fn resolve(&self, selector: SnapshotSelector) -> Result<ReadView, NotFoundError> {
        let snapshot = match selector {
            SnapshotSelector::Current => match self.metadata.current_snapshot() {
                Some(snapshot) => snapshot,
                None => {
                    return Ok(ReadView {
                        schema: self.metadata.current_schema().clone(),
                        manifest_list: Arc::new(ManifestList::empty()),
                        snapshot: None,
                    })
                }
            },
            SnapshotSelector::ById(id) => self.as_of_snapshot_id(id)?,
            SnapshotSelector::AsOf(t) => self.as_of_timestamp(t)?,
        };

        self.view_of(snapshot)
    }

    fn view_of(&self, snapshot: &SnapshotRef) -> Result<ReadView, NotFoundError> {
        let schema = self
            .metadata
            .schema_by_id(snapshot.schema_id())
            .ok_or(NotFoundError::Schema(snapshot.schema_id()))?;

        Ok(ReadView {
            schema: schema.clone(),
            manifest_list: snapshot.manifest_list().clone(),
            snapshot: Some(snapshot.clone()),
        })
    }
}
