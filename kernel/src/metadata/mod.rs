// Table Metadata
//
// The single unit that is swapped atomically on commit: schema history,
// snapshot log, and the current-snapshot pointer. Serialized with the
// kebab-case keys used by Iceberg metadata files.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::log::{LogError, SnapshotLog, SnapshotRef};
use crate::manifest::{ManifestList, ManifestStore};
use crate::schema::{ColumnSpec, IncompatibleSchemaError, Schema, SchemaId, SchemaRegistry};
use crate::snapshot::{Snapshot, SnapshotId};

pub mod tables;

pub use tables::{HistoryEntry, SnapshotEntry};

pub const FORMAT_VERSION: u8 = 1;

/// A decoded metadata document that breaks a rule commits maintain.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("unsupported format version {0}")]
    UnsupportedFormat(u8),

    #[error("current schema {0} is not in the schema history")]
    UnknownCurrentSchema(SchemaId),

    #[error("snapshot {snapshot} pins unknown schema {schema}")]
    UnknownSnapshotSchema {
        snapshot: SnapshotId,
        schema: SchemaId,
    },

    #[error("current snapshot {0} is not in the snapshot log")]
    DanglingCurrentSnapshot(SnapshotId),

    #[error("snapshot log has entries but no current snapshot")]
    NoCurrentSnapshot,

    #[error("manifest list {location} belongs to {actual:?}, not snapshot {snapshot}")]
    ManifestListMismatch {
        location: String,
        snapshot: SnapshotId,
        actual: Option<SnapshotId>,
    },

    #[error(transparent)]
    Log(#[from] LogError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TableMetadata {
    format_version: u8,
    table_uuid: Uuid,
    location: String,
    last_updated_at: DateTime<Utc>,
    current_schema_id: SchemaId,
    #[serde(flatten)]
    schemas: SchemaRegistry,
    current_snapshot_id: Option<SnapshotId>,
    snapshots: SnapshotLog,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

impl TableMetadata {
    /// Metadata for a new table: schema v1 and no snapshot.
    pub fn new(
        location: impl Into<String>,
        columns: Vec<ColumnSpec>,
        properties: BTreeMap<String, String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, IncompatibleSchemaError> {
        let schemas = SchemaRegistry::create(columns)?;
        let current_schema_id = schemas.latest().schema_id();

        Ok(Self {
            format_version: FORMAT_VERSION,
            table_uuid: Uuid::new_v4(),
            location: location.into(),
            last_updated_at: created_at,
            current_schema_id,
            schemas,
            current_snapshot_id: None,
            snapshots: SnapshotLog::new(),
            properties,
        })
    }

    pub fn format_version(&self) -> u8 {
        self.format_version
    }

    pub fn table_uuid(&self) -> Uuid {
        self.table_uuid
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn last_updated_at(&self) -> DateTime<Utc> {
        self.last_updated_at
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn current_schema_id(&self) -> SchemaId {
        self.current_schema_id
    }

    pub fn current_schema(&self) -> &Arc<Schema> {
        self.schemas
            .by_id(self.current_schema_id)
            .unwrap_or_else(|| self.schemas.latest())
    }

    pub fn schema_by_id(&self, id: SchemaId) -> Option<&Arc<Schema>> {
        self.schemas.by_id(id)
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn current_snapshot_id(&self) -> Option<SnapshotId> {
        self.current_snapshot_id
    }

    pub fn current_snapshot(&self) -> Option<&SnapshotRef> {
        self.current_snapshot_id
            .and_then(|id| self.snapshots.by_id(id).ok())
    }

    pub fn snapshots(&self) -> &SnapshotLog {
        &self.snapshots
    }

    /// Where manifest lists for this table are placed.
    pub fn manifest_store(&self) -> ManifestStore {
        ManifestStore::new(format!("{}/metadata", self.location.trim_end_matches('/')))
    }

    pub fn history(&self) -> impl Iterator<Item = HistoryEntry> + '_ {
        tables::history(self)
    }

    pub fn snapshot_entries(&self) -> impl Iterator<Item = SnapshotEntry> + '_ {
        tables::snapshots(self)
    }

    /// Check a decoded document and attach its manifest lists.
    ///
    /// Every snapshot is replayed through [`SnapshotLog::append`] with the
    /// list `resolve` returns for it, so the rebuilt log obeys the same
    /// ordering rules as one grown by commits.
    pub(crate) fn resolved<E>(
        mut self,
        mut resolve: impl FnMut(&Snapshot) -> Result<Arc<ManifestList>, E>,
    ) -> Result<Self, E>
    where
        E: From<MetadataError>,
    {
        if self.format_version != FORMAT_VERSION {
            return Err(MetadataError::UnsupportedFormat(self.format_version).into());
        }
        if self.schemas.by_id(self.current_schema_id).is_none() {
            return Err(MetadataError::UnknownCurrentSchema(self.current_schema_id).into());
        }

        let mut log = SnapshotLog::new();
        for snapshot in self.snapshots.history() {
            let snapshot: &Snapshot = snapshot;
            if self.schemas.by_id(snapshot.schema_id()).is_none() {
                return Err(MetadataError::UnknownSnapshotSchema {
                    snapshot: snapshot.snapshot_id(),
                    schema: snapshot.schema_id(),
                }
                .into());
            }

            let list = resolve(snapshot)?;
            if list.snapshot_id() != Some(snapshot.snapshot_id()) {
                return Err(MetadataError::ManifestListMismatch {
                    location: list.location().to_string(),
                    snapshot: snapshot.snapshot_id(),
                    actual: list.snapshot_id(),
                }
                .into());
            }

            log.append(snapshot.with_manifest_list(list))
                .map_err(MetadataError::from)?;
        }

        match self.current_snapshot_id {
            Some(id) if !log.contains(id) => {
                return Err(MetadataError::DanglingCurrentSnapshot(id).into());
            }
            None if !log.is_empty() => return Err(MetadataError::NoCurrentSnapshot.into()),
            _ => {}
        }

        self.snapshots = log;
        Ok(self)
    }

    pub(crate) fn schemas_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.schemas
    }

    /// Append `snapshot` to the log and make it current.
    pub(crate) fn push_snapshot(&mut self, snapshot: Snapshot) -> Result<SnapshotRef, LogError> {
        let snapshot = self.snapshots.append(snapshot)?;
        self.current_snapshot_id = Some(snapshot.snapshot_id());
        self.current_schema_id = snapshot.schema_id();
        self.last_updated_at = snapshot.committed_at();
        Ok(snapshot)
    }
}
