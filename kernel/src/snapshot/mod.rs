// Snapshots
//
// A snapshot is an immutable, fully resolved view of a table: it pins one
// manifest list and one schema version, and links to its parent.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::manifest::ManifestList;
use crate::schema::SchemaId;

/// Snapshot identifier. Assigned in commit order, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub u64);

impl SnapshotId {
    pub const FIRST: SnapshotId = SnapshotId(1);

    pub fn next(self) -> SnapshotId {
        SnapshotId(self.0 + 1)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of change a snapshot records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Append,
    Overwrite,
    Delete,
    SchemaChange,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Append => "append",
            Operation::Overwrite => "overwrite",
            Operation::Delete => "delete",
            Operation::SchemaChange => "schema-change",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Snapshot {
    snapshot_id: SnapshotId,
    parent_snapshot_id: Option<SnapshotId>,
    operation: Operation,
    committed_at: DateTime<Utc>,
    schema_id: SchemaId,
    /// Written as the list's location. The list itself lives in its own
    /// file; a decoded snapshot holds an unresolved placeholder until the
    /// store swaps in the loaded list.
    #[serde(with = "list_location")]
    manifest_list: Arc<ManifestList>,
    #[serde(default)]
    summary: BTreeMap<String, String>,
}

impl Snapshot {
    pub fn new(
        snapshot_id: SnapshotId,
        parent_snapshot_id: Option<SnapshotId>,
        operation: Operation,
        committed_at: DateTime<Utc>,
        schema_id: SchemaId,
        manifest_list: Arc<ManifestList>,
    ) -> Self {
        Self {
            snapshot_id,
            parent_snapshot_id,
            operation,
            committed_at,
            schema_id,
            manifest_list,
            summary: BTreeMap::new(),
        }
    }

    pub fn with_summary(mut self, summary: BTreeMap<String, String>) -> Self {
        self.summary = summary;
        self
    }

    pub fn snapshot_id(&self) -> SnapshotId {
        self.snapshot_id
    }

    pub fn parent_snapshot_id(&self) -> Option<SnapshotId> {
        self.parent_snapshot_id
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }

    pub fn schema_id(&self) -> SchemaId {
        self.schema_id
    }

    pub fn manifest_list(&self) -> &Arc<ManifestList> {
        &self.manifest_list
    }

    pub fn summary(&self) -> &BTreeMap<String, String> {
        &self.summary
    }

    /// Same snapshot, pinned to `manifest_list`.
    pub(crate) fn with_manifest_list(&self, manifest_list: Arc<ManifestList>) -> Snapshot {
        Snapshot {
            manifest_list,
            ..self.clone()
        }
    }
}

mod list_location {
    use std::sync::Arc;

    use serde::{Deserialize, Deserializer, Serializer};

    use crate::manifest::ManifestList;

    pub fn serialize<S>(list: &Arc<ManifestList>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(list.location())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<ManifestList>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let location = String::deserialize(deserializer)?;
        Ok(Arc::new(ManifestList::unresolved(location)))
    }
}
