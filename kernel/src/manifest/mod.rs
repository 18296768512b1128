// File-Level Table Metadata
//
// Data files are tracked through manifests. A manifest list names every
// manifest valid for one snapshot; together they fully determine which
// rows the snapshot exposes. All of these values are immutable once built,
// and manifest lists share unchanged manifests with their parents.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::snapshot::SnapshotId;

pub mod store;

pub use store::ManifestStore;

/// A data file written by an external engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataFile {
    pub file_path: String,
    #[serde(default)]
    pub partition: BTreeMap<String, String>,
    pub record_count: u64,
    pub file_size_in_bytes: u64,
}

impl DataFile {
    pub fn new(file_path: impl Into<String>, record_count: u64, file_size_in_bytes: u64) -> Self {
        Self {
            file_path: file_path.into(),
            partition: BTreeMap::new(),
            record_count,
            file_size_in_bytes,
        }
    }

    pub fn with_partition(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.partition.insert(field.into(), value.into());
        self
    }
}

/// Status of an entry relative to the snapshot whose manifest list holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ManifestStatus {
    Existing,
    Added,
    Deleted,
}

impl ManifestStatus {
    pub fn is_live(&self) -> bool {
        !matches!(self, ManifestStatus::Deleted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestEntry {
    pub status: ManifestStatus,
    /// Snapshot that added the file, or that deleted it for DELETED entries.
    pub snapshot_id: SnapshotId,
    pub data_file: DataFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Manifest {
    manifest_id: Uuid,
    added_snapshot_id: SnapshotId,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub(crate) fn new(added_snapshot_id: SnapshotId, entries: Vec<ManifestEntry>) -> Self {
        Self {
            manifest_id: Uuid::new_v4(),
            added_snapshot_id,
            entries,
        }
    }

    pub fn manifest_id(&self) -> Uuid {
        self.manifest_id
    }

    /// Snapshot that wrote this manifest.
    pub fn added_snapshot_id(&self) -> SnapshotId {
        self.added_snapshot_id
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn live_entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| e.status.is_live())
    }

    pub fn has_live_entries(&self) -> bool {
        self.live_entries().next().is_some()
    }
}

/// Manifests valid for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestList {
    location: String,
    snapshot_id: Option<SnapshotId>,
    manifests: Vec<Arc<Manifest>>,
}

impl ManifestList {
    /// The list seen by a table that has no snapshot yet.
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn new(
        location: String,
        snapshot_id: SnapshotId,
        manifests: Vec<Arc<Manifest>>,
    ) -> Self {
        Self {
            location,
            snapshot_id: Some(snapshot_id),
            manifests,
        }
    }

    /// A reference to a list that has not been loaded yet.
    pub(crate) fn unresolved(location: String) -> Self {
        Self {
            location,
            ..Self::default()
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn snapshot_id(&self) -> Option<SnapshotId> {
        self.snapshot_id
    }

    pub fn manifests(&self) -> &[Arc<Manifest>] {
        &self.manifests
    }

    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.manifests.iter().flat_map(|m| m.entries.iter())
    }

    /// Files whose rows are visible in this snapshot.
    pub fn live_files(&self) -> impl Iterator<Item = &DataFile> {
        self.entries()
            .filter(|e| e.status.is_live())
            .map(|e| &e.data_file)
    }

    pub fn contains_live(&self, file_path: &str) -> bool {
        self.live_files().any(|f| f.file_path == file_path)
    }

    pub fn live_file_count(&self) -> usize {
        self.live_files().count()
    }

    pub fn total_records(&self) -> u64 {
        self.live_files().map(|f| f.record_count).sum()
    }

    /// Entries this list's own snapshot added.
    pub fn added_entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries_changed_here(ManifestStatus::Added)
    }

    /// Entries this list's own snapshot deleted.
    pub fn deleted_entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries_changed_here(ManifestStatus::Deleted)
    }

    fn entries_changed_here(&self, status: ManifestStatus) -> impl Iterator<Item = &ManifestEntry> {
        let snapshot_id = self.snapshot_id;
        self.entries()
            .filter(move |e| e.status == status && Some(e.snapshot_id) == snapshot_id)
    }
}

/// Manifest rule violations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("data file `{path}` is already part of the table")]
    DuplicateFile { path: String },

    #[error("data file `{path}` is not live in the base snapshot")]
    FileNotLive { path: String },

    #[error("no data files given")]
    EmptyFileSet,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status: ManifestStatus, snapshot: u64, path: &str, rows: u64) -> ManifestEntry {
        ManifestEntry {
            status,
            snapshot_id: SnapshotId(snapshot),
            data_file: DataFile::new(path, rows, rows * 100),
        }
    }

    #[test]
    fn live_files_skip_deleted_entries() {
        let manifest = Manifest::new(
            SnapshotId(2),
            vec![
                entry(ManifestStatus::Existing, 1, "a.parquet", 3),
                entry(ManifestStatus::Deleted, 2, "b.parquet", 4),
                entry(ManifestStatus::Added, 2, "c.parquet", 5),
            ],
        );
        let list = ManifestList::new("snap-2.json".into(), SnapshotId(2), vec![Arc::new(manifest)]);

        let live: Vec<_> = list.live_files().map(|f| f.file_path.as_str()).collect();
        assert_eq!(live, vec!["a.parquet", "c.parquet"]);
        assert_eq!(list.total_records(), 8);
        assert!(!list.contains_live("b.parquet"));
        assert_eq!(list.added_entries().count(), 1);
        assert_eq!(list.deleted_entries().count(), 1);
    }

    #[test]
    fn empty_list_has_no_files() {
        let list = ManifestList::empty();
        assert_eq!(list.live_file_count(), 0);
        assert_eq!(list.snapshot_id(), None);
        assert_eq!(list.added_entries().count(), 0);
    }

    #[test]
    fn status_serializes_uppercase() {
        let json = serde_json::to_string(&ManifestStatus::Added).unwrap();
        assert_eq!(json, r#""ADDED""#);
    }
}
