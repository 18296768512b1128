// Manifest Store
//
// Builds the manifest list of a new snapshot from its parent's list.
// Parent lists are never modified: untouched manifests are shared by
// reference, touched ones are rewritten into new manifests.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use super::{DataFile, Manifest, ManifestEntry, ManifestError, ManifestList, ManifestStatus};
use crate::snapshot::SnapshotId;

#[derive(Debug, Clone)]
pub struct ManifestStore {
    metadata_location: String,
}

impl ManifestStore {
    pub fn new(metadata_location: impl Into<String>) -> Self {
        Self {
            metadata_location: metadata_location.into(),
        }
    }

    /// Add `files` as ADDED entries in a fresh manifest, carrying over
    /// every parent manifest that still has live entries.
    pub fn add_files(
        &self,
        parent: &ManifestList,
        snapshot_id: SnapshotId,
        files: Vec<DataFile>,
    ) -> Result<ManifestList, ManifestError> {
        let manifests = self.with_added(carried(parent), parent, snapshot_id, files)?;
        Ok(self.list(snapshot_id, manifests))
    }

    /// Mark the entries for `file_paths` DELETED. Manifests holding them are
    /// rewritten with their other entries as EXISTING.
    pub fn remove_files(
        &self,
        parent: &ManifestList,
        snapshot_id: SnapshotId,
        file_paths: &[String],
    ) -> Result<ManifestList, ManifestError> {
        let manifests = with_removed(parent, snapshot_id, file_paths)?;
        Ok(self.list(snapshot_id, manifests))
    }

    /// Remove and add in one step, as an overwrite does.
    pub fn replace_files(
        &self,
        parent: &ManifestList,
        snapshot_id: SnapshotId,
        file_paths: &[String],
        files: Vec<DataFile>,
    ) -> Result<ManifestList, ManifestError> {
        let remaining = with_removed(parent, snapshot_id, file_paths)?;
        let removed: HashSet<&str> = file_paths.iter().map(String::as_str).collect();

        // Files removed here may be re-added under the same path.
        for file in &files {
            if parent.contains_live(&file.file_path) && !removed.contains(file.file_path.as_str()) {
                return Err(ManifestError::DuplicateFile {
                    path: file.file_path.clone(),
                });
            }
        }

        let manifests = self.with_added(remaining, &ManifestList::empty(), snapshot_id, files)?;
        Ok(self.list(snapshot_id, manifests))
    }

    /// A list with exactly the parent's manifests, for snapshots that do not
    /// change data.
    pub fn carry(&self, parent: &ManifestList, snapshot_id: SnapshotId) -> ManifestList {
        self.list(snapshot_id, carried(parent))
    }

    fn with_added(
        &self,
        mut manifests: Vec<Arc<Manifest>>,
        parent: &ManifestList,
        snapshot_id: SnapshotId,
        files: Vec<DataFile>,
    ) -> Result<Vec<Arc<Manifest>>, ManifestError> {
        if files.is_empty() {
            return Err(ManifestError::EmptyFileSet);
        }

        let mut seen = HashSet::new();
        for file in &files {
            if !seen.insert(file.file_path.as_str()) || parent.contains_live(&file.file_path) {
                return Err(ManifestError::DuplicateFile {
                    path: file.file_path.clone(),
                });
            }
        }

        let entries = files
            .into_iter()
            .map(|data_file| ManifestEntry {
                status: ManifestStatus::Added,
                snapshot_id,
                data_file,
            })
            .collect();

        manifests.insert(0, Arc::new(Manifest::new(snapshot_id, entries)));
        Ok(manifests)
    }

    fn list(&self, snapshot_id: SnapshotId, manifests: Vec<Arc<Manifest>>) -> ManifestList {
        let location = format!(
            "{}/snap-{}-{}.json",
            self.metadata_location.trim_end_matches('/'),
            snapshot_id,
            Uuid::new_v4()
        );
        ManifestList::new(location, snapshot_id, manifests)
    }
}

fn carried(parent: &ManifestList) -> Vec<Arc<Manifest>> {
    parent
        .manifests()
        .iter()
        .filter(|m| m.has_live_entries())
        .cloned()
        .collect()
}

fn with_removed(
    parent: &ManifestList,
    snapshot_id: SnapshotId,
    file_paths: &[String],
) -> Result<Vec<Arc<Manifest>>, ManifestError> {
    if file_paths.is_empty() {
        return Err(ManifestError::EmptyFileSet);
    }

    let mut targets = HashSet::new();
    for path in file_paths {
        if !targets.insert(path.as_str()) || !parent.contains_live(path) {
            return Err(ManifestError::FileNotLive { path: path.clone() });
        }
    }

    let mut manifests = Vec::with_capacity(parent.manifests().len());
    for manifest in carried(parent) {
        let touched = manifest
            .live_entries()
            .any(|e| targets.contains(e.data_file.file_path.as_str()));
        if !touched {
            manifests.push(manifest);
            continue;
        }

        // Deletions recorded by earlier snapshots are not carried forward.
        let entries = manifest
            .live_entries()
            .map(|e| {
                if targets.contains(e.data_file.file_path.as_str()) {
                    ManifestEntry {
                        status: ManifestStatus::Deleted,
                        snapshot_id,
                        data_file: e.data_file.clone(),
                    }
                } else {
                    ManifestEntry {
                        status: ManifestStatus::Existing,
                        snapshot_id: e.snapshot_id,
                        data_file: e.data_file.clone(),
                    }
                }
            })
            .collect();
        manifests.push(Arc::new(Manifest::new(snapshot_id, entries)));
    }

    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ManifestStore {
        ManifestStore::new("warehouse/db/employees/metadata")
    }

    fn file(path: &str, rows: u64) -> DataFile {
        DataFile::new(path, rows, rows * 512)
    }

    fn paths(list: &ManifestList) -> Vec<&str> {
        let mut paths: Vec<_> = list.live_files().map(|f| f.file_path.as_str()).collect();
        paths.sort();
        paths
    }

    #[test]
    fn add_files_shares_parent_manifests() {
        let store = store();
        let s1 = store
            .add_files(&ManifestList::empty(), SnapshotId(1), vec![file("a", 3)])
            .unwrap();
        let s2 = store
            .add_files(&s1, SnapshotId(2), vec![file("b", 2)])
            .unwrap();

        assert_eq!(paths(&s2), vec!["a", "b"]);
        assert_eq!(s2.manifests().len(), 2);
        assert!(Arc::ptr_eq(&s1.manifests()[0], &s2.manifests()[1]));
        assert_eq!(paths(&s1), vec!["a"]);
        assert!(s2.location().starts_with("warehouse/db/employees/metadata/snap-2-"));
    }

    #[test]
    fn add_files_rejects_duplicates() {
        let store = store();
        let s1 = store
            .add_files(&ManifestList::empty(), SnapshotId(1), vec![file("a", 3)])
            .unwrap();

        let err = store
            .add_files(&s1, SnapshotId(2), vec![file("a", 3)])
            .unwrap_err();
        assert_eq!(err, ManifestError::DuplicateFile { path: "a".into() });

        let err = store
            .add_files(&s1, SnapshotId(2), vec![file("b", 1), file("b", 1)])
            .unwrap_err();
        assert_eq!(err, ManifestError::DuplicateFile { path: "b".into() });

        let err = store.add_files(&s1, SnapshotId(2), vec![]).unwrap_err();
        assert_eq!(err, ManifestError::EmptyFileSet);
    }

    #[test]
    fn remove_files_rewrites_only_touched_manifests() {
        let store = store();
        let s1 = store
            .add_files(
                &ManifestList::empty(),
                SnapshotId(1),
                vec![file("a", 1), file("b", 2)],
            )
            .unwrap();
        let s2 = store
            .add_files(&s1, SnapshotId(2), vec![file("c", 4)])
            .unwrap();
        let s3 = store
            .remove_files(&s2, SnapshotId(3), &["a".to_string()])
            .unwrap();

        assert_eq!(paths(&s3), vec!["b", "c"]);
        assert!(Arc::ptr_eq(&s2.manifests()[0], &s3.manifests()[0]));

        let rewritten = &s3.manifests()[1];
        let statuses: Vec<_> = rewritten
            .entries()
            .iter()
            .map(|e| (e.data_file.file_path.as_str(), e.status, e.snapshot_id))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("a", ManifestStatus::Deleted, SnapshotId(3)),
                ("b", ManifestStatus::Existing, SnapshotId(1)),
            ]
        );
        assert_eq!(s3.deleted_entries().count(), 1);
        assert_eq!(paths(&s2), vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_requires_live_files() {
        let store = store();
        let s1 = store
            .add_files(&ManifestList::empty(), SnapshotId(1), vec![file("a", 1)])
            .unwrap();
        let s2 = store
            .remove_files(&s1, SnapshotId(2), &["a".to_string()])
            .unwrap();

        let err = store
            .remove_files(&s2, SnapshotId(3), &["a".to_string()])
            .unwrap_err();
        assert_eq!(err, ManifestError::FileNotLive { path: "a".into() });
    }

    #[test]
    fn fully_deleted_manifests_are_dropped_later() {
        let store = store();
        let s1 = store
            .add_files(&ManifestList::empty(), SnapshotId(1), vec![file("a", 1)])
            .unwrap();
        let s2 = store
            .remove_files(&s1, SnapshotId(2), &["a".to_string()])
            .unwrap();
        assert_eq!(s2.manifests().len(), 1);

        let s3 = store.carry(&s2, SnapshotId(3));
        assert!(s3.manifests().is_empty());
        assert_eq!(s3.snapshot_id(), Some(SnapshotId(3)));
    }

    #[test]
    fn replace_allows_rewriting_removed_path() {
        let store = store();
        let s1 = store
            .add_files(
                &ManifestList::empty(),
                SnapshotId(1),
                vec![file("a", 1), file("b", 1)],
            )
            .unwrap();

        let s2 = store
            .replace_files(&s1, SnapshotId(2), &["a".to_string()], vec![file("a", 10)])
            .unwrap();
        assert_eq!(paths(&s2), vec!["a", "b"]);
        assert_eq!(s2.total_records(), 11);

        let err = store
            .replace_files(&s1, SnapshotId(2), &["a".to_string()], vec![file("b", 1)])
            .unwrap_err();
        assert_eq!(err, ManifestError::DuplicateFile { path: "b".into() });
    }

    #[test]
    fn carried_entries_keep_the_status_their_writer_gave_them() {
        let store = store();
        let s1 = store
            .add_files(&ManifestList::empty(), SnapshotId(1), vec![file("a", 3)])
            .unwrap();
        let s2 = store
            .add_files(&s1, SnapshotId(2), vec![file("b", 2)])
            .unwrap();

        // "a" is still ADDED by snapshot 1 inside the shared manifest.
        let a = s2.entries().find(|e| e.data_file.file_path == "a").unwrap();
        assert_eq!(a.status, ManifestStatus::Added);
        assert_eq!(a.snapshot_id, SnapshotId(1));

        // Only snapshot 2's own additions count as added by it.
        let added: Vec<_> = s2
            .added_entries()
            .map(|e| e.data_file.file_path.as_str())
            .collect();
        assert_eq!(added, vec!["b"]);
    }
}
