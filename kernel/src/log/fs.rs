// File-System Pointer Store
//
// Keeps one JSON file per metadata version under `<table>/metadata/`,
// next to the manifest lists and manifests it references:
//
//   metadata/v1.metadata.json
//   metadata/v2.metadata.json
//   metadata/version-hint.text      # advisory, e.g. "2\n"
//   metadata/snap-2-<uuid>.json     # manifest list, by manifest id
//   metadata/manifest-<uuid>.json   # one manifest, shared by later lists
//
// A version file is published by hard-linking a fully written temp file
// into place. Linking fails if the target exists, so exactly one writer can
// create any given version; that is the compare-and-swap. The hint is only
// a starting point for readers, who scan forward for newer versions.
//
// Manifests and manifest lists are written once, before the version that
// first references them, and never change afterwards. Loaded ones are
// cached per store, so lists shared between snapshots stay shared.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::store::{PointerStore, StoreError, SwapOutcome};
use crate::manifest::{Manifest, ManifestList};
use crate::metadata::{MetadataError, TableMetadata};
use crate::snapshot::SnapshotId;

#[derive(Debug, Clone)]
pub struct FileSystemPointerStore {
    root: PathBuf,
    cache: Arc<Mutex<ManifestCache>>,
}

#[derive(Debug, Default)]
struct ManifestCache {
    manifests: HashMap<Uuid, Arc<Manifest>>,
    lists: HashMap<String, Arc<ManifestList>>,
}

/// A manifest list as written to disk. Manifests are referenced by id.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ManifestListFile {
    snapshot_id: SnapshotId,
    manifests: Vec<Uuid>,
}

impl FileSystemPointerStore {
    pub const METADATA_DIR: &'static str = "metadata";
    pub const VERSION_HINT: &'static str = "version-hint.text";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Arc::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn metadata_dir(&self) -> PathBuf {
        self.root.join(Self::METADATA_DIR)
    }

    fn version_path(&self, version: u64) -> PathBuf {
        self.metadata_dir().join(format!("v{version}.metadata.json"))
    }

    fn hint_path(&self) -> PathBuf {
        self.metadata_dir().join(Self::VERSION_HINT)
    }

    fn manifest_path(&self, id: Uuid) -> PathBuf {
        self.metadata_dir().join(format!("manifest-{id}.json"))
    }

    /// Lists are stored under this table's metadata directory whatever
    /// prefix their location carries.
    fn list_path(&self, location: &str) -> Result<PathBuf, StoreError> {
        Path::new(location)
            .file_name()
            .map(|name| self.metadata_dir().join(name))
            .ok_or_else(|| {
                StoreError::Corrupt(format!("invalid manifest list location {location:?}"))
            })
    }

    /// Highest published metadata version, or `None` for a missing table.
    pub fn current_version(&self) -> Result<Option<u64>, StoreError> {
        let hint = match fs::read_to_string(self.hint_path()) {
            Ok(contents) => {
                let trimmed = contents.trim();
                trimmed.parse::<u64>().map_err(|e| {
                    StoreError::Corrupt(format!("version hint has invalid content {trimmed:?}: {e}"))
                })?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        if hint > 0 && !self.version_path(hint).exists() {
            return Err(StoreError::Corrupt(format!(
                "version hint points at missing metadata v{hint}"
            )));
        }

        let mut version = hint;
        while self.version_path(version + 1).exists() {
            version += 1;
        }

        Ok((version > 0).then_some(version))
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, StoreError> {
        let bytes = fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::Corrupt(format!("missing {}", path.display())),
            _ => e.into(),
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
    }

    fn read_version(&self, version: u64) -> Result<TableMetadata, StoreError> {
        let decoded: TableMetadata = self.read_json(&self.version_path(version))?;
        decoded.resolved(|snapshot| self.load_manifest_list(snapshot.manifest_list().location()))
    }

    fn load_manifest_list(&self, location: &str) -> Result<Arc<ManifestList>, StoreError> {
        if let Some(list) = self.cache.lock().lists.get(location) {
            return Ok(list.clone());
        }

        let file: ManifestListFile = self.read_json(&self.list_path(location)?)?;
        let manifests = file
            .manifests
            .into_iter()
            .map(|id| self.load_manifest(id))
            .collect::<Result<Vec<_>, _>>()?;
        let list = Arc::new(ManifestList::new(
            location.to_string(),
            file.snapshot_id,
            manifests,
        ));

        self.cache
            .lock()
            .lists
            .insert(location.to_string(), list.clone());
        Ok(list)
    }

    fn load_manifest(&self, id: Uuid) -> Result<Arc<Manifest>, StoreError> {
        if let Some(manifest) = self.cache.lock().manifests.get(&id) {
            return Ok(manifest.clone());
        }

        let manifest: Manifest = self.read_json(&self.manifest_path(id))?;
        if manifest.manifest_id() != id {
            return Err(StoreError::Corrupt(format!(
                "manifest file for {id} holds manifest {}",
                manifest.manifest_id()
            )));
        }

        Ok(self
            .cache
            .lock()
            .manifests
            .entry(id)
            .or_insert_with(|| Arc::new(manifest))
            .clone())
    }

    /// Write `metadata` as `version`, after any manifest list it references
    /// that this store has not written or loaded yet. Returns `false` if
    /// another writer published the version first.
    fn persist(&self, version: u64, metadata: &TableMetadata) -> Result<bool, StoreError> {
        fs::create_dir_all(self.metadata_dir())?;
        self.write_manifests(metadata)?;
        self.publish(version, metadata)
    }

    fn write_manifests(&self, metadata: &TableMetadata) -> Result<(), StoreError> {
        for snapshot in metadata.snapshots().history() {
            let list = snapshot.manifest_list();
            if self.cache.lock().lists.contains_key(list.location()) {
                continue;
            }
            if list.snapshot_id() != Some(snapshot.snapshot_id()) {
                return Err(MetadataError::ManifestListMismatch {
                    location: list.location().to_string(),
                    snapshot: snapshot.snapshot_id(),
                    actual: list.snapshot_id(),
                }
                .into());
            }

            for manifest in list.manifests() {
                self.write_manifest(manifest)?;
            }

            let file = ManifestListFile {
                snapshot_id: snapshot.snapshot_id(),
                manifests: list.manifests().iter().map(|m| m.manifest_id()).collect(),
            };
            self.write_new(
                &self.list_path(list.location())?,
                &serde_json::to_vec_pretty(&file)?,
            )?;
            self.cache
                .lock()
                .lists
                .insert(list.location().to_string(), list.clone());
        }
        Ok(())
    }

    fn write_manifest(&self, manifest: &Arc<Manifest>) -> Result<(), StoreError> {
        let id = manifest.manifest_id();
        if self.cache.lock().manifests.contains_key(&id) {
            return Ok(());
        }

        let path = self.manifest_path(id);
        if !path.exists() {
            self.write_new(&path, &serde_json::to_vec_pretty(manifest)?)?;
        }
        self.cache.lock().manifests.insert(id, manifest.clone());
        Ok(())
    }

    /// Write `metadata` as `version` unless that version already exists.
    /// Returns `false` if another writer published it first.
    fn publish(&self, version: u64, metadata: &TableMetadata) -> Result<bool, StoreError> {
        let bytes = serde_json::to_vec_pretty(metadata)?;
        self.write_new(&self.version_path(version), &bytes)
    }

    /// Create `target` holding `bytes`, or return `false` if it exists.
    fn write_new(&self, target: &Path, bytes: &[u8]) -> Result<bool, StoreError> {
        let tmp = self.metadata_dir().join(format!(".{}.tmp", Uuid::new_v4()));
        let linked = write_synced(&tmp, bytes).and_then(|()| fs::hard_link(&tmp, target));
        // The temp file is garbage whatever happened above.
        let _ = fs::remove_file(&tmp);

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn write_hint(&self, version: u64) -> io::Result<()> {
        let dir = self.metadata_dir();
        let tmp = dir.join(format!(".hint-{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, format!("{version}\n"))?;
        fs::rename(&tmp, self.hint_path()).inspect_err(|_| {
            let _ = fs::remove_file(&tmp);
        })
    }

    fn refresh_hint(&self, version: u64) {
        // A stale hint only costs readers a few extra lookups.
        if let Err(e) = self.write_hint(version) {
            warn!(version, error = %e, "failed to update version hint");
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

impl PointerStore for FileSystemPointerStore {
    fn create(&self, metadata: Arc<TableMetadata>) -> Result<(), StoreError> {
        if self.current_version()?.is_some() || !self.persist(1, &metadata)? {
            return Err(StoreError::AlreadyExists {
                location: self.root.display().to_string(),
            });
        }
        self.refresh_hint(1);
        Ok(())
    }

    fn load(&self) -> Result<Option<Arc<TableMetadata>>, StoreError> {
        match self.current_version()? {
            Some(version) => Ok(Some(Arc::new(self.read_version(version)?))),
            None => Ok(None),
        }
    }

    fn compare_and_swap(
        &self,
        expected: Option<SnapshotId>,
        next: Arc<TableMetadata>,
    ) -> Result<SwapOutcome, StoreError> {
        let version = self.current_version()?.ok_or_else(|| {
            StoreError::Corrupt(format!("no table metadata under {}", self.root.display()))
        })?;

        let observed = self.read_version(version)?;
        if observed.current_snapshot_id() != expected {
            return Ok(SwapOutcome::Conflict {
                current: observed.current_snapshot_id(),
            });
        }

        if !self.persist(version + 1, &next)? {
            debug!(version = version + 1, "metadata version published by another writer");
            let current = self.read_version(version + 1)?.current_snapshot_id();
            return Ok(SwapOutcome::Conflict { current });
        }

        self.refresh_hint(version + 1);
        Ok(SwapOutcome::Swapped)
    }
}
